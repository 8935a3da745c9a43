//! Application services: loading, rendering and metadata extraction.

pub mod content;
pub mod error;
pub mod loader;
pub mod metadata;
pub mod render;
