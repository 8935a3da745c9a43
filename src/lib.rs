//! Deterministic Markdown rendering for a content-driven personal site.
//!
//! A document is loaded from the content API (or a local file), compiled into
//! sanitized static markup plus a fragment-binding manifest, and paired with
//! metadata derived from its raw text.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
