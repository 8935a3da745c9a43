//! Markdown rendering pipeline.
//!
//! The pipeline is pure: it accepts a document, produces deterministic markup
//! plus a fragment-binding manifest, and surfaces structured errors. Loading
//! documents and recording outcomes happen in the caller.

mod service;
mod types;

pub use service::{
    FragmentRegistry, RenderConfigError, RenderPipeline, RenderPipelineConfig, RenderTransform,
    SourceTransform, configure_render_service, heading_anchors, render_service,
};
pub use types::{
    ArtifactStats, CompileError, CompiledArtifact, FragmentBinding, FragmentKind, HeadingAnchor,
    RenderOutput, RenderService, RenderWarning, SourceLocation, WarningKind,
};
