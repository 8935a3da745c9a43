mod bundle;
mod config;
mod fragments;
mod highlight;
mod math;
mod render_tree;
mod source;
mod toolchain;
mod tree;

use std::{path::PathBuf, sync::Arc, time::Instant};

use comrak::{Arena, nodes::NodeValue, parse_document};
use once_cell::sync::{Lazy, OnceCell};
use syntect::{html::ClassStyle, parsing::SyntaxSet};
use thiserror::Error;
use tracing::{debug, info};

use crate::application::render::types::{
    CompileError, HeadingAnchor, RenderOutput, RenderService,
};
use crate::domain::document::{Document, DocumentKind};

pub use bundle::FragmentRegistry;
pub use render_tree::RenderTransform;
pub use source::SourceTransform;

use bundle::Bundler;
use config::{build_page_sanitizer, build_post_sanitizer, default_options};
use render_tree::RenderContext;
use toolchain::Toolchain;
use tree::{Diagnostics, RenderTree, SyntaxTree, identify_headings};

/// Comrak-based pipeline: source transforms, render transforms, then the
/// bundler (format, sanitize, restore math, stamp heading ids, resolve
/// fragments, optional external toolchain).
pub struct RenderPipeline {
    options: comrak::Options<'static>,
    syntax_set: SyntaxSet,
    class_style: ClassStyle,
    post_sanitizer: ammonia::Builder<'static>,
    page_sanitizer: ammonia::Builder<'static>,
    registry: FragmentRegistry,
    toolchain: Option<Toolchain>,
}

impl RenderPipeline {
    /// Highlighting emits `syntax-` prefixed CSS classes.
    pub fn new(config: RenderPipelineConfig) -> Self {
        Self {
            options: default_options(),
            syntax_set: SyntaxSet::load_defaults_newlines(),
            class_style: ClassStyle::SpacedPrefixed { prefix: "syntax-" },
            post_sanitizer: build_post_sanitizer(),
            page_sanitizer: build_page_sanitizer(),
            registry: FragmentRegistry::new(config.fragments),
            toolchain: config.toolchain_path.map(Toolchain::new),
        }
    }

    pub fn registry(&self) -> &FragmentRegistry {
        &self.registry
    }

    pub fn toolchain_path(&self) -> Option<&std::path::Path> {
        self.toolchain.as_ref().map(Toolchain::program)
    }

    fn sanitizer_for(&self, kind: DocumentKind) -> &ammonia::Builder<'static> {
        match kind {
            DocumentKind::Page => &self.page_sanitizer,
            DocumentKind::Post => &self.post_sanitizer,
        }
    }
}

impl Default for RenderPipeline {
    fn default() -> Self {
        Self::new(RenderPipelineConfig::default())
    }
}

impl RenderService for RenderPipeline {
    fn render(&self, document: &Document) -> Result<RenderOutput, CompileError> {
        let started_at = Instant::now();
        let slug = document.slug.as_str();
        let arena = Arena::new();
        let root = parse_document(&arena, &document.body, &self.options);
        let alloc = |value: NodeValue| &*arena.alloc(value.into());
        let mut diagnostics = Diagnostics::new(slug);

        let mut syntax = SyntaxTree::new(root);
        for stage in SourceTransform::ORDER {
            debug!(
                target = "application::render::pipeline",
                slug,
                stage = stage.name(),
                "source transform"
            );
            stage.apply(&mut syntax, &mut diagnostics);
        }

        let mut tree = RenderTree::from(syntax);
        let body_digest = bundle::digest(&document.body);
        let context = RenderContext {
            syntax_set: &self.syntax_set,
            class_style: &self.class_style,
            alloc: &alloc,
            math_nonce: &body_digest[..16],
        };
        for stage in RenderTransform::ORDER {
            debug!(
                target = "application::render::pipeline",
                slug,
                stage = stage.name(),
                "render transform"
            );
            stage.apply(&mut tree, &context, &mut diagnostics);
        }

        let bundler = Bundler {
            options: &self.options,
            sanitizer: self.sanitizer_for(document.kind),
            registry: &self.registry,
            toolchain: self.toolchain.as_ref(),
        };
        let artifact = bundler.bundle(slug, tree)?;
        let warnings = diagnostics.into_warnings();

        info!(
            target = "application::render::pipeline",
            slug,
            kind = document.kind.as_str(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            bytes = artifact.markup.len(),
            bindings = artifact.bindings.len(),
            warnings = warnings.len(),
            "Document compiled"
        );

        Ok(RenderOutput { artifact, warnings })
    }
}

/// Headings of a Markdown body in document order with the anchor slugs the
/// pipeline assigns them. Runs the same source transforms as a render so
/// heading text (and therefore every slug) matches the rendered ids.
pub fn heading_anchors(markdown: &str) -> Vec<HeadingAnchor> {
    let options = default_options();
    let arena = Arena::new();
    let root = parse_document(&arena, markdown, &options);
    let mut syntax = SyntaxTree::new(root);
    let mut diagnostics = Diagnostics::silent();
    for stage in SourceTransform::ORDER {
        stage.apply(&mut syntax, &mut diagnostics);
    }

    identify_headings(syntax.root)
        .into_iter()
        .map(|(_, anchor)| anchor)
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct RenderPipelineConfig {
    /// External bundler; `None` keeps the built-in static markup.
    pub toolchain_path: Option<PathBuf>,
    /// Component names the host page can hydrate.
    pub fragments: Vec<String>,
}

impl From<&crate::config::RenderSettings> for RenderPipelineConfig {
    fn from(settings: &crate::config::RenderSettings) -> Self {
        Self {
            toolchain_path: settings.toolchain_path.clone(),
            fragments: settings.fragments.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RenderConfigError {
    #[error("render service already configured")]
    AlreadyConfigured,
}

static RENDER_PIPELINE_CONFIG: OnceCell<RenderPipelineConfig> = OnceCell::new();

static RENDER_SERVICE: Lazy<Arc<RenderPipeline>> = Lazy::new(|| {
    let config = RENDER_PIPELINE_CONFIG.get().cloned().unwrap_or_default();
    Arc::new(RenderPipeline::new(config))
});

/// Must be called before the first [`render_service`] access to take effect.
pub fn configure_render_service(config: RenderPipelineConfig) -> Result<(), RenderConfigError> {
    RENDER_PIPELINE_CONFIG
        .set(config)
        .map_err(|_| RenderConfigError::AlreadyConfigured)
}

/// Shared pipeline instance, initialised on first use.
pub fn render_service() -> Arc<RenderPipeline> {
    Arc::clone(&RENDER_SERVICE)
}
