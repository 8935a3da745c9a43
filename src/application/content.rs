//! Load → (render ‖ metadata) orchestration for one or many documents.

use std::{sync::Arc, time::Instant};

use futures::{StreamExt, stream};
use metrics::{counter, histogram};
use serde::Serialize;
use tokio::task;
use tracing::{debug, info, warn};

use crate::application::{
    error::PipelineError,
    loader::DocumentSource,
    metadata::{Metadata, extract_metadata},
    render::{CompiledArtifact, RenderService, RenderWarning},
};
use crate::domain::document::{Document, DocumentKind};

pub(crate) const METRIC_RENDER_TOTAL: &str = "folio_render_total";
pub(crate) const METRIC_RENDER_FAILED_TOTAL: &str = "folio_render_failed_total";
pub(crate) const METRIC_RENDER_MS: &str = "folio_render_ms";
pub(crate) const METRIC_RENDER_WARNINGS_TOTAL: &str = "folio_render_warnings_total";

const SOURCE: &str = "application::content";

/// Everything a page needs to display one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedDocument {
    pub artifact: CompiledArtifact,
    pub metadata: Metadata,
    pub warnings: Vec<RenderWarning>,
}

#[derive(Clone)]
pub struct ContentService {
    source: Arc<dyn DocumentSource>,
    renderer: Arc<dyn RenderService>,
}

impl ContentService {
    pub fn new(source: Arc<dyn DocumentSource>, renderer: Arc<dyn RenderService>) -> Self {
        Self { source, renderer }
    }

    pub async fn render(
        &self,
        kind: DocumentKind,
        slug: &str,
    ) -> Result<RenderedDocument, PipelineError> {
        let document = self.load(kind, slug).await?;
        self.render_document(document).await
    }

    pub async fn load(&self, kind: DocumentKind, slug: &str) -> Result<Document, PipelineError> {
        let document = self.source.fetch(kind, slug).await.inspect_err(|err| {
            warn!(
                target = SOURCE,
                op = "fetch",
                result = "error",
                kind = kind.as_str(),
                slug,
                error = %err,
                "Document load failed"
            );
        })?;
        Ok(document)
    }

    /// Render an already loaded document. Rendering and metadata extraction
    /// run on separate blocking workers and are joined before returning.
    pub async fn render_document(
        &self,
        document: Document,
    ) -> Result<RenderedDocument, PipelineError> {
        let started_at = Instant::now();
        let kind = document.kind.as_str();
        let slug = document.slug.clone();
        let document = Arc::new(document);

        let render = {
            let renderer = Arc::clone(&self.renderer);
            let document = Arc::clone(&document);
            task::spawn_blocking(move || renderer.render(&document))
        };
        let metadata = {
            let document = Arc::clone(&document);
            task::spawn_blocking(move || extract_metadata(&document))
        };
        let (render, metadata) = tokio::join!(render, metadata);

        let result = match (render, metadata) {
            (Ok(Ok(output)), Ok(extracted)) => {
                let mut warnings = output.warnings;
                warnings.extend(extracted.warnings);
                Ok(RenderedDocument {
                    artifact: output.artifact,
                    metadata: extracted.metadata,
                    warnings,
                })
            }
            (Ok(Err(source)), _) => Err(PipelineError::Compile {
                slug: slug.clone(),
                source,
            }),
            (Err(err), _) | (_, Err(err)) => Err(PipelineError::Join(err.to_string())),
        };

        let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;
        histogram!(METRIC_RENDER_MS, "kind" => kind).record(elapsed_ms);
        counter!(METRIC_RENDER_TOTAL, "kind" => kind).increment(1);

        match &result {
            Ok(rendered) => {
                counter!(METRIC_RENDER_WARNINGS_TOTAL, "kind" => kind)
                    .increment(rendered.warnings.len() as u64);
                info!(
                    target = SOURCE,
                    op = "render",
                    result = "ok",
                    kind,
                    slug = %slug,
                    elapsed_ms = elapsed_ms as u64,
                    warnings = rendered.warnings.len(),
                    digest = %rendered.artifact.digest,
                    "Document rendered"
                );
            }
            Err(err) => {
                counter!(METRIC_RENDER_FAILED_TOTAL, "kind" => kind).increment(1);
                warn!(
                    target = SOURCE,
                    op = "render",
                    result = "error",
                    kind,
                    slug = %slug,
                    elapsed_ms = elapsed_ms as u64,
                    location = ?err.location(),
                    error = %err,
                    "Document render failed"
                );
            }
        }

        result
    }

    /// Render many documents with at most `concurrency` in flight. Results
    /// come back in input order; one failure never affects the others.
    pub async fn render_many(
        &self,
        kind: DocumentKind,
        slugs: Vec<String>,
        concurrency: usize,
    ) -> Vec<(String, Result<RenderedDocument, PipelineError>)> {
        debug!(
            target = SOURCE,
            op = "render_many",
            count = slugs.len(),
            concurrency,
            "Batch started"
        );

        let mut results: Vec<_> = stream::iter(slugs.into_iter().enumerate())
            .map(|(index, slug)| async move {
                let result = self.render(kind, &slug).await;
                (index, slug, result)
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        results.sort_by_key(|(index, _, _)| *index);
        results
            .into_iter()
            .map(|(_, slug, result)| (slug, result))
            .collect()
    }
}
