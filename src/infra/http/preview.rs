use std::{
    num::NonZeroUsize,
    sync::{Arc, Mutex, MutexGuard},
};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use lru::LruCache;
use metrics::{counter, gauge};
use serde_json::json;
use tracing::warn;

use crate::{
    application::{
        content::{ContentService, RenderedDocument},
        error::PipelineError,
    },
    domain::document::DocumentKind,
};

use super::{
    METRIC_PREVIEW_CACHE_ENTRIES, METRIC_PREVIEW_CACHE_HIT_TOTAL, METRIC_PREVIEW_CACHE_MISS_TOTAL,
    middleware::{log_responses, set_request_context},
};

const SOURCE: &str = "infra::http::preview";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    kind: DocumentKind,
    slug: String,
    body_hash: String,
}

/// Rendered documents memoized per `(kind, slug, body hash)`. An edited body
/// hashes differently, so stale entries are never served; they just age out.
pub struct PreviewCache {
    entries: Mutex<LruCache<CacheKey, Arc<RenderedDocument>>>,
}

impl PreviewCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self, op: &'static str) -> MutexGuard<'_, LruCache<CacheKey, Arc<RenderedDocument>>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(
                    op,
                    target_module = SOURCE,
                    lock_kind = "mutex.lock",
                    result = "poisoned_recovered",
                    "Recovered from poisoned preview cache lock"
                );
                poisoned.into_inner()
            }
        }
    }

    fn get(&self, key: &CacheKey) -> Option<Arc<RenderedDocument>> {
        let hit = self.lock("get").get(key).cloned();
        if hit.is_some() {
            counter!(METRIC_PREVIEW_CACHE_HIT_TOTAL).increment(1);
        } else {
            counter!(METRIC_PREVIEW_CACHE_MISS_TOTAL).increment(1);
        }
        hit
    }

    fn put(&self, key: CacheKey, rendered: Arc<RenderedDocument>) {
        let mut entries = self.lock("put");
        entries.put(key, rendered);
        gauge!(METRIC_PREVIEW_CACHE_ENTRIES).set(entries.len() as f64);
    }

    pub fn len(&self) -> usize {
        self.lock("len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone)]
pub struct PreviewState {
    pub content: Arc<ContentService>,
    pub cache: Arc<PreviewCache>,
}

impl PreviewState {
    pub fn new(content: Arc<ContentService>, cache_capacity: NonZeroUsize) -> Self {
        Self {
            content,
            cache: Arc::new(PreviewCache::new(cache_capacity)),
        }
    }
}

pub fn build_router(state: PreviewState) -> Router {
    Router::new()
        .route("/render/posts/{slug}", get(render_post))
        .route("/render/pages/{slug}", get(render_page))
        .route("/health", get(health))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn render_post(State(state): State<PreviewState>, Path(slug): Path<String>) -> Response {
    render_cached(&state, DocumentKind::Post, &slug).await
}

async fn render_page(State(state): State<PreviewState>, Path(slug): Path<String>) -> Response {
    render_cached(&state, DocumentKind::Page, &slug).await
}

async fn render_cached(state: &PreviewState, kind: DocumentKind, slug: &str) -> Response {
    match lookup_or_render(state, kind, slug).await {
        Ok(rendered) => Json(rendered.as_ref()).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn lookup_or_render(
    state: &PreviewState,
    kind: DocumentKind,
    slug: &str,
) -> Result<Arc<RenderedDocument>, PipelineError> {
    let document = state.content.load(kind, slug).await?;
    let key = CacheKey {
        kind,
        slug: document.slug.clone(),
        body_hash: document.body_hash(),
    };

    if let Some(rendered) = state.cache.get(&key) {
        return Ok(rendered);
    }

    let rendered = Arc::new(state.content.render_document(document).await?);
    state.cache.put(key, Arc::clone(&rendered));
    Ok(rendered)
}

async fn health() -> Response {
    (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response()
}
