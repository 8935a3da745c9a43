use std::{
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode},
};
use serde_json::Value;
use tower::ServiceExt;

use folio::application::content::ContentService;
use folio::application::loader::{DocumentSource, InMemorySource, LoadError};
use folio::application::render::{RenderPipeline, RenderPipelineConfig};
use folio::domain::document::{Document, DocumentKind};
use folio::infra::http::{PreviewState, build_router};

/// Counts fetches so cache behaviour is observable, and fails on demand.
struct CountingSource {
    inner: InMemorySource,
    fetches: AtomicUsize,
}

#[async_trait]
impl DocumentSource for CountingSource {
    async fn fetch(&self, kind: DocumentKind, slug: &str) -> Result<Document, LoadError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if slug == "offline" {
            return Err(LoadError::transport("connection refused"));
        }
        self.inner.fetch(kind, slug).await
    }
}

fn app() -> (Router, PreviewState, Arc<CountingSource>) {
    let source = Arc::new(CountingSource {
        inner: [
            Document::new("hello", "# Hello\n\nWorld.\n", "2023-01-01"),
            Document::new("broken", "Intro\n\n<Tweet id=\"1\" />\n", "2023-01-01"),
            Document::new("about", "<p style=\"color: red\">About</p>\n", "2023-01-01")
                .with_kind(DocumentKind::Page),
        ]
        .into_iter()
        .collect(),
        fetches: AtomicUsize::new(0),
    });
    let renderer = RenderPipeline::new(RenderPipelineConfig::default());
    let content = Arc::new(ContentService::new(
        Arc::clone(&source) as Arc<dyn DocumentSource>,
        Arc::new(renderer),
    ));
    let capacity = NonZeroUsize::new(8).expect("non-zero");
    let state = PreviewState::new(content, capacity);
    (build_router(state.clone()), state, source)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build");
    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("router should respond");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should collect");
    let body = serde_json::from_slice(&bytes).expect("json body");
    (status, body)
}

#[tokio::test]
async fn renders_post_and_memoizes_by_body() {
    let (app, state, source) = app();

    let (status, first) = get(&app, "/render/posts/hello").await;
    assert_eq!(status, StatusCode::OK);
    assert!(
        first["artifact"]["markup"]
            .as_str()
            .is_some_and(|markup| markup.contains("id=\"hello\""))
    );
    assert_eq!(first["metadata"]["slug"], "hello");
    assert_eq!(first["metadata"]["toc"][0]["slug"], "hello");

    let (status, second) = get(&app, "/render/posts/hello").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first, second);

    // Every request revalidates against the source; only rendering is cached.
    assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    assert_eq!(state.cache.len(), 1);
}

#[tokio::test]
async fn edited_body_is_rendered_fresh() {
    let (app, state, source) = app();

    let (_, before) = get(&app, "/render/posts/hello").await;
    source
        .inner
        .insert(Document::new("hello", "# Hello again\n", "2023-01-01"));
    let (status, after) = get(&app, "/render/posts/hello").await;

    assert_eq!(status, StatusCode::OK);
    assert_ne!(before["artifact"]["digest"], after["artifact"]["digest"]);
    assert_eq!(after["metadata"]["toc"][0]["slug"], "hello-again");
    assert_eq!(state.cache.len(), 2);
}

#[tokio::test]
async fn pages_use_the_page_route() {
    let (app, _, _) = app();

    let (status, body) = get(&app, "/render/pages/about").await;
    assert_eq!(status, StatusCode::OK);
    assert!(
        body["artifact"]["markup"]
            .as_str()
            .is_some_and(|markup| markup.contains("style=\"color: red\""))
    );

    let (status, _) = get(&app, "/render/posts/about").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn missing_document_is_404() {
    let (app, state, _) = app();

    let (status, body) = get(&app, "/render/posts/nope").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Document not found");
    assert_eq!(body["detail"], "post `nope` not found");
    assert!(state.cache.is_empty());
}

#[tokio::test]
async fn compile_failure_is_422_with_location() {
    let (app, state, _) = app();

    let (status, body) = get(&app, "/render/posts/broken").await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "Document could not be compiled");
    assert_eq!(body["location"]["line"], 3);
    assert_eq!(body["location"]["column"], 1);
    assert!(state.cache.is_empty());
}

#[tokio::test]
async fn source_failure_is_502() {
    let (app, _, _) = app();

    let (status, body) = get(&app, "/render/posts/offline").await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "Content source unavailable");
    assert!(body["location"].is_null());
}

#[tokio::test]
async fn health_reports_ok() {
    let (app, _, _) = app();

    let (status, body) = get(&app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}
