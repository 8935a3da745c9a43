use std::sync::Arc;

use folio::application::content::ContentService;
use folio::application::error::PipelineError;
use folio::application::loader::InMemorySource;
use folio::application::render::{
    CompileError, RenderPipeline, RenderPipelineConfig, WarningKind, heading_anchors,
};
use folio::domain::document::{Document, DocumentKind};

fn service(documents: Vec<Document>) -> ContentService {
    let source: InMemorySource = documents.into_iter().collect();
    let renderer = RenderPipeline::new(RenderPipelineConfig {
        toolchain_path: None,
        fragments: vec!["Chart".to_string()],
    });
    ContentService::new(Arc::new(source), Arc::new(renderer))
}

#[tokio::test]
async fn renders_artifact_and_metadata_together() {
    let body = "# Title\n\n## Part\n\n## Part\n\nSome words here.\n";
    let content = service(vec![Document::new(
        "hello",
        body,
        "2023-06-01T08:30:00+02:00",
    )]);

    let rendered = content
        .render(DocumentKind::Post, "hello")
        .await
        .expect("rendered");

    assert_eq!(rendered.metadata.slug, "hello");
    assert_eq!(rendered.metadata.date, "2023-06-01T06:30:00.000Z");
    assert_eq!(rendered.metadata.reading_time, "1 min");
    assert!(rendered.warnings.is_empty());

    let toc: Vec<_> = rendered.metadata.toc.iter().map(|e| e.slug.clone()).collect();
    let anchors: Vec<_> = heading_anchors(body).into_iter().map(|a| a.slug).collect();
    assert_eq!(toc, anchors);
    assert_eq!(toc, vec!["title", "part", "part-1"]);
    for slug in &toc {
        assert!(rendered.artifact.markup.contains(&format!("id=\"{slug}\"")));
    }
}

#[tokio::test]
async fn date_warning_is_merged_with_render_warnings() {
    let content = service(vec![Document::new(
        "dated",
        "```klingon\nqapla'\n```\n",
        "sometime last spring",
    )]);

    let rendered = content
        .render(DocumentKind::Post, "dated")
        .await
        .expect("rendered");

    let kinds: Vec<_> = rendered.warnings.iter().map(|w| w.kind).collect();
    assert_eq!(kinds, vec![WarningKind::CodeLanguage, WarningKind::Date]);
    assert_eq!(rendered.metadata.date, "sometime last spring");
}

#[tokio::test]
async fn missing_document_is_not_found() {
    let content = service(vec![
        Document::new("about", "page", "2023-01-01").with_kind(DocumentKind::Page),
    ]);

    let err = content
        .render(DocumentKind::Post, "about")
        .await
        .expect_err("posts and pages are separate");

    assert!(
        matches!(&err, PipelineError::NotFound { kind: DocumentKind::Post, slug } if slug == "about"),
        "{err:?}"
    );
    assert_eq!(err.to_string(), "post `about` not found");
}

#[tokio::test]
async fn batch_keeps_input_order_and_isolates_failures() {
    let content = service(vec![
        Document::new("first", "# One\n", "2023-01-01"),
        Document::new("broken", "Intro\n\n<Tweet id=\"1\" />\n", "2023-01-01"),
        Document::new("third", "# Three\n\n<Chart />\n", "2023-01-01"),
    ]);

    let slugs = ["third", "missing", "broken", "first"]
        .map(String::from)
        .to_vec();
    let results = content.render_many(DocumentKind::Post, slugs, 2).await;

    let order: Vec<_> = results.iter().map(|(slug, _)| slug.as_str()).collect();
    assert_eq!(order, vec!["third", "missing", "broken", "first"]);

    assert!(results[0].1.is_ok());
    assert!(matches!(results[1].1, Err(PipelineError::NotFound { .. })));
    match &results[2].1 {
        Err(PipelineError::Compile { slug, source }) => {
            assert_eq!(slug, "broken");
            assert!(matches!(source, CompileError::UnresolvedFragment { .. }));
        }
        other => panic!("expected compile error, got {other:?}"),
    }
    let location = results[2]
        .1
        .as_ref()
        .err()
        .and_then(PipelineError::location);
    assert_eq!(location.map(|l| l.line), Some(3));
    assert!(results[3].1.is_ok());
}

#[tokio::test]
async fn batch_with_zero_concurrency_still_progresses() {
    let content = service(vec![Document::new("only", "text\n", "2023-01-01")]);

    let results = content
        .render_many(DocumentKind::Post, vec!["only".to_string()], 0)
        .await;

    assert_eq!(results.len(), 1);
    assert!(results[0].1.is_ok());
}
