//! Document sources consulted before rendering.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

use crate::domain::document::{Document, DocumentKind};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("{} `{slug}` not found", .kind.as_str())]
    NotFound { kind: DocumentKind, slug: String },
    #[error("content source request failed: {message}")]
    Transport { message: String },
    #[error("content source returned an unreadable document: {message}")]
    Decode { message: String },
}

impl LoadError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }
}

/// Fetches one document by kind and slug. Implementations do not retry.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn fetch(&self, kind: DocumentKind, slug: &str) -> Result<Document, LoadError>;
}

#[async_trait]
impl<T> DocumentSource for Arc<T>
where
    T: DocumentSource + ?Sized,
{
    async fn fetch(&self, kind: DocumentKind, slug: &str) -> Result<Document, LoadError> {
        (**self).fetch(kind, slug).await
    }
}

/// Process-local source keyed by `(kind, slug)`.
#[derive(Debug, Default)]
pub struct InMemorySource {
    documents: DashMap<(DocumentKind, String), Document>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a document, returning the previous revision.
    pub fn insert(&self, document: Document) -> Option<Document> {
        self.documents
            .insert((document.kind, document.slug.clone()), document)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl FromIterator<Document> for InMemorySource {
    fn from_iter<I: IntoIterator<Item = Document>>(iter: I) -> Self {
        let source = Self::new();
        for document in iter {
            source.insert(document);
        }
        source
    }
}

#[async_trait]
impl DocumentSource for InMemorySource {
    async fn fetch(&self, kind: DocumentKind, slug: &str) -> Result<Document, LoadError> {
        self.documents
            .get(&(kind, slug.to_string()))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| LoadError::NotFound {
                kind,
                slug: slug.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_source_separates_posts_and_pages() {
        let source: InMemorySource = [
            Document::new("about", "post body", "2022-01-01"),
            Document::new("about", "page body", "2022-01-01").with_kind(DocumentKind::Page),
        ]
        .into_iter()
        .collect();

        let post = source.fetch(DocumentKind::Post, "about").await.expect("post");
        let page = source.fetch(DocumentKind::Page, "about").await.expect("page");

        assert_eq!(source.len(), 2);
        assert_eq!(post.body, "post body");
        assert_eq!(page.body, "page body");
    }

    #[tokio::test]
    async fn missing_document_is_not_found() {
        let source = InMemorySource::new();
        let err = source
            .fetch(DocumentKind::Page, "ghost")
            .await
            .expect_err("missing");

        assert!(matches!(err, LoadError::NotFound { ref slug, .. } if slug == "ghost"));
        assert_eq!(err.to_string(), "page `ghost` not found");
    }
}
