//! HTTP document source backed by the content API.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url, header::AUTHORIZATION};
use tracing::{debug, warn};

use crate::application::loader::{DocumentSource, LoadError};
use crate::config::SourceSettings;
use crate::domain::document::{Document, DocumentKind};
use crate::infra::error::InfraError;

/// Fetches `GET {base}/blog/{slug}` for posts and `GET {base}/page/{slug}` for
/// pages. One request per fetch, no retries.
#[derive(Clone, Debug)]
pub struct HttpContentSource {
    client: Client,
    base: Url,
    token: Option<String>,
}

impl HttpContentSource {
    pub fn new(base: Url, settings: &SourceSettings) -> Result<Self, InfraError> {
        if base.cannot_be_a_base() {
            return Err(InfraError::configuration(format!(
                "content API URL `{base}` cannot carry a path"
            )));
        }
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(settings.timeout)
            .build()
            .map_err(|err| InfraError::http_client(err.to_string()))?;
        Ok(Self {
            client,
            base,
            token: settings.token.clone(),
        })
    }

    /// Build from settings; `None` when no base URL is configured.
    pub fn from_settings(settings: &SourceSettings) -> Result<Option<Self>, InfraError> {
        settings
            .base_url
            .clone()
            .map(|base| Self::new(base, settings))
            .transpose()
    }

    pub fn user_agent() -> &'static str {
        concat!("folio/", env!("CARGO_PKG_VERSION"))
    }

    fn document_url(&self, kind: DocumentKind, slug: &str) -> Url {
        let collection = match kind {
            DocumentKind::Post => "blog",
            DocumentKind::Page => "page",
        };
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(collection).push(slug);
        }
        url
    }
}

#[async_trait]
impl DocumentSource for HttpContentSource {
    async fn fetch(&self, kind: DocumentKind, slug: &str) -> Result<Document, LoadError> {
        let started_at = Instant::now();
        let url = self.document_url(kind, slug);

        let mut request = self.client.get(url.clone());
        if let Some(token) = self.token.as_deref() {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = request.send().await.map_err(|err| {
            warn!(
                target = "infra::content_api",
                op = "fetch",
                result = "error",
                url = %url,
                error = %err,
                "Content API request failed"
            );
            LoadError::transport(err.to_string())
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(LoadError::NotFound {
                kind,
                slug: slug.to_string(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| LoadError::transport(err.to_string()))?;
        if !status.is_success() {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            return Err(LoadError::transport(format!("status {status} body {text}")));
        }

        let mut document: Document = serde_json::from_slice(&bytes)
            .map_err(|err| LoadError::decode(format!("failed to parse body: {err}")))?;
        document.kind = kind;

        debug!(
            target = "infra::content_api",
            op = "fetch",
            result = "ok",
            kind = kind.as_str(),
            slug,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            bytes = bytes.len(),
            "Document fetched"
        );

        Ok(document)
    }
}
