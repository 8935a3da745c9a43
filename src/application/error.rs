use std::error::Error as StdError;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::{
    application::{
        loader::LoadError,
        render::{CompileError, SourceLocation},
    },
    domain::document::DocumentKind,
    infra::error::InfraError,
};

/// Diagnostic chain attached to error responses and logged by the response
/// middleware.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// Why one document could not be delivered.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{} `{slug}` not found", .kind.as_str())]
    NotFound { kind: DocumentKind, slug: String },
    #[error(transparent)]
    Load(LoadError),
    #[error("failed to compile `{slug}`: {source}")]
    Compile { slug: String, source: CompileError },
    #[error("render worker failed: {0}")]
    Join(String),
}

impl PipelineError {
    pub fn location(&self) -> Option<SourceLocation> {
        match self {
            PipelineError::Compile { source, .. } => source.location(),
            _ => None,
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::NotFound { .. } => StatusCode::NOT_FOUND,
            PipelineError::Compile { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            PipelineError::Load(_) => StatusCode::BAD_GATEWAY,
            PipelineError::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn presentation_message(&self) -> &'static str {
        match self {
            PipelineError::NotFound { .. } => "Document not found",
            PipelineError::Compile { .. } => "Document could not be compiled",
            PipelineError::Load(_) => "Content source unavailable",
            PipelineError::Join(_) => "Unexpected error occurred",
        }
    }
}

impl From<LoadError> for PipelineError {
    fn from(error: LoadError) -> Self {
        match error {
            LoadError::NotFound { kind, slug } => PipelineError::NotFound { kind, slug },
            other => PipelineError::Load(other),
        }
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let report = ErrorReport::from_error("application::error::PipelineError", status, &self);
        let body = json!({
            "error": self.presentation_message(),
            "detail": self.to_string(),
            "location": self.location(),
        });
        let mut response = (status, Json(body)).into_response();
        report.attach(&mut response);
        response
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_not_found_becomes_pipeline_not_found() {
        let error = PipelineError::from(LoadError::NotFound {
            kind: DocumentKind::Post,
            slug: "ghost".to_string(),
        });

        assert!(matches!(error, PipelineError::NotFound { .. }));
        assert_eq!(error.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn compile_errors_map_to_unprocessable_with_location() {
        let error = PipelineError::Compile {
            slug: "post".to_string(),
            source: CompileError::UnresolvedFragment {
                identifier: "Tweet".to_string(),
                location: SourceLocation::new(4, 1),
            },
        };

        assert_eq!(error.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(error.location(), Some(SourceLocation::new(4, 1)));

        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let report = response.extensions().get::<ErrorReport>().expect("report");
        assert_eq!(report.messages.len(), 2);
    }

    #[test]
    fn transport_failures_are_bad_gateway() {
        let error = PipelineError::from(LoadError::transport("connection refused"));
        assert_eq!(error.status_code(), StatusCode::BAD_GATEWAY);
    }
}
