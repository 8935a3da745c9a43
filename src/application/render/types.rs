use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::document::Document;

/// 1-indexed position in the source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

impl SourceLocation {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Construct families that can degrade in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    Footnote,
    Math,
    CodeTitle,
    CodeLanguage,
    Fragment,
    Link,
    Date,
}

impl WarningKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WarningKind::Footnote => "footnote",
            WarningKind::Math => "math",
            WarningKind::CodeTitle => "code_title",
            WarningKind::CodeLanguage => "code_language",
            WarningKind::Fragment => "fragment",
            WarningKind::Link => "link",
            WarningKind::Date => "date",
        }
    }
}

/// A localized construct that was replaced by a safe fallback. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderWarning {
    pub kind: WarningKind,
    pub message: String,
    pub location: Option<SourceLocation>,
}

/// A heading and the anchor slug the renderer gives it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadingAnchor {
    pub level: u8,
    pub text: String,
    pub slug: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentKind {
    Image,
    Custom,
}

/// A placeholder in the artifact the host page must supply a renderer for.
///
/// `slot` matches the `data-fragment-slot` attribute of the placeholder
/// element. For images `identifier` is the source URL; for custom fragments it
/// is the component name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentBinding {
    pub slot: String,
    pub kind: FragmentKind,
    pub identifier: String,
    pub parameters: BTreeMap<String, String>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ArtifactStats {
    pub headings: u32,
    pub code_blocks: u32,
    pub math_spans: u32,
    pub footnotes: u32,
    pub fragments: u32,
}

/// Render-ready output of one document: sanitized static markup plus the
/// ordered fragment bindings it expects the host to supply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledArtifact {
    pub markup: String,
    pub bindings: Vec<FragmentBinding>,
    /// Hex SHA-256 of `markup`.
    pub digest: String,
    pub contains_code: bool,
    pub contains_math: bool,
    #[serde(default)]
    pub stats: ArtifactStats,
}

impl CompiledArtifact {
    /// Serialized fragment-binding manifest handed to the host page.
    pub fn manifest_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.bindings)
    }
}

/// Result of a successful pipeline run. Warnings describe degraded constructs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderOutput {
    pub artifact: CompiledArtifact,
    pub warnings: Vec<RenderWarning>,
}

/// The bundler could not produce a usable artifact. Terminal for the document
/// only; callers render the document as unavailable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("unresolved fragment `{identifier}` at {location}")]
    UnresolvedFragment {
        identifier: String,
        location: SourceLocation,
    },
    #[error("markup generation failed: {message}")]
    Markup { message: String },
    #[error("bundling toolchain failed: {message}")]
    Toolchain { message: String },
}

impl CompileError {
    pub fn location(&self) -> Option<SourceLocation> {
        match self {
            CompileError::UnresolvedFragment { location, .. } => Some(*location),
            _ => None,
        }
    }

    pub(crate) fn markup(message: impl Into<String>) -> Self {
        Self::Markup {
            message: message.into(),
        }
    }
}

/// Trait exposed by the rendering pipeline. Implementations must be pure and
/// deterministic: given the same document, they return identical outputs or errors.
pub trait RenderService: Send + Sync {
    fn render(&self, document: &Document) -> Result<RenderOutput, CompileError>;
}
