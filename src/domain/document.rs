//! Author documents as delivered by the content API.

use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};

/// Which content collection a document belongs to. Selects the API route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    #[default]
    Post,
    Page,
}

impl DocumentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentKind::Post => "post",
            DocumentKind::Page => "page",
        }
    }
}

/// One author-authored content record. The body is the single source of truth
/// for every artifact derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    #[serde(alias = "Slug")]
    pub slug: String,
    #[serde(alias = "Body")]
    pub body: String,
    #[serde(alias = "CreatedAt")]
    pub created_at: String,
    #[serde(default, alias = "ModifiedAt")]
    pub modified_at: Option<String>,
    #[serde(default, alias = "Published")]
    pub published: bool,
    #[serde(
        default,
        alias = "FeaturedImage",
        deserialize_with = "empty_string_as_none"
    )]
    pub feature_image: Option<String>,
    #[serde(default)]
    pub kind: DocumentKind,
}

impl Document {
    pub fn new(
        slug: impl Into<String>,
        body: impl Into<String>,
        created_at: impl Into<String>,
    ) -> Self {
        Self {
            slug: slug.into(),
            body: body.into(),
            created_at: created_at.into(),
            modified_at: None,
            published: true,
            feature_image: None,
            kind: DocumentKind::Post,
        }
    }

    pub fn with_kind(mut self, kind: DocumentKind) -> Self {
        self.kind = kind;
        self
    }

    /// Hex SHA-256 of the body. Hosts memoize artifacts per `(slug, body_hash)`.
    pub fn body_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.body.as_bytes());
        hex::encode(hasher.finalize())
    }
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|image| !image.trim().is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_api_field_names() {
        let json = r##"{
            "Slug": "hello-world",
            "CreatedAt": "2022-03-01T10:00:00Z",
            "ModifiedAt": "2022-03-02T10:00:00Z",
            "Published": true,
            "Title": "Hello",
            "Body": "# Hello",
            "FeaturedImage": ""
        }"##;

        let document: Document = serde_json::from_str(json).expect("document");
        assert_eq!(document.slug, "hello-world");
        assert_eq!(document.body, "# Hello");
        assert!(document.published);
        assert_eq!(document.feature_image, None);
        assert_eq!(document.kind, DocumentKind::Post);
    }

    #[test]
    fn deserializes_snake_case_fields() {
        let json = r#"{
            "slug": "about",
            "body": "text",
            "created_at": "2022-03-01T10:00:00Z",
            "published": false,
            "feature_image": "https://cdn.example.com/a.png",
            "kind": "page"
        }"#;

        let document: Document = serde_json::from_str(json).expect("document");
        assert_eq!(
            document.feature_image.as_deref(),
            Some("https://cdn.example.com/a.png")
        );
        assert_eq!(document.kind, DocumentKind::Page);
    }

    #[test]
    fn body_hash_tracks_body_only() {
        let a = Document::new("a", "same body", "2022-01-01T00:00:00Z");
        let mut b = Document::new("b", "same body", "2023-01-01T00:00:00Z");
        assert_eq!(a.body_hash(), b.body_hash());

        b.body.push('!');
        assert_ne!(a.body_hash(), b.body_hash());
        assert_eq!(a.body_hash().len(), 64);
    }
}
