//! Metadata derived from the raw document body.
//!
//! Extraction never fails and never looks at the render tree: reading time is
//! counted on raw text, the table of contents reuses the heading slugger the
//! renderer uses, and dates that cannot be parsed pass through unchanged.

use serde::{Deserialize, Serialize};
use time::{
    Date, OffsetDateTime, PrimitiveDateTime, UtcOffset,
    format_description::{FormatItem, well_known::Rfc3339},
    macros::format_description,
};
use tracing::warn;

use crate::application::render::{RenderWarning, WarningKind, heading_anchors};
use crate::domain::document::Document;

pub const WORDS_PER_MINUTE: usize = 225;

const NORMALIZED_DATE: &[FormatItem<'static>] = format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
);
const LOCAL_DATE_TIME: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
const DATE_ONLY: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocEntry {
    pub text: String,
    pub slug: String,
    pub depth: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// `"0 mins"`, `"1 min"`, `"2 mins"`, ...
    pub reading_time: String,
    pub reading_time_minutes: usize,
    pub word_count: usize,
    pub toc: Vec<TocEntry>,
    pub slug: String,
    pub date: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedMetadata {
    pub metadata: Metadata,
    pub warnings: Vec<RenderWarning>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadingTime {
    pub minutes: usize,
    pub words: usize,
}

impl ReadingTime {
    pub fn label(&self) -> String {
        let unit = if self.minutes == 1 { "min" } else { "mins" };
        format!("{} {unit}", self.minutes)
    }
}

pub fn extract_metadata(document: &Document) -> ExtractedMetadata {
    let mut warnings = Vec::new();
    let reading = reading_time(&document.body);

    let toc = heading_anchors(&document.body)
        .into_iter()
        .map(|anchor| TocEntry {
            text: anchor.text,
            slug: anchor.slug,
            depth: anchor.level,
        })
        .collect();

    let date = match normalize_date(&document.created_at) {
        Some(date) => date,
        None => {
            warn!(
                target = "application::metadata",
                slug = %document.slug,
                created_at = %document.created_at,
                "Unparseable creation date passed through"
            );
            warnings.push(RenderWarning {
                kind: WarningKind::Date,
                message: format!(
                    "creation date `{}` is not a recognised timestamp",
                    document.created_at
                ),
                location: None,
            });
            document.created_at.clone()
        }
    };

    ExtractedMetadata {
        metadata: Metadata {
            reading_time: reading.label(),
            reading_time_minutes: reading.minutes,
            word_count: reading.words,
            toc,
            slug: document.slug.clone(),
            date,
        },
        warnings,
    }
}

/// Whitespace-delimited words at [`WORDS_PER_MINUTE`], rounded up.
pub fn reading_time(text: &str) -> ReadingTime {
    let words = text.split_whitespace().count();
    ReadingTime {
        minutes: words.div_ceil(WORDS_PER_MINUTE),
        words,
    }
}

/// Normalize to UTC with millisecond precision. Accepts RFC 3339, a local
/// date-time without offset (taken as UTC), or a bare date (midnight UTC).
pub fn normalize_date(value: &str) -> Option<String> {
    let value = value.trim();
    let parsed = OffsetDateTime::parse(value, &Rfc3339)
        .ok()
        .or_else(|| {
            PrimitiveDateTime::parse(value, LOCAL_DATE_TIME)
                .ok()
                .map(PrimitiveDateTime::assume_utc)
        })
        .or_else(|| {
            Date::parse(value, DATE_ONLY)
                .ok()
                .map(|date| date.midnight().assume_utc())
        })?;

    parsed.to_offset(UtcOffset::UTC).format(NORMALIZED_DATE).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(count: usize) -> String {
        vec!["word"; count].join(" ")
    }

    #[test]
    fn reading_time_rounds_up_per_225_words() {
        assert_eq!(reading_time("").label(), "0 mins");
        assert_eq!(reading_time(&words(1)).label(), "1 min");
        assert_eq!(reading_time(&words(225)).label(), "1 min");
        assert_eq!(reading_time(&words(226)).label(), "2 mins");
        assert_eq!(reading_time(&words(451)).minutes, 3);
    }

    #[test]
    fn dates_normalize_to_utc_milliseconds() {
        assert_eq!(
            normalize_date("2022-03-01T10:00:00Z").as_deref(),
            Some("2022-03-01T10:00:00.000Z")
        );
        assert_eq!(
            normalize_date("2022-03-01T12:30:00.5+02:00").as_deref(),
            Some("2022-03-01T10:30:00.500Z")
        );
        assert_eq!(
            normalize_date("2022-03-01T08:15:00").as_deref(),
            Some("2022-03-01T08:15:00.000Z")
        );
        assert_eq!(
            normalize_date("2022-03-01").as_deref(),
            Some("2022-03-01T00:00:00.000Z")
        );
        assert_eq!(normalize_date("yesterday"), None);
    }

    #[test]
    fn unparseable_date_passes_through_with_warning() {
        let document = Document::new("notes", "body", "sometime in march");
        let extracted = extract_metadata(&document);

        assert_eq!(extracted.metadata.date, "sometime in march");
        assert_eq!(extracted.warnings.len(), 1);
        assert_eq!(extracted.warnings[0].kind, WarningKind::Date);
    }

    #[test]
    fn metadata_snapshot() {
        let document = Document::new(
            "hello-world",
            "# Hello World\n\nSome intro text.\n\n## Setup\n\n## Setup\n\n### Notes & Caveats\n",
            "2022-03-01T10:00:00Z",
        );
        let extracted = extract_metadata(&document);

        assert!(extracted.warnings.is_empty());
        insta::assert_json_snapshot!(extracted.metadata, @r###"
        {
          "reading_time": "1 min",
          "reading_time_minutes": 1,
          "word_count": 14,
          "toc": [
            {
              "text": "Hello World",
              "slug": "hello-world",
              "depth": 1
            },
            {
              "text": "Setup",
              "slug": "setup",
              "depth": 2
            },
            {
              "text": "Setup",
              "slug": "setup-1",
              "depth": 2
            },
            {
              "text": "Notes & Caveats",
              "slug": "notes--caveats",
              "depth": 3
            }
          ],
          "slug": "hello-world",
          "date": "2022-03-01T10:00:00.000Z"
        }
        "###);
    }
}
