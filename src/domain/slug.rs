//! Utilities for generating deterministic, human-friendly slugs.
//!
//! Two flavours live here. [`derive_slug`] produces URL-safe document slugs
//! (ASCII, via the `slug` crate) and is used when a document is assembled from
//! a local file. [`HeadingSlugger`] produces heading anchors inside a single
//! document and keeps Unicode letters so non-Latin headings stay readable.

use std::collections::HashMap;

use slug::slugify;
use thiserror::Error;

/// Anchor used when a heading contains nothing sluggable (e.g. `## ???`).
pub const FALLBACK_ANCHOR: &str = "section";

/// Errors that can occur while generating a document slug.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlugError {
    #[error("slug source text is empty")]
    EmptyInput,
    #[error("failed to derive slug from `{input}`")]
    Unrepresentable { input: String },
}

/// Derive a URL-safe document slug from the provided human-readable text.
pub fn derive_slug(input: &str) -> Result<String, SlugError> {
    if input.trim().is_empty() {
        return Err(SlugError::EmptyInput);
    }

    let candidate = slugify(input);
    if candidate.is_empty() {
        return Err(SlugError::Unrepresentable {
            input: input.to_string(),
        });
    }

    Ok(candidate)
}

/// Base anchor for a heading: lowercase, each whitespace character becomes a
/// hyphen, and anything that is neither alphanumeric nor a hyphen is dropped.
pub fn heading_anchor(text: &str) -> String {
    let mut anchor = String::with_capacity(text.len());
    for ch in text.trim().chars() {
        if ch.is_whitespace() {
            anchor.push('-');
        } else if ch == '-' || ch.is_alphanumeric() {
            anchor.extend(ch.to_lowercase());
        }
    }

    if anchor.is_empty() {
        FALLBACK_ANCHOR.to_string()
    } else {
        anchor
    }
}

/// Deterministically generate unique anchor slugs within a single document.
///
/// Headings must be fed in document order. The first occurrence of a base
/// anchor keeps it unchanged; later duplicates receive `-1`, `-2`, ….
#[derive(Default, Debug)]
pub struct HeadingSlugger {
    occurrences: HashMap<String, usize>,
}

impl HeadingSlugger {
    /// Create a new slugger instance.
    pub fn new() -> Self {
        Self {
            occurrences: HashMap::new(),
        }
    }

    /// Generate a slug for the provided heading text, unique within this slugger.
    pub fn anchor_for(&mut self, heading: &str) -> String {
        let base = heading_anchor(heading);
        let mut candidate = base.clone();

        // A suffixed candidate can itself collide with a literal heading such
        // as "Foo 1" (`foo-1`), so keep counting until the slot is free.
        while self.occurrences.contains_key(&candidate) {
            let count = self.occurrences.entry(base.clone()).or_insert(0);
            *count += 1;
            candidate = format!("{base}-{count}");
        }

        self.occurrences.insert(candidate.clone(), 0);
        candidate
    }
}
