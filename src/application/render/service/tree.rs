//! The two tree representations threaded through the pipeline.
//!
//! Both wrap the same Comrak arena AST. [`SyntaxTree`] is what the source
//! transforms produce; [`RenderTree`] can only be obtained from a finished
//! syntax tree and is what the render transforms and the bundler consume, so
//! stage order is checked by the type system.

use std::collections::BTreeMap;

use comrak::nodes::{AstNode, NodeValue};
use tracing::warn;

use crate::{
    application::render::types::{
        FragmentBinding, HeadingAnchor, RenderWarning, SourceLocation, WarningKind,
    },
    domain::slug::HeadingSlugger,
};

/// Collects degraded-content warnings for one document and mirrors them to the log.
pub(crate) struct Diagnostics<'s> {
    slug: &'s str,
    warnings: Vec<RenderWarning>,
    logged: bool,
}

impl<'s> Diagnostics<'s> {
    pub(crate) fn new(slug: &'s str) -> Self {
        Self {
            slug,
            warnings: Vec::new(),
            logged: true,
        }
    }

    /// Collects without logging, for passes that re-run transforms the
    /// render itself already reports on.
    pub(crate) fn silent() -> Self {
        Self {
            slug: "",
            warnings: Vec::new(),
            logged: false,
        }
    }

    pub(crate) fn degrade(
        &mut self,
        kind: WarningKind,
        message: impl Into<String>,
        location: Option<SourceLocation>,
    ) {
        let message = message.into();
        if self.logged {
            warn!(
                target = "application::render::degrade",
                slug = self.slug,
                kind = kind.as_str(),
                location = location.map(|loc| loc.to_string()).unwrap_or_default(),
                "{message}"
            );
        }
        self.warnings.push(RenderWarning {
            kind,
            message,
            location,
        });
    }

    pub(crate) fn into_warnings(self) -> Vec<RenderWarning> {
        self.warnings
    }
}

/// Title split off a fenced code block's info string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CodeTitle {
    pub(crate) title: String,
}

pub(crate) struct SyntaxTree<'a> {
    pub(crate) root: &'a AstNode<'a>,
    pub(crate) fragments: Vec<FragmentBinding>,
    /// Keyed by the start of the code block they belong to.
    pub(crate) code_titles: BTreeMap<SourceLocation, CodeTitle>,
    pub(crate) footnotes: u32,
    pub(crate) math_spans: u32,
}

impl<'a> SyntaxTree<'a> {
    pub(crate) fn new(root: &'a AstNode<'a>) -> Self {
        Self {
            root,
            fragments: Vec::new(),
            code_titles: BTreeMap::new(),
            footnotes: 0,
            math_spans: 0,
        }
    }

    pub(crate) fn next_slot(&self) -> String {
        format!("fragment-{}", self.fragments.len() + 1)
    }
}

/// Typeset markup held out of band so sanitization cannot touch it.
#[derive(Debug, Clone)]
pub(crate) struct MathFragment {
    pub(crate) placeholder: String,
    pub(crate) html: String,
    pub(crate) is_block: bool,
}

pub(crate) struct RenderTree<'a> {
    pub(crate) root: &'a AstNode<'a>,
    pub(crate) headings: Vec<HeadingAnchor>,
    pub(crate) heading_nodes: Vec<&'a AstNode<'a>>,
    pub(crate) math_fragments: Vec<MathFragment>,
    pub(crate) fragments: Vec<FragmentBinding>,
    pub(crate) code_titles: BTreeMap<SourceLocation, CodeTitle>,
    pub(crate) footnotes: u32,
    pub(crate) code_blocks: u32,
    pub(crate) math_spans: u32,
    pub(crate) compact: bool,
}

impl<'a> From<SyntaxTree<'a>> for RenderTree<'a> {
    fn from(tree: SyntaxTree<'a>) -> Self {
        Self {
            root: tree.root,
            headings: Vec::new(),
            heading_nodes: Vec::new(),
            math_fragments: Vec::new(),
            fragments: tree.fragments,
            code_titles: tree.code_titles,
            footnotes: tree.footnotes,
            code_blocks: 0,
            math_spans: tree.math_spans,
            compact: false,
        }
    }
}

/// One heading in document order, before slugging.
pub(crate) struct OutlineHeading<'a> {
    pub(crate) node: &'a AstNode<'a>,
    pub(crate) level: u8,
    pub(crate) text: String,
}

/// Headings of a tree in document order with their whitespace-normalized text.
pub(crate) fn heading_outline<'a>(root: &'a AstNode<'a>) -> Vec<OutlineHeading<'a>> {
    root.descendants()
        .filter_map(|node| {
            let level = heading_level(node)?;
            let text = collect_inline_text(node)
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ");
            Some(OutlineHeading { node, level, text })
        })
        .collect()
}

/// Headings paired with their anchor slugs. Used both for the rendered ids
/// and for the table of contents, so the two cannot drift apart.
pub(crate) fn identify_headings<'a>(
    root: &'a AstNode<'a>,
) -> Vec<(&'a AstNode<'a>, HeadingAnchor)> {
    let mut slugger = HeadingSlugger::new();
    heading_outline(root)
        .into_iter()
        .map(|heading| {
            let slug = slugger.anchor_for(&heading.text);
            let anchor = HeadingAnchor {
                level: heading.level,
                text: heading.text,
                slug,
            };
            (heading.node, anchor)
        })
        .collect()
}

fn heading_level(node: &AstNode<'_>) -> Option<u8> {
    let data = node.data.borrow();
    if let NodeValue::Heading(heading) = &data.value {
        Some(heading.level)
    } else {
        None
    }
}

pub(crate) fn location_of(node: &AstNode<'_>) -> SourceLocation {
    let data = node.data.borrow();
    SourceLocation::new(data.sourcepos.start.line, data.sourcepos.start.column)
}

/// Plain text of a node's inline descendants. Image subtrees are skipped so
/// the result is the same before and after images become fragments.
pub(crate) fn collect_inline_text(node: &AstNode<'_>) -> String {
    fn walk(node: &AstNode<'_>, buffer: &mut String) {
        {
            let data = node.data.borrow();
            match &data.value {
                NodeValue::Text(text) => buffer.push_str(text),
                NodeValue::Code(code) => buffer.push_str(&code.literal),
                NodeValue::Math(math) => buffer.push_str(&math.literal),
                NodeValue::LineBreak | NodeValue::SoftBreak => buffer.push(' '),
                NodeValue::Image(_) => return,
                _ => {}
            }
        }
        let mut child = node.first_child();
        while let Some(next) = child {
            walk(next, buffer);
            child = next.next_sibling();
        }
    }

    let mut text = String::new();
    let mut child = node.first_child();
    while let Some(next) = child {
        walk(next, &mut text);
        child = next.next_sibling();
    }
    text
}

/// Text-node content of a block, ignoring code spans. Used to find constructs
/// the parser left as literal text.
pub(crate) fn collect_literal_text<'a>(node: &'a AstNode<'a>) -> String {
    let mut text = String::new();
    for descendant in node.descendants() {
        let data = descendant.data.borrow();
        if let NodeValue::Text(value) = &data.value {
            text.push_str(value);
        }
    }
    text
}

pub(crate) fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

pub(crate) fn escape_attribute(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '\n' | '\r' | '\t' => escaped.push(' '),
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use comrak::{Arena, parse_document};

    use crate::application::render::service::config::default_options;

    #[test]
    fn outline_skips_image_alt_text_and_keeps_code() {
        let options = default_options();
        let arena = Arena::new();
        let root = parse_document(
            &arena,
            "# Install `cargo` ![logo](logo.png)\n\n## Second   heading\n",
            &options,
        );

        let outline = heading_outline(root);
        let texts: Vec<_> = outline.iter().map(|h| h.text.as_str()).collect();
        assert_eq!(texts, vec!["Install cargo", "Second heading"]);
        assert_eq!(outline[0].level, 1);
        assert_eq!(outline[1].level, 2);
    }

    #[test]
    fn identical_headings_get_suffixed_slugs() {
        let options = default_options();
        let arena = Arena::new();
        let root = parse_document(&arena, "# Setup\n\n## Setup\n\n### Setup\n", &options);

        let slugs: Vec<_> = identify_headings(root)
            .into_iter()
            .map(|(_, anchor)| anchor.slug)
            .collect();
        assert_eq!(slugs, vec!["setup", "setup-1", "setup-2"]);
    }

    #[test]
    fn escapes_markup_characters() {
        assert_eq!(escape_html("<a & \"b\">"), "&lt;a &amp; &quot;b&quot;&gt;");
        assert_eq!(escape_attribute("a\nb\"c"), "a b&quot;c");
    }
}
