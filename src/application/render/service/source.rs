//! Source transforms: rewrite the parsed syntax tree before anything is
//! rendered. Each stage sees the output of the stages before it.

use std::collections::BTreeMap;

use comrak::nodes::{AstNode, NodeHtmlBlock, NodeValue};

use crate::application::render::types::{FragmentBinding, FragmentKind, WarningKind};

use super::{
    config::{FRAGMENT_ATTRIBUTE, FRAGMENT_SLOT_ATTRIBUTE, is_unsafe_url},
    fragments::{self, ComponentTag, TagParse},
    tree::{
        CodeTitle, Diagnostics, SyntaxTree, collect_inline_text, collect_literal_text,
        escape_attribute, escape_html, location_of,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceTransform {
    /// Tables, strikethrough and autolinks come from the parser; this stage
    /// neutralizes links whose scheme must never be live.
    ExtendedSyntax,
    /// Footnote definitions collected into one trailing, reference-ordered list.
    Footnotes,
    MathDelimiters,
    CodeTitles,
    ImageFragments,
    CustomFragments,
}

impl SourceTransform {
    pub const ORDER: [SourceTransform; 6] = [
        SourceTransform::ExtendedSyntax,
        SourceTransform::Footnotes,
        SourceTransform::MathDelimiters,
        SourceTransform::CodeTitles,
        SourceTransform::ImageFragments,
        SourceTransform::CustomFragments,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SourceTransform::ExtendedSyntax => "extended_syntax",
            SourceTransform::Footnotes => "footnotes",
            SourceTransform::MathDelimiters => "math_delimiters",
            SourceTransform::CodeTitles => "code_titles",
            SourceTransform::ImageFragments => "image_fragments",
            SourceTransform::CustomFragments => "custom_fragments",
        }
    }

    pub(crate) fn apply<'a>(self, tree: &mut SyntaxTree<'a>, diagnostics: &mut Diagnostics<'_>) {
        match self {
            SourceTransform::ExtendedSyntax => neutralize_unsafe_links(tree, diagnostics),
            SourceTransform::Footnotes => collect_footnotes(tree, diagnostics),
            SourceTransform::MathDelimiters => mark_math(tree, diagnostics),
            SourceTransform::CodeTitles => split_code_titles(tree, diagnostics),
            SourceTransform::ImageFragments => convert_images(tree, diagnostics),
            SourceTransform::CustomFragments => convert_components(tree, diagnostics),
        }
    }
}

fn nodes_matching<'a>(
    root: &'a AstNode<'a>,
    predicate: impl Fn(&NodeValue) -> bool,
) -> Vec<&'a AstNode<'a>> {
    root.descendants()
        .filter(|node| predicate(&node.data.borrow().value))
        .collect()
}

fn is_inline_container(value: &NodeValue) -> bool {
    matches!(
        value,
        NodeValue::Paragraph | NodeValue::Heading(_) | NodeValue::TableCell
    )
}

fn neutralize_unsafe_links(tree: &mut SyntaxTree<'_>, diagnostics: &mut Diagnostics<'_>) {
    for node in nodes_matching(tree.root, |value| matches!(value, NodeValue::Link(_))) {
        let url = match &node.data.borrow().value {
            NodeValue::Link(link) => link.url.clone(),
            _ => continue,
        };
        if !is_unsafe_url(&url) {
            continue;
        }

        let text = collect_inline_text(node);
        while let Some(child) = node.first_child() {
            child.detach();
        }
        node.data.borrow_mut().value = NodeValue::Text(text.into());
        diagnostics.degrade(
            WarningKind::Link,
            format!("link with unsafe target `{url}` rendered as text"),
            Some(location_of(node)),
        );
    }
}

fn collect_footnotes(tree: &mut SyntaxTree<'_>, diagnostics: &mut Diagnostics<'_>) {
    let mut first_reference: Vec<String> = Vec::new();
    let mut definitions = Vec::new();

    for node in tree.root.descendants() {
        match &node.data.borrow().value {
            NodeValue::FootnoteReference(reference) => {
                if !first_reference.contains(&reference.name) {
                    first_reference.push(reference.name.clone());
                }
            }
            NodeValue::FootnoteDefinition(definition) => {
                definitions.push((definition.name.clone(), node));
            }
            _ => {}
        }
    }

    // Stable sort: definitions nobody references keep their relative order at the end.
    definitions.sort_by_key(|(name, _)| {
        first_reference
            .iter()
            .position(|candidate| candidate == name)
            .unwrap_or(usize::MAX)
    });
    for &(_, node) in &definitions {
        node.detach();
        tree.root.append(node);
    }
    tree.footnotes = u32::try_from(definitions.len()).unwrap_or(u32::MAX);

    for block in nodes_matching(tree.root, is_inline_container) {
        for label in orphan_labels(&collect_literal_text(block)) {
            diagnostics.degrade(
                WarningKind::Footnote,
                format!("footnote reference `[^{label}]` has no definition"),
                Some(location_of(block)),
            );
        }
    }
}

/// `[^label]` sequences the parser left as literal text.
fn orphan_labels(text: &str) -> Vec<&str> {
    let mut labels = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("[^") {
        let after = &rest[start + 2..];
        match after.find(']') {
            Some(end) => {
                let label = &after[..end];
                if !label.is_empty() && !label.contains(char::is_whitespace) {
                    labels.push(label);
                }
                rest = &after[end + 1..];
            }
            None => break,
        }
    }
    labels
}

fn mark_math(tree: &mut SyntaxTree<'_>, diagnostics: &mut Diagnostics<'_>) {
    let math_nodes = nodes_matching(tree.root, |value| match value {
        NodeValue::Math(_) => true,
        NodeValue::CodeBlock(block) => is_math_fence(&block.info),
        _ => false,
    });
    tree.math_spans = u32::try_from(math_nodes.len()).unwrap_or(u32::MAX);

    for block in nodes_matching(tree.root, is_inline_container) {
        if collect_literal_text(block).contains("$$") {
            diagnostics.degrade(
                WarningKind::Math,
                "unterminated `$$` display math left as text",
                Some(location_of(block)),
            );
        }
    }
}

pub(crate) fn is_math_fence(info: &str) -> bool {
    info.split_whitespace()
        .next()
        .is_some_and(|token| token.eq_ignore_ascii_case("math"))
}

/// A fenced block's info string split into its parts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct CodeInfo {
    pub(crate) language: Option<String>,
    pub(crate) title: Option<String>,
    pub(crate) meta: String,
}

/// Accepts `lang:title` in the first token and `title="…"` or `title='…'`
/// anywhere after it. The quoted form wins when both are present.
pub(crate) fn parse_code_info(info: &str) -> Result<CodeInfo, (CodeInfo, String)> {
    let info = info.trim();
    let (first, rest) = match info.split_once(char::is_whitespace) {
        Some((first, rest)) => (first, rest.trim()),
        None => (info, ""),
    };

    let (language, mut title) = match first.split_once(':') {
        Some((language, title)) if !language.is_empty() => (
            Some(language.to_string()),
            (!title.is_empty()).then(|| title.to_string()),
        ),
        _ => ((!first.is_empty()).then(|| first.to_string()), None),
    };

    let mut meta = rest.to_string();
    if let Some(start) = rest.find("title=") {
        let value_start = start + "title=".len();
        let quote = rest[value_start..].chars().next();
        let before = rest[..start].trim_end();
        match quote {
            Some(quote @ ('"' | '\'')) => {
                let body = &rest[value_start + 1..];
                match body.find(quote) {
                    Some(end) => {
                        let value = body[..end].trim();
                        if !value.is_empty() {
                            title = Some(value.to_string());
                        }
                        let after = body[end + 1..].trim_start();
                        meta = [before, after]
                            .iter()
                            .filter(|part| !part.is_empty())
                            .copied()
                            .collect::<Vec<_>>()
                            .join(" ");
                    }
                    None => {
                        let partial = CodeInfo {
                            language,
                            title,
                            meta: before.to_string(),
                        };
                        return Err((partial, "unterminated code block title".to_string()));
                    }
                }
            }
            _ => {
                let partial = CodeInfo {
                    language,
                    title,
                    meta: before.to_string(),
                };
                return Err((partial, "code block title must be quoted".to_string()));
            }
        }
    }

    Ok(CodeInfo {
        language,
        title,
        meta,
    })
}

fn split_code_titles(tree: &mut SyntaxTree<'_>, diagnostics: &mut Diagnostics<'_>) {
    let blocks = nodes_matching(tree.root, |value| {
        matches!(value, NodeValue::CodeBlock(block) if block.fenced && !is_math_fence(&block.info))
    });

    for node in blocks {
        let location = location_of(node);
        let mut data = node.data.borrow_mut();
        let NodeValue::CodeBlock(block) = &mut data.value else {
            continue;
        };

        let parsed = match parse_code_info(&block.info) {
            Ok(parsed) => parsed,
            Err((partial, reason)) => {
                diagnostics.degrade(WarningKind::CodeTitle, reason, Some(location));
                partial
            }
        };

        block.info = match (&parsed.language, parsed.meta.is_empty()) {
            (Some(language), true) => language.clone(),
            (Some(language), false) => format!("{language} {}", parsed.meta),
            (None, _) => parsed.meta.clone(),
        };
        if let Some(title) = parsed.title {
            tree.code_titles.insert(location, CodeTitle { title });
        }
    }
}

fn convert_images(tree: &mut SyntaxTree<'_>, diagnostics: &mut Diagnostics<'_>) {
    for node in nodes_matching(tree.root, |value| matches!(value, NodeValue::Image(_))) {
        let (src, title) = match &node.data.borrow().value {
            NodeValue::Image(link) => (link.url.clone(), link.title.clone()),
            _ => continue,
        };
        let alt = collect_inline_text(node)
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");

        if is_unsafe_url(&src) {
            diagnostics.degrade(
                WarningKind::Link,
                format!("image with unsafe source `{src}` rendered as alt text"),
                Some(location_of(node)),
            );
            while let Some(child) = node.first_child() {
                child.detach();
            }
            node.data.borrow_mut().value = NodeValue::Text(alt.into());
            continue;
        }

        let (mut width, mut height) = match take_dimension_block(node) {
            Some((width, height)) => (Some(width), Some(height)),
            None => (None, None),
        };
        if width.is_none() || height.is_none() {
            let (query_width, query_height) = fragments::dimensions_from_query(&src);
            width = width.or(query_width);
            height = height.or(query_height);
        }

        let slot = tree.next_slot();
        let mut parameters = BTreeMap::new();
        parameters.insert("src".to_string(), src.clone());
        parameters.insert("alt".to_string(), alt.clone());
        if !title.is_empty() {
            parameters.insert("title".to_string(), title.clone());
        }

        let mut html = format!(
            "<img {FRAGMENT_ATTRIBUTE}=\"image\" {FRAGMENT_SLOT_ATTRIBUTE}=\"{slot}\" src=\"{}\" alt=\"{}\"",
            escape_attribute(&src),
            escape_attribute(&alt)
        );
        if !title.is_empty() {
            html.push_str(&format!(" title=\"{}\"", escape_attribute(&title)));
        }
        if let (Some(width), Some(height)) = (width, height) {
            html.push_str(&format!(" width=\"{width}\" height=\"{height}\""));
            parameters.insert("width".to_string(), width.to_string());
            parameters.insert("height".to_string(), height.to_string());
        }
        html.push_str(" />");

        tree.fragments.push(FragmentBinding {
            slot,
            kind: FragmentKind::Image,
            identifier: src,
            parameters,
            location: location_of(node),
        });

        node.data.borrow_mut().value = NodeValue::HtmlInline(html);
        while let Some(child) = node.first_child() {
            child.detach();
        }
    }
}

/// Consume a `{width=… height=…}` block written right after an image.
fn take_dimension_block(
    node: &AstNode<'_>,
) -> Option<(std::num::NonZeroU32, std::num::NonZeroU32)> {
    let sibling = node.next_sibling()?;
    let mut data = sibling.data.borrow_mut();
    let NodeValue::Text(text) = &mut data.value else {
        return None;
    };

    let trimmed = text.trim_start();
    if !trimmed.starts_with('{') {
        return None;
    }
    let close = trimmed.find('}')?;
    let dimensions = fragments::parse_dimension_block(&trimmed[..=close])?;

    let remainder = trimmed[close + 1..].to_string();
    if remainder.is_empty() {
        drop(data);
        sibling.detach();
    } else {
        *text = remainder.into();
    }
    Some(dimensions)
}

fn convert_components(tree: &mut SyntaxTree<'_>, diagnostics: &mut Diagnostics<'_>) {
    let candidates = nodes_matching(tree.root, |value| {
        matches!(value, NodeValue::HtmlBlock(_) | NodeValue::HtmlInline(_))
    });

    for node in candidates {
        if !node.ancestors().any(|ancestor| std::ptr::eq(ancestor, tree.root)) {
            // Swallowed as the children of an earlier inline component.
            continue;
        }

        let (literal, is_block) = match &node.data.borrow().value {
            NodeValue::HtmlBlock(block) => (block.literal.clone(), true),
            NodeValue::HtmlInline(literal) => (literal.clone(), false),
            _ => continue,
        };
        let location = location_of(node);

        let tag = match fragments::parse_component(&literal) {
            TagParse::NotComponent => continue,
            TagParse::Component(tag) => Ok(tag),
            TagParse::Opening(tag) if !is_block => pair_inline_component(node, tag),
            TagParse::Opening(tag) => Err(format!("`<{}>` is never closed", tag.name)),
            TagParse::Malformed(reason) => Err(reason),
        };

        match tag {
            Ok(tag) => {
                let slot = tree.next_slot();
                let element = if is_block { "div" } else { "span" };
                let html = format!(
                    "<{element} {FRAGMENT_ATTRIBUTE}=\"custom\" {FRAGMENT_SLOT_ATTRIBUTE}=\"{slot}\"></{element}>"
                );
                set_raw_html(node, is_block, html);

                let mut parameters = tag.attributes;
                if let Some(children) = tag.children {
                    parameters.insert("children".to_string(), children);
                }
                tree.fragments.push(FragmentBinding {
                    slot,
                    kind: FragmentKind::Custom,
                    identifier: tag.name,
                    parameters,
                    location,
                });
            }
            Err(reason) => {
                diagnostics.degrade(
                    WarningKind::Fragment,
                    format!("{reason}; rendered as literal text"),
                    Some(location),
                );
                let escaped = escape_html(literal.trim());
                let html = if is_block {
                    format!("<p>{escaped}</p>")
                } else {
                    escaped
                };
                set_raw_html(node, is_block, html);
            }
        }
    }
}

/// Join an inline `<Name …>` with its `</Name>` sibling; everything between
/// becomes the `children` text.
fn pair_inline_component<'a>(
    node: &'a AstNode<'a>,
    mut tag: ComponentTag,
) -> Result<ComponentTag, String> {
    let closing = format!("</{}>", tag.name);
    let mut between: Vec<&'a AstNode<'a>> = Vec::new();
    let mut sibling = node.next_sibling();

    while let Some(current) = sibling {
        let is_closing = matches!(
            &current.data.borrow().value,
            NodeValue::HtmlInline(literal) if literal.trim() == closing
        );
        if is_closing {
            let mut children = String::new();
            for inner in &between {
                children.push_str(&node_text(inner));
            }
            for inner in between {
                inner.detach();
            }
            current.detach();

            let children = children.trim();
            tag.children = (!children.is_empty()).then(|| children.to_string());
            return Ok(tag);
        }
        between.push(current);
        sibling = current.next_sibling();
    }

    Err(format!("`<{}>` is never closed", tag.name))
}

fn node_text(node: &AstNode<'_>) -> String {
    match &node.data.borrow().value {
        NodeValue::Text(text) => text.to_string(),
        NodeValue::Code(code) => code.literal.clone(),
        NodeValue::SoftBreak | NodeValue::LineBreak => " ".to_string(),
        _ => collect_inline_text(node),
    }
}

fn set_raw_html(node: &AstNode<'_>, is_block: bool, html: String) {
    node.data.borrow_mut().value = if is_block {
        NodeValue::HtmlBlock(NodeHtmlBlock {
            block_type: 0,
            literal: html,
        })
    } else {
        NodeValue::HtmlInline(html)
    };
}

#[cfg(test)]
mod tests {
    use comrak::{Arena, format_html, parse_document};

    use super::*;
    use crate::application::render::service::config::default_options;

    fn transform(markdown: &str, stages: &[SourceTransform]) -> (String, Vec<FragmentBinding>, usize) {
        let options = default_options();
        let arena = Arena::new();
        let root = parse_document(&arena, markdown, &options);
        let mut tree = SyntaxTree::new(root);
        let mut diagnostics = Diagnostics::new("test");
        for stage in stages {
            stage.apply(&mut tree, &mut diagnostics);
        }

        let mut html = String::new();
        format_html(root, &options, &mut html).expect("html");
        (html, tree.fragments, diagnostics.into_warnings().len())
    }

    #[test]
    fn unsafe_links_become_text() {
        let (html, _, warnings) = transform(
            "[click](javascript:alert(1)) and [ok](https://example.com)",
            &[SourceTransform::ExtendedSyntax],
        );

        assert!(!html.contains("javascript:"));
        assert!(html.contains("click"));
        assert!(html.contains("href=\"https://example.com\""));
        assert_eq!(warnings, 1);
    }

    #[test]
    fn orphan_footnote_references_are_reported() {
        assert_eq!(orphan_labels("see [^missing] and [^ spaced]"), vec!["missing"]);

        let (html, _, warnings) = transform(
            "Known[^a] and unknown[^b].\n\n[^a]: Defined.\n",
            &[SourceTransform::Footnotes],
        );
        assert!(html.contains("[^b]"));
        assert!(html.contains("data-footnotes"));
        assert_eq!(warnings, 1);
    }

    #[test]
    fn footnote_definitions_follow_reference_order() {
        let (html, _, _) = transform(
            "[^second]: Second.\n\nFirst[^first] then[^second].\n\n[^first]: First.\n",
            &[SourceTransform::Footnotes],
        );

        let first = html.find("First.").expect("first definition");
        let second = html.find("Second.").expect("second definition");
        assert!(first < second);
    }

    #[test]
    fn code_info_variants() {
        let parsed = parse_code_info("rust:src/main.rs {1,3}").expect("info");
        assert_eq!(parsed.language.as_deref(), Some("rust"));
        assert_eq!(parsed.title.as_deref(), Some("src/main.rs"));
        assert_eq!(parsed.meta, "{1,3}");

        let parsed = parse_code_info("ts title=\"app.ts\" showLineNumbers").expect("info");
        assert_eq!(parsed.title.as_deref(), Some("app.ts"));
        assert_eq!(parsed.meta, "showLineNumbers");

        let (partial, _) = parse_code_info("js title=\"broken").expect_err("unterminated");
        assert_eq!(partial.language.as_deref(), Some("js"));
        assert_eq!(partial.title, None);
    }

    #[test]
    fn images_become_fragment_placeholders_with_dimensions() {
        let (html, bindings, _) = transform(
            "![A cat](https://cdn.test/cat.png \"Cat\"){width=640 height=480} after",
            &[SourceTransform::ImageFragments],
        );

        assert!(html.contains("data-fragment=\"image\""));
        assert!(html.contains("width=\"640\" height=\"480\""));
        assert!(html.contains(" after"));
        assert!(!html.contains("{width"));
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].slot, "fragment-1");
        assert_eq!(bindings[0].identifier, "https://cdn.test/cat.png");
        assert_eq!(bindings[0].parameters["alt"], "A cat");
        assert_eq!(bindings[0].parameters["title"], "Cat");
    }

    #[test]
    fn components_become_placeholders_and_malformed_ones_degrade() {
        let (html, bindings, warnings) = transform(
            "<Chart kind=\"bar\" />\n\nInline <Badge tone=\"info\">new</Badge> tag.\n\n<Broken title=x />\n",
            &[SourceTransform::CustomFragments],
        );

        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].identifier, "Chart");
        assert_eq!(bindings[0].parameters["kind"], "bar");
        assert_eq!(bindings[1].identifier, "Badge");
        assert_eq!(bindings[1].parameters["children"], "new");
        assert!(html.contains("<div data-fragment=\"custom\" data-fragment-slot=\"fragment-1\"></div>"));
        assert!(html.contains("<span data-fragment=\"custom\" data-fragment-slot=\"fragment-2\"></span>"));
        assert!(html.contains("<p>&lt;Broken title=x /&gt;</p>"));
        assert_eq!(warnings, 1);
    }
}
