//! Render transforms: operate on the render tree after all source transforms
//! have run. `Minify` is always last.

use comrak::nodes::{AstNode, NodeHtmlBlock, NodeValue};
use syntect::{html::ClassStyle, parsing::SyntaxSet};

use crate::application::render::types::WarningKind;

use super::{
    highlight::{self, LanguageResolution},
    math,
    source::is_math_fence,
    tree::{
        Diagnostics, MathFragment, RenderTree, escape_attribute, escape_html, identify_headings,
        location_of,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderTransform {
    HeadingSlugs,
    HeadingAutolinks,
    MathTypesetting,
    CodeHighlighting,
    Minify,
}

impl RenderTransform {
    pub const ORDER: [RenderTransform; 5] = [
        RenderTransform::HeadingSlugs,
        RenderTransform::HeadingAutolinks,
        RenderTransform::MathTypesetting,
        RenderTransform::CodeHighlighting,
        RenderTransform::Minify,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RenderTransform::HeadingSlugs => "heading_slugs",
            RenderTransform::HeadingAutolinks => "heading_autolinks",
            RenderTransform::MathTypesetting => "math_typesetting",
            RenderTransform::CodeHighlighting => "code_highlighting",
            RenderTransform::Minify => "minify",
        }
    }

    pub(crate) fn apply<'a, F>(
        self,
        tree: &mut RenderTree<'a>,
        context: &RenderContext<'_, F>,
        diagnostics: &mut Diagnostics<'_>,
    ) where
        F: Fn(NodeValue) -> &'a AstNode<'a>,
    {
        match self {
            RenderTransform::HeadingSlugs => assign_slugs(tree),
            RenderTransform::HeadingAutolinks => link_headings(tree, context.alloc),
            RenderTransform::MathTypesetting => {
                typeset_math(tree, context.math_nonce, diagnostics)
            }
            RenderTransform::CodeHighlighting => highlight_blocks(tree, context, diagnostics),
            RenderTransform::Minify => minify(tree),
        }
    }
}

/// Shared, read-only inputs of the render transforms.
pub(crate) struct RenderContext<'c, F> {
    pub(crate) syntax_set: &'c SyntaxSet,
    pub(crate) class_style: &'c ClassStyle,
    /// Allocates new nodes in the document arena.
    pub(crate) alloc: &'c F,
    /// Per-document token in math placeholders, so author text cannot
    /// collide with them.
    pub(crate) math_nonce: &'c str,
}

fn assign_slugs(tree: &mut RenderTree<'_>) {
    for (node, anchor) in identify_headings(tree.root) {
        tree.heading_nodes.push(node);
        tree.headings.push(anchor);
    }
}

fn link_headings<'a, F>(tree: &mut RenderTree<'a>, alloc: &F)
where
    F: Fn(NodeValue) -> &'a AstNode<'a>,
{
    for (node, anchor) in tree.heading_nodes.iter().zip(&tree.headings) {
        let href = format!("#{}", escape_attribute(&anchor.slug));
        let contains_link = node
            .descendants()
            .any(|inner| matches!(inner.data.borrow().value, NodeValue::Link(_)));

        if contains_link {
            // Anchors cannot nest; place a marker link before the heading text instead.
            node.prepend(alloc(NodeValue::HtmlInline(format!(
                "<a class=\"heading-anchor\" href=\"{href}\" aria-hidden=\"true\">#</a> "
            ))));
        } else {
            node.prepend(alloc(NodeValue::HtmlInline(format!(
                "<a class=\"heading-anchor\" href=\"{href}\">"
            ))));
            node.append(alloc(NodeValue::HtmlInline("</a>".to_string())));
        }
    }
}

fn typeset_math(tree: &mut RenderTree<'_>, nonce: &str, diagnostics: &mut Diagnostics<'_>) {
    let nodes: Vec<_> = tree
        .root
        .descendants()
        .filter(|node| match &node.data.borrow().value {
            NodeValue::Math(_) => true,
            NodeValue::CodeBlock(block) => is_math_fence(&block.info),
            _ => false,
        })
        .collect();

    for node in nodes {
        let (literal, display, is_block) = match &node.data.borrow().value {
            NodeValue::Math(math) => (math.literal.clone(), math.display_math, false),
            NodeValue::CodeBlock(block) => (block.literal.trim_end().to_string(), true, true),
            _ => continue,
        };

        let replacement = match math::typeset(&literal, display) {
            Ok(html) => {
                let placeholder = format!("__MATH_{nonce}_{}__", tree.math_fragments.len());
                let html = if is_block {
                    format!("<div class=\"math-display\" data-math-style=\"display\">{html}</div>")
                } else {
                    let style = if display { "display" } else { "inline" };
                    format!("<span class=\"math-{style}\" data-math-style=\"{style}\">{html}</span>")
                };
                tree.math_fragments.push(MathFragment {
                    placeholder: placeholder.clone(),
                    html,
                    is_block,
                });
                if is_block {
                    format!("<div>{placeholder}</div>")
                } else {
                    placeholder
                }
            }
            Err(err) => {
                diagnostics.degrade(
                    WarningKind::Math,
                    format!("math expression could not be typeset: {err}"),
                    Some(location_of(node)),
                );
                let element = if is_block { "div" } else { "span" };
                let style = if display { "display" } else { "inline" };
                format!(
                    "<{element} class=\"katex-error\" data-math-style=\"{style}\" title=\"{}\">{}</{element}>",
                    escape_attribute(&err),
                    escape_html(&literal)
                )
            }
        };

        node.data.borrow_mut().value = if is_block {
            NodeValue::HtmlBlock(NodeHtmlBlock {
                block_type: 0,
                literal: replacement,
            })
        } else {
            NodeValue::HtmlInline(replacement)
        };
    }
}

fn highlight_blocks<F>(
    tree: &mut RenderTree<'_>,
    context: &RenderContext<'_, F>,
    diagnostics: &mut Diagnostics<'_>,
) {
    let nodes: Vec<_> = tree
        .root
        .descendants()
        .filter(|node| matches!(node.data.borrow().value, NodeValue::CodeBlock(_)))
        .collect();

    for node in nodes {
        let location = location_of(node);
        let (info, literal) = match &node.data.borrow().value {
            NodeValue::CodeBlock(block) => (block.info.clone(), block.literal.clone()),
            _ => continue,
        };

        let mut segments = info.split_whitespace();
        let language = segments.next();
        let meta = segments.collect::<Vec<_>>().join(" ");
        let block = highlight::highlight_code(
            language,
            (!meta.is_empty()).then_some(meta.as_str()),
            &literal,
            context.syntax_set,
            context.class_style,
        );

        if let LanguageResolution::Unknown(token) = &block.resolution {
            diagnostics.degrade(
                WarningKind::CodeLanguage,
                format!("unknown code language `{token}`; rendered as plain text"),
                Some(location),
            );
        }

        let html = match tree.code_titles.get(&location) {
            Some(title) => format!(
                "<div class=\"code-title\">{}</div>{}",
                escape_html(&title.title),
                block.html
            ),
            None => block.html,
        };
        tree.code_blocks += 1;

        node.data.borrow_mut().value = NodeValue::HtmlBlock(NodeHtmlBlock {
            block_type: 0,
            literal: html,
        });
    }
}

fn minify(tree: &mut RenderTree<'_>) {
    for node in tree.root.descendants() {
        let mut data = node.data.borrow_mut();
        let replacement = match &mut data.value {
            NodeValue::Text(text) => {
                let collapsed = collapse_whitespace(text);
                if *text != collapsed.as_str() {
                    *text = collapsed.into();
                }
                None
            }
            NodeValue::SoftBreak => Some(NodeValue::Text(" ".to_string().into())),
            _ => None,
        };
        if let Some(value) = replacement {
            data.value = value;
        }
    }
    tree.compact = true;
}

fn collapse_whitespace(value: &str) -> String {
    let mut collapsed = String::with_capacity(value.len());
    let mut in_whitespace = false;
    for ch in value.chars() {
        if ch.is_whitespace() {
            if !in_whitespace {
                collapsed.push(' ');
            }
            in_whitespace = true;
        } else {
            collapsed.push(ch);
            in_whitespace = false;
        }
    }
    collapsed
}

#[cfg(test)]
mod tests {
    use comrak::{Arena, format_html, parse_document};

    use super::*;
    use crate::application::render::service::{config::default_options, tree::SyntaxTree};

    fn render(markdown: &str) -> (String, Vec<String>, usize) {
        let options = default_options();
        let arena = Arena::new();
        let root = parse_document(&arena, markdown, &options);
        let alloc = |value: NodeValue| &*arena.alloc(value.into());

        let syntax_set = SyntaxSet::load_defaults_newlines();
        let class_style = ClassStyle::SpacedPrefixed { prefix: "syntax-" };
        let context = RenderContext {
            syntax_set: &syntax_set,
            class_style: &class_style,
            alloc: &alloc,
            math_nonce: "test",
        };

        let mut tree = RenderTree::from(SyntaxTree::new(root));
        let mut diagnostics = Diagnostics::new("test");
        for stage in RenderTransform::ORDER {
            stage.apply(&mut tree, &context, &mut diagnostics);
        }

        let mut html = String::new();
        format_html(root, &options, &mut html).expect("html");
        let slugs = tree.headings.iter().map(|h| h.slug.clone()).collect();
        (html, slugs, diagnostics.into_warnings().len())
    }

    #[test]
    fn headings_are_wrapped_in_self_links() {
        let (html, slugs, _) = render("## Getting Started\n\n## Getting Started\n");

        assert_eq!(slugs, vec!["getting-started", "getting-started-1"]);
        assert!(html.contains(
            "<a class=\"heading-anchor\" href=\"#getting-started\">Getting Started</a>"
        ));
        assert!(html.contains("href=\"#getting-started-1\""));
    }

    #[test]
    fn headings_with_links_get_a_marker_anchor() {
        let (html, _, _) = render("## See [docs](https://example.com)\n");

        assert!(html.contains("aria-hidden=\"true\">#</a> See"));
        assert_eq!(html.matches("<a ").count(), 2);
    }

    #[test]
    fn invalid_math_degrades_to_flagged_span() {
        let (html, _, warnings) = render("Broken $\\frac{$ here and fine $x$.\n");

        assert!(html.contains("katex-error"));
        assert!(html.contains("__MATH_test_0__"));
        assert_eq!(warnings, 1);
    }

    #[test]
    fn unknown_language_warns_and_stays_plain() {
        let (html, _, warnings) = render("```klingon\nqapla'\n```\n");

        assert!(html.contains("syntax-plain"));
        assert_eq!(warnings, 1);
    }

    #[test]
    fn minify_collapses_text_whitespace() {
        assert_eq!(collapse_whitespace("a  b\n\tc"), "a b c");

        let (html, _, _) = render("first line\nsecond   line\n");
        assert!(html.contains("<p>first line second line</p>"));
    }
}
