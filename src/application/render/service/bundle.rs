//! Turns a finished render tree into a [`CompiledArtifact`].

use std::{cell::RefCell, collections::BTreeSet, rc::Rc};

use comrak::{format_html, options::Options};
use lol_html::{RewriteStrSettings, element, rewrite_str};
use sha2::{Digest, Sha256};

use crate::application::render::types::{
    ArtifactStats, CompileError, CompiledArtifact, FragmentBinding, FragmentKind,
};

use super::{toolchain::Toolchain, tree::RenderTree};

/// Fragment identifiers the host page knows how to hydrate.
///
/// Images with a source always resolve; custom fragments resolve only when
/// their component name is registered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FragmentRegistry {
    components: BTreeSet<String>,
}

impl FragmentRegistry {
    pub fn new<I, S>(components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            components: components.into_iter().map(Into::into).collect(),
        }
    }

    pub fn register(&mut self, component: impl Into<String>) {
        self.components.insert(component.into());
    }

    pub fn resolves(&self, binding: &FragmentBinding) -> bool {
        match binding.kind {
            FragmentKind::Image => !binding.identifier.trim().is_empty(),
            FragmentKind::Custom => self.components.contains(&binding.identifier),
        }
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.components.iter().map(String::as_str)
    }
}

pub(crate) struct Bundler<'b> {
    pub(crate) options: &'b Options<'static>,
    pub(crate) sanitizer: &'b ammonia::Builder<'static>,
    pub(crate) registry: &'b FragmentRegistry,
    pub(crate) toolchain: Option<&'b Toolchain>,
}

impl Bundler<'_> {
    pub(crate) fn bundle(
        &self,
        slug: &str,
        tree: RenderTree<'_>,
    ) -> Result<CompiledArtifact, CompileError> {
        resolve_bindings(self.registry, &tree.fragments)?;

        let mut html = String::new();
        format_html(tree.root, self.options, &mut html)
            .map_err(|err| CompileError::markup(err.to_string()))?;

        let sanitized = self.sanitizer.clean(&html).to_string();
        let restored = restore_math(sanitized, &tree);
        let stamped = stamp_headings(&restored, &tree)?;
        let mut markup = if tree.compact {
            compact_markup(&stamped)
        } else {
            stamped
        };

        let stats = ArtifactStats {
            headings: u32::try_from(tree.headings.len()).unwrap_or(u32::MAX),
            code_blocks: tree.code_blocks,
            math_spans: tree.math_spans,
            footnotes: tree.footnotes,
            fragments: u32::try_from(tree.fragments.len()).unwrap_or(u32::MAX),
        };
        let mut artifact = CompiledArtifact {
            digest: String::new(),
            markup: String::new(),
            bindings: tree.fragments,
            contains_code: stats.code_blocks > 0,
            contains_math: stats.math_spans > 0,
            stats,
        };

        if let Some(toolchain) = self.toolchain {
            let manifest = artifact
                .manifest_json()
                .map_err(|err| CompileError::markup(err.to_string()))?;
            markup = toolchain
                .bundle(slug, &markup, &manifest)
                .map_err(|err| CompileError::Toolchain {
                    message: err.to_string(),
                })?;
        }

        artifact.digest = digest(&markup);
        artifact.markup = markup;
        Ok(artifact)
    }
}

fn resolve_bindings(
    registry: &FragmentRegistry,
    bindings: &[FragmentBinding],
) -> Result<(), CompileError> {
    match bindings.iter().find(|binding| !registry.resolves(binding)) {
        Some(binding) => Err(CompileError::UnresolvedFragment {
            identifier: if binding.identifier.trim().is_empty() {
                "image without source".to_string()
            } else {
                binding.identifier.clone()
            },
            location: binding.location,
        }),
        None => Ok(()),
    }
}

fn restore_math(html: String, tree: &RenderTree<'_>) -> String {
    tree.math_fragments.iter().fold(html, |acc, fragment| {
        if fragment.is_block {
            let placeholder = format!("<div>{}</div>", fragment.placeholder);
            acc.replace(&placeholder, &fragment.html)
        } else {
            acc.replace(&fragment.placeholder, &fragment.html)
        }
    })
}

const HEADINGS: &str = "h1, h2, h3, h4, h5, h6";

/// Give each generated heading the id its self-link points to, and mark
/// images for lazy loading.
///
/// Generated headings are recognised by their `a.heading-anchor`, so raw HTML
/// headings written by the author are left untouched.
fn stamp_headings(html: &str, tree: &RenderTree<'_>) -> Result<String, CompileError> {
    let heading_index = Rc::new(RefCell::new(0usize));
    let anchored = Rc::new(RefCell::new(Vec::<(usize, String)>::new()));

    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!(HEADINGS, {
                    let heading_index = Rc::clone(&heading_index);
                    move |_el| {
                        *heading_index.borrow_mut() += 1;
                        Ok(())
                    }
                }),
                element!("a.heading-anchor[href]", {
                    let heading_index = Rc::clone(&heading_index);
                    let anchored = Rc::clone(&anchored);
                    move |el| {
                        let current = *heading_index.borrow();
                        let mut anchored = anchored.borrow_mut();
                        let already = anchored.last().is_some_and(|(idx, _)| *idx == current);
                        if current > 0 && !already {
                            let href = el.get_attribute("href").unwrap_or_default();
                            anchored.push((current, href.trim_start_matches('#').to_string()));
                        }
                        Ok(())
                    }
                }),
            ],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|err| CompileError::markup(err.to_string()))?;

    let anchored = anchored.take();
    if anchored.len() != tree.headings.len() {
        return Err(CompileError::markup(format!(
            "expected {} heading anchors, found {}",
            tree.headings.len(),
            anchored.len()
        )));
    }
    for ((_, href), anchor) in anchored.iter().zip(&tree.headings) {
        if href != &anchor.slug {
            return Err(CompileError::markup(format!(
                "heading anchor `{href}` does not match slug `{}`",
                anchor.slug
            )));
        }
    }

    let ids = Rc::new(anchored);
    let heading_index = Rc::new(RefCell::new(0usize));
    let cursor = Rc::new(RefCell::new(0usize));

    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!(HEADINGS, {
                    let ids = Rc::clone(&ids);
                    let heading_index = Rc::clone(&heading_index);
                    let cursor = Rc::clone(&cursor);
                    move |el| {
                        let mut index = heading_index.borrow_mut();
                        *index += 1;
                        let mut cursor = cursor.borrow_mut();
                        if let Some((target, slug)) = ids.get(*cursor)
                            && *target == *index
                        {
                            el.set_attribute("id", slug)?;
                            *cursor += 1;
                        }
                        Ok(())
                    }
                }),
                element!("img", |el| {
                    if !el.has_attribute("loading") {
                        el.set_attribute("loading", "lazy")?;
                    }
                    if !el.has_attribute("decoding") {
                        el.set_attribute("decoding", "async")?;
                    }
                    Ok(())
                }),
            ],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|err| CompileError::markup(err.to_string()))
}

/// Drop the newlines the formatter puts between tags. `<pre>` content is
/// copied verbatim.
pub(crate) fn compact_markup(html: &str) -> String {
    let mut compacted = String::with_capacity(html.len());
    let mut rest = html;

    while let Some(start) = rest.find("<pre") {
        compacted.push_str(&strip_tag_gaps(&rest[..start]));
        let end = rest[start..]
            .find("</pre>")
            .map(|offset| start + offset + "</pre>".len())
            .unwrap_or(rest.len());
        compacted.push_str(&rest[start..end]);
        rest = &rest[end..];
    }
    compacted.push_str(&strip_tag_gaps(rest));
    compacted
}

fn strip_tag_gaps(segment: &str) -> String {
    let mut output = String::with_capacity(segment.len());
    let mut pending = String::new();
    let mut previous = None;

    for ch in segment.chars() {
        if ch.is_whitespace() {
            pending.push(ch);
            continue;
        }
        if !pending.is_empty() {
            let between_tags = matches!(previous, None | Some('>')) && ch == '<';
            if !(between_tags && pending.contains('\n')) {
                output.push_str(&pending);
            }
            pending.clear();
        }
        output.push(ch);
        previous = Some(ch);
    }

    if !pending.is_empty() && !(matches!(previous, None | Some('>')) && pending.contains('\n')) {
        output.push_str(&pending);
    }
    output
}

pub(crate) fn digest(markup: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(markup.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::application::render::types::SourceLocation;

    fn binding(kind: FragmentKind, identifier: &str) -> FragmentBinding {
        FragmentBinding {
            slot: "fragment-1".to_string(),
            kind,
            identifier: identifier.to_string(),
            parameters: BTreeMap::new(),
            location: SourceLocation::new(3, 1),
        }
    }

    #[test]
    fn registry_resolution_rules() {
        let registry = FragmentRegistry::new(["Chart"]);

        assert!(registry.resolves(&binding(FragmentKind::Image, "/a.png")));
        assert!(!registry.resolves(&binding(FragmentKind::Image, " ")));
        assert!(registry.resolves(&binding(FragmentKind::Custom, "Chart")));
        assert!(!registry.resolves(&binding(FragmentKind::Custom, "Tweet")));
    }

    #[test]
    fn first_unresolved_binding_is_reported_with_location() {
        let registry = FragmentRegistry::default();
        let err = resolve_bindings(&registry, &[binding(FragmentKind::Custom, "Tweet")])
            .expect_err("unresolved");

        assert_eq!(
            err,
            CompileError::UnresolvedFragment {
                identifier: "Tweet".to_string(),
                location: SourceLocation::new(3, 1),
            }
        );
    }

    #[test]
    fn compaction_keeps_preformatted_text() {
        let html = "<h1>T</h1>\n<p>a b</p>\n<pre><code>x\n  y\n</code></pre>\n<ul>\n<li>z</li>\n</ul>\n";

        assert_eq!(
            compact_markup(html),
            "<h1>T</h1><p>a b</p><pre><code>x\n  y\n</code></pre><ul><li>z</li></ul>"
        );
    }

    #[test]
    fn compaction_keeps_inline_spaces() {
        assert_eq!(
            compact_markup("<p><em>a</em> <strong>b</strong></p>\n"),
            "<p><em>a</em> <strong>b</strong></p>"
        );
    }
}
