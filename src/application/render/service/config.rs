use std::{borrow::Cow, collections::HashSet};

use ammonia::Builder as AmmoniaBuilder;
use comrak::options::{ListStyleType, Options};

/// Attributes carried by fragment placeholders through sanitization.
pub(crate) const FRAGMENT_ATTRIBUTE: &str = "data-fragment";
pub(crate) const FRAGMENT_SLOT_ATTRIBUTE: &str = "data-fragment-slot";

/// Parser options shared by rendering and metadata extraction, so both see
/// the same heading structure.
pub(crate) fn default_options() -> Options<'static> {
    let mut options = Options::default();
    configure_extensions(&mut options);
    options
}

pub(crate) fn build_post_sanitizer() -> AmmoniaBuilder<'static> {
    base_builder()
}

/// Pages may embed media and scoped styles.
pub(crate) fn build_page_sanitizer() -> AmmoniaBuilder<'static> {
    let mut builder = base_builder();

    builder.add_tags(&["style", "video", "audio", "source", "picture", "track"]);
    builder.rm_clean_content_tags(&["style"]);
    builder.add_generic_attributes(&["style"]);
    builder.add_tag_attributes("video", &["src", "controls", "poster", "width", "height"]);
    builder.add_tag_attributes("audio", &["src", "controls"]);
    builder.add_tag_attributes("source", &["src", "type", "srcset", "media"]);

    builder.attribute_filter(|_element, attribute, value| {
        if attribute.eq_ignore_ascii_case("style") {
            sanitize_style_attribute(value).map(Cow::Owned)
        } else {
            Some(Cow::Borrowed(value))
        }
    });

    builder
}

fn base_builder() -> AmmoniaBuilder<'static> {
    let mut builder = AmmoniaBuilder::default();

    let tags: HashSet<&'static str> = HashSet::from([
        "a",
        "abbr",
        "blockquote",
        "br",
        "code",
        "del",
        "details",
        "summary",
        "div",
        "dl",
        "dt",
        "dd",
        "em",
        "figcaption",
        "figure",
        "h1",
        "h2",
        "h3",
        "h4",
        "h5",
        "h6",
        "hr",
        "i",
        "img",
        "input",
        "ins",
        "kbd",
        "li",
        "mark",
        "ol",
        "p",
        "pre",
        "s",
        "section",
        "span",
        "strong",
        "sub",
        "sup",
        "table",
        "tbody",
        "td",
        "th",
        "thead",
        "tr",
        "u",
        "ul",
    ]);
    builder.tags(tags);

    let generic: HashSet<&'static str> = HashSet::from([
        "class",
        "id",
        "title",
        "lang",
        "dir",
        "aria-hidden",
        "aria-label",
        "role",
        "data-footnote-ref",
        "data-footnotes",
        "data-footnote-backref",
        "data-footnote-backref-idx",
        "data-math-style",
        FRAGMENT_ATTRIBUTE,
        FRAGMENT_SLOT_ATTRIBUTE,
    ]);
    builder.generic_attributes(generic);

    builder.add_tag_attributes("a", &["target"]);
    builder.add_tag_attributes(
        "img",
        &["title", "width", "height", "alt", "loading", "decoding"],
    );
    builder.add_tag_attributes("code", &["data-meta", "data-language"]);
    builder.add_tag_attributes("pre", &["data-language"]);
    builder.add_tag_attributes("th", &["align", "colspan", "rowspan", "scope"]);
    builder.add_tag_attributes("td", &["align", "colspan", "rowspan"]);
    builder.add_tag_attributes("input", &["type", "checked", "disabled"]);
    builder.add_tag_attributes("details", &["open"]);

    builder.add_url_schemes(["http", "https", "mailto", "tel"].iter().copied());

    builder
}

fn configure_extensions(options: &mut Options<'static>) {
    let ext = &mut options.extension;
    ext.strikethrough = true;
    ext.tagfilter = false;
    ext.table = true;
    ext.autolink = true;
    ext.tasklist = true;
    ext.superscript = false;
    ext.footnotes = true;
    ext.inline_footnotes = true;
    ext.description_lists = true;
    ext.front_matter_delimiter = Some("---".to_string());
    ext.math_dollars = true;
    ext.math_code = false;
    ext.underline = false;
    ext.cjk_friendly_emphasis = true;

    let render = &mut options.render;
    render.github_pre_lang = true;
    render.full_info_string = true;
    render.tasklist_classes = true;
    render.list_style = ListStyleType::Dash;
    // Raw HTML survives the formatter; ammonia decides what reaches the page.
    render.r#unsafe = true;
    render.sourcepos = false;
    render.escaped_char_spans = true;
    render.gfm_quirks = true;
}

fn sanitize_style_attribute(value: &str) -> Option<String> {
    let sanitized: Vec<&str> = value
        .split(';')
        .map(str::trim)
        .filter(|decl| !decl.is_empty() && is_safe_style_declaration(decl))
        .collect();

    if sanitized.is_empty() {
        None
    } else {
        Some(sanitized.join("; "))
    }
}

fn is_safe_style_declaration(decl: &str) -> bool {
    const FORBIDDEN: [&str; 7] = [
        "expression(",
        "javascript:",
        "vbscript:",
        "-moz-binding",
        "behavior:",
        "behaviour:",
        "@import",
    ];

    let lower = decl.to_ascii_lowercase();
    if FORBIDDEN.iter().any(|needle| lower.contains(needle)) {
        return false;
    }

    !contains_unsafe_url(&lower)
}

fn contains_unsafe_url(lower_decl: &str) -> bool {
    let mut offset = 0;

    while let Some(start) = lower_decl[offset..].find("url(") {
        let open = offset + start + "url(".len();
        let Some(close_rel) = lower_decl[open..].find(')') else {
            // unterminated url()
            return true;
        };
        let close = open + close_rel;
        let target = lower_decl[open..close]
            .trim_matches(|c: char| c.is_whitespace() || c == '\'' || c == '"');

        if is_unsafe_url(target) {
            return true;
        }
        offset = close + 1;
    }

    false
}

/// Schemes that must never become live links. Inline `data:image/` is allowed.
/// Only the scheme is inspected; browsers drop whitespace and control
/// characters inside it, so those are ignored too.
pub(crate) fn is_unsafe_url(url: &str) -> bool {
    let url = url.trim();
    let Some(colon) = url.find(':') else {
        return false;
    };
    if url[..colon].contains(['/', '?', '#']) {
        return false;
    }

    let scheme = url[..colon]
        .chars()
        .filter(|ch| !ch.is_whitespace() && !ch.is_control())
        .collect::<String>()
        .to_ascii_lowercase();
    match scheme.as_str() {
        "javascript" | "vbscript" | "file" => true,
        "data" => !url[colon + 1..]
            .trim_start()
            .to_ascii_lowercase()
            .starts_with("image/"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn style_filter_keeps_safe_declarations() {
        assert_eq!(
            sanitize_style_attribute("color: red; padding: 4px;").as_deref(),
            Some("color: red; padding: 4px")
        );
        assert_eq!(
            sanitize_style_attribute("color: red; background: url('javascript:alert(1)');")
                .as_deref(),
            Some("color: red")
        );
        assert!(sanitize_style_attribute("background-image: url(vbscript:x)").is_none());
    }

    #[test]
    fn unsafe_url_detection() {
        assert!(is_unsafe_url("JavaScript:alert(1)"));
        assert!(is_unsafe_url(" data:text/html;base64,AAAA"));
        assert!(!is_unsafe_url("data:image/png;base64,AAAA"));
        assert!(!is_unsafe_url("https://example.com/a?b=javascript"));
    }

    #[test]
    fn only_the_scheme_decides_url_safety() {
        assert!(!is_unsafe_url("https://example.com/?q=javascript:void"));
        assert!(!is_unsafe_url("/search?q=vbscript:x"));
        assert!(!is_unsafe_url("#javascript:anchor"));
        assert!(is_unsafe_url(" JavaScript:alert(1)"));
        assert!(is_unsafe_url("java\tscript:alert(1)"));
        assert!(is_unsafe_url("file:///etc/passwd"));
    }

    #[test]
    fn post_sanitizer_keeps_fragment_attributes() {
        let html = build_post_sanitizer()
            .clean(r#"<div data-fragment="custom" data-fragment-slot="fragment-1" onclick="x()"></div>"#)
            .to_string();

        assert!(html.contains(r#"data-fragment="custom""#));
        assert!(html.contains(r#"data-fragment-slot="fragment-1""#));
        assert!(!html.contains("onclick"));
    }

    #[test]
    fn post_sanitizer_strips_scripts_and_styles() {
        let html = build_post_sanitizer()
            .clean("<p>ok</p><script>alert(1)</script><style>p{}</style>")
            .to_string();

        assert_eq!(html, "<p>ok</p>");
    }

    #[test]
    fn page_sanitizer_allows_filtered_styles() {
        let html = build_page_sanitizer()
            .clean(r#"<style>.hero { color: red; }</style><div style="color: red; behavior: url(x)">Hi</div>"#)
            .to_string();

        assert!(html.contains("<style>"));
        assert!(html.contains(r#"style="color: red""#));
    }
}
