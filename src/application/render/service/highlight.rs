use syntect::{
    html::{ClassStyle, ClassedHTMLGenerator},
    parsing::{SyntaxReference, SyntaxSet},
    util::LinesWithEndings,
};

use super::tree::{escape_attribute, escape_html};

/// How the language of a code block was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LanguageResolution {
    /// The declared language matched a known grammar.
    Declared(String),
    /// No language was declared; one was guessed from the first line.
    Guessed(String),
    /// The declared language is unknown; the block renders as plain text.
    Unknown(String),
    Plain,
}

impl LanguageResolution {
    fn class_token(&self) -> &str {
        match self {
            LanguageResolution::Declared(token)
            | LanguageResolution::Guessed(token)
            | LanguageResolution::Unknown(token) => token,
            LanguageResolution::Plain => "text",
        }
    }
}

pub(crate) struct HighlightedBlock {
    pub(crate) html: String,
    pub(crate) resolution: LanguageResolution,
}

pub(crate) fn highlight_code(
    language: Option<&str>,
    meta: Option<&str>,
    code: &str,
    syntax_set: &SyntaxSet,
    class_style: &ClassStyle,
) -> HighlightedBlock {
    let (syntax, mut resolution) = resolve_syntax(language, code, syntax_set);
    let token = escape_attribute(&resolution.class_token().to_ascii_lowercase());

    let highlighted =
        syntax.and_then(|syntax| classed_lines(syntax, code, syntax_set, class_style));
    if syntax.is_some() && highlighted.is_none() {
        // Grammar failed mid-block.
        resolution = LanguageResolution::Unknown(token.clone());
    }
    let (pre_class, body) = match highlighted {
        Some(body) => (format!("syntax-highlight syntax-lang-{token}"), body),
        None => ("syntax-plain".to_string(), escape_html(code)),
    };

    let meta_attr = meta
        .filter(|m| !m.is_empty())
        .map(|m| format!(" data-meta=\"{}\"", escape_attribute(m)))
        .unwrap_or_default();

    let html = format!(
        "<pre class=\"{pre_class}\" data-language=\"{token}\"><code class=\"language-{token} syntax-code\"{meta_attr}>{body}</code></pre>"
    );

    HighlightedBlock { html, resolution }
}

fn resolve_syntax<'s>(
    language: Option<&str>,
    code: &str,
    syntax_set: &'s SyntaxSet,
) -> (Option<&'s SyntaxReference>, LanguageResolution) {
    match language.map(str::trim).filter(|token| !token.is_empty()) {
        Some(token) => match find_syntax(syntax_set, token) {
            Some(syntax) => (
                Some(syntax),
                LanguageResolution::Declared(token.to_ascii_lowercase()),
            ),
            None => (None, LanguageResolution::Unknown(token.to_ascii_lowercase())),
        },
        None => {
            let first_line = code.lines().next().unwrap_or_default();
            match syntax_set.find_syntax_by_first_line(first_line) {
                Some(syntax) => {
                    let token = syntax
                        .file_extensions
                        .first()
                        .cloned()
                        .unwrap_or_else(|| syntax.name.to_ascii_lowercase());
                    (Some(syntax), LanguageResolution::Guessed(token))
                }
                None => (None, LanguageResolution::Plain),
            }
        }
    }
}

fn classed_lines(
    syntax: &SyntaxReference,
    code: &str,
    syntax_set: &SyntaxSet,
    class_style: &ClassStyle,
) -> Option<String> {
    let mut code_with_newline = code.to_string();
    if !code_with_newline.ends_with('\n') {
        code_with_newline.push('\n');
    }

    let mut generator =
        ClassedHTMLGenerator::new_with_class_style(syntax, syntax_set, *class_style);
    for line in LinesWithEndings::from(code_with_newline.as_str()) {
        generator
            .parse_html_for_line_which_includes_newline(line)
            .ok()?;
    }
    Some(generator.finalize())
}

fn find_syntax<'a>(syntax_set: &'a SyntaxSet, token: &str) -> Option<&'a SyntaxReference> {
    let lowercase = token.to_ascii_lowercase();
    syntax_set
        .find_syntax_by_token(&lowercase)
        .or_else(|| syntax_set.find_syntax_by_name(token))
        .or_else(|| syntax_set.find_syntax_by_extension(&lowercase))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn syntax_set() -> SyntaxSet {
        SyntaxSet::load_defaults_newlines()
    }

    #[test]
    fn declared_language_is_highlighted_with_prefixed_classes() {
        let set = syntax_set();
        let style = ClassStyle::SpacedPrefixed { prefix: "syntax-" };
        let block = highlight_code(Some("rust"), None, "fn main() {}\n", &set, &style);

        assert_eq!(block.resolution, LanguageResolution::Declared("rust".into()));
        assert!(block.html.starts_with("<pre class=\"syntax-highlight syntax-lang-rust\""));
        assert!(block.html.contains("class=\"language-rust syntax-code\""));
        assert!(block.html.contains("syntax-"));
    }

    #[test]
    fn unknown_language_renders_escaped_plain_text() {
        let set = syntax_set();
        let style = ClassStyle::SpacedPrefixed { prefix: "syntax-" };
        let block = highlight_code(Some("klingon"), Some("x"), "a < b\n", &set, &style);

        assert_eq!(block.resolution, LanguageResolution::Unknown("klingon".into()));
        assert!(block.html.contains("<pre class=\"syntax-plain\""));
        assert!(block.html.contains("a &lt; b"));
        assert!(block.html.contains("data-meta=\"x\""));
    }

    #[test]
    fn missing_language_is_guessed_from_shebang() {
        let set = syntax_set();
        let style = ClassStyle::SpacedPrefixed { prefix: "syntax-" };
        let block = highlight_code(None, None, "#!/bin/bash\necho hi\n", &set, &style);

        assert!(matches!(block.resolution, LanguageResolution::Guessed(_)));
        assert!(block.html.contains("syntax-highlight"));
    }

    #[test]
    fn missing_language_without_hint_is_plain() {
        let set = syntax_set();
        let style = ClassStyle::SpacedPrefixed { prefix: "syntax-" };
        let block = highlight_code(None, None, "just words\n", &set, &style);

        assert_eq!(block.resolution, LanguageResolution::Plain);
        assert!(block.html.contains("language-text"));
    }
}
