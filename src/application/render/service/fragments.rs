//! Parsing of embedded fragments: capitalized component tags and image
//! dimension hints.

use std::{borrow::Cow, collections::BTreeMap, num::NonZeroU32};

use url::form_urlencoded;

/// Largest accepted image dimension in either axis.
pub(crate) const MAX_DIMENSION: u32 = 10_000;

const WIDTH: &str = "width";
const HEIGHT: &str = "height";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ComponentTag {
    pub(crate) name: String,
    pub(crate) attributes: BTreeMap<String, String>,
    /// Raw text between an opening and closing tag, trimmed.
    pub(crate) children: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TagParse {
    /// Ordinary HTML; left for the sanitizer.
    NotComponent,
    Component(ComponentTag),
    /// An opening tag with nothing after it. Inline callers may pair it with
    /// a later closing tag.
    Opening(ComponentTag),
    Malformed(String),
}

/// Parse a raw HTML literal as a single component tag.
///
/// Components start with an uppercase letter. Accepted attribute forms are
/// `a="v"`, `a='v'`, `a={expr}` (kept verbatim without braces) and bare `a`,
/// which means `"true"`.
pub(crate) fn parse_component(literal: &str) -> TagParse {
    let source = literal.trim();
    let Some(rest) = source.strip_prefix('<') else {
        return TagParse::NotComponent;
    };
    if !rest.starts_with(|ch: char| ch.is_ascii_uppercase()) {
        return TagParse::NotComponent;
    }

    let mut cursor = Cursor::new(rest);
    let name = cursor.take_while(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '.');
    let mut attributes = BTreeMap::new();

    loop {
        cursor.skip_whitespace();
        if cursor.eat("/>") {
            return if cursor.rest().trim().is_empty() {
                TagParse::Component(ComponentTag {
                    name: name.to_string(),
                    attributes,
                    children: None,
                })
            } else {
                TagParse::Malformed(format!("unexpected content after `<{name} />`"))
            };
        }
        if cursor.eat(">") {
            if cursor.rest().trim().is_empty() {
                return TagParse::Opening(ComponentTag {
                    name: name.to_string(),
                    attributes,
                    children: None,
                });
            }
            return close_paired(name, attributes, cursor.rest());
        }
        if cursor.is_empty() {
            return TagParse::Malformed(format!("unterminated `<{name}` tag"));
        }

        let key = cursor.take_while(|ch| {
            ch.is_ascii_alphanumeric() || matches!(ch, '_' | ':' | '.' | '-')
        });
        if key.is_empty() {
            return TagParse::Malformed(format!(
                "unexpected character `{}` in `<{name}>`",
                cursor.peek().unwrap_or(' ')
            ));
        }

        cursor.skip_whitespace();
        if !cursor.eat("=") {
            attributes.insert(key.to_string(), "true".to_string());
            continue;
        }
        cursor.skip_whitespace();

        let value = match cursor.peek() {
            Some(quote @ ('"' | '\'')) => {
                cursor.advance(1);
                match cursor.take_until(quote) {
                    Some(value) => value.to_string(),
                    None => {
                        return TagParse::Malformed(format!(
                            "unterminated value for `{key}` in `<{name}>`"
                        ));
                    }
                }
            }
            Some('{') => match cursor.take_braced() {
                Some(expression) => expression.trim().to_string(),
                None => {
                    return TagParse::Malformed(format!(
                        "unbalanced expression for `{key}` in `<{name}>`"
                    ));
                }
            },
            _ => {
                return TagParse::Malformed(format!(
                    "attribute `{key}` in `<{name}>` has no value"
                ));
            }
        };
        attributes.insert(key.to_string(), value);
    }
}

fn close_paired(name: &str, attributes: BTreeMap<String, String>, rest: &str) -> TagParse {
    let closing = format!("</{name}>");
    let body = rest.trim_end();
    match body.strip_suffix(closing.as_str()) {
        Some(inner) => {
            let inner = inner.trim();
            TagParse::Component(ComponentTag {
                name: name.to_string(),
                attributes,
                children: (!inner.is_empty()).then(|| inner.to_string()),
            })
        }
        None => TagParse::Malformed(format!("`<{name}>` is never closed")),
    }
}

struct Cursor<'s> {
    source: &'s str,
    offset: usize,
}

impl<'s> Cursor<'s> {
    fn new(source: &'s str) -> Self {
        Self { source, offset: 0 }
    }

    fn rest(&self) -> &'s str {
        &self.source[self.offset..]
    }

    fn is_empty(&self) -> bool {
        self.offset >= self.source.len()
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn advance(&mut self, bytes: usize) {
        self.offset = (self.offset + bytes).min(self.source.len());
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.rest().starts_with(token) {
            self.advance(token.len());
            true
        } else {
            false
        }
    }

    fn skip_whitespace(&mut self) {
        self.take_while(char::is_whitespace);
    }

    fn take_while(&mut self, predicate: impl Fn(char) -> bool) -> &'s str {
        let rest = self.rest();
        let end = rest
            .char_indices()
            .find(|(_, ch)| !predicate(*ch))
            .map(|(idx, _)| idx)
            .unwrap_or(rest.len());
        self.advance(end);
        &rest[..end]
    }

    fn take_until(&mut self, terminator: char) -> Option<&'s str> {
        let rest = self.rest();
        let end = rest.find(terminator)?;
        self.advance(end + terminator.len_utf8());
        Some(&rest[..end])
    }

    /// Consume `{...}` with nesting, returning the inner text.
    fn take_braced(&mut self) -> Option<&'s str> {
        let rest = self.rest();
        let mut depth = 0usize;
        for (idx, ch) in rest.char_indices() {
            match ch {
                '{' => depth += 1,
                '}' => {
                    depth = depth.checked_sub(1)?;
                    if depth == 0 {
                        self.advance(idx + 1);
                        return Some(&rest[1..idx]);
                    }
                }
                _ => {}
            }
        }
        None
    }
}

/// Parse a trailing `{width=640 height=480}` block. Both dimensions must be valid.
pub(crate) fn parse_dimension_block(value: &str) -> Option<(NonZeroU32, NonZeroU32)> {
    let inner = value.strip_prefix('{')?.strip_suffix('}')?.trim();
    let inner = inner.strip_prefix(':').map(str::trim_start).unwrap_or(inner);

    let mut width = None;
    let mut height = None;
    for token in inner.split_whitespace() {
        let Some((key, raw)) = token.split_once('=') else {
            continue;
        };
        let raw = raw.trim_matches('"');
        match key.trim() {
            WIDTH => width = parse_dimension_value(raw).or(width),
            HEIGHT => height = parse_dimension_value(raw).or(height),
            _ => {}
        }
    }

    Some((width?, height?))
}

/// Dimensions carried as `?width=..&height=..` on the image URL.
pub(crate) fn dimensions_from_query(url: &str) -> (Option<NonZeroU32>, Option<NonZeroU32>) {
    let before_fragment = url.split('#').next().unwrap_or(url);
    let Some((_, query)) = before_fragment.split_once('?') else {
        return (None, None);
    };

    let pairs: Vec<(Cow<'_, str>, Cow<'_, str>)> =
        form_urlencoded::parse(query.as_bytes()).collect();
    let lookup = |name: &str| {
        pairs
            .iter()
            .find(|(key, _)| key == name)
            .and_then(|(_, value)| parse_dimension_value(value))
    };

    (lookup(WIDTH), lookup(HEIGHT))
}

fn parse_dimension_value(raw: &str) -> Option<NonZeroU32> {
    if raw.is_empty() || !raw.chars().all(|ch| ch.is_ascii_digit()) {
        return None;
    }

    let value: u32 = raw.parse().ok()?;
    if value > MAX_DIMENSION {
        return None;
    }
    NonZeroU32::new(value)
}
