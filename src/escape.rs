//! Escaping of text so that parsing it back yields the same characters.

use std::borrow::Cow;

use crate::{dtd::validator::predefined_char, sax::internal};

/// Where escaped text is going to be written.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EscapeKind {
    /// A quoted attribute value, either quote style.
    Attribute,
    /// Character data between tags.
    ElemText,
}

/// Escapes `text` for `kind`. Borrows when nothing needs escaping.
///
/// Whitespace other than a space is written as character references in
/// attributes so that value normalization leaves it alone, and carriage
/// returns are always escaped so end-of-line handling does not fold them.
pub fn escape_for(text: &str, kind: EscapeKind) -> Cow<'_, str> {
    let Some(first) = text.find(|c| needs_escape(c, kind)) else {
        return Cow::Borrowed(text);
    };
    let mut out = String::with_capacity(text.len() + 16);
    out.push_str(&text[..first]);
    for c in text[first..].chars() {
        match (c, kind) {
            ('&', _) => out.push_str("&amp;"),
            ('<', _) => out.push_str("&lt;"),
            ('>', _) => out.push_str("&gt;"),
            ('\r', _) => out.push_str("&#13;"),
            ('"', EscapeKind::Attribute) => out.push_str("&quot;"),
            ('\'', EscapeKind::Attribute) => out.push_str("&apos;"),
            ('\t', EscapeKind::Attribute) => out.push_str("&#9;"),
            ('\n', EscapeKind::Attribute) => out.push_str("&#10;"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}

fn needs_escape(c: char, kind: EscapeKind) -> bool {
    match c {
        '&' | '<' | '>' | '\r' => true,
        '"' | '\'' | '\t' | '\n' => kind == EscapeKind::Attribute,
        _ => false,
    }
}

/// Replaces character references and the predefined entities. Anything
/// else that looks like a reference is kept as written.
pub fn unescape(text: &str) -> Cow<'_, str> {
    if !text.contains('&') {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let Some(semi) = rest.find(';') else {
            break;
        };
        let reference = &rest[..=semi];
        match resolve(reference) {
            Some(c) => out.push(c),
            None => out.push_str(reference),
        }
        rest = &rest[semi + 1..];
    }
    out.push_str(rest);
    Cow::Owned(out)
}

fn resolve(reference: &str) -> Option<char> {
    if reference.starts_with("&#") {
        let (_, value) = internal::CharRef(reference).ok()?;
        return char::from_u32(value);
    }
    predefined_char(&reference[1..reference.len() - 1])
}
