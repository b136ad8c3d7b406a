mod common;

use common::parse;
use dtd_oxide::{
    escape::{escape_for, unescape, EscapeKind},
    sax::ParseOptions,
};
use pretty_assertions::assert_eq;
use rand::{rngs::StdRng, Rng, SeedableRng};

fn round_trip(value: &str) {
    let doc = format!(
        "<r a=\"{}\" b='{}'>{}</r>",
        escape_for(value, EscapeKind::Attribute),
        escape_for(value, EscapeKind::Attribute),
        escape_for(value, EscapeKind::ElemText)
    );
    let (parser, result) = parse(&doc, ParseOptions::NONE);
    result.unwrap_or_else(|err| panic!("{:?} as {:?}: {}", value, doc, err));

    let handler = parser.handler();
    assert_eq!(handler.events[1], format!("<r a={:?} b={:?}>", value, value), "{}", doc);
    assert_eq!(handler.text(), value, "{}", doc);
}

#[test]
fn special_characters_survive_parsing() {
    for value in [
        "plain",
        "a < b && c > d",
        "\"double\" and 'single'",
        "tab\there\nnewline\r\ncrlf\rcr",
        "]]> in text",
        "  leading and trailing  ",
        "&amp; already escaped",
        "unicode é 𝄞",
    ] {
        round_trip(value);
    }
}

#[test]
fn random_strings_survive_parsing() {
    const ALPHABET: &[char] = &['a', ' ', '<', '>', '&', '"', '\'', '\t', '\n', '\r', ']', ';', '#', 'é'];
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..200 {
        let len = rng.random_range(1..24);
        let value: String = (0..len)
            .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())])
            .collect();
        round_trip(&value);
    }
}

#[test]
fn unescape_reverses_escape() {
    let value = "<tag attr=\"x\"> & 'y'\t\n\r";
    let escaped = escape_for(value, EscapeKind::Attribute);
    assert_eq!(unescape(&escaped), value);
    assert_eq!(unescape(&escape_for(value, EscapeKind::ElemText)), value);
}
