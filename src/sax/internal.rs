#![allow(non_snake_case)]

//! Grammar rules that are matched on small, already extracted strings: the
//! pseudo-attributes of XML and text declarations, character references and
//! qualified names.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{char, digit1, hex_digit1, multispace0, multispace1, satisfy},
    combinator::{eof, map, map_res, opt, recognize},
    sequence::{delimited, pair, preceded, separated_pair, terminated, tuple},
    IResult,
};

use crate::chars;

/// Pseudo-attributes of an XML or text declaration.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct DeclAttrs<'a> {
    pub version: Option<&'a str>,
    pub encoding: Option<&'a str>,
    pub standalone: Option<bool>,
}

// [25] Eq ::= S? '=' S?
fn Eq(input: &str) -> IResult<&str, char> {
    delimited(multispace0, char('='), multispace0)(input)
}

// [26] VersionNum ::= '1.' [0-9]+
fn VersionNum(input: &str) -> IResult<&str, &str> {
    recognize(pair(tag("1."), digit1))(input)
}

#[test]
fn test_VersionNum() {
    assert_eq!(VersionNum("1.0 "), Ok((" ", "1.0")));
    assert!(VersionNum("2.0").is_err());
}

// [24] VersionInfo ::= S 'version' Eq ("'" VersionNum "'" | '"' VersionNum '"')
fn VersionInfo(input: &str) -> IResult<&str, &str> {
    preceded(
        tuple((multispace1, tag("version"), Eq)),
        alt((
            delimited(char('"'), VersionNum, char('"')),
            delimited(char('\''), VersionNum, char('\'')),
        )),
    )(input)
}

#[test]
fn test_VersionInfo() {
    assert_eq!(VersionInfo(r#"  version = "1.0" "#), Ok((" ", "1.0")));
    assert!(VersionInfo(r#" version="1.0'"#).is_err());
}

// [81] EncName ::= [A-Za-z] ([A-Za-z0-9._] | '-')*
fn EncName(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c| c.is_ascii_alphabetic()),
        take_while(|c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')),
    ))(input)
}

#[test]
fn test_EncName() {
    assert_eq!(EncName("UTF-8 "), Ok((" ", "UTF-8")));
    assert_eq!(EncName("ISO_8859.1"), Ok(("", "ISO_8859.1")));
    assert!(EncName("-utf").is_err());
}

// [80] EncodingDecl ::= S 'encoding' Eq ('"' EncName '"' | "'" EncName "'" )
fn EncodingDecl(input: &str) -> IResult<&str, &str> {
    preceded(
        tuple((multispace1, tag("encoding"), Eq)),
        alt((
            delimited(char('"'), EncName, char('"')),
            delimited(char('\''), EncName, char('\'')),
        )),
    )(input)
}

#[test]
fn test_EncodingDecl() {
    assert_eq!(EncodingDecl(" encoding='EUC-JP' "), Ok((" ", "EUC-JP")));
}

// [32] SDDecl ::= S 'standalone' Eq (("'" ('yes' | 'no') "'") | ('"' ('yes' | 'no') '"'))
fn yes_or_no(input: &str) -> IResult<&str, bool> {
    alt((map(tag("yes"), |_| true), map(tag("no"), |_| false)))(input)
}

fn SDDecl(input: &str) -> IResult<&str, bool> {
    preceded(
        tuple((multispace1, tag("standalone"), Eq)),
        alt((
            delimited(char('"'), yes_or_no, char('"')),
            delimited(char('\''), yes_or_no, char('\'')),
        )),
    )(input)
}

#[test]
fn test_SDDecl() {
    assert_eq!(SDDecl("  standalone='yes' "), Ok((" ", true)));
    assert_eq!(SDDecl(" standalone=\"no\""), Ok(("", false)));
    assert!(SDDecl(" standalone='maybe'").is_err());
}

// [23] XMLDecl ::= '<?xml' VersionInfo EncodingDecl? SDDecl? S? '?>'
//
// Matches what lies between '<?xml' and '?>'.
pub(crate) fn XMLDecl(input: &str) -> IResult<&str, DeclAttrs<'_>> {
    map(
        terminated(
            tuple((VersionInfo, opt(EncodingDecl), opt(SDDecl))),
            pair(multispace0, eof),
        ),
        |(version, encoding, standalone)| DeclAttrs {
            version: Some(version),
            encoding,
            standalone,
        },
    )(input)
}

#[test]
fn test_XMLDecl() {
    let (_, attrs) = XMLDecl(r#" version="1.0"  encoding="UTF-8" standalone='yes'"#).unwrap();
    assert_eq!(
        attrs,
        DeclAttrs {
            version: Some("1.0"),
            encoding: Some("UTF-8"),
            standalone: Some(true),
        }
    );
    assert!(XMLDecl(r#" encoding="UTF-8""#).is_err());
    // Order is fixed.
    assert!(XMLDecl(r#" version="1.0" standalone="no" encoding="UTF-8""#).is_err());
}

// [77] TextDecl ::= '<?xml' VersionInfo? EncodingDecl S? '?>'
pub(crate) fn TextDecl(input: &str) -> IResult<&str, DeclAttrs<'_>> {
    map(
        terminated(
            pair(opt(VersionInfo), EncodingDecl),
            pair(multispace0, eof),
        ),
        |(version, encoding)| DeclAttrs {
            version,
            encoding: Some(encoding),
            standalone: None,
        },
    )(input)
}

#[test]
fn test_TextDecl() {
    let (_, attrs) = TextDecl(" encoding='latin1' ").unwrap();
    assert_eq!(attrs.encoding, Some("latin1"));
    assert_eq!(attrs.version, None);
    assert!(TextDecl(r#" version="1.0""#).is_err());
    assert!(TextDecl(r#" version="1.0" encoding="UTF-8" standalone="yes""#).is_err());
}

// [66] CharRef ::= '&#' [0-9]+ ';' | '&#x' [0-9a-fA-F]+ ';'
pub(crate) fn CharRef(input: &str) -> IResult<&str, u32> {
    alt((
        map_res(delimited(tag("&#x"), hex_digit1, char(';')), |hex| {
            u32::from_str_radix(hex, 16)
        }),
        map_res(delimited(tag("&#"), digit1, char(';')), |dec: &str| {
            dec.parse::<u32>()
        }),
    ))(input)
}

#[test]
fn test_CharRef() {
    assert_eq!(CharRef("&#60;"), Ok(("", 60)));
    assert_eq!(CharRef("&#x1F600;rest"), Ok(("rest", 0x1F600)));
    assert!(CharRef("&#X41;").is_err());
    assert!(CharRef("&#;").is_err());
    assert!(CharRef("&#99999999999;").is_err());
}

// Namespaces in XML 1.0 https://www.w3.org/TR/xml-names/

// [4] NCName ::= Name - (Char* ':' Char*)	/* An XML Name, minus the ":" */
fn nc_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c| c == '_' || chars::is_letter(c)),
        take_while(|c: char| c != ':' && chars::is_name_char(c)),
    ))(input)
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct QName<'a> {
    pub prefix: &'a str,
    pub local_name: &'a str,
}

// [7] QName ::= PrefixedName | UnprefixedName
// [8] PrefixedName ::= Prefix ':' LocalPart
// [9] UnprefixedName ::= LocalPart
pub(crate) fn QName(input: &str) -> IResult<&str, QName<'_>> {
    alt((
        //first try harder alternative
        map(
            terminated(separated_pair(nc_name, char(':'), nc_name), eof),
            |(prefix, local_name)| QName { prefix, local_name },
        ),
        map(terminated(nc_name, eof), |local_name| QName {
            prefix: "",
            local_name,
        }),
    ))(input)
}

#[test]
fn test_qname() {
    use nom::{error::ErrorKind, error_position, Err};

    assert_eq!(
        QName(":no"),
        Err(Err::Error(error_position!(":no", ErrorKind::Satisfy)))
    );

    //this should fail
    assert_eq!(
        QName("a:b:"),
        Err(Err::Error(error_position!(":b:", ErrorKind::Eof)))
    );

    assert_eq!(
        QName("a:b"),
        Ok((
            "",
            QName {
                prefix: "a",
                local_name: "b",
            }
        ))
    );

    assert_eq!(
        QName("a:123"),
        Err(Err::Error(error_position!(":123", ErrorKind::Eof)))
    );

    assert_eq!(
        QName("_p:\u{e9}t\u{e9}"),
        Ok((
            "",
            QName {
                prefix: "_p",
                local_name: "\u{e9}t\u{e9}",
            }
        ))
    );
    assert!(QName("a:-b").is_err());
    assert!(QName("\u{B7}a").is_err());
}
