mod common;

use std::sync::Arc;

use common::{parse, parse_with, Collector};
use dtd_oxide::{
    dtd::ElementModel,
    entity::MemEntitySource,
    sax::{EntityKind, ParseFlags, ParseOptions, Parser},
    ErrorCode, Severity,
};
use pretty_assertions::assert_eq;

const R_DTD: &str = "<?xml version='1.0' encoding='UTF-8'?>
<!ELEMENT r (a+)>
<!ELEMENT a EMPTY>
<!ATTLIST a n CDATA 'dflt'>";

fn model(parser: &Parser<Collector>, name: &str) -> Option<String> {
    parser.validator().element(name).map(|d| d.format_model())
}

#[test]
fn external_subset_is_read_through_the_resolver() {
    let collector = Collector::default().with_entity("r.dtd", R_DTD);
    let doc = "<!DOCTYPE r SYSTEM 'r.dtd'><r><a/><a n='x'/></r>";
    let (parser, result) = parse_with(collector, doc, ParseOptions::VALIDATE);
    result.unwrap();

    let handler = parser.handler();
    assert_eq!(handler.resolved, [("r.dtd".to_string(), EntityKind::ExternalSubset)]);
    assert_eq!(
        handler.dtd_events,
        [
            "doctype r None Some(\"r.dtd\")",
            "start_ext_subset",
            "text_decl UTF-8",
            "element r (a+)",
            "element a EMPTY",
            "attr a n CDATA",
            "end_ext_subset",
        ]
    );
    assert!(handler.events.contains(&"<a n=\"dflt\"*/>".to_string()));
    assert!(handler.events.contains(&"<a n=\"x\"/>".to_string()));
    assert!(handler.errors.is_empty());
}

#[test]
fn internal_subset_comes_before_the_external_one() {
    let collector = Collector::default().with_entity("r.dtd", R_DTD);
    let doc = "<!DOCTYPE r SYSTEM 'r.dtd' [<!ATTLIST a n CDATA 'inner'>]><r><a/></r>";
    let (parser, result) = parse_with(collector, doc, ParseOptions::VALIDATE);
    result.unwrap();
    let handler = parser.handler();
    assert!(handler.dtd_events.contains(&"attr a n CDATA".to_string()));
    assert!(handler.events.contains(&"<a n=\"inner\"*/>".to_string()));
}

#[test]
fn conditional_sections() {
    let dtd = "<!ENTITY % on 'INCLUDE'>
<!ENTITY % off 'IGNORE'>
<![%on;[
  <!ELEMENT r (a)>
  <![ INCLUDE [ <!ELEMENT a EMPTY> ]]>
]]>
<![%off;[
  <!ELEMENT r ANY>
  <![IGNORE[ nested ]]> still ignored <!ELEMENT b EMPTY>
]]>
<![IGNORE[<!ELEMENT c EMPTY>]]>";
    let collector = Collector::default().with_entity("r.dtd", dtd);
    let doc = "<!DOCTYPE r SYSTEM 'r.dtd'><r><a/></r>";
    let (parser, result) = parse_with(collector, doc, ParseOptions::VALIDATE);
    result.unwrap();

    assert_eq!(model(&parser, "r"), Some("(a)".to_string()));
    assert_eq!(model(&parser, "a"), Some("EMPTY".to_string()));
    assert!(parser.validator().element("b").is_none());
    assert!(parser.validator().element("c").is_none());
    assert_eq!(parser.error_count(), 0);
}

#[test]
fn unterminated_ignore_section_is_fatal() {
    let collector = Collector::default().with_entity("r.dtd", "<![IGNORE[ <![IGNORE[ ]]>");
    let (_, result) = parse_with(collector, "<!DOCTYPE r SYSTEM 'r.dtd'><r/>", ParseOptions::NONE);
    assert_eq!(result.unwrap_err().code(), ErrorCode::UnexpectedEof);
}

#[test]
fn ignore_section_still_checks_characters() {
    let collector = Collector::default().with_entity("r.dtd", "<![IGNORE[ a < b ] c \u{2} ]]>");
    let (_, result) = parse_with(collector, "<!DOCTYPE r SYSTEM 'r.dtd'><r/>", ParseOptions::NONE);
    assert_eq!(result.unwrap_err().code(), ErrorCode::IllegalChar);

    let collector = Collector::default().with_entity("r.dtd", "<![IGNORE[ a < b ] c > ]]>");
    let (_, result) = parse_with(collector, "<!DOCTYPE r SYSTEM 'r.dtd'><r/>", ParseOptions::NONE);
    result.unwrap();
}

#[test]
fn parameter_entities_inside_external_declarations() {
    let dtd = "<!ENTITY % kids '(a|b)*'>
<!ENTITY % type 'CDATA'>
<!ELEMENT r %kids;>
<!ELEMENT a EMPTY>
<!ELEMENT b EMPTY>
<!ATTLIST r x %type; #IMPLIED>
<!ENTITY % decl \"<!ENTITY greeting 'hi'>\">
%decl;";
    let collector = Collector::default().with_entity("r.dtd", dtd);
    let doc = "<!DOCTYPE r SYSTEM 'r.dtd'><r x='1'><b/><a/>&greeting;</r>";
    let (parser, result) = parse_with(collector, doc, ParseOptions::NONE);
    result.unwrap();

    assert_eq!(model(&parser, "r"), Some("(a|b)*".to_string()));
    assert!(parser
        .validator()
        .element("r")
        .and_then(|d| d.attr_def("x"))
        .is_some());
    assert_eq!(parser.handler().text(), "hi");
}

#[test]
fn external_parameter_entity() {
    let collector = Collector::default()
        .with_entity("r.dtd", "<!ENTITY % more SYSTEM 'more.ent'>%more;<!ELEMENT r EMPTY>")
        .with_entity("more.ent", "<?xml encoding='UTF-8'?><!ELEMENT a EMPTY>");
    let (parser, result) = parse_with(collector, "<!DOCTYPE r SYSTEM 'r.dtd'><r/>", ParseOptions::VALIDATE);
    result.unwrap();
    assert_eq!(
        parser.handler().resolved,
        [
            ("r.dtd".to_string(), EntityKind::ExternalSubset),
            ("more.ent".to_string(), EntityKind::ParameterEntity),
        ]
    );
    assert!(parser.validator().element("a").is_some_and(|d| d.declared));
    assert_eq!(parser.error_count(), 0);
}

#[test]
fn attribute_defaults_and_fixed_values() {
    let dtd = "<!DOCTYPE r [
<!ELEMENT r EMPTY>
<!ATTLIST r kind (x|y) 'x' ver CDATA #FIXED '1' need CDATA #REQUIRED>
]>";
    let (parser, result) = parse(&format!("{}<r need='n'/>", dtd), ParseOptions::VALIDATE);
    result.unwrap();
    assert!(parser
        .handler()
        .events
        .contains(&"<r need=\"n\" kind=\"x\"* ver=\"1\"*/>".to_string()));
    assert_eq!(parser.error_count(), 0);

    let (parser, result) = parse(&format!("{}<r ver='2'/>", dtd), ParseOptions::VALIDATE);
    result.unwrap();
    assert_eq!(
        parser.handler().codes(Severity::Validation),
        [ErrorCode::FixedAttrMismatch, ErrorCode::RequiredAttrMissing]
    );

    let (parser, result) = parse(&format!("{}<r need='n' kind='z' extra='e'/>", dtd), ParseOptions::VALIDATE);
    result.unwrap();
    assert_eq!(
        parser.handler().codes(Severity::Validation),
        [ErrorCode::AttrValueNotInEnum, ErrorCode::UndeclaredAttribute]
    );

    // Defaults are still applied without validation.
    let (parser, result) = parse(&format!("{}<r/>", dtd), ParseOptions::NONE);
    result.unwrap();
    assert!(parser
        .handler()
        .events
        .contains(&"<r kind=\"x\"* ver=\"1\"*/>".to_string()));
    assert!(parser.handler().errors.is_empty());
}

#[test]
fn ids_and_idrefs() {
    let doc = "<!DOCTYPE r [
<!ELEMENT r (i*)>
<!ELEMENT i EMPTY>
<!ATTLIST i id ID #IMPLIED ref IDREF #IMPLIED refs IDREFS #IMPLIED>
]>
<r><i id='a'/><i id='a' ref='b'/><i refs=' a  a '/><i id='1x'/></r>";
    let (parser, result) = parse(doc, ParseOptions::VALIDATE);
    result.unwrap();
    assert_eq!(
        parser.handler().codes(Severity::Validation),
        [ErrorCode::DuplicateId, ErrorCode::BadAttrValue, ErrorCode::UnmatchedIdRef]
    );
    assert!(parser.handler().events.contains(&"<i refs=\"a a\"/>".to_string()));
}

#[test]
fn declaration_level_checks() {
    let doc = "<!DOCTYPE r [
<!ELEMENT r EMPTY>
<!ATTLIST r a ID 'x' b ID #IMPLIED f NOTATION (gif|png) #IMPLIED>
<!NOTATION gif SYSTEM 'viewer'>
<!ENTITY pic SYSTEM 'p.bin' NDATA jpeg>
]><r/>";
    let (parser, result) = parse(doc, ParseOptions::VALIDATE);
    result.unwrap();
    let mut codes = parser.handler().codes(Severity::Validation);
    codes.sort_by_key(|c| format!("{:?}", c));
    assert_eq!(
        codes,
        [
            ErrorCode::IdAttrDefault,
            ErrorCode::MultipleIdAttrs,
            ErrorCode::UndeclaredNotation,
            ErrorCode::UndeclaredNotation,
        ]
    );
}

#[test]
fn unparsed_entities_and_notations() {
    let dtd = "<!DOCTYPE r [
<!NOTATION gif SYSTEM 'viewer'>
<!NOTATION png PUBLIC '-//PNG//EN'>
<!ENTITY pic SYSTEM 'p.gif' NDATA gif>
<!ELEMENT r EMPTY>
<!ATTLIST r src ENTITY #IMPLIED fmt NOTATION (gif|png) #IMPLIED>
]>";
    let (parser, result) = parse(&format!("{}<r src='pic' fmt='png'/>", dtd), ParseOptions::VALIDATE);
    result.unwrap();
    assert_eq!(parser.error_count(), 0);
    let handler = parser.handler();
    assert!(handler.dtd_events.contains(&"notation gif".to_string()));
    assert!(handler.dtd_events.contains(&"entity pic".to_string()));
    assert_eq!(
        parser.validator().notation("png").and_then(|n| n.public_id.clone()),
        Some("-//PNG//EN".to_string())
    );

    let (parser, result) = parse(&format!("{}<r src='gif'/>", dtd), ParseOptions::VALIDATE);
    result.unwrap();
    assert_eq!(parser.handler().codes(Severity::Validation), [ErrorCode::NotUnparsedEntity]);
}

#[test]
fn standalone_document_with_external_defaults() {
    let collector = Collector::default().with_entity("r.dtd", R_DTD);
    let doc = "<?xml version='1.0' standalone='yes'?><!DOCTYPE r SYSTEM 'r.dtd'><r><a/></r>";
    let (parser, result) = parse_with(collector, doc, ParseOptions::VALIDATE);
    result.unwrap();
    assert!(parser.is_standalone());
    assert_eq!(parser.handler().codes(Severity::Validation), [ErrorCode::StandaloneViolation]);
}

#[test]
fn locked_validator_is_reused() {
    let mut parser = Parser::new(Collector::default().with_entity("r.dtd", R_DTD));
    parser.set_flags(ParseFlags::ALL);
    parser.set_lock_validator(true);

    parser
        .parse_buffer("one.xml", b"<!DOCTYPE r SYSTEM 'r.dtd'><r><a/></r>", ParseOptions::VALIDATE)
        .unwrap();
    parser
        .parse_buffer(
            "two.xml",
            b"<!DOCTYPE r SYSTEM 'r.dtd' [<!ELEMENT x EMPTY>]><r><a/><a/></r>",
            ParseOptions::VALIDATE,
        )
        .unwrap();
    assert_eq!(parser.handler().resolved.len(), 1);
    assert!(parser.validator().element("x").is_none());
    assert!(parser
        .handler()
        .dtd_events
        .contains(&"element x EMPTY (ignored)".to_string()));
    assert_eq!(parser.error_count(), 0);

    // No DOCTYPE at all still validates against the locked DTD.
    parser
        .parse_buffer("three.xml", b"<r><z/></r>", ParseOptions::VALIDATE)
        .unwrap();
    let codes: Vec<_> = parser.diagnostics().iter().map(|d| d.code).collect();
    assert!(codes.contains(&ErrorCode::UndeclaredElement), "{:?}", codes);
    assert!(!codes.contains(&ErrorCode::NoDocType));

    parser.set_lock_validator(false);
    parser
        .parse_buffer("four.xml", b"<!DOCTYPE r SYSTEM 'r.dtd'><r><a/></r>", ParseOptions::VALIDATE)
        .unwrap();
    assert_eq!(parser.handler().resolved.len(), 2);
}

#[test]
fn ignore_dtd_skips_the_external_subset() {
    let collector = Collector::default().with_entity("r.dtd", R_DTD);
    let doc = "<!DOCTYPE r SYSTEM 'r.dtd' [<!ENTITY e 'ee'><!ELEMENT r EMPTY>]><r>&e;&f;</r>";
    let (parser, result) = parse_with(collector, doc, ParseOptions::IGNORE_DTD | ParseOptions::VALIDATE);
    result.unwrap();

    let handler = parser.handler();
    assert!(handler.resolved.is_empty());
    assert!(handler.dtd_events.contains(&"element r EMPTY (ignored)".to_string()));
    assert_eq!(handler.text(), "ee");
    // Some of the DTD was never read, so the unknown entity is tolerated.
    assert_eq!(handler.codes(Severity::Warning), [ErrorCode::UndeclaredEntity]);
    assert_eq!(parser.error_count(), 0);
}

#[test]
fn default_external_subset() {
    let mut parser = Parser::new(Collector::default());
    let dtd = MemEntitySource::new("default.dtd", "<!ELEMENT r (a)><!ELEMENT a EMPTY>");
    parser.set_default_external_subset(Arc::new(dtd), "r");

    parser
        .parse_buffer("one.xml", b"<r><a/></r>", ParseOptions::VALIDATE)
        .unwrap();
    assert_eq!(parser.error_count(), 0);

    parser
        .parse_buffer("two.xml", b"<r/>", ParseOptions::VALIDATE)
        .unwrap();
    assert_eq!(
        parser.handler().codes(Severity::Validation),
        [ErrorCode::ContentModelMismatch]
    );

    parser
        .parse_buffer("three.xml", b"<!DOCTYPE q><q/>", ParseOptions::VALIDATE)
        .unwrap();
    assert!(parser.validator().element("a").is_some());
    let codes: Vec<_> = parser.diagnostics().iter().map(|d| d.code).collect();
    assert!(codes.contains(&ErrorCode::UndeclaredElement), "{:?}", codes);

    parser.clear_default_external_subset();
    parser
        .parse_buffer("four.xml", b"<r/>", ParseOptions::VALIDATE)
        .unwrap();
    let codes: Vec<_> = parser.diagnostics().iter().map(|d| d.code).collect();
    assert_eq!(codes, [ErrorCode::NoDocType]);
}

#[test]
fn wrong_root_and_undeclared_elements() {
    let doc = "<!DOCTYPE r [<!ELEMENT r ANY>]><q><z/></q>";
    let (parser, result) = parse(doc, ParseOptions::VALIDATE);
    result.unwrap();
    let codes = parser.handler().codes(Severity::Validation);
    assert_eq!(codes[0], ErrorCode::WrongRootElement);
    assert!(codes.contains(&ErrorCode::UndeclaredElement));
}

#[test]
fn empty_element_with_content() {
    let doc = "<!DOCTYPE r [<!ELEMENT r EMPTY>]><r> </r>";
    let (parser, result) = parse(doc, ParseOptions::VALIDATE);
    result.unwrap();
    assert_eq!(
        parser.handler().codes(Severity::Validation),
        [ErrorCode::EmptyElementHasContent]
    );
}

#[test]
fn dtd_comments_and_pis_have_their_location() {
    let collector = Collector::default().with_entity("r.dtd", "<!-- ext --><?p ext?>");
    let doc = "<!DOCTYPE r SYSTEM 'r.dtd' [<!-- int -->]><r/>";
    let (parser, result) = parse_with(collector, doc, ParseOptions::NONE);
    result.unwrap();
    let events = &parser.handler().events;
    assert!(events.contains(&"comment \" int \" IntSubset".to_string()));
    assert!(events.contains(&"comment \" ext \" ExtSubset".to_string()));
    assert!(events.contains(&"pi p \"ext\"".to_string()));
}

#[test]
fn flags_select_dtd_events() {
    let mut parser = Parser::new(Collector::default());
    parser.set_flags(ParseFlags::JUST_CONTENT);
    let doc = "<!DOCTYPE r [<!ELEMENT r EMPTY><!-- c -->]><r/>";
    parser
        .parse_buffer("doc.xml", doc.as_bytes(), ParseOptions::NONE)
        .unwrap();
    assert!(parser.handler().dtd_events.is_empty());
    assert_eq!(
        parser.handler().events,
        ["start_document", "<r/>", "</r>", "end_document"]
    );
}

#[test]
fn undeclared_parameter_entity_makes_the_dtd_incomplete() {
    let doc = "<!DOCTYPE r [%missing;]><r>&e;</r>";
    let (parser, result) = parse(doc, ParseOptions::NONE);
    result.unwrap();
    assert_eq!(
        parser.handler().codes(Severity::Warning),
        [ErrorCode::UndeclaredEntity, ErrorCode::UndeclaredEntity]
    );

    // With a complete DTD the same reference is a well-formedness error.
    let (_, result) = parse("<!DOCTYPE r []><r>&e;</r>", ParseOptions::NONE);
    assert_eq!(result.unwrap_err().code(), ErrorCode::UndeclaredEntity);
}
