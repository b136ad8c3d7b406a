use dtd_oxide::{
    sax::{Attribute, DocumentHandler, DtdHandler, ElementName, EntityResolver, ErrorHandler, ParseOptions, Parser},
    Diagnostic, ErrorCode, Severity,
};
use pretty_assertions::assert_eq;

#[derive(Default)]
struct NamespaceHandler {
    element_namespace_data: String,
    attribute_namespace_data: String,
    end_namespace_data: String,
    errors: Vec<Diagnostic>,
}

impl DocumentHandler for NamespaceHandler {
    fn start_tag(&mut self, name: &ElementName, attrs: &[Attribute], _is_empty: bool) {
        self.element_namespace_data
            .push_str(&format!("{}->{},", name.name, name.namespace));
        for attr in attrs {
            self.attribute_namespace_data
                .push_str(&format!("{}->{},", attr.name, attr.namespace));
        }
    }

    fn end_tag(&mut self, name: &ElementName) {
        self.end_namespace_data
            .push_str(&format!("{}:{}->{},", name.prefix, name.local_name, name.namespace));
    }
}

impl DtdHandler for NamespaceHandler {}
impl EntityResolver for NamespaceHandler {}

impl ErrorHandler for NamespaceHandler {
    fn handle_error(&mut self, diagnostic: &Diagnostic) {
        self.errors.push(diagnostic.clone());
    }
}

fn parse_ns(doc: &str) -> Parser<NamespaceHandler> {
    let mut parser = Parser::new(NamespaceHandler::default());
    parser
        .parse_buffer("ns.xml", doc.as_bytes(), ParseOptions::NAMESPACES)
        .unwrap();
    parser
}

#[test]
fn prefixes_are_scoped_to_their_element() {
    let doc = r#"<root xmlns:h="http://www.w3.org/TR/html4/">
<h:table><h:tr/></h:table>
<f:table xmlns:f="https://www.w3schools.com/furniture"><f:name/></f:table>
<h:td/>
</root>"#;
    let parser = parse_ns(doc);
    let handler = parser.handler();
    assert_eq!(
        handler.element_namespace_data,
        "root->,h:table->http://www.w3.org/TR/html4/,h:tr->http://www.w3.org/TR/html4/,\
         f:table->https://www.w3schools.com/furniture,f:name->https://www.w3schools.com/furniture,\
         h:td->http://www.w3.org/TR/html4/,"
    );
    assert!(handler.errors.is_empty());
}

#[test]
fn binding_goes_out_of_scope() {
    let doc = r#"<root><a xmlns:p="urn:p"><p:b/></a><p:c/></root>"#;
    let mut parser = Parser::new(NamespaceHandler::default());
    let result = parser.parse_buffer("ns.xml", doc.as_bytes(), ParseOptions::NAMESPACES);
    result.unwrap();

    let handler = parser.handler();
    assert_eq!(handler.element_namespace_data, "root->,a->,p:b->urn:p,p:c->,");
    assert_eq!(handler.errors.len(), 1);
    assert_eq!(handler.errors[0].code, ErrorCode::BadNamespacePrefix);
    assert_eq!(handler.errors[0].severity, Severity::Error);
}

#[test]
fn default_namespace_applies_to_elements_only() {
    let doc = r#"<root xmlns="urn:d" xmlns:x="urn:x" plain="1" x:q="2"><inner xmlns=""/></root>"#;
    let parser = parse_ns(doc);
    let handler = parser.handler();
    assert_eq!(handler.element_namespace_data, "root->urn:d,inner->,");
    assert_eq!(
        handler.attribute_namespace_data,
        "xmlns->http://www.w3.org/2000/xmlns/,xmlns:x->http://www.w3.org/2000/xmlns/,plain->,x:q->urn:x,xmlns->http://www.w3.org/2000/xmlns/,"
    );
    assert_eq!(handler.end_namespace_data, ":inner->,:root->urn:d,");
}

#[test]
fn xml_prefix_is_predeclared() {
    let parser = parse_ns(r#"<a xml:lang="en"/>"#);
    assert_eq!(
        parser.handler().attribute_namespace_data,
        "xml:lang->http://www.w3.org/XML/1998/namespace,"
    );
}

#[test]
fn reserved_bindings_are_rejected() {
    for doc in [
        r#"<a xmlns:xml="urn:other"/>"#,
        r#"<a xmlns:xmlns="urn:other"/>"#,
        r#"<a xmlns:p=""/>"#,
    ] {
        let parser = parse_ns(doc);
        assert_eq!(
            parser.handler().errors.iter().map(|d| d.code).collect::<Vec<_>>(),
            [ErrorCode::BadNamespacePrefix],
            "{}",
            doc
        );
    }
}

#[test]
fn names_are_left_alone_without_namespace_processing() {
    let mut parser = Parser::new(NamespaceHandler::default());
    parser
        .parse_buffer("ns.xml", b"<p:a xmlns:p=\"urn:p\"/>", ParseOptions::NONE)
        .unwrap();
    assert_eq!(parser.handler().element_namespace_data, "p:a->,");
    assert_eq!(parser.handler().end_namespace_data, ":p:a->,");
}
