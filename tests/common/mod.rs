#![allow(dead_code)]

use std::{collections::HashMap, sync::Arc};

use dtd_oxide::{
    dtd::{AttrDef, ElementDecl, ElementModel, EntityDecl, NotationDecl},
    entity::{EntitySourceRef, MemEntitySource},
    sax::{
        Attribute, DocumentHandler, DtdHandler, ElementName, EntityKind, EntityResolver,
        ErrorHandler, Location, ParseFlags, ParseOptions, Parser,
    },
    Diagnostic, ErrorCode, Severity, XmlResult,
};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Records events as short strings. Consecutive character events of the
/// same kind are merged, since the parser may split text at entity
/// boundaries.
#[derive(Default)]
pub struct Collector {
    pub events: Vec<String>,
    pub dtd_events: Vec<String>,
    /// Every character run as (text, all_whitespace).
    pub runs: Vec<(String, bool)>,
    pub errors: Vec<Diagnostic>,
    pub entities: HashMap<String, Vec<u8>>,
    pub resolved: Vec<(String, EntityKind)>,
}

impl Collector {
    pub fn with_entity(mut self, system_id: &str, data: impl Into<Vec<u8>>) -> Collector {
        self.entities.insert(system_id.to_string(), data.into());
        self
    }

    /// Codes of the diagnostics with the given severity.
    pub fn codes(&self, severity: Severity) -> Vec<ErrorCode> {
        self.errors
            .iter()
            .filter(|d| d.severity == severity)
            .map(|d| d.code)
            .collect()
    }

    /// Text of all non-ignorable character events.
    pub fn text(&self) -> String {
        self.runs.iter().map(|(text, _)| text.as_str()).collect()
    }
}

impl DocumentHandler for Collector {
    fn start_document(&mut self) {
        self.events.push("start_document".into());
    }

    fn end_document(&mut self) {
        self.events.push("end_document".into());
    }

    fn xml_decl(&mut self, version: &str, encoding: Option<&str>, standalone: Option<bool>) {
        self.events
            .push(format!("xml_decl {} {:?} {:?}", version, encoding, standalone));
    }

    fn start_tag(&mut self, name: &ElementName, attrs: &[Attribute], is_empty: bool) {
        let mut tag = format!("<{}", name.name);
        for attr in attrs {
            tag.push_str(&format!(" {}={:?}", attr.name, attr.value));
            if !attr.specified {
                tag.push('*');
            }
        }
        tag.push_str(if is_empty { "/>" } else { ">" });
        self.events.push(tag);
    }

    fn end_tag(&mut self, name: &ElementName) {
        self.events.push(format!("</{}>", name.name));
    }

    fn characters(&mut self, text: &str, is_cdata: bool, is_ignorable: bool, all_whitespace: bool) {
        let kind = match (is_cdata, is_ignorable) {
            (true, _) => "cdata:",
            (_, true) => "ignorable:",
            _ => "text:",
        };
        if !is_ignorable {
            self.runs.push((text.to_string(), all_whitespace));
        }
        match self.events.last_mut() {
            Some(last) if !is_cdata && last.starts_with(kind) => last.push_str(text),
            _ => self.events.push(format!("{}{}", kind, text)),
        }
    }

    fn comment(&mut self, text: &str, location: Location) {
        self.events.push(format!("comment {:?} {:?}", text, location));
    }

    fn processing_instruction(&mut self, target: &str, data: &str, _location: Location) {
        self.events.push(format!("pi {} {:?}", target, data));
    }

    fn start_entity(&mut self, name: &str) {
        self.events.push(format!("start_entity {}", name));
    }

    fn end_entity(&mut self, name: &str) {
        self.events.push(format!("end_entity {}", name));
    }
}

impl DtdHandler for Collector {
    fn doctype(&mut self, root: &str, public_id: Option<&str>, system_id: Option<&str>) {
        self.dtd_events
            .push(format!("doctype {} {:?} {:?}", root, public_id, system_id));
    }

    fn start_int_subset(&mut self) {
        self.dtd_events.push("start_int_subset".into());
    }

    fn end_int_subset(&mut self) {
        self.dtd_events.push("end_int_subset".into());
    }

    fn start_ext_subset(&mut self) {
        self.dtd_events.push("start_ext_subset".into());
    }

    fn end_ext_subset(&mut self) {
        self.dtd_events.push("end_ext_subset".into());
    }

    fn text_decl(&mut self, _version: Option<&str>, encoding: &str) {
        self.dtd_events.push(format!("text_decl {}", encoding));
    }

    fn element_decl(&mut self, decl: &ElementDecl, ignored: bool) {
        let tag = if ignored { " (ignored)" } else { "" };
        self.dtd_events
            .push(format!("element {} {}{}", decl.name, decl.format_model(), tag));
    }

    fn attr_def(&mut self, element: &str, def: &AttrDef, ignored: bool) {
        let tag = if ignored { " (ignored)" } else { "" };
        self.dtd_events
            .push(format!("attr {} {} {}{}", element, def.name, def.attr_type.keyword(), tag));
    }

    fn entity_decl(&mut self, decl: &EntityDecl, ignored: bool) {
        let tag = if ignored { " (ignored)" } else { "" };
        let kind = if decl.is_parameter { "%" } else { "" };
        self.dtd_events
            .push(format!("entity {}{}{}", kind, decl.name, tag));
    }

    fn notation_decl(&mut self, decl: &NotationDecl, _ignored: bool) {
        self.dtd_events.push(format!("notation {}", decl.name));
    }
}

impl ErrorHandler for Collector {
    fn handle_error(&mut self, diagnostic: &Diagnostic) {
        self.errors.push(diagnostic.clone());
    }
}

impl EntityResolver for Collector {
    fn resolve_entity(
        &mut self,
        _public_id: Option<&str>,
        system_id: &str,
        _entity_name: Option<&str>,
        _parent_id: &str,
        kind: EntityKind,
    ) -> Option<EntitySourceRef> {
        let data = self.entities.get(system_id)?.clone();
        self.resolved.push((system_id.to_string(), kind));
        Some(Arc::new(MemEntitySource::new(system_id, data)))
    }
}

/// Parses `doc` with every event enabled.
pub fn parse_with(collector: Collector, doc: &str, options: ParseOptions) -> (Parser<Collector>, XmlResult<()>) {
    init_logger();
    let mut parser = Parser::new(collector);
    parser.set_flags(ParseFlags::ALL);
    let result = parser.parse_buffer("doc.xml", doc.as_bytes(), options);
    (parser, result)
}

pub fn parse(doc: &str, options: ParseOptions) -> (Parser<Collector>, XmlResult<()>) {
    parse_with(Collector::default(), doc, options)
}
