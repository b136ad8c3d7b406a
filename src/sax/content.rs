use super::{
    context::{ContextLevel, UNDECLARED, XMLNS_NAMESPACE, XML_NAMESPACE},
    internal,
    parser::Parser,
    Attribute, EntityKind, Location, ParseFlags, ParseOptions, XmlHandler,
};
use crate::{
    chars::{self, CharFlags},
    dtd::{
        validator::{normalize_tokenized, predefined_char},
        AttrDef, AttrType, ContentModelKind, DefaultKind, ElementModel, ValidResult,
    },
    entity::spooler::{Spooler, SpoolerOptions},
    error::{ErrorCode, XmlResult},
};

impl<H: XmlHandler> Parser<H> {
    /// The root element through its end tag.
    pub(super) fn parse_content(&mut self) -> XmlResult<()> {
        self.location = Location::InContent;
        self.parse_start_tag()?;

        while !self.context.is_empty() {
            let next = self.mgr.peek_char()?;
            self.flush_ended_entities()?;
            self.drain_notes();
            match next {
                None => {
                    let name = self.context.top().map(|l| l.name.clone()).unwrap_or_default();
                    return Err(self.fatal(
                        ErrorCode::UnexpectedEof,
                        format!("document ends inside element '{}'", name),
                    ));
                }
                Some('<') => {
                    self.flush_text()?;
                    match self.mgr.peek_ahead(1)? {
                        Some('/') => self.parse_end_tag()?,
                        Some('?') => {
                            self.mgr.skip_string("<?")?;
                            self.parse_pi()?;
                        }
                        Some('!') => {
                            if self.mgr.skip_string("<!--")? {
                                self.parse_comment()?;
                            } else if self.mgr.skip_string("<![CDATA[")? {
                                self.parse_cdata()?;
                            } else {
                                return Err(self.fatal(
                                    ErrorCode::ExpectedMarkup,
                                    "expected a comment or CDATA section after '<!'",
                                ));
                            }
                        }
                        _ => self.parse_start_tag()?,
                    }
                }
                Some('&') => self.parse_reference()?,
                Some(_) => self.parse_char_data()?,
            }
        }
        self.flush_ended_entities()
    }

    /// Emits end_entity for content entities that have run out.
    fn flush_ended_entities(&mut self) -> XmlResult<()> {
        if !self.mgr.has_ended() {
            return Ok(());
        }
        for entity in self.mgr.take_ended() {
            let Some(pos) = self
                .content_entities
                .iter()
                .position(|&id| id == entity.spooler_id)
            else {
                continue;
            };
            self.content_entities.remove(pos);
            self.flush_text()?;
            if self.wants(ParseFlags::TOPOLOGY) {
                self.handler.end_entity(&entity.name);
            }
        }
        Ok(())
    }

    fn push_text(&mut self, c: char) {
        if !chars::is_whitespace(c) {
            self.text_all_ws = false;
        }
        self.text.push(c);
    }

    /// Reports the character data collected so far as one event.
    fn flush_text(&mut self) -> XmlResult<()> {
        if self.text.is_empty() {
            return Ok(());
        }
        let text = std::mem::take(&mut self.text);
        let all_whitespace = std::mem::replace(&mut self.text_all_ws, true);
        let ignorable = self.check_text(all_whitespace, false)?;
        let mask = if ignorable {
            ParseFlags::IGNORABLE_SPACE
        } else {
            ParseFlags::CHARS
        };
        if self.wants(mask) {
            self.handler.characters(&text, false, ignorable, all_whitespace);
        }
        self.text = text;
        self.text.clear();
        Ok(())
    }

    /// Checks text against the model of the open element. True if it is
    /// ignorable whitespace.
    fn check_text(&mut self, all_whitespace: bool, is_cdata: bool) -> XmlResult<bool> {
        if !self.validating {
            return Ok(false);
        }
        let Some(element_id) = self.context.top().map(|l| l.element_id) else {
            return Ok(false);
        };
        let Some(decl) = self.validator.element_by_id(element_id).filter(|d| d.declared) else {
            return Ok(false);
        };
        let (kind, name) = (decl.kind, decl.name.clone());
        match kind {
            ContentModelKind::Empty => {
                self.invalid(
                    ErrorCode::EmptyElementHasContent,
                    format!("element '{}' is declared EMPTY but has text", name),
                )?;
                Ok(false)
            }
            ContentModelKind::Children if all_whitespace && !is_cdata => Ok(true),
            ContentModelKind::Children => {
                let model = decl.format_model();
                self.invalid(
                    ErrorCode::TextNotAllowed,
                    format!("text is not allowed in element '{}' with content {}", name, model),
                )?;
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    fn parse_char_data(&mut self) -> XmlResult<()> {
        while let Some(c) = self.mgr.peek_char()? {
            if self.mgr.has_ended() {
                break;
            }
            let flags = chars::classify(c);
            if flags.contains(CharFlags::SPECIAL_CHAR_DATA) {
                match c {
                    '<' | '&' => break,
                    ']' => {
                        self.mgr.next_char()?;
                        if self.mgr.peek_char()? == Some(']') && self.mgr.peek_ahead(1)? == Some('>') {
                            return Err(self.fatal(
                                ErrorCode::CDataEndInContent,
                                "']]>' is not allowed in character data",
                            ));
                        }
                        self.push_text(c);
                        continue;
                    }
                    _ => {}
                }
            }
            self.mgr.next_char()?;
            if !flags.contains(CharFlags::XML_CHAR) {
                return Err(self.illegal_char(c, "character data"));
            }
            self.push_text(c);
        }
        Ok(())
    }

    /// `<![CDATA[` has been consumed.
    fn parse_cdata(&mut self) -> XmlResult<()> {
        let start = self.mgr.cur_spooler_id();
        let mut text = String::new();
        let mut all_whitespace = true;
        loop {
            let Some(c) = self.mgr.next_char()? else {
                return Err(self.fatal(ErrorCode::UnterminatedMarkup, "CDATA section is not terminated"));
            };
            if c == ']' && self.mgr.skip_string("]>")? {
                break;
            }
            if !chars::is_xml_char(c) {
                return Err(self.illegal_char(c, "CDATA section"));
            }
            all_whitespace &= chars::is_whitespace(c);
            text.push(c);
        }
        if self.mgr.cur_spooler_id() != start {
            return Err(self.fatal(
                ErrorCode::PartialMarkupInEntity,
                "CDATA section starts and ends in different entities",
            ));
        }
        self.check_text(all_whitespace, true)?;
        if self.wants(ParseFlags::CHARS) {
            self.handler.characters(&text, true, false, all_whitespace);
        }
        Ok(())
    }

    /// A reference in content; the `&` has not been consumed.
    fn parse_reference(&mut self) -> XmlResult<()> {
        self.mgr.next_char()?;
        if self.mgr.skip_if('#')? {
            let c = self.parse_char_ref()?;
            self.push_text(c);
            return Ok(());
        }
        let name = self.read_ref_name()?;
        if let Some(c) = predefined_char(&name) {
            self.push_text(c);
            return Ok(());
        }
        let Some(decl) = self.validator.general_entity(&name).cloned() else {
            return self.undeclared_entity(&name);
        };
        if decl.is_unparsed() {
            return Err(self.fatal(
                ErrorCode::UnparsedEntityReference,
                format!("unparsed entity '{}' cannot be referenced in content", name),
            ));
        }
        self.check_standalone_ref(decl.external, &name)?;
        self.flush_text()?;

        let spooler = match &decl.value {
            Some(value) => Spooler::from_text(decl.stack_name(), value, SpoolerOptions::default()),
            None => {
                let system_id = decl.system_id.clone().unwrap_or_default();
                let options = self.spooler_options(false);
                self.open_external(
                    decl.public_id.as_deref(),
                    &system_id,
                    Some(&name),
                    &decl.base_id,
                    EntityKind::GeneralEntity,
                    options,
                )?
            }
        };
        self.push_entity(spooler, &name)?;
        log::trace!("expanding '{}' in <{}>", name, self.context.top().map_or("", |l| l.name.as_str()));
        self.content_entities.push(self.mgr.cur_spooler_id());
        if decl.is_external() {
            self.parse_text_decl()?;
        }
        if self.wants(ParseFlags::TOPOLOGY) {
            self.handler.start_entity(&name);
        }
        Ok(())
    }

    /// Start or empty-element tag; the `<` has not been consumed.
    fn parse_start_tag(&mut self) -> XmlResult<()> {
        let start = self.mgr.cur_spooler_id();
        self.mgr.next_char()?;
        let mut name = String::new();
        if !self.mgr.get_name(&mut name)? {
            return Err(self.fatal(ErrorCode::ExpectedName, "expected an element name after '<'"));
        }

        let mut attrs: Vec<Attribute> = Vec::new();
        let is_empty = loop {
            let had_space = self.mgr.skip_spaces()?;
            match self.mgr.peek_char()? {
                Some('>') => {
                    self.check_tag_entity(start, &name)?;
                    self.mgr.next_char()?;
                    break false;
                }
                Some('/') => {
                    self.check_tag_entity(start, &name)?;
                    if !self.mgr.skip_string("/>")? {
                        return Err(self.fatal(
                            ErrorCode::ExpectedMarkup,
                            format!("expected '/>' in start tag of '{}'", name),
                        ));
                    }
                    break true;
                }
                Some(c) if chars::is_name_start_char(c) => {
                    if !had_space {
                        return Err(self.fatal(
                            ErrorCode::ExpectedWhitespace,
                            format!("attributes of '{}' must be separated by whitespace", name),
                        ));
                    }
                    let attr = self.parse_attribute()?;
                    if attrs.iter().any(|a| a.name == attr.name) {
                        return Err(self.fatal(
                            ErrorCode::DuplicateAttribute,
                            format!("attribute '{}' appears twice on '{}'", attr.name, name),
                        ));
                    }
                    attrs.push(attr);
                }
                None => {
                    return Err(self.fatal(
                        ErrorCode::UnexpectedEof,
                        format!("start tag of '{}' is not terminated", name),
                    ))
                }
                Some(c) => {
                    return Err(self.fatal(
                        ErrorCode::ExpectedMarkup,
                        format!("unexpected '{}' in start tag of '{}'", c, name),
                    ))
                }
            }
        };
        self.start_element(name, attrs, is_empty, start)
    }

    fn check_tag_entity(&mut self, start: u32, name: &str) -> XmlResult<()> {
        if self.mgr.cur_spooler_id() != start {
            return Err(self.fatal(
                ErrorCode::PartialMarkupInEntity,
                format!("start tag of '{}' is split across entities", name),
            ));
        }
        Ok(())
    }

    fn parse_attribute(&mut self) -> XmlResult<Attribute> {
        let mut name = String::new();
        self.mgr.get_name(&mut name)?;
        self.mgr.skip_spaces()?;
        if !self.mgr.skip_if('=')? {
            return Err(self.fatal(
                ErrorCode::ExpectedEquals,
                format!("expected '=' after attribute '{}'", name),
            ));
        }
        self.mgr.skip_spaces()?;
        let value = self.parse_attr_value()?;
        Ok(Attribute::new(name, value))
    }

    fn start_element(&mut self, name: String, mut attrs: Vec<Attribute>, is_empty: bool, spooler_id: u32) -> XmlResult<()> {
        let is_root = self.context.is_empty();
        let decl = self.validator.element(&name);
        let element_id = decl.map_or(UNDECLARED, |d| d.id());
        let declared = decl.is_some_and(|d| d.declared);
        let defs: Vec<AttrDef> = decl
            .map(|d| d.attr_defs().iter().cloned().collect())
            .unwrap_or_default();

        if self.validating {
            if is_root {
                let root = self.validator.root_name().map(str::to_string);
                if let Some(root) = root.filter(|root| *root != name) {
                    self.invalid(
                        ErrorCode::WrongRootElement,
                        format!("root element '{}' does not match DOCTYPE '{}'", name, root),
                    )?;
                }
            }
            if !declared {
                self.invalid(
                    ErrorCode::UndeclaredElement,
                    format!("element '{}' is not declared", name),
                )?;
            }
        }

        self.apply_attr_defs(&name, &mut attrs, &defs)?;
        self.context.add_child(element_id, &name);
        self.context.push(ContextLevel::new(element_id, &name, spooler_id));
        if self.options.contains(ParseOptions::NAMESPACES) {
            self.resolve_namespaces(&mut attrs)?;
        }

        if self.wants(ParseFlags::TAGS) {
            if let Some(level) = self.context.top() {
                self.handler.start_tag(&level.element_name(), &attrs, is_empty);
            }
        }
        if is_empty {
            self.end_element()?;
        }
        Ok(())
    }

    /// Normalizes and checks the given attributes, then adds defaults for
    /// the missing ones.
    fn apply_attr_defs(&mut self, element: &str, attrs: &mut Vec<Attribute>, defs: &[AttrDef]) -> XmlResult<()> {
        for attr in attrs.iter_mut() {
            let Some(def) = defs.iter().find(|d| d.name == attr.name) else {
                if self.validating {
                    self.invalid(
                        ErrorCode::UndeclaredAttribute,
                        format!("attribute '{}' of element '{}' is not declared", attr.name, element),
                    )?;
                }
                continue;
            };
            if def.attr_type.is_tokenized() {
                let normalized = normalize_tokenized(&attr.value);
                if self.validating && self.standalone && def.external && normalized != attr.value {
                    self.invalid(
                        ErrorCode::StandaloneViolation,
                        format!(
                            "standalone document relies on external declaration to normalize '{}'",
                            attr.name
                        ),
                    )?;
                }
                attr.value = normalized;
            }
            if self.validating {
                self.validate_attr(element, def, &attr.value)?;
            }
        }

        for def in defs {
            if attrs.iter().any(|a| a.name == def.name) {
                continue;
            }
            match def.default_value() {
                Some(value) => {
                    if self.validating {
                        if self.standalone && def.external {
                            self.invalid(
                                ErrorCode::StandaloneViolation,
                                format!(
                                    "standalone document relies on external default for '{}'",
                                    def.name
                                ),
                            )?;
                        }
                        if matches!(def.attr_type, AttrType::IdRef | AttrType::IdRefs) {
                            self.validator.add_idrefs(value);
                        }
                    }
                    let mut attr = Attribute::new(def.name.clone(), value);
                    attr.specified = false;
                    attrs.push(attr);
                }
                None if self.validating && def.default_kind == DefaultKind::Required => {
                    self.invalid(
                        ErrorCode::RequiredAttrMissing,
                        format!("required attribute '{}' of element '{}' is missing", def.name, element),
                    )?;
                }
                None => {}
            }
        }
        Ok(())
    }

    fn validate_attr(&mut self, element: &str, def: &AttrDef, value: &str) -> XmlResult<()> {
        if let Err(problem) = self.validator.check_attr_value(def, value) {
            self.invalid(problem.code, format!("{} on element '{}'", problem.message, element))?;
        }
        match def.attr_type {
            AttrType::Id => {
                if !self.validator.register_id(value) {
                    self.invalid(ErrorCode::DuplicateId, format!("ID '{}' is already used", value))?;
                }
            }
            AttrType::IdRef | AttrType::IdRefs => self.validator.add_idrefs(value),
            _ => {}
        }
        Ok(())
    }

    /// Binds the namespace attributes of the innermost element, then
    /// resolves its name and attribute names.
    fn resolve_namespaces(&mut self, attrs: &mut [Attribute]) -> XmlResult<()> {
        for attr in attrs.iter() {
            if attr.name == "xmlns" {
                self.context.bind("", &attr.value);
                continue;
            }
            let Some(prefix) = attr.name.strip_prefix("xmlns:") else {
                continue;
            };
            let misbound = (prefix == "xml") != (attr.value == XML_NAMESPACE)
                || prefix == "xmlns"
                || attr.value == XMLNS_NAMESPACE;
            if attr.value.is_empty() || misbound {
                self.error(
                    ErrorCode::BadNamespacePrefix,
                    format!("prefix '{}' cannot be bound to \"{}\"", prefix, attr.value),
                )?;
                continue;
            }
            self.context.bind(prefix, &attr.value);
        }

        let name = self.context.top().map(|l| l.name.clone()).unwrap_or_default();
        let (prefix, local_name, namespace) = self.split_qname(&name, true)?;
        if let Some(level) = self.context.top_mut() {
            level.prefix = prefix;
            level.local_name = local_name;
            level.namespace = namespace;
        }

        for attr in attrs.iter_mut() {
            if attr.name == "xmlns" {
                attr.namespace = XMLNS_NAMESPACE.to_string();
                continue;
            }
            let (prefix, local_name, namespace) = self.split_qname(&attr.name, false)?;
            attr.prefix = prefix;
            attr.local_name = local_name;
            attr.namespace = namespace;
        }
        Ok(())
    }

    /// Prefix, local name and namespace of `name`. Unprefixed attributes
    /// are in no namespace.
    fn split_qname(&mut self, name: &str, is_element: bool) -> XmlResult<(String, String, String)> {
        let (prefix, local_name) = match internal::QName(name) {
            Ok((_, qname)) => (qname.prefix.to_string(), qname.local_name.to_string()),
            Err(_) => {
                self.error(
                    ErrorCode::BadNamespacePrefix,
                    format!("'{}' is not a qualified name", name),
                )?;
                return Ok((String::new(), name.to_string(), String::new()));
            }
        };
        if prefix.is_empty() && !is_element {
            return Ok((prefix, local_name, String::new()));
        }
        let namespace = match self.context.resolve(&prefix) {
            Some(uri) => uri.to_string(),
            None if prefix.is_empty() => String::new(),
            None => {
                self.error(
                    ErrorCode::BadNamespacePrefix,
                    format!("namespace prefix '{}' is not bound", prefix),
                )?;
                String::new()
            }
        };
        Ok((prefix, local_name, namespace))
    }

    /// `</` has not been consumed.
    fn parse_end_tag(&mut self) -> XmlResult<()> {
        let start = self.mgr.cur_spooler_id();
        self.mgr.skip_string("</")?;
        let mut name = String::new();
        if !self.mgr.get_name(&mut name)? {
            return Err(self.fatal(ErrorCode::ExpectedName, "expected an element name after '</'"));
        }
        self.mgr.skip_spaces()?;
        if !self.mgr.skip_if('>')? {
            return Err(self.fatal(
                ErrorCode::UnterminatedMarkup,
                format!("end tag of '{}' is not terminated", name),
            ));
        }
        let Some((open, open_spooler)) = self.context.top().map(|l| (l.name.clone(), l.spooler_id)) else {
            return Err(self.fatal(
                ErrorCode::UnbalancedEndTag,
                format!("end tag '{}' has no start tag", name),
            ));
        };
        if open != name {
            return Err(self.fatal(
                ErrorCode::MismatchedEndTag,
                format!("expected </{}> but found </{}>", open, name),
            ));
        }
        if open_spooler != start {
            return Err(self.fatal(
                ErrorCode::PartialMarkupInEntity,
                format!("element '{}' starts and ends in different entities", name),
            ));
        }
        self.end_element()
    }

    fn end_element(&mut self) -> XmlResult<()> {
        let Some(level) = self.context.pop() else {
            return Ok(());
        };
        if self.validating && level.element_id != UNDECLARED {
            let result = self.validator.validate_content(level.element_id, &level.children);
            if result != ValidResult::Success {
                self.report_content_mismatch(&level, result)?;
            }
        }
        if self.wants(ParseFlags::TAGS) {
            self.handler.end_tag(&level.element_name());
        }
        Ok(())
    }

    fn report_content_mismatch(&mut self, level: &ContextLevel, result: ValidResult) -> XmlResult<()> {
        let model = self
            .validator
            .element_by_id(level.element_id)
            .map(|d| d.format_model())
            .unwrap_or_default();
        let child = |i: usize| level.child_names.get(i).map_or("", String::as_str);
        let detail = match result {
            ValidResult::Success => return Ok(()),
            ValidResult::TooFew => "more child elements are required".to_string(),
            ValidResult::TooMany(i) => format!("child {} ('{}') is one too many", i + 1, child(i)),
            ValidResult::Mismatch(i) => format!("child {} ('{}') is not allowed here", i + 1, child(i)),
        };
        self.invalid(
            ErrorCode::ContentModelMismatch,
            format!("content of '{}' does not match {}: {}", level.name, model, detail),
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        error::{ErrorCode, Severity},
        sax::{Attribute, DocumentHandler, DtdHandler, ElementName, EntityResolver, ErrorHandler, ParseOptions, Parser},
    };

    #[derive(Default)]
    struct Tags(Vec<String>);

    impl DocumentHandler for Tags {
        fn start_tag(&mut self, name: &ElementName, attrs: &[Attribute], is_empty: bool) {
            let attrs: Vec<String> = attrs.iter().map(|a| format!("{}={}", a.name, a.value)).collect();
            self.0.push(format!("<{} {:?} {}", name.name, attrs, is_empty));
        }
        fn end_tag(&mut self, name: &ElementName) {
            self.0.push(format!("</{}", name.name));
        }
        fn characters(&mut self, text: &str, is_cdata: bool, _is_ignorable: bool, _all_whitespace: bool) {
            self.0.push(format!("{}{:?}", if is_cdata { "cdata " } else { "" }, text));
        }
    }
    impl DtdHandler for Tags {}
    impl ErrorHandler for Tags {}
    impl EntityResolver for Tags {}

    fn events(doc: &str) -> Vec<String> {
        let mut parser = Parser::new(Tags::default());
        parser.parse_buffer("t.xml", doc.as_bytes(), ParseOptions::NONE).unwrap();
        parser.into_handler().0
    }

    #[test]
    fn text_merges_across_references() {
        assert_eq!(
            events("<r>a&amp;b&#x20;c<![CDATA[<x>]]></r>"),
            ["<r [] false", "\"a&b c\"", "cdata \"<x>\"", "</r"]
        );
    }

    #[test]
    fn attribute_whitespace_is_normalized() {
        assert_eq!(
            events("<r a='x\ty\n'/>"),
            ["<r [\"a=x y \"] true", "</r"]
        );
    }

    #[test]
    fn well_formedness_errors_are_fatal() {
        let cases = [
            ("<r></s>", ErrorCode::MismatchedEndTag),
            ("<r a='1' a='2'/>", ErrorCode::DuplicateAttribute),
            ("<r a='<'/>", ErrorCode::LessThanInAttrValue),
            ("<r>]]></r>", ErrorCode::CDataEndInContent),
            ("<r a='1'b='2'/>", ErrorCode::ExpectedWhitespace),
            ("<r a '1'/>", ErrorCode::ExpectedEquals),
            ("<r a=1/>", ErrorCode::ExpectedQuote),
            ("<r>&nope;</r>", ErrorCode::UndeclaredEntity),
            ("<r>", ErrorCode::UnexpectedEof),
        ];
        for (doc, code) in cases {
            let mut parser = Parser::new(());
            let err = parser.parse_buffer("t.xml", doc.as_bytes(), ParseOptions::NONE).unwrap_err();
            assert_eq!(err.code(), code, "{}", doc);
            assert_eq!(parser.diagnostics().last().map(|d| d.severity), Some(Severity::Fatal));
        }
    }

    #[test]
    fn brackets_in_text_without_cdata_end() {
        assert_eq!(
            events("<r>a]]b]</r>"),
            ["<r [] false", "\"a]]b]\"", "</r"]
        );
        assert_eq!(events("<r>]</r>"), ["<r [] false", "\"]\"", "</r"]);
    }

    #[test]
    fn control_characters_are_rejected() {
        for doc in ["<r>a\u{1}</r>", "<r a='\u{8}'/>"] {
            let mut parser = Parser::new(());
            let err = parser.parse_buffer("t.xml", doc.as_bytes(), ParseOptions::NONE).unwrap_err();
            assert_eq!(err.code(), ErrorCode::IllegalChar, "{:?}", doc);
        }
    }

    #[test]
    fn internal_entities_expand_in_content() {
        let doc = "<!DOCTYPE r [<!ENTITY e 'x<b/>y'>]><r>&e;</r>";
        assert_eq!(
            events(doc),
            ["<r [] false", "\"x\"", "<b [] true", "</b", "\"y\"", "</r"]
        );
    }
}
