use super::{
    context::UNDECLARED, parser::Parser, EntityKind, Location, ParseFlags, ParseOptions, XmlHandler,
};
use crate::{
    chars::{self, CharFlags},
    dtd::{
        validator::{normalize_tokenized, predefined_char},
        AttrDef, AttrType, ContentModelKind, ContentSpec, DefaultKind, ElementDecl, ElementRef,
        EntityDecl, NotationDecl,
    },
    entity::spooler::{Spooler, SpoolerOptions},
    error::{Error, ErrorCode, XmlResult},
};

/// What closes the subset being read.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum SubsetEnd {
    /// `]` of the internal subset.
    Bracket,
    /// End of the external subset entity.
    EntityEnd,
    /// `]]>` of an INCLUDE section.
    Conditional,
}

// [75] ExternalID ::= 'SYSTEM' S SystemLiteral | 'PUBLIC' S PubidLiteral S SystemLiteral
#[derive(Debug, Default)]
struct ExternalId {
    public_id: Option<String>,
    system_id: Option<String>,
}

impl<H: XmlHandler> Parser<H> {
    // [28] doctypedecl ::= '<!DOCTYPE' S Name (S ExternalID)? S? ('[' intSubset ']' S?)? '>'
    //
    // `<!DOCTYPE` has been consumed.
    pub(super) fn parse_doctype(&mut self) -> XmlResult<()> {
        self.has_doctype = true;
        self.location = Location::IntSubset;
        if !self.mgr.skip_spaces()? {
            return Err(self.fatal(ErrorCode::ExpectedWhitespace, "expected whitespace after '<!DOCTYPE'"));
        }
        let root = self.read_decl_name("root element")?;
        let external_id = if self.mgr.skip_spaces()? {
            self.parse_external_id(false)?
        } else {
            None
        };
        self.mgr.skip_spaces()?;

        let (public_id, system_id) = match external_id {
            Some(id) => (id.public_id, id.system_id),
            None => (None, None),
        };
        if !self.discard_decls {
            self.validator.set_root_name(&root);
        }
        if self.wants(ParseFlags::DOCTYPE) {
            self.handler
                .doctype(&root, public_id.as_deref(), system_id.as_deref());
        }

        if self.mgr.skip_if('[')? {
            if self.wants(ParseFlags::TOPOLOGY) {
                self.handler.start_int_subset();
            }
            self.in_subset = true;
            self.parse_subset(SubsetEnd::Bracket)?;
            self.in_subset = false;
            self.mgr.next_char()?;
            if self.wants(ParseFlags::TOPOLOGY) {
                self.handler.end_int_subset();
            }
            self.mgr.skip_spaces()?;
        }
        if !self.mgr.skip_if('>')? {
            return Err(self.fatal(ErrorCode::UnterminatedMarkup, "DOCTYPE must end with '>'"));
        }

        let load = !self.discard_decls && !self.options.contains(ParseOptions::IGNORE_DTD);
        match system_id {
            Some(system_id) if load => {
                let base = self.mgr.last_external_system_id().to_string();
                let options = self.spooler_options(false);
                let spooler = self.open_external(
                    public_id.as_deref(),
                    &system_id,
                    None,
                    &base,
                    EntityKind::ExternalSubset,
                    options,
                )?;
                self.parse_external_subset(spooler)?;
            }
            Some(_) => self.dtd_incomplete |= !self.discard_decls,
            None if load => {
                if let Some((source, _)) = self.default_ext_subset.clone() {
                    let spooler = Spooler::open(&source, self.spooler_options(false))?;
                    self.parse_external_subset(spooler)?;
                }
            }
            None => {}
        }
        self.location = Location::BeforeContent;
        self.finish_dtd()
    }

    /// Reads a whole external subset; it cannot run on into the document.
    pub(super) fn parse_external_subset(&mut self, spooler: Spooler) -> XmlResult<()> {
        let floor = match self.mgr.push_isolated(spooler) {
            Ok(floor) => floor,
            Err(Error::CircularEntityReference(name)) => {
                return Err(self.fatal(
                    ErrorCode::CircularEntityReference,
                    format!("external subset '{}' includes itself", name),
                ))
            }
            Err(err) => return Err(err),
        };
        let previous = self.location;
        self.location = Location::ExtSubset;
        log::debug!("reading external subset '{}'", self.mgr.system_id());
        if self.wants(ParseFlags::TOPOLOGY) {
            self.handler.start_ext_subset();
        }
        self.parse_text_decl()?;

        self.in_subset = true;
        let result = self.parse_subset(SubsetEnd::EntityEnd);
        self.in_subset = false;
        result?;

        self.mgr.end_isolated(floor);
        if self.wants(ParseFlags::TOPOLOGY) {
            self.handler.end_ext_subset();
        }
        self.location = previous;
        Ok(())
    }

    /// Runs the checks that need the whole DTD and marks it loaded.
    pub(super) fn finish_dtd(&mut self) -> XmlResult<()> {
        if self.discard_decls || self.options.contains(ParseOptions::IGNORE_DTD) {
            return Ok(());
        }
        self.dtd_loaded = true;
        if self.validating {
            for problem in self.validator.check_dtd() {
                self.invalid(problem.code, problem.message)?;
            }
        }
        log::debug!(
            "DTD for '{}' has {} element types",
            self.validator.root_name().unwrap_or_default(),
            self.validator.elements().len()
        );
        Ok(())
    }

    fn parse_subset(&mut self, end: SubsetEnd) -> XmlResult<()> {
        let subset_spooler = self.mgr.cur_spooler_id();
        loop {
            self.parse_misc_space()?;
            self.drain_notes();
            let Some(c) = self.mgr.peek_char()? else {
                if end == SubsetEnd::EntityEnd {
                    return Ok(());
                }
                return Err(self.fatal(ErrorCode::UnexpectedEof, "DTD subset is not terminated"));
            };
            match c {
                ']' if end == SubsetEnd::Bracket => {
                    if self.mgr.cur_spooler_id() != subset_spooler {
                        return Err(self.fatal(
                            ErrorCode::PartialMarkupInEntity,
                            "internal subset ends inside a parameter entity",
                        ));
                    }
                    return Ok(());
                }
                ']' if end == SubsetEnd::Conditional && self.mgr.skip_string("]]>")? => {
                    return Ok(());
                }
                '%' => {
                    self.mgr.next_char()?;
                    self.expand_pe_ref(false)?;
                }
                '<' => self.parse_markup_decl()?,
                c => {
                    return Err(self.fatal(
                        ErrorCode::ExpectedMarkup,
                        format!("unexpected '{}' in DTD", c),
                    ))
                }
            }
        }
    }

    /// A declaration, comment, PI or conditional section; the `<` has not
    /// been consumed.
    fn parse_markup_decl(&mut self) -> XmlResult<()> {
        let start = self.mgr.cur_spooler_id();
        if self.mgr.skip_string("<?")? {
            return self.parse_pi();
        }
        if self.mgr.skip_string("<!--")? {
            return self.parse_comment();
        }
        if self.mgr.skip_string("<![")? {
            return self.parse_conditional();
        }
        if !self.mgr.skip_string("<!")? {
            return Err(self.fatal(ErrorCode::ExpectedMarkup, "expected a markup declaration"));
        }
        let mut keyword = String::new();
        self.mgr.get_name(&mut keyword)?;
        match keyword.as_str() {
            "ELEMENT" => self.parse_element_decl()?,
            "ATTLIST" => self.parse_attlist_decl()?,
            "ENTITY" => self.parse_entity_decl()?,
            "NOTATION" => self.parse_notation_decl()?,
            _ => {
                return Err(self.fatal(
                    ErrorCode::ExpectedMarkup,
                    format!("unknown markup declaration '<!{}'", keyword),
                ))
            }
        }
        if self.validating && self.mgr.cur_spooler_id() != start {
            self.invalid(
                ErrorCode::PartialMarkupInEntity,
                format!("<!{} declaration is not properly nested in a parameter entity", keyword),
            )?;
        }
        Ok(())
    }

    // [61] conditionalSect ::= includeSect | ignoreSect
    //
    // `<![` has been consumed.
    fn parse_conditional(&mut self) -> XmlResult<()> {
        if !self.mgr.in_external_entity() {
            return Err(self.fatal(
                ErrorCode::BadConditionalSection,
                "conditional sections are only allowed in the external subset",
            ));
        }
        self.skip_spaces_pe(true)?;
        let mut keyword = String::new();
        self.mgr.get_name(&mut keyword)?;
        self.skip_spaces_pe(true)?;
        if !self.mgr.skip_if('[')? {
            return Err(self.fatal(
                ErrorCode::BadConditionalSection,
                "expected '[' after the conditional section keyword",
            ));
        }
        match keyword.as_str() {
            "INCLUDE" => self.parse_subset(SubsetEnd::Conditional),
            "IGNORE" => self.skip_ignored_section(),
            _ => Err(self.fatal(
                ErrorCode::BadConditionalSection,
                format!("expected INCLUDE or IGNORE, found '{}'", keyword),
            )),
        }
    }

    // [63] ignoreSect ::= '<![' S? 'IGNORE' S? '[' ignoreSectContents* ']]>'
    fn skip_ignored_section(&mut self) -> XmlResult<()> {
        let mut depth = 1;
        loop {
            let Some(c) = self.mgr.next_char()? else {
                return Err(self.fatal(ErrorCode::UnexpectedEof, "IGNORE section is not terminated"));
            };
            let flags = chars::classify(c);
            if !flags.contains(CharFlags::MARKUP_TEST) {
                if !flags.contains(CharFlags::XML_CHAR) {
                    return Err(self.illegal_char(c, "IGNORE section"));
                }
                continue;
            }
            match c {
                '<' if self.mgr.skip_string("![")? => depth += 1,
                ']' if self.mgr.skip_string("]>")? => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                _ => {}
            }
        }
    }

    /// Skips whitespace, expanding parameter entity references on the way
    /// while inside a subset.
    fn skip_spaces_pe(&mut self, in_decl: bool) -> XmlResult<bool> {
        let mut skipped = false;
        loop {
            skipped |= self.mgr.skip_spaces()?;
            if !self.in_subset || self.mgr.peek_char()? != Some('%') {
                return Ok(skipped);
            }
            match self.mgr.peek_ahead(1)? {
                Some(c) if chars::is_name_start_char(c) => {}
                _ => return Ok(skipped),
            }
            if in_decl && !self.mgr.in_external_entity() {
                return Err(self.fatal(
                    ErrorCode::EntityNotExpected,
                    "parameter entity references are not allowed inside declarations of the internal subset",
                ));
            }
            self.mgr.next_char()?;
            self.expand_pe_ref(false)?;
            skipped = true;
        }
    }

    fn require_spaces_pe(&mut self, after: &str) -> XmlResult<()> {
        if !self.skip_spaces_pe(true)? {
            return Err(self.fatal(
                ErrorCode::ExpectedWhitespace,
                format!("expected whitespace after {}", after),
            ));
        }
        Ok(())
    }

    /// `%` has been consumed. Outside literals the replacement text is
    /// padded with a space on each side.
    fn expand_pe_ref(&mut self, in_literal: bool) -> XmlResult<()> {
        let mut name = String::new();
        if !self.mgr.get_name(&mut name)? {
            return Err(self.fatal(ErrorCode::ExpectedName, "expected an entity name after '%'"));
        }
        if !self.mgr.skip_if(';')? {
            return Err(self.fatal(
                ErrorCode::UnterminatedMarkup,
                format!("reference to '%{}' must end with ';'", name),
            ));
        }
        let Some(decl) = self.validator.parameter_entity(&name).cloned() else {
            self.dtd_incomplete = true;
            let message = format!("parameter entity '%{}' is not declared", name);
            if self.validating {
                return self.invalid(ErrorCode::UndeclaredEntity, message);
            }
            self.warning(ErrorCode::UndeclaredEntity, message);
            return Ok(());
        };
        self.check_standalone_ref(decl.external, &name)?;

        let spooler = match &decl.value {
            Some(value) => {
                let options = SpoolerOptions {
                    is_parameter: true,
                    pad: !in_literal,
                    ..Default::default()
                };
                Spooler::from_text(decl.stack_name(), value, options)
            }
            None => {
                let options = SpoolerOptions {
                    is_parameter: true,
                    ..self.spooler_options(false)
                };
                let system_id = decl.system_id.clone().unwrap_or_default();
                self.open_external(
                    decl.public_id.as_deref(),
                    &system_id,
                    Some(&name),
                    &decl.base_id,
                    EntityKind::ParameterEntity,
                    options,
                )?
            }
        };
        self.push_entity(spooler, &name)?;
        if decl.is_external() {
            self.parse_text_decl()?;
            if !in_literal {
                if let Some(top) = self.mgr.top_spooler() {
                    top.add_padding();
                }
            }
        }
        Ok(())
    }

    fn read_decl_name(&mut self, what: &str) -> XmlResult<String> {
        let mut name = String::new();
        if !self.mgr.get_name(&mut name)? {
            return Err(self.fatal(ErrorCode::ExpectedName, format!("expected {} name", what)));
        }
        Ok(name)
    }

    fn read_literal(&mut self, what: &str) -> XmlResult<String> {
        let mut literal = String::new();
        if !self.mgr.get_quoted_string(&mut literal)? {
            return Err(self.fatal(ErrorCode::ExpectedQuote, format!("expected a quoted {}", what)));
        }
        Ok(literal)
    }

    fn end_decl(&mut self, name: &str) -> XmlResult<()> {
        self.skip_spaces_pe(true)?;
        if !self.mgr.skip_if('>')? {
            return Err(self.fatal(
                ErrorCode::UnterminatedMarkup,
                format!("declaration of '{}' must end with '>'", name),
            ));
        }
        Ok(())
    }

    /// ExternalID, if one starts here. With `public_only` a PUBLIC id may
    /// come without a system literal, as in notations.
    fn parse_external_id(&mut self, public_only: bool) -> XmlResult<Option<ExternalId>> {
        match self.mgr.peek_char()? {
            Some('S') | Some('P') => {}
            _ => return Ok(None),
        }
        let mut keyword = String::new();
        self.mgr.get_name(&mut keyword)?;
        match keyword.as_str() {
            "SYSTEM" => {
                self.require_spaces_pe("SYSTEM")?;
                let system_id = self.read_literal("system id")?;
                Ok(Some(ExternalId {
                    public_id: None,
                    system_id: Some(system_id),
                }))
            }
            "PUBLIC" => {
                self.require_spaces_pe("PUBLIC")?;
                let public_id = self.read_literal("public id")?;
                if let Some(c) = public_id.chars().find(|&c| !chars::is_pubid_char(c)) {
                    return Err(self.fatal(
                        ErrorCode::BadPubidChar,
                        format!("'{}' is not allowed in public id \"{}\"", c, public_id),
                    ));
                }
                let had_space = self.skip_spaces_pe(true)?;
                let system_id = match self.mgr.peek_char()? {
                    Some('"' | '\'') if had_space => Some(self.read_literal("system id")?),
                    _ if public_only => None,
                    _ => {
                        return Err(self.fatal(
                            ErrorCode::ExpectedQuote,
                            format!("expected a system id after public id \"{}\"", public_id),
                        ))
                    }
                };
                Ok(Some(ExternalId {
                    public_id: Some(public_id),
                    system_id,
                }))
            }
            _ => Err(self.fatal(
                ErrorCode::ExpectedMarkup,
                format!("expected SYSTEM or PUBLIC, found '{}'", keyword),
            )),
        }
    }

    /// Pool id for an element named in a declaration. Nothing is added to
    /// the pool while declarations are discarded.
    fn element_ref(&mut self, name: &str) -> usize {
        if self.keeps_decls() {
            self.validator.element_ref(name)
        } else {
            UNDECLARED
        }
    }

    fn keeps_decls(&self) -> bool {
        !self.discard_decls && !self.options.contains(ParseOptions::IGNORE_DTD)
    }

    // [45] elementdecl ::= '<!ELEMENT' S Name S contentspec S? '>'
    // [46] contentspec ::= 'EMPTY' | 'ANY' | Mixed | children
    fn parse_element_decl(&mut self) -> XmlResult<()> {
        self.require_spaces_pe("'<!ELEMENT'")?;
        let name = self.read_decl_name("element")?;
        self.require_spaces_pe("the element name")?;

        let mut decl = if self.mgr.skip_if('(')? {
            self.skip_spaces_pe(true)?;
            if self.mgr.skip_string("#PCDATA")? {
                let children = self.parse_mixed()?;
                ElementDecl::with_mixed(&name, children)
            } else {
                let spec = self.parse_group()?;
                ElementDecl::with_children(&name, spec)
            }
        } else {
            let mut keyword = String::new();
            self.mgr.get_name(&mut keyword)?;
            match keyword.as_str() {
                "EMPTY" => ElementDecl::new(&name, ContentModelKind::Empty),
                "ANY" => ElementDecl::new(&name, ContentModelKind::Any),
                _ => {
                    return Err(self.fatal(
                        ErrorCode::BadContentSpec,
                        format!("expected EMPTY, ANY or '(' in declaration of '{}'", name),
                    ))
                }
            }
        };
        decl.external = self.mgr.in_external_entity();
        self.end_decl(&name)?;

        let wanted = self.wants(ParseFlags::MARKUP_MASK);
        if !self.keeps_decls() {
            if wanted {
                self.handler.element_decl(&decl, true);
            }
            return Ok(());
        }
        let rejected = wanted.then(|| decl.clone());
        let (id, ignored) = self.validator.add_element(decl);
        if ignored && self.validating {
            self.invalid(
                ErrorCode::ElementRedeclared,
                format!("element '{}' is declared more than once", name),
            )?;
        }
        if wanted {
            match (ignored, rejected) {
                (true, Some(decl)) => self.handler.element_decl(&decl, true),
                _ => {
                    if let Some(decl) = self.validator.element_by_id(id) {
                        self.handler.element_decl(decl, false);
                    }
                }
            }
        }
        Ok(())
    }

    // [51] Mixed ::= '(' S? '#PCDATA' (S? '|' S? Name)* S? ')*' | '(' S? '#PCDATA' S? ')'
    fn parse_mixed(&mut self) -> XmlResult<Vec<ElementRef>> {
        let mut children: Vec<ElementRef> = Vec::new();
        loop {
            self.skip_spaces_pe(true)?;
            if self.mgr.skip_if(')')? {
                break;
            }
            if !self.mgr.skip_if('|')? {
                return Err(self.fatal(
                    ErrorCode::BadContentSpec,
                    "expected '|' or ')' in mixed content",
                ));
            }
            self.skip_spaces_pe(true)?;
            let name = self.read_decl_name("child element")?;
            if children.iter().any(|c| c.name == name) {
                if self.validating {
                    self.invalid(
                        ErrorCode::BadContentSpec,
                        format!("'{}' appears twice in mixed content", name),
                    )?;
                }
                continue;
            }
            let id = self.element_ref(&name);
            children.push(ElementRef::new(id, name));
        }
        let starred = self.mgr.skip_if('*')?;
        if !children.is_empty() && !starred {
            return Err(self.fatal(
                ErrorCode::BadContentSpec,
                "mixed content naming elements must end with ')*'",
            ));
        }
        Ok(children)
    }

    // [49] choice ::= '(' S? cp ( S? '|' S? cp )+ S? ')'
    // [50] seq ::= '(' S? cp ( S? ',' S? cp )* S? ')'
    //
    // The `(` has been consumed.
    fn parse_group(&mut self) -> XmlResult<ContentSpec> {
        let mut items = vec![self.parse_cp()?];
        let mut separator = None;
        loop {
            self.skip_spaces_pe(true)?;
            match self.mgr.next_char()? {
                Some(')') => break,
                Some(c @ (',' | '|')) => {
                    if separator.is_some_and(|s| s != c) {
                        return Err(self.fatal(
                            ErrorCode::BadContentSpec,
                            "',' and '|' cannot be mixed in one group",
                        ));
                    }
                    separator = Some(c);
                    items.push(self.parse_cp()?);
                }
                _ => {
                    return Err(self.fatal(
                        ErrorCode::BadContentSpec,
                        "expected ',', '|' or ')' in content model",
                    ))
                }
            }
        }
        let group = match separator {
            Some('|') => ContentSpec::Choice(items),
            _ => ContentSpec::Seq(items),
        };
        self.parse_occurrence(group)
    }

    // [48] cp ::= (Name | choice | seq) ('?' | '*' | '+')?
    fn parse_cp(&mut self) -> XmlResult<ContentSpec> {
        self.skip_spaces_pe(true)?;
        if self.mgr.skip_if('(')? {
            return self.parse_group();
        }
        if self.mgr.peek_char()? == Some('#') {
            return Err(self.fatal(
                ErrorCode::BadContentSpec,
                "#PCDATA must come first in mixed content",
            ));
        }
        let name = self.read_decl_name("child element")?;
        let id = self.element_ref(&name);
        self.parse_occurrence(ContentSpec::leaf(id, name))
    }

    fn parse_occurrence(&mut self, spec: ContentSpec) -> XmlResult<ContentSpec> {
        let wrapped = match self.mgr.peek_char()? {
            Some('?') => ContentSpec::ZeroOrOne(Box::new(spec)),
            Some('*') => ContentSpec::ZeroOrMore(Box::new(spec)),
            Some('+') => ContentSpec::OneOrMore(Box::new(spec)),
            _ => return Ok(spec),
        };
        self.mgr.next_char()?;
        Ok(wrapped)
    }

    // [52] AttlistDecl ::= '<!ATTLIST' S Name AttDef* S? '>'
    fn parse_attlist_decl(&mut self) -> XmlResult<()> {
        self.require_spaces_pe("'<!ATTLIST'")?;
        let element = self.read_decl_name("element")?;
        loop {
            let had_space = self.skip_spaces_pe(true)?;
            if self.mgr.skip_if('>')? {
                return Ok(());
            }
            if !had_space {
                return Err(self.fatal(
                    ErrorCode::ExpectedWhitespace,
                    format!("expected whitespace before attribute definition of '{}'", element),
                ));
            }
            let def = self.parse_attr_def()?;
            self.commit_attr_def(&element, def)?;
        }
    }

    // [53] AttDef ::= S Name S AttType S DefaultDecl
    fn parse_attr_def(&mut self) -> XmlResult<AttrDef> {
        let name = self.read_decl_name("attribute")?;
        self.require_spaces_pe("the attribute name")?;

        let (attr_type, enum_values) = if self.mgr.skip_if('(')? {
            (AttrType::Enumeration, self.parse_enumeration(false)?)
        } else {
            let mut keyword = String::new();
            self.mgr.get_name(&mut keyword)?;
            let attr_type = match keyword.as_str() {
                "CDATA" => AttrType::CData,
                "ID" => AttrType::Id,
                "IDREF" => AttrType::IdRef,
                "IDREFS" => AttrType::IdRefs,
                "ENTITY" => AttrType::Entity,
                "ENTITIES" => AttrType::Entities,
                "NMTOKEN" => AttrType::NmToken,
                "NMTOKENS" => AttrType::NmTokens,
                "NOTATION" => AttrType::Notation,
                _ => {
                    return Err(self.fatal(
                        ErrorCode::BadAttrType,
                        format!("unknown type '{}' for attribute '{}'", keyword, name),
                    ))
                }
            };
            if attr_type == AttrType::Notation {
                self.require_spaces_pe("NOTATION")?;
                if !self.mgr.skip_if('(')? {
                    return Err(self.fatal(ErrorCode::BadAttrType, "expected '(' after NOTATION"));
                }
                (attr_type, self.parse_enumeration(true)?)
            } else {
                (attr_type, Vec::new())
            }
        };
        self.require_spaces_pe("the attribute type")?;

        // [60] DefaultDecl ::= '#REQUIRED' | '#IMPLIED' | (('#FIXED' S)? AttValue)
        let default_kind = if self.mgr.skip_if('#')? {
            let mut keyword = String::new();
            self.mgr.get_name(&mut keyword)?;
            match keyword.as_str() {
                "REQUIRED" => DefaultKind::Required,
                "IMPLIED" => DefaultKind::Implied,
                "FIXED" => {
                    self.require_spaces_pe("#FIXED")?;
                    DefaultKind::Fixed
                }
                _ => {
                    return Err(self.fatal(
                        ErrorCode::BadDefaultDecl,
                        format!("unknown default '#{}' for attribute '{}'", keyword, name),
                    ))
                }
            }
        } else {
            DefaultKind::Default
        };

        let mut def = AttrDef::new(name, attr_type, default_kind);
        def.enum_values = enum_values;
        def.external = self.mgr.in_external_entity();
        if matches!(default_kind, DefaultKind::Fixed | DefaultKind::Default) {
            if !matches!(self.mgr.peek_char()?, Some('"' | '\'')) {
                return Err(self.fatal(
                    ErrorCode::BadDefaultDecl,
                    format!("expected a default value for attribute '{}'", def.name),
                ));
            }
            let raw = self.parse_attr_value()?;
            let value = match attr_type.is_tokenized() {
                true => normalize_tokenized(&raw),
                false => raw,
            };
            // Unparsed entities may be declared later in the DTD.
            if self.validating && !matches!(attr_type, AttrType::Entity | AttrType::Entities) {
                if let Err(problem) = self.validator.check_attr_value(&def, &value) {
                    self.invalid(
                        problem.code,
                        format!("default of attribute '{}': {}", def.name, problem.message),
                    )?;
                }
            }
            def.value = Some(value);
        }
        Ok(def)
    }

    // [58] NotationType ::= 'NOTATION' S '(' S? Name (S? '|' S? Name)* S? ')'
    // [59] Enumeration ::= '(' S? Nmtoken (S? '|' S? Nmtoken)* S? ')'
    fn parse_enumeration(&mut self, names: bool) -> XmlResult<Vec<String>> {
        let mut values = Vec::new();
        loop {
            self.skip_spaces_pe(true)?;
            let mut token = String::new();
            let found = match names {
                true => self.mgr.get_name(&mut token)?,
                false => self.mgr.get_nmtoken(&mut token)?,
            };
            if !found {
                return Err(self.fatal(ErrorCode::BadAttrType, "expected a value in enumeration"));
            }
            values.push(token);
            self.skip_spaces_pe(true)?;
            match self.mgr.next_char()? {
                Some(')') => return Ok(values),
                Some('|') => {}
                _ => {
                    return Err(self.fatal(
                        ErrorCode::BadAttrType,
                        "expected '|' or ')' in enumeration",
                    ))
                }
            }
        }
    }

    fn commit_attr_def(&mut self, element: &str, def: AttrDef) -> XmlResult<()> {
        let wanted = self.wants(ParseFlags::MARKUP_MASK);
        if !self.keeps_decls() {
            if wanted {
                self.handler.attr_def(element, &def, true);
            }
            return Ok(());
        }
        let reported = wanted.then(|| def.clone());
        let added = self.validator.add_attr_def(element, def);
        if self.validating {
            for problem in added.problems {
                self.invalid(problem.code, problem.message)?;
            }
        }
        if let Some(def) = reported {
            self.handler.attr_def(element, &def, added.ignored);
        }
        Ok(())
    }

    // [70] EntityDecl ::= GEDecl | PEDecl
    // [71] GEDecl ::= '<!ENTITY' S Name S EntityDef S? '>'
    // [72] PEDecl ::= '<!ENTITY' S '%' S Name S PEDef S? '>'
    fn parse_entity_decl(&mut self) -> XmlResult<()> {
        self.require_spaces_pe("'<!ENTITY'")?;
        let is_parameter = self.mgr.skip_if('%')?;
        if is_parameter {
            self.require_spaces_pe("'%'")?;
        }
        let name = self.read_decl_name("entity")?;
        self.require_spaces_pe("the entity name")?;

        let mut decl = match self.mgr.peek_char()? {
            Some('"' | '\'') => {
                let value = self.parse_entity_value()?;
                EntityDecl::internal(&name, value, is_parameter)
            }
            _ => {
                let Some(id) = self.parse_external_id(false)? else {
                    return Err(self.fatal(
                        ErrorCode::ExpectedQuote,
                        format!("expected a value or external id for entity '{}'", name),
                    ));
                };
                let system_id = id.system_id.unwrap_or_default();
                let mut decl = EntityDecl::external(&name, id.public_id, system_id, is_parameter);
                // [76] NDataDecl ::= S 'NDATA' S Name
                if self.skip_spaces_pe(true)? && self.mgr.skip_string("NDATA")? {
                    if is_parameter {
                        return Err(self.fatal(
                            ErrorCode::BadContentSpec,
                            format!("parameter entity '{}' cannot be unparsed", name),
                        ));
                    }
                    self.require_spaces_pe("NDATA")?;
                    decl.notation = Some(self.read_decl_name("notation")?);
                }
                decl
            }
        };
        decl.base_id = self.mgr.last_external_system_id().to_string();
        decl.external = self.mgr.in_external_entity();
        self.end_decl(&name)?;

        let ignored = if self.discard_decls {
            true
        } else {
            let ignored = self.validator.add_entity(decl.clone());
            if ignored && (is_parameter || predefined_char(&name).is_none()) {
                log::debug!("entity '{}' is already declared, keeping the first", name);
            }
            ignored
        };
        if self.wants(ParseFlags::MARKUP_MASK) {
            self.handler.entity_decl(&decl, ignored);
        }
        Ok(())
    }

    // [9] EntityValue ::= '"' ([^%&"] | PEReference | Reference)* '"'
    //
    // Character references are replaced, general entity references are
    // kept as written and parameter entities are expanded.
    fn parse_entity_value(&mut self) -> XmlResult<String> {
        let Some(quote) = self.mgr.peek_char()? else {
            return Err(self.fatal(ErrorCode::ExpectedQuote, "expected a quoted entity value"));
        };
        let quote_spooler = self.mgr.cur_spooler_id();
        self.mgr.next_char()?;

        let mut value = String::new();
        loop {
            let Some((c, from)) = self.next_with_source()? else {
                return Err(self.fatal(ErrorCode::UnexpectedEof, "entity value is not terminated"));
            };
            match c {
                _ if c == quote && from == quote_spooler => return Ok(value),
                '%' => {
                    if !self.mgr.in_external_entity() {
                        return Err(self.fatal(
                            ErrorCode::EntityNotExpected,
                            "parameter entity references are not allowed in entity values of the internal subset",
                        ));
                    }
                    self.expand_pe_ref(true)?;
                }
                '&' => {
                    if self.mgr.skip_if('#')? {
                        let c = self.parse_char_ref()?;
                        value.push(c);
                    } else {
                        let name = self.read_ref_name()?;
                        value.push('&');
                        value.push_str(&name);
                        value.push(';');
                    }
                }
                c if chars::is_xml_char(c) => value.push(c),
                c => return Err(self.illegal_char(c, "entity value")),
            }
        }
    }

    // [82] NotationDecl ::= '<!NOTATION' S Name S (ExternalID | PublicID) S? '>'
    fn parse_notation_decl(&mut self) -> XmlResult<()> {
        self.require_spaces_pe("'<!NOTATION'")?;
        let name = self.read_decl_name("notation")?;
        self.require_spaces_pe("the notation name")?;
        let Some(id) = self.parse_external_id(true)? else {
            return Err(self.fatal(
                ErrorCode::ExpectedMarkup,
                format!("expected SYSTEM or PUBLIC in notation '{}'", name),
            ));
        };
        self.end_decl(&name)?;

        let decl = NotationDecl::new(name, id.public_id, id.system_id);
        let ignored = self.discard_decls || self.validator.add_notation(decl.clone());
        if self.wants(ParseFlags::MARKUP_MASK) {
            self.handler.notation_decl(&decl, ignored);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        dtd::{AttrDef, ElementDecl, EntityDecl, ElementModel},
        error::{ErrorCode, Severity},
        sax::{DocumentHandler, DtdHandler, EntityResolver, ErrorHandler, ParseFlags, ParseOptions, Parser},
    };

    #[derive(Default)]
    struct Decls(Vec<String>);

    impl DocumentHandler for Decls {}
    impl DtdHandler for Decls {
        fn doctype(&mut self, root: &str, public_id: Option<&str>, system_id: Option<&str>) {
            self.0.push(format!("doctype {} {:?} {:?}", root, public_id, system_id));
        }
        fn element_decl(&mut self, decl: &ElementDecl, ignored: bool) {
            self.0.push(format!("element {} {} {}", decl.name, decl.format_model(), ignored));
        }
        fn attr_def(&mut self, element: &str, def: &AttrDef, _ignored: bool) {
            self.0.push(format!("attr {} {} {:?}", element, def.name, def.value));
        }
        fn entity_decl(&mut self, decl: &EntityDecl, ignored: bool) {
            self.0.push(format!("entity {} {:?} {}", decl.name, decl.value, ignored));
        }
    }
    impl ErrorHandler for Decls {}
    impl EntityResolver for Decls {}

    fn parse(doc: &str, options: ParseOptions) -> Parser<Decls> {
        let mut parser = Parser::new(Decls::default());
        parser.set_flags(ParseFlags::ALL);
        parser.parse_buffer("t.xml", doc.as_bytes(), options).unwrap();
        parser
    }

    #[test]
    fn internal_subset_declarations() {
        let doc = r#"<!DOCTYPE r [
            <!ELEMENT r (a, (b | c)*)>
            <!ELEMENT a (#PCDATA | i)*>
            <!ATTLIST r v CDATA "x  y" t NMTOKENS " p  q ">
            <!ENTITY e "&#65;&amp;">
            <!ENTITY e "again">
        ]><r><a/></r>"#;
        let parser = parse(doc, ParseOptions::NONE);
        assert_eq!(
            parser.handler().0,
            [
                "doctype r None None",
                "element r (a,(b|c)*) false",
                "element a (#PCDATA|i)* false",
                "attr r v Some(\"x  y\")",
                "attr r t Some(\"p q\")",
                "entity e Some(\"A&amp;\") false",
                "entity e Some(\"again\") true",
            ]
        );
    }

    #[test]
    fn parameter_entities_between_declarations() {
        let doc = "<!DOCTYPE r [<!ENTITY % decls '<!ELEMENT r EMPTY>'> %decls;]><r/>";
        let parser = parse(doc, ParseOptions::VALIDATE);
        assert!(parser.validator().element("r").is_some_and(|d| d.declared));
        assert_eq!(parser.error_count(), 0);
    }

    #[test]
    fn parameter_entity_inside_internal_declaration_is_fatal() {
        let doc = "<!DOCTYPE r [<!ENTITY % m 'EMPTY'><!ELEMENT r %m;>]><r/>";
        let mut parser = Parser::new(());
        let err = parser.parse_buffer("t.xml", doc.as_bytes(), ParseOptions::NONE).unwrap_err();
        assert_eq!(err.code(), ErrorCode::EntityNotExpected);
    }

    #[test]
    fn conditional_sections_need_the_external_subset() {
        let doc = "<!DOCTYPE r [<![INCLUDE[<!ELEMENT r EMPTY>]]>]><r/>";
        let mut parser = Parser::new(());
        let err = parser.parse_buffer("t.xml", doc.as_bytes(), ParseOptions::NONE).unwrap_err();
        assert_eq!(err.code(), ErrorCode::BadConditionalSection);
    }

    #[test]
    fn redeclared_element_is_invalid() {
        let doc = "<!DOCTYPE r [<!ELEMENT r EMPTY><!ELEMENT r ANY>]><r/>";
        let parser = parse(doc, ParseOptions::VALIDATE);
        let codes: Vec<_> = parser.diagnostics().iter().map(|d| (d.code, d.severity)).collect();
        assert_eq!(codes, [(ErrorCode::ElementRedeclared, Severity::Validation)]);
    }

    #[test]
    fn malformed_content_specs() {
        for spec in ["(a,b|c)", "(#PCDATA|a)", "(a,#PCDATA)", "PCDATA"] {
            let doc = format!("<!DOCTYPE r [<!ELEMENT r {}>]><r/>", spec);
            let mut parser = Parser::new(());
            let err = parser.parse_buffer("t.xml", doc.as_bytes(), ParseOptions::NONE).unwrap_err();
            assert_eq!(err.code(), ErrorCode::BadContentSpec, "{}", spec);
        }
    }

    #[test]
    fn bad_public_id() {
        let doc = "<!DOCTYPE r PUBLIC 'a{b' 'r.dtd'><r/>";
        let mut parser = Parser::new(());
        let err = parser.parse_buffer("t.xml", doc.as_bytes(), ParseOptions::IGNORE_DTD).unwrap_err();
        assert_eq!(err.code(), ErrorCode::BadPubidChar);
    }
}
