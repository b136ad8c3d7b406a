use std::sync::Arc;

use super::{
    context::ContextStack, internal, EntityKind, Location, ParseFlags, ParseOptions, XmlHandler,
};
use crate::{
    chars::{self, CharFlags},
    dtd::{validator::predefined_char, DtdValidator},
    entity::{
        manager::{EntityManager, EntityNote},
        resolve_system_id,
        spooler::{Spooler, SpoolerOptions},
        EntitySourceRef, FileEntitySource, MemEntitySource,
    },
    error::{Diagnostic, Error, ErrorCode, Severity, XmlResult},
};

/// Non-fatal errors tolerated before a parse is abandoned.
pub const DEFAULT_MAX_ERRORS: usize = 8;

/// Streaming parser pushing events into `H`.
///
/// A parser can be reused for any number of documents. With
/// [`Parser::set_lock_validator`] the DTD read by one parse is kept for the
/// following ones.
pub struct Parser<H> {
    pub(super) handler: H,
    pub(super) mgr: EntityManager,
    pub(super) validator: DtdValidator,
    pub(super) context: ContextStack,
    pub(super) options: ParseOptions,
    pub(super) flags: ParseFlags,
    pub(super) location: Location,
    pub(super) validating: bool,
    pub(super) standalone: bool,
    /// Declarations are still parsed but never committed.
    pub(super) discard_decls: bool,
    /// Some declarations were never read, so undeclared entities are tolerated.
    pub(super) dtd_incomplete: bool,
    pub(super) has_doctype: bool,
    pub(super) in_subset: bool,
    /// Spoolers of general entities expanded in content, for end_entity.
    pub(super) content_entities: Vec<u32>,
    pub(super) text: String,
    pub(super) text_all_ws: bool,
    pub(super) default_ext_subset: Option<(EntitySourceRef, String)>,
    doc_system_id: String,
    forced_encoding: Option<String>,
    max_errors: usize,
    error_count: usize,
    diagnostics: Vec<Diagnostic>,
    lock_validator: bool,
    pub(super) dtd_loaded: bool,
}

impl<H: XmlHandler> Parser<H> {
    pub fn new(handler: H) -> Parser<H> {
        Parser {
            handler,
            mgr: EntityManager::new(),
            validator: DtdValidator::new(),
            context: ContextStack::default(),
            options: ParseOptions::NONE,
            flags: ParseFlags::default(),
            location: Location::BeforeContent,
            validating: false,
            standalone: false,
            discard_decls: false,
            dtd_incomplete: false,
            has_doctype: false,
            in_subset: false,
            content_entities: Vec::new(),
            text: String::new(),
            text_all_ws: true,
            default_ext_subset: None,
            doc_system_id: String::new(),
            forced_encoding: None,
            max_errors: DEFAULT_MAX_ERRORS,
            error_count: 0,
            diagnostics: Vec::new(),
            lock_validator: false,
            dtd_loaded: false,
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    pub fn flags(&self) -> ParseFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: ParseFlags) {
        self.flags = flags;
    }

    pub fn max_errors(&self) -> usize {
        self.max_errors
    }

    /// Errors and validity errors beyond this count abort the parse.
    pub fn set_max_errors(&mut self, max_errors: usize) {
        self.max_errors = max_errors;
    }

    pub fn lock_validator(&self) -> bool {
        self.lock_validator
    }

    /// Keeps the declarations of the next DTD for all later parses. Later
    /// documents still have their DOCTYPE read, but nothing in it is
    /// committed and the external subset is not loaded again.
    pub fn set_lock_validator(&mut self, lock: bool) {
        self.lock_validator = lock;
        if !lock {
            self.dtd_loaded = false;
        }
    }

    /// External subset used when a document has no DOCTYPE of its own, or a
    /// DOCTYPE without an external id.
    pub fn set_default_external_subset(&mut self, source: EntitySourceRef, root_name: impl Into<String>) {
        self.default_ext_subset = Some((source, root_name.into()));
    }

    pub fn clear_default_external_subset(&mut self) {
        self.default_ext_subset = None;
    }

    /// Decodes the document entity with `encoding` whatever it declares.
    pub fn set_forced_encoding(&mut self, encoding: Option<&str>) {
        self.forced_encoding = encoding.map(str::to_string);
    }

    pub fn validator(&self) -> &DtdValidator {
        &self.validator
    }

    /// Everything reported by the last parse, warnings included.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Errors and validity errors of the last parse.
    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn is_standalone(&self) -> bool {
        self.standalone
    }

    /// Parses the document at `system_id`, asking the handler's resolver
    /// first and reading it as a file otherwise.
    pub fn parse(&mut self, system_id: &str, options: ParseOptions) -> XmlResult<()> {
        let source = match self
            .handler
            .resolve_entity(None, system_id, None, "", EntityKind::Document)
        {
            Some(source) => source,
            None => Arc::new(FileEntitySource::new(system_id)),
        };
        self.parse_source(source, options)
    }

    pub fn parse_buffer(&mut self, system_id: &str, data: &[u8], options: ParseOptions) -> XmlResult<()> {
        self.parse_source(Arc::new(MemEntitySource::new(system_id, data)), options)
    }

    pub fn parse_source(&mut self, source: EntitySourceRef, options: ParseOptions) -> XmlResult<()> {
        self.begin(&source, options);
        log::debug!("parsing '{}' with {:?}", source.system_id(), options);

        let result = match Spooler::open(&source, self.spooler_options(true)) {
            Ok(spooler) => {
                self.mgr.push_root(spooler);
                self.parse_document()
            }
            Err(err) => Err(err),
        };
        let result = match result {
            Ok(()) => Ok(()),
            Err(err @ (Error::Fatal(_) | Error::TooManyErrors(_))) => Err(err),
            Err(other) => Err(self.fatal(other.code(), other.to_string())),
        };
        if let Err(err) = &result {
            log::debug!("parse of '{}' failed: {}", self.doc_system_id, err);
        }
        self.context.reset();
        self.content_entities.clear();
        result
    }

    fn begin(&mut self, source: &EntitySourceRef, options: ParseOptions) {
        self.options = options;
        self.validating = options.contains(ParseOptions::VALIDATE)
            && !options.contains(ParseOptions::IGNORE_DTD);
        self.doc_system_id = source.system_id().to_string();
        self.diagnostics.clear();
        self.error_count = 0;
        self.standalone = false;
        self.has_doctype = false;
        self.in_subset = false;
        self.dtd_incomplete = false;
        self.location = Location::BeforeContent;
        self.text.clear();
        self.text_all_ws = true;
        self.content_entities.clear();
        self.context.reset();
        self.mgr.reset();

        let keep = self.lock_validator && self.dtd_loaded;
        if !keep {
            self.validator.reset();
            self.dtd_loaded = false;
        }
        self.discard_decls = keep;
        self.validator.reset_instance();
    }

    fn parse_document(&mut self) -> XmlResult<()> {
        self.handler.start_document();
        self.parse_xml_decl()?;
        self.parse_prolog()?;
        self.prepare_root()?;
        self.parse_content()?;

        self.location = Location::AfterContent;
        self.parse_epilog()?;

        if self.validating {
            for idref in self.validator.unmatched_idrefs() {
                self.invalid(
                    ErrorCode::UnmatchedIdRef,
                    format!("IDREF '{}' does not match any ID", idref),
                )?;
            }
        }
        self.drain_notes();
        self.handler.end_document();
        Ok(())
    }

    pub(super) fn spooler_options(&self, document: bool) -> SpoolerOptions {
        SpoolerOptions {
            forced_encoding: if document { self.forced_encoding.clone() } else { None },
            ignore_bad_chars: self.options.contains(ParseOptions::IGNORE_BAD_CHARS),
            ..Default::default()
        }
    }

    pub(super) fn wants(&self, mask: ParseFlags) -> bool {
        self.flags.wanted_at(self.location, mask)
    }

    // Reporting. Every diagnostic goes to the handler and is kept in
    // `diagnostics`; errors and validity errors count towards the limit.

    fn report(&mut self, code: ErrorCode, severity: Severity, message: String) -> Diagnostic {
        let system_id = match self.mgr.system_id() {
            "" => self.doc_system_id.clone(),
            id => id.to_string(),
        };
        let diagnostic = Diagnostic {
            code,
            severity,
            message,
            line: self.mgr.line(),
            column: self.mgr.column(),
            system_id,
        };
        log::debug!("{}", diagnostic);
        self.handler.handle_error(&diagnostic);
        self.diagnostics.push(diagnostic.clone());
        diagnostic
    }

    /// Records a fatal error and returns it for propagation.
    pub(super) fn fatal(&mut self, code: ErrorCode, message: impl Into<String>) -> Error {
        let diagnostic = self.report(code, Severity::Fatal, message.into());
        Error::Fatal(Box::new(diagnostic))
    }

    pub(super) fn error(&mut self, code: ErrorCode, message: impl Into<String>) -> XmlResult<()> {
        self.report(code, Severity::Error, message.into());
        self.count_error()
    }

    pub(super) fn invalid(&mut self, code: ErrorCode, message: impl Into<String>) -> XmlResult<()> {
        self.report(code, Severity::Validation, message.into());
        self.count_error()
    }

    pub(super) fn warning(&mut self, code: ErrorCode, message: impl Into<String>) {
        self.report(code, Severity::Warning, message.into());
    }

    fn count_error(&mut self) -> XmlResult<()> {
        self.error_count += 1;
        if self.error_count > self.max_errors {
            log::warn!("more than {} errors in '{}', giving up", self.max_errors, self.doc_system_id);
            self.report(
                ErrorCode::TooManyErrors,
                Severity::Fatal,
                format!("too many errors (limit {})", self.max_errors),
            );
            return Err(Error::TooManyErrors(self.max_errors));
        }
        Ok(())
    }

    /// Turns what the spoolers noticed into warnings.
    pub(super) fn drain_notes(&mut self) {
        for EntityNote { note, system_id } in self.mgr.take_notes() {
            let diagnostic = Diagnostic {
                code: note.code,
                severity: Severity::Warning,
                message: note.message,
                line: note.line,
                column: note.column,
                system_id,
            };
            self.handler.handle_error(&diagnostic);
            self.diagnostics.push(diagnostic);
        }
    }

    // Prolog and epilog

    fn parse_xml_decl(&mut self) -> XmlResult<()> {
        let Some(body) = self.read_decl_body()? else {
            return Ok(());
        };
        let attrs = match internal::XMLDecl(&body) {
            Ok((_, attrs)) => attrs,
            Err(_) => {
                return Err(self.fatal(
                    ErrorCode::BadXmlDecl,
                    format!("malformed XML declaration '<?xml{}?>'", body),
                ))
            }
        };
        if let (Some(encoding), Some(top)) = (attrs.encoding, self.mgr.top_spooler()) {
            top.set_decl_encoding(encoding)?;
        }
        self.standalone = attrs.standalone == Some(true);
        if self.wants(ParseFlags::XML_DECL) {
            self.handler
                .xml_decl(attrs.version.unwrap_or("1.0"), attrs.encoding, attrs.standalone);
        }
        Ok(())
    }

    /// Reads the text declaration of a freshly opened external entity, if
    /// it has one, and switches its decoder to the declared encoding.
    pub(super) fn parse_text_decl(&mut self) -> XmlResult<()> {
        let Some(body) = self.read_decl_body()? else {
            return Ok(());
        };
        let attrs = match internal::TextDecl(&body) {
            Ok((_, attrs)) => attrs,
            Err(_) => {
                return Err(self.fatal(
                    ErrorCode::BadXmlDecl,
                    format!("malformed text declaration '<?xml{}?>'", body),
                ))
            }
        };
        let encoding = attrs.encoding.unwrap_or("UTF-8");
        if let Some(top) = self.mgr.top_spooler() {
            top.set_decl_encoding(encoding)?;
        }
        if self.wants(ParseFlags::TEXT_DECL) {
            self.handler.text_decl(attrs.version, encoding);
        }
        Ok(())
    }

    /// The text between `<?xml` and `?>` at the very start of the top
    /// entity, or None if it doesn't start with a declaration.
    fn read_decl_body(&mut self) -> XmlResult<Option<String>> {
        let Some(top) = self.mgr.top_spooler() else {
            return Ok(None);
        };
        for (i, expected) in "<?xml".chars().enumerate() {
            if top.peek_ahead(i)? != Some(expected) {
                return Ok(None);
            }
        }
        match top.peek_ahead(5)? {
            Some(c) if chars::is_whitespace(c) => {}
            _ => return Ok(None),
        }
        top.skip_string("<?xml")?;
        let mut body = String::new();
        loop {
            match top.next_char()? {
                Some('?') if top.peek_char()? == Some('>') => {
                    top.next_char()?;
                    return Ok(Some(body));
                }
                Some(c) => body.push(c),
                None => return Err(Error::UnexpectedEof),
            }
        }
    }

    /// Misc items and the DOCTYPE, up to the `<` of the root element.
    fn parse_prolog(&mut self) -> XmlResult<()> {
        loop {
            self.parse_misc_space()?;
            self.drain_notes();
            match self.mgr.peek_char()? {
                None => {
                    return Err(self.fatal(ErrorCode::NoRootElement, "document has no root element"))
                }
                Some('<') => match self.mgr.peek_ahead(1)? {
                    Some('?') => {
                        self.mgr.skip_string("<?")?;
                        self.parse_pi()?;
                    }
                    Some('!') => {
                        if self.mgr.skip_string("<!--")? {
                            self.parse_comment()?;
                        } else if self.mgr.skip_string("<!DOCTYPE")? {
                            if self.has_doctype {
                                return Err(self.fatal(
                                    ErrorCode::MisplacedDocType,
                                    "a document can only have one DOCTYPE",
                                ));
                            }
                            self.parse_doctype()?;
                        } else {
                            return Err(self.fatal(
                                ErrorCode::ExpectedMarkup,
                                "expected a comment or DOCTYPE after '<!'",
                            ));
                        }
                    }
                    Some(c) if chars::is_start_tag_char(c) => return Ok(()),
                    _ => return Err(self.fatal(ErrorCode::ExpectedMarkup, "expected markup after '<'")),
                },
                Some(c) => {
                    return Err(self.fatal(
                        ErrorCode::ExpectedMarkup,
                        format!("unexpected '{}' before the root element", c),
                    ))
                }
            }
        }
    }

    /// Loads the default external subset for documents without DOCTYPE and
    /// gives up on validation if there is no DTD at all.
    fn prepare_root(&mut self) -> XmlResult<()> {
        if !self.has_doctype && !self.discard_decls && !self.options.contains(ParseOptions::IGNORE_DTD) {
            if let Some((source, root)) = self.default_ext_subset.clone() {
                self.validator.set_root_name(root);
                let spooler = Spooler::open(&source, self.spooler_options(false))?;
                self.parse_external_subset(spooler)?;
                self.finish_dtd()?;
            }
        }
        if self.validating && !self.has_doctype && !self.dtd_loaded {
            self.invalid(ErrorCode::NoDocType, "cannot validate a document without a DTD")?;
            self.validating = false;
        }
        Ok(())
    }

    fn parse_epilog(&mut self) -> XmlResult<()> {
        loop {
            self.parse_misc_space()?;
            self.drain_notes();
            match self.mgr.peek_char()? {
                None => return Ok(()),
                Some('<') => match self.mgr.peek_ahead(1)? {
                    Some('?') => {
                        self.mgr.skip_string("<?")?;
                        self.parse_pi()?;
                    }
                    Some('!') => {
                        if self.mgr.skip_string("<!--")? {
                            self.parse_comment()?;
                        } else if self.mgr.skip_string("<!DOCTYPE")? {
                            return Err(self.fatal(
                                ErrorCode::MisplacedDocType,
                                "DOCTYPE must come before the root element",
                            ));
                        } else {
                            return Err(self.fatal(
                                ErrorCode::ExpectedMarkup,
                                "expected a comment after '<!'",
                            ));
                        }
                    }
                    Some('/') => {
                        return Err(self.fatal(
                            ErrorCode::UnbalancedEndTag,
                            "end tag after the root element was closed",
                        ))
                    }
                    Some(c) if chars::is_start_tag_char(c) => {
                        return Err(self.fatal(
                            ErrorCode::MultipleRootElements,
                            "a document can only have one root element",
                        ))
                    }
                    _ => return Err(self.fatal(ErrorCode::ExpectedMarkup, "expected markup after '<'")),
                },
                Some(_) => {
                    return Err(self.fatal(
                        ErrorCode::TextAfterRoot,
                        "character data after the root element",
                    ))
                }
            }
        }
    }

    /// Whitespace between markup outside the root element, including the
    /// DTD subsets.
    pub(super) fn parse_misc_space(&mut self) -> XmlResult<()> {
        let mut space = String::new();
        while let Some(c) = self.mgr.peek_char()? {
            if !chars::is_whitespace(c) {
                break;
            }
            space.push(c);
            self.mgr.next_char()?;
        }
        if !space.is_empty() && self.wants(ParseFlags::SPACE_MASK) {
            self.handler.whitespace(&space, self.location);
        }
        Ok(())
    }

    // Markup shared by every location

    /// `<!--` has been consumed.
    pub(super) fn parse_comment(&mut self) -> XmlResult<()> {
        let start = self.mgr.cur_spooler_id();
        let mut text = String::new();
        loop {
            let Some(c) = self.mgr.next_char()? else {
                return Err(self.fatal(ErrorCode::UnterminatedMarkup, "comment is not terminated"));
            };
            if c == '-' && self.mgr.peek_char()? == Some('-') {
                self.mgr.next_char()?;
                if !self.mgr.skip_if('>')? {
                    return Err(self.fatal(
                        ErrorCode::DoubleHyphenInComment,
                        "'--' is not allowed inside a comment",
                    ));
                }
                break;
            }
            if !chars::is_xml_char(c) {
                return Err(self.illegal_char(c, "comment"));
            }
            text.push(c);
        }
        if self.mgr.cur_spooler_id() != start {
            return Err(self.fatal(
                ErrorCode::PartialMarkupInEntity,
                "comment starts and ends in different entities",
            ));
        }
        if self.wants(ParseFlags::COMMENT_MASK) {
            self.handler.comment(&text, self.location);
        }
        Ok(())
    }

    /// `<?` has been consumed.
    pub(super) fn parse_pi(&mut self) -> XmlResult<()> {
        let start = self.mgr.cur_spooler_id();
        let mut target = String::new();
        if !self.mgr.get_name(&mut target)? {
            return Err(self.fatal(
                ErrorCode::ExpectedName,
                "expected a target after '<?'",
            ));
        }
        if target == "xml" {
            return Err(self.fatal(
                ErrorCode::MisplacedXmlDecl,
                "XML declaration is only allowed at the very start of an entity",
            ));
        }
        if target.eq_ignore_ascii_case("xml") {
            return Err(self.fatal(
                ErrorCode::ReservedPITarget,
                format!("processing instruction target '{}' is reserved", target),
            ));
        }
        let mut data = String::new();
        if !self.mgr.skip_string("?>")? {
            if !self.mgr.skip_spaces()? {
                return Err(self.fatal(
                    ErrorCode::ExpectedWhitespace,
                    format!("expected whitespace after target '{}'", target),
                ));
            }
            loop {
                let Some(c) = self.mgr.next_char()? else {
                    return Err(self.fatal(
                        ErrorCode::UnterminatedMarkup,
                        format!("processing instruction '{}' is not terminated", target),
                    ));
                };
                if c == '?' && self.mgr.skip_if('>')? {
                    break;
                }
                if !chars::is_xml_char(c) {
                    return Err(self.illegal_char(c, "processing instruction"));
                }
                data.push(c);
            }
        }
        if self.mgr.cur_spooler_id() != start {
            return Err(self.fatal(
                ErrorCode::PartialMarkupInEntity,
                format!("processing instruction '{}' starts and ends in different entities", target),
            ));
        }
        if self.wants(ParseFlags::PI_MASK) {
            self.handler.processing_instruction(&target, &data, self.location);
        }
        Ok(())
    }

    pub(super) fn illegal_char(&mut self, c: char, place: &str) -> Error {
        self.fatal(
            ErrorCode::IllegalChar,
            format!("illegal character U+{:04X} in {}", c as u32, place),
        )
    }

    // References

    /// `&#` has been consumed.
    pub(super) fn parse_char_ref(&mut self) -> XmlResult<char> {
        let mut text = String::from("&#");
        loop {
            match self.mgr.next_char()? {
                Some(';') => {
                    text.push(';');
                    break;
                }
                Some(c) if c.is_ascii_alphanumeric() && text.len() < 16 => text.push(c),
                _ => {
                    return Err(self.fatal(
                        ErrorCode::BadCharRef,
                        format!("malformed character reference '{}'", text),
                    ))
                }
            }
        }
        let value = match internal::CharRef(&text) {
            Ok((_, value)) => value,
            Err(_) => {
                return Err(self.fatal(
                    ErrorCode::BadCharRef,
                    format!("malformed character reference '{}'", text),
                ))
            }
        };
        match char::from_u32(value) {
            Some(c) if chars::is_xml_char(c) => Ok(c),
            _ => Err(self.fatal(
                ErrorCode::BadCharRef,
                format!("'{}' does not refer to a legal character", text),
            )),
        }
    }

    /// `&` has been consumed; reads `Name ;`.
    pub(super) fn read_ref_name(&mut self) -> XmlResult<String> {
        let mut name = String::new();
        if !self.mgr.get_name(&mut name)? {
            return Err(self.fatal(ErrorCode::ExpectedName, "expected an entity name after '&'"));
        }
        if !self.mgr.skip_if(';')? {
            return Err(self.fatal(
                ErrorCode::UnterminatedMarkup,
                format!("reference to '{}' must end with ';'", name),
            ));
        }
        Ok(name)
    }

    /// Undeclared entities are only forgivable when some declarations may
    /// not have been read.
    pub(super) fn undeclared_entity(&mut self, name: &str) -> XmlResult<()> {
        let message = format!("entity '{}' is not declared", name);
        if !self.dtd_incomplete || self.standalone {
            return Err(self.fatal(ErrorCode::UndeclaredEntity, message));
        }
        if self.validating {
            self.invalid(ErrorCode::UndeclaredEntity, message)
        } else {
            self.warning(ErrorCode::UndeclaredEntity, message);
            Ok(())
        }
    }

    pub(super) fn check_standalone_ref(&mut self, externally_declared: bool, name: &str) -> XmlResult<()> {
        if self.validating && self.standalone && externally_declared {
            return self.invalid(
                ErrorCode::StandaloneViolation,
                format!("standalone document references externally declared entity '{}'", name),
            );
        }
        Ok(())
    }

    /// Next character along with the spooler it came from.
    pub(super) fn next_with_source(&mut self) -> XmlResult<Option<(char, u32)>> {
        if self.mgr.peek_char()?.is_none() {
            return Ok(None);
        }
        let from = self.mgr.cur_spooler_id();
        Ok(self.mgr.next_char()?.map(|c| (c, from)))
    }

    /// Attribute value literal, with references replaced and whitespace
    /// mapped to spaces. Only a quote from the entity that opened the
    /// literal closes it.
    pub(super) fn parse_attr_value(&mut self) -> XmlResult<String> {
        let quote = match self.mgr.peek_char()? {
            Some(q @ ('"' | '\'')) => q,
            _ => return Err(self.fatal(ErrorCode::ExpectedQuote, "attribute value must be quoted")),
        };
        let quote_id = self.mgr.cur_spooler_id();
        self.mgr.next_char()?;

        let mut value = String::new();
        loop {
            let Some((c, from)) = self.next_with_source()? else {
                return Err(self.fatal(ErrorCode::UnexpectedEof, "attribute value is not terminated"));
            };
            match c {
                _ if c == quote && from == quote_id => break,
                '<' => {
                    return Err(self.fatal(
                        ErrorCode::LessThanInAttrValue,
                        "'<' is not allowed in attribute values",
                    ))
                }
                '&' => {
                    if self.mgr.skip_if('#')? {
                        let c = self.parse_char_ref()?;
                        value.push(c);
                        continue;
                    }
                    let name = self.read_ref_name()?;
                    if let Some(c) = predefined_char(&name) {
                        value.push(c);
                        continue;
                    }
                    let Some(decl) = self.validator.general_entity(&name).cloned() else {
                        self.undeclared_entity(&name)?;
                        continue;
                    };
                    if decl.is_unparsed() {
                        return Err(self.fatal(
                            ErrorCode::UnparsedEntityReference,
                            format!("unparsed entity '{}' cannot be referenced", name),
                        ));
                    }
                    if decl.is_external() {
                        return Err(self.fatal(
                            ErrorCode::ExternalEntityInAttr,
                            format!("attribute value references external entity '{}'", name),
                        ));
                    }
                    self.check_standalone_ref(decl.external, &name)?;
                    let text = decl.value.as_deref().unwrap_or_default();
                    let spooler =
                        Spooler::from_text(decl.stack_name(), text, SpoolerOptions::default());
                    self.push_entity(spooler, &name)?;
                }
                c => {
                    let flags = chars::classify(c);
                    if flags.contains(CharFlags::WHITESPACE) {
                        value.push(' ');
                    } else if flags.contains(CharFlags::XML_CHAR) {
                        value.push(c);
                    } else {
                        return Err(self.illegal_char(c, "attribute value"));
                    }
                }
            }
        }
        Ok(value)
    }

    // Entities

    pub(super) fn push_entity(&mut self, spooler: Spooler, name: &str) -> XmlResult<()> {
        match self.mgr.push_entity(spooler, Some(name.to_string())) {
            Err(Error::CircularEntityReference(_)) => Err(self.fatal(
                ErrorCode::CircularEntityReference,
                format!("entity '{}' references itself", name),
            )),
            other => other,
        }
    }

    /// Opens an external entity through the resolver, falling back to a
    /// file relative to `base`.
    pub(super) fn open_external(
        &mut self,
        public_id: Option<&str>,
        system_id: &str,
        name: Option<&str>,
        base: &str,
        kind: EntityKind,
        options: SpoolerOptions,
    ) -> XmlResult<Spooler> {
        let source = match self
            .handler
            .resolve_entity(public_id, system_id, name, base, kind)
        {
            Some(source) => source,
            None => {
                let mut file = FileEntitySource::new(resolve_system_id(base, system_id));
                if let Some(public_id) = public_id {
                    file = file.with_public_id(public_id);
                }
                Arc::new(file)
            }
        };
        log::debug!("opening {:?} '{}'", kind, source.system_id());
        Spooler::open(&source, options)
    }
}
