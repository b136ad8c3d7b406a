//! Push API: the parser drives a handler through these traits.

mod content;
pub(crate) mod context;
mod dtd;
pub(crate) mod internal;
pub mod parser;

use std::ops::BitOr;

use crate::{
    dtd::{AttrDef, ElementDecl, EntityDecl, NotationDecl},
    entity::EntitySourceRef,
    error::Diagnostic,
};

pub use parser::{Parser, DEFAULT_MAX_ERRORS};

/// The name of an element as reported in tag events.
///
/// Without namespace processing `prefix` and `namespace` are empty and
/// `local_name` is the whole name.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ElementName<'a> {
    pub name: &'a str,
    // namespace aware
    pub prefix: &'a str,
    pub local_name: &'a str,
    pub namespace: &'a str,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
    // namespace aware
    pub prefix: String,
    pub local_name: String,
    pub namespace: String,
    /// False for values supplied from an attribute default.
    pub specified: bool,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Attribute {
        let name = name.into();
        Attribute {
            local_name: name.clone(),
            name,
            value: value.into(),
            prefix: String::new(),
            namespace: String::new(),
            specified: true,
        }
    }
}

/// Where in the document an event happened.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Location {
    BeforeContent,
    IntSubset,
    ExtSubset,
    InContent,
    AfterContent,
}

impl Location {
    /// The flags that can be reported at this location.
    pub fn mask(self) -> ParseFlags {
        match self {
            Location::BeforeContent => ParseFlags::BC_MASK,
            Location::IntSubset => ParseFlags::ISS_MASK,
            Location::ExtSubset => ParseFlags::ESS_MASK,
            Location::InContent => ParseFlags::CONTENT_MASK,
            Location::AfterContent => ParseFlags::AC_MASK,
        }
    }
}

/// Why an external entity is being resolved.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EntityKind {
    Document,
    ExternalSubset,
    GeneralEntity,
    ParameterEntity,
}

/// Optional parser behaviour.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct ParseOptions(u32);

impl ParseOptions {
    pub const NONE: ParseOptions = ParseOptions(0);
    pub const VALIDATE: ParseOptions = ParseOptions(0x01);
    pub const NAMESPACES: ParseOptions = ParseOptions(0x02);
    /// Read the internal subset for entities only, never load the external one.
    pub const IGNORE_DTD: ParseOptions = ParseOptions(0x04);
    /// Replace undecodable input instead of failing.
    pub const IGNORE_BAD_CHARS: ParseOptions = ParseOptions(0x08);
    pub const ALL: ParseOptions = ParseOptions(0x0F);

    pub fn contains(self, other: ParseOptions) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for ParseOptions {
    type Output = ParseOptions;

    fn bitor(self, rhs: ParseOptions) -> ParseOptions {
        ParseOptions(self.0 | rhs.0)
    }
}

/// Which events a handler wants, per location.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ParseFlags(u32);

impl ParseFlags {
    pub const NONE: ParseFlags = ParseFlags(0);

    pub const SPACE_BC: ParseFlags = ParseFlags(0x000_0001);
    pub const COMMENTS_BC: ParseFlags = ParseFlags(0x000_0002);
    pub const PIS_BC: ParseFlags = ParseFlags(0x000_0004);

    pub const SPACE_AC: ParseFlags = ParseFlags(0x000_0010);
    pub const COMMENTS_AC: ParseFlags = ParseFlags(0x000_0020);
    pub const PIS_AC: ParseFlags = ParseFlags(0x000_0040);

    pub const SPACE_ISS: ParseFlags = ParseFlags(0x000_0100);
    pub const COMMENTS_ISS: ParseFlags = ParseFlags(0x000_0200);
    pub const PIS_ISS: ParseFlags = ParseFlags(0x000_0400);
    pub const MARKUP_ISS: ParseFlags = ParseFlags(0x000_0800);

    pub const SPACE_ESS: ParseFlags = ParseFlags(0x000_1000);
    pub const COMMENTS_ESS: ParseFlags = ParseFlags(0x000_2000);
    pub const PIS_ESS: ParseFlags = ParseFlags(0x000_4000);
    pub const MARKUP_ESS: ParseFlags = ParseFlags(0x000_8000);

    pub const IGNORABLE_SPACE: ParseFlags = ParseFlags(0x001_0000);
    pub const COMMENTS: ParseFlags = ParseFlags(0x002_0000);
    pub const PIS: ParseFlags = ParseFlags(0x004_0000);
    pub const CHARS: ParseFlags = ParseFlags(0x008_0000);
    pub const TAGS: ParseFlags = ParseFlags(0x010_0000);

    pub const XML_DECL: ParseFlags = ParseFlags(0x100_0000);
    pub const TEXT_DECL: ParseFlags = ParseFlags(0x200_0000);
    pub const DOCTYPE: ParseFlags = ParseFlags(0x400_0000);
    /// Document, subset and entity boundaries.
    pub const TOPOLOGY: ParseFlags = ParseFlags(0x800_0000);

    pub const ALL: ParseFlags = ParseFlags(0xFFF_FFFF);
    pub const STANDARD: ParseFlags = ParseFlags(0xDFF_0FFF);
    pub const JUST_CONTENT: ParseFlags = ParseFlags(0x0FF_0000);
    pub const TAGS_N_TEXT: ParseFlags = ParseFlags(0x018_0000);

    pub(crate) const BC_MASK: ParseFlags = ParseFlags(0x900_000F);
    pub(crate) const AC_MASK: ParseFlags = ParseFlags(0x800_00F0);
    pub(crate) const ISS_MASK: ParseFlags = ParseFlags(0xE00_0F00);
    pub(crate) const ESS_MASK: ParseFlags = ParseFlags(0xA00_F000);
    pub(crate) const CONTENT_MASK: ParseFlags = ParseFlags(0xAFF_0000);

    pub(crate) const SPACE_MASK: ParseFlags = ParseFlags(0x001_1111);
    pub(crate) const COMMENT_MASK: ParseFlags = ParseFlags(0x002_2222);
    pub(crate) const PI_MASK: ParseFlags = ParseFlags(0x004_4444);
    pub(crate) const MARKUP_MASK: ParseFlags = ParseFlags(0x000_8800);

    pub fn contains(self, other: ParseFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: ParseFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    /// True if any of `mask` is both requested and reportable at `location`.
    pub fn wanted_at(self, location: Location, mask: ParseFlags) -> bool {
        self.0 & location.mask().0 & mask.0 != 0
    }
}

impl Default for ParseFlags {
    fn default() -> Self {
        ParseFlags::STANDARD
    }
}

impl BitOr for ParseFlags {
    type Output = ParseFlags;

    fn bitor(self, rhs: ParseFlags) -> ParseFlags {
        ParseFlags(self.0 | rhs.0)
    }
}

/// Document content events.
#[allow(unused_variables)]
pub trait DocumentHandler {
    fn start_document(&mut self) {}
    fn end_document(&mut self) {}
    fn xml_decl(&mut self, version: &str, encoding: Option<&str>, standalone: Option<bool>) {}
    fn start_tag(&mut self, name: &ElementName, attrs: &[Attribute], is_empty: bool) {}
    fn end_tag(&mut self, name: &ElementName) {}
    /// A run of character data. `is_ignorable` marks whitespace in
    /// element-only content of a validated element.
    fn characters(&mut self, text: &str, is_cdata: bool, is_ignorable: bool, all_whitespace: bool) {}
    /// Whitespace outside the root element or between DTD declarations.
    fn whitespace(&mut self, text: &str, location: Location) {}
    fn comment(&mut self, text: &str, location: Location) {}
    fn processing_instruction(&mut self, target: &str, data: &str, location: Location) {}
    fn start_entity(&mut self, name: &str) {}
    fn end_entity(&mut self, name: &str) {}
}

/// Document type events.
#[allow(unused_variables)]
pub trait DtdHandler {
    fn doctype(&mut self, root: &str, public_id: Option<&str>, system_id: Option<&str>) {}
    fn start_int_subset(&mut self) {}
    fn end_int_subset(&mut self) {}
    fn start_ext_subset(&mut self) {}
    fn end_ext_subset(&mut self) {}
    fn text_decl(&mut self, version: Option<&str>, encoding: &str) {}
    fn element_decl(&mut self, decl: &ElementDecl, ignored: bool) {}
    fn attr_def(&mut self, element: &str, def: &AttrDef, ignored: bool) {}
    fn entity_decl(&mut self, decl: &EntityDecl, ignored: bool) {}
    fn notation_decl(&mut self, decl: &NotationDecl, ignored: bool) {}
}

#[allow(unused_variables)]
pub trait ErrorHandler {
    fn handle_error(&mut self, diagnostic: &Diagnostic) {}
}

/// Lets a caller redirect external references. `None` reads the system id
/// relative to `parent_id`.
#[allow(unused_variables)]
pub trait EntityResolver {
    fn resolve_entity(
        &mut self,
        public_id: Option<&str>,
        system_id: &str,
        entity_name: Option<&str>,
        parent_id: &str,
        kind: EntityKind,
    ) -> Option<EntitySourceRef> {
        None
    }
}

/// Everything the parser needs from its handler.
pub trait XmlHandler: DocumentHandler + DtdHandler + ErrorHandler + EntityResolver {}

impl<T: DocumentHandler + DtdHandler + ErrorHandler + EntityResolver> XmlHandler for T {}

impl DocumentHandler for () {}
impl DtdHandler for () {}
impl ErrorHandler for () {}
impl EntityResolver for () {}
