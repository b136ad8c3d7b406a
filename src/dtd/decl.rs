use std::{cell::OnceCell, fmt};

use super::{
    content::{ContentSpec, ElementRef},
    dfa::Dfa,
    pool::{NameIdPool, PoolEntry},
    ValidResult,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContentModelKind {
    Empty,
    Any,
    Mixed,
    Children,
}

/// What every element declaration offers the parser, whatever kind of
/// validator produced it.
pub trait ElementModel {
    fn name(&self) -> &str;
    fn id(&self) -> usize;
    fn model_kind(&self) -> ContentModelKind;
    fn validate_children(&self, children: &[usize]) -> ValidResult;
    /// The content model in DTD syntax.
    fn format_model(&self) -> String;
}

/// `<!ELEMENT ...>`, or a placeholder for an element only referenced so far.
#[derive(Clone, Debug)]
pub struct ElementDecl {
    pub name: String,
    id: usize,
    pub kind: ContentModelKind,
    /// False until an `<!ELEMENT>` for this name has been seen.
    pub declared: bool,
    pub external: bool,
    content: Option<ContentSpec>,
    mixed: Vec<ElementRef>,
    attr_defs: NameIdPool<AttrDef>,
    dfa: OnceCell<Dfa>,
}

impl PoolEntry for ElementDecl {
    fn key(&self) -> &str {
        &self.name
    }
    fn set_id(&mut self, id: usize) {
        self.id = id;
    }
}

impl ElementDecl {
    /// An element seen in a content model or ATTLIST before its declaration.
    pub fn undeclared(name: impl Into<String>) -> ElementDecl {
        ElementDecl {
            name: name.into(),
            id: 0,
            kind: ContentModelKind::Any,
            declared: false,
            external: false,
            content: None,
            mixed: Vec::new(),
            attr_defs: NameIdPool::new(),
            dfa: OnceCell::new(),
        }
    }

    pub fn new(name: impl Into<String>, kind: ContentModelKind) -> ElementDecl {
        ElementDecl {
            declared: true,
            kind,
            ..ElementDecl::undeclared(name)
        }
    }

    pub fn with_children(name: impl Into<String>, spec: ContentSpec) -> ElementDecl {
        ElementDecl {
            content: Some(spec),
            ..ElementDecl::new(name, ContentModelKind::Children)
        }
    }

    pub fn with_mixed(name: impl Into<String>, children: Vec<ElementRef>) -> ElementDecl {
        ElementDecl {
            mixed: children,
            ..ElementDecl::new(name, ContentModelKind::Mixed)
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn content_spec(&self) -> Option<&ContentSpec> {
        self.content.as_ref()
    }

    pub fn mixed_children(&self) -> &[ElementRef] {
        &self.mixed
    }

    /// Takes over the model of a later real declaration, keeping id and
    /// attributes.
    pub(crate) fn adopt(&mut self, other: ElementDecl) {
        self.kind = other.kind;
        self.declared = true;
        self.external = other.external;
        self.content = other.content;
        self.mixed = other.mixed;
        self.dfa = OnceCell::new();
    }

    pub fn attr_defs(&self) -> &NameIdPool<AttrDef> {
        &self.attr_defs
    }

    pub(crate) fn attr_defs_mut(&mut self) -> &mut NameIdPool<AttrDef> {
        &mut self.attr_defs
    }

    pub fn attr_def(&self, name: &str) -> Option<&AttrDef> {
        self.attr_defs.get(name)
    }

    /// The ID attribute of this element type, if one is declared.
    pub fn id_attr(&self) -> Option<&AttrDef> {
        self.attr_defs
            .iter()
            .find(|def| def.attr_type == AttrType::Id)
    }

    /// Compiled on first use and kept for the life of the declaration.
    pub fn dfa(&self) -> Option<&Dfa> {
        let spec = self.content.as_ref()?;
        Some(self.dfa.get_or_init(|| Dfa::compile(spec)))
    }

    pub fn is_compiled(&self) -> bool {
        self.dfa.get().is_some()
    }

    /// Whether character data other than whitespace may appear.
    pub fn allows_text(&self) -> bool {
        matches!(self.kind, ContentModelKind::Mixed | ContentModelKind::Any) || !self.declared
    }
}

impl ElementModel for ElementDecl {
    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> usize {
        self.id
    }

    fn model_kind(&self) -> ContentModelKind {
        self.kind
    }

    fn validate_children(&self, children: &[usize]) -> ValidResult {
        if !self.declared {
            return ValidResult::Success;
        }
        match self.kind {
            ContentModelKind::Any => ValidResult::Success,
            ContentModelKind::Empty => match children.is_empty() {
                true => ValidResult::Success,
                false => ValidResult::TooMany(0),
            },
            ContentModelKind::Mixed => {
                for (i, child) in children.iter().enumerate() {
                    if !self.mixed.iter().any(|allowed| allowed.id == *child) {
                        return ValidResult::Mismatch(i);
                    }
                }
                ValidResult::Success
            }
            ContentModelKind::Children => {
                let Some(spec) = self.content.as_ref() else {
                    return ValidResult::Success;
                };
                // Empty input never needs the table.
                if children.is_empty() && !self.is_compiled() {
                    return match spec.is_nullable() {
                        true => ValidResult::Success,
                        false => ValidResult::TooFew,
                    };
                }
                match self.dfa() {
                    Some(dfa) => dfa.validate(children),
                    None => ValidResult::Success,
                }
            }
        }
    }

    fn format_model(&self) -> String {
        match self.kind {
            ContentModelKind::Empty => "EMPTY".to_string(),
            ContentModelKind::Any => "ANY".to_string(),
            ContentModelKind::Mixed if self.mixed.is_empty() => "(#PCDATA)".to_string(),
            ContentModelKind::Mixed => {
                let mut out = String::from("(#PCDATA");
                for child in &self.mixed {
                    out.push('|');
                    out.push_str(&child.name);
                }
                out.push_str(")*");
                out
            }
            ContentModelKind::Children => self
                .content
                .as_ref()
                .map(ContentSpec::to_string)
                .unwrap_or_default(),
        }
    }
}

// [54] AttType ::= StringType | TokenizedType | EnumeratedType
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AttrType {
    CData,
    Id,
    IdRef,
    IdRefs,
    Entity,
    Entities,
    NmToken,
    NmTokens,
    Enumeration,
    Notation,
}

impl AttrType {
    /// Anything but CDATA gets whitespace collapsed.
    pub fn is_tokenized(self) -> bool {
        self != AttrType::CData
    }

    pub fn keyword(self) -> &'static str {
        match self {
            AttrType::CData => "CDATA",
            AttrType::Id => "ID",
            AttrType::IdRef => "IDREF",
            AttrType::IdRefs => "IDREFS",
            AttrType::Entity => "ENTITY",
            AttrType::Entities => "ENTITIES",
            AttrType::NmToken => "NMTOKEN",
            AttrType::NmTokens => "NMTOKENS",
            AttrType::Enumeration => "",
            AttrType::Notation => "NOTATION",
        }
    }
}

// [60] DefaultDecl ::= '#REQUIRED' | '#IMPLIED' | (('#FIXED' S)? AttValue)
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DefaultKind {
    Required,
    Implied,
    Fixed,
    Default,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AttrDef {
    pub name: String,
    id: usize,
    pub attr_type: AttrType,
    pub default_kind: DefaultKind,
    /// Normalized default or fixed value.
    pub value: Option<String>,
    pub enum_values: Vec<String>,
    pub external: bool,
}

impl PoolEntry for AttrDef {
    fn key(&self) -> &str {
        &self.name
    }
    fn set_id(&mut self, id: usize) {
        self.id = id;
    }
}

impl AttrDef {
    pub fn new(name: impl Into<String>, attr_type: AttrType, default_kind: DefaultKind) -> AttrDef {
        AttrDef {
            name: name.into(),
            id: 0,
            attr_type,
            default_kind,
            value: None,
            enum_values: Vec::new(),
            external: false,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// The value to supply when the attribute is not specified.
    pub fn default_value(&self) -> Option<&str> {
        match self.default_kind {
            DefaultKind::Fixed | DefaultKind::Default => self.value.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for AttrDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.name)?;
        match self.attr_type {
            AttrType::Enumeration => write!(f, "({})", self.enum_values.join("|"))?,
            AttrType::Notation => write!(f, "NOTATION ({})", self.enum_values.join("|"))?,
            other => f.write_str(other.keyword())?,
        }
        match self.default_kind {
            DefaultKind::Required => f.write_str(" #REQUIRED"),
            DefaultKind::Implied => f.write_str(" #IMPLIED"),
            DefaultKind::Fixed => write!(f, " #FIXED \"{}\"", self.value.as_deref().unwrap_or("")),
            DefaultKind::Default => write!(f, " \"{}\"", self.value.as_deref().unwrap_or("")),
        }
    }
}

/// `<!ENTITY ...>`, general or parameter.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EntityDecl {
    pub name: String,
    id: usize,
    pub is_parameter: bool,
    /// Replacement text of an internal entity.
    pub value: Option<String>,
    pub public_id: Option<String>,
    pub system_id: Option<String>,
    /// NDATA notation of an unparsed entity.
    pub notation: Option<String>,
    /// System id of the entity the declaration appeared in, for resolving
    /// relative system ids.
    pub base_id: String,
    /// Declared in the external subset or in an external parameter entity.
    pub external: bool,
}

impl PoolEntry for EntityDecl {
    fn key(&self) -> &str {
        &self.name
    }
    fn set_id(&mut self, id: usize) {
        self.id = id;
    }
}

impl EntityDecl {
    pub fn internal(name: impl Into<String>, value: impl Into<String>, is_parameter: bool) -> EntityDecl {
        EntityDecl {
            name: name.into(),
            id: 0,
            is_parameter,
            value: Some(value.into()),
            public_id: None,
            system_id: None,
            notation: None,
            base_id: String::new(),
            external: false,
        }
    }

    pub fn external(
        name: impl Into<String>,
        public_id: Option<String>,
        system_id: impl Into<String>,
        is_parameter: bool,
    ) -> EntityDecl {
        EntityDecl {
            name: name.into(),
            id: 0,
            is_parameter,
            value: None,
            public_id,
            system_id: Some(system_id.into()),
            notation: None,
            base_id: String::new(),
            external: false,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_external(&self) -> bool {
        self.system_id.is_some()
    }

    pub fn is_unparsed(&self) -> bool {
        self.notation.is_some()
    }

    pub fn is_internal(&self) -> bool {
        self.value.is_some()
    }

    /// Name as seen on the entity stack, `%name` for parameter entities.
    pub fn stack_name(&self) -> String {
        if self.is_parameter {
            format!("%{}", self.name)
        } else {
            self.name.clone()
        }
    }
}

/// `<!NOTATION ...>`
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NotationDecl {
    pub name: String,
    id: usize,
    pub public_id: Option<String>,
    pub system_id: Option<String>,
}

impl PoolEntry for NotationDecl {
    fn key(&self) -> &str {
        &self.name
    }
    fn set_id(&mut self, id: usize) {
        self.id = id;
    }
}

impl NotationDecl {
    pub fn new(name: impl Into<String>, public_id: Option<String>, system_id: Option<String>) -> NotationDecl {
        NotationDecl {
            name: name.into(),
            id: 0,
            public_id,
            system_id,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_children_skip_compilation() {
        let spec = ContentSpec::ZeroOrMore(Box::new(ContentSpec::Seq(vec![ContentSpec::leaf(
            1, "b",
        )])));
        let decl = ElementDecl::with_children("a", spec);
        assert_eq!(decl.validate_children(&[]), ValidResult::Success);
        assert!(!decl.is_compiled());
        assert_eq!(decl.validate_children(&[1, 1]), ValidResult::Success);
        assert!(decl.is_compiled());
        assert_eq!(decl.format_model(), "(b)*");
    }

    #[test]
    fn mixed_and_empty_models() {
        let mixed = ElementDecl::with_mixed("p", vec![ElementRef::new(3, "em")]);
        assert_eq!(mixed.validate_children(&[3, 3]), ValidResult::Success);
        assert_eq!(mixed.validate_children(&[3, 4]), ValidResult::Mismatch(1));
        assert_eq!(mixed.format_model(), "(#PCDATA|em)*");
        assert!(mixed.allows_text());

        let empty = ElementDecl::new("br", ContentModelKind::Empty);
        assert_eq!(empty.validate_children(&[]), ValidResult::Success);
        assert_eq!(empty.validate_children(&[0]), ValidResult::TooMany(0));
        assert!(!empty.allows_text());
    }

    #[test]
    fn attr_def_formatting() {
        let mut def = AttrDef::new("kind", AttrType::Enumeration, DefaultKind::Default);
        def.enum_values = vec!["a".into(), "b".into()];
        def.value = Some("a".into());
        assert_eq!(def.to_string(), "kind (a|b) \"a\"");
        assert_eq!(def.default_value(), Some("a"));

        let def = AttrDef::new("id", AttrType::Id, DefaultKind::Required);
        assert_eq!(def.to_string(), "id ID #REQUIRED");
        assert_eq!(def.default_value(), None);
    }

    #[test]
    fn entity_kinds() {
        let e = EntityDecl::internal("e", "x", false);
        assert!(e.is_internal() && !e.is_external() && !e.is_unparsed());
        let mut pic = EntityDecl::external("pic", None, "pic.gif", false);
        pic.notation = Some("gif".into());
        assert!(pic.is_unparsed());
        assert_eq!(EntityDecl::internal("p", "", true).stack_name(), "%p");
    }
}
