use std::collections::{HashMap, HashSet};

use super::{
    decl::{AttrDef, AttrType, DefaultKind, ElementDecl, ElementModel, EntityDecl, NotationDecl},
    pool::NameIdPool,
    ValidResult,
};
use crate::{chars, error::ErrorCode};

/// The five entities every document has without declaring them.
const PREDEFINED: [(&str, &str); 5] = [
    ("lt", "&#60;"),
    ("gt", ">"),
    ("amp", "&#38;"),
    ("apos", "'"),
    ("quot", "\""),
];

pub fn predefined_char(name: &str) -> Option<char> {
    match name {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "amp" => Some('&'),
        "apos" => Some('\''),
        "quot" => Some('"'),
        _ => None,
    }
}

/// A validity problem found while checking a value or declaration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Problem {
    pub code: ErrorCode,
    pub message: String,
}

impl Problem {
    fn new(code: ErrorCode, message: String) -> Problem {
        Problem { code, message }
    }
}

/// Outcome of adding an attribute definition.
#[derive(Debug, Default)]
pub struct AttrDefAdded {
    pub ignored: bool,
    pub problems: Vec<Problem>,
}

/// Owns the declaration pools of one DTD and answers validity questions
/// against them.
#[derive(Debug)]
pub struct DtdValidator {
    elements: NameIdPool<ElementDecl>,
    general_entities: NameIdPool<EntityDecl>,
    parameter_entities: NameIdPool<EntityDecl>,
    notations: NameIdPool<NotationDecl>,
    root_name: Option<String>,
    ids: HashSet<String>,
    idrefs: HashMap<String, usize>,
}

impl Default for DtdValidator {
    fn default() -> Self {
        let mut validator = DtdValidator {
            elements: NameIdPool::new(),
            general_entities: NameIdPool::new(),
            parameter_entities: NameIdPool::new(),
            notations: NameIdPool::new(),
            root_name: None,
            ids: HashSet::new(),
            idrefs: HashMap::new(),
        };
        validator.add_predefined();
        validator
    }
}

impl DtdValidator {
    pub fn new() -> DtdValidator {
        DtdValidator::default()
    }

    fn add_predefined(&mut self) {
        for (name, value) in PREDEFINED {
            let _ = self
                .general_entities
                .insert(EntityDecl::internal(name, value, false));
        }
    }

    /// Drops every declaration.
    pub fn reset(&mut self) {
        self.elements.clear();
        self.general_entities.clear();
        self.parameter_entities.clear();
        self.notations.clear();
        self.root_name = None;
        self.add_predefined();
        self.reset_instance();
    }

    /// Drops per-document state only, keeping the declarations.
    pub fn reset_instance(&mut self) {
        self.ids.clear();
        self.idrefs.clear();
    }

    pub fn set_root_name(&mut self, name: impl Into<String>) {
        self.root_name = Some(name.into());
    }

    pub fn root_name(&self) -> Option<&str> {
        self.root_name.as_deref()
    }

    pub fn is_valid_root(&self, decl: &ElementDecl) -> bool {
        self.root_name.as_deref() == Some(decl.name.as_str())
    }

    pub fn has_declarations(&self) -> bool {
        !self.elements.is_empty()
    }

    pub fn elements(&self) -> &NameIdPool<ElementDecl> {
        &self.elements
    }

    pub fn element(&self, name: &str) -> Option<&ElementDecl> {
        self.elements.get(name)
    }

    pub fn element_by_id(&self, id: usize) -> Option<&ElementDecl> {
        self.elements.by_id(id)
    }

    pub fn general_entity(&self, name: &str) -> Option<&EntityDecl> {
        self.general_entities.get(name)
    }

    pub fn parameter_entity(&self, name: &str) -> Option<&EntityDecl> {
        self.parameter_entities.get(name)
    }

    pub fn notation(&self, name: &str) -> Option<&NotationDecl> {
        self.notations.get(name)
    }

    /// Id for an element named in a content model or ATTLIST, adding an
    /// undeclared placeholder if needed.
    pub fn element_ref(&mut self, name: &str) -> usize {
        if let Some(id) = self.elements.id_of(name) {
            return id;
        }
        match self.elements.insert(ElementDecl::undeclared(name)) {
            Ok(id) => id,
            Err(_) => self.elements.id_of(name).unwrap_or(usize::MAX),
        }
    }

    /// Adds an element declaration. Returns its id and whether it was
    /// ignored as a redeclaration.
    pub fn add_element(&mut self, decl: ElementDecl) -> (usize, bool) {
        if let Some(existing) = self.elements.get_mut(&decl.name) {
            if existing.declared {
                return (existing.id(), true);
            }
            existing.adopt(decl);
            return (existing.id(), false);
        }
        match self.elements.insert(decl) {
            Ok(id) => (id, false),
            Err(decl) => (self.elements.id_of(&decl.name).unwrap_or(usize::MAX), true),
        }
    }

    pub fn add_attr_def(&mut self, element: &str, def: AttrDef) -> AttrDefAdded {
        let element_id = self.element_ref(element);
        let mut added = AttrDefAdded::default();
        let Some(decl) = self.elements.by_id_mut(element_id) else {
            added.ignored = true;
            return added;
        };
        if decl.attr_defs().contains(&def.name) {
            added.ignored = true;
            return added;
        }
        if def.attr_type == AttrType::Id {
            if let Some(other) = decl.id_attr() {
                added.problems.push(Problem::new(
                    ErrorCode::MultipleIdAttrs,
                    format!(
                        "element '{}' already has ID attribute '{}'",
                        element, other.name
                    ),
                ));
            }
            if !matches!(def.default_kind, DefaultKind::Implied | DefaultKind::Required) {
                added.problems.push(Problem::new(
                    ErrorCode::IdAttrDefault,
                    format!("ID attribute '{}' must be #IMPLIED or #REQUIRED", def.name),
                ));
            }
        }
        let _ = decl.attr_defs_mut().insert(def);
        added
    }

    /// Adds an entity. Returns true if ignored as a redeclaration.
    pub fn add_entity(&mut self, decl: EntityDecl) -> bool {
        let pool = if decl.is_parameter {
            &mut self.parameter_entities
        } else {
            &mut self.general_entities
        };
        pool.insert(decl).is_err()
    }

    /// Adds a notation. Returns true if ignored as a redeclaration.
    pub fn add_notation(&mut self, decl: NotationDecl) -> bool {
        self.notations.insert(decl).is_err()
    }

    pub fn validate_content(&self, element_id: usize, children: &[usize]) -> ValidResult {
        match self.elements.by_id(element_id) {
            Some(decl) => decl.validate_children(children),
            None => ValidResult::Success,
        }
    }

    pub fn validate_attr(&self, def: &AttrDef, value: &str) -> bool {
        self.check_attr_value(def, value).is_ok()
    }

    /// Checks a normalized value against its definition.
    pub fn check_attr_value(&self, def: &AttrDef, value: &str) -> Result<(), Problem> {
        if def.default_kind == DefaultKind::Fixed {
            if let Some(fixed) = def.value.as_deref() {
                if fixed != value {
                    return Err(Problem::new(
                        ErrorCode::FixedAttrMismatch,
                        format!(
                            "attribute '{}' is #FIXED to \"{}\" but has \"{}\"",
                            def.name, fixed, value
                        ),
                    ));
                }
            }
        }
        let bad = |what: &str| {
            Err(Problem::new(
                ErrorCode::BadAttrValue,
                format!("value \"{}\" of attribute '{}' is not {}", value, def.name, what),
            ))
        };
        match def.attr_type {
            AttrType::CData => Ok(()),
            AttrType::Id | AttrType::IdRef => match chars::is_valid_name(value) {
                true => Ok(()),
                false => bad("a Name"),
            },
            AttrType::IdRefs => match !value.is_empty() && value.split(' ').all(chars::is_valid_name) {
                true => Ok(()),
                false => bad("a list of Names"),
            },
            AttrType::NmToken => match chars::is_valid_nmtoken(value) {
                true => Ok(()),
                false => bad("an Nmtoken"),
            },
            AttrType::NmTokens => {
                match !value.is_empty() && value.split(' ').all(chars::is_valid_nmtoken) {
                    true => Ok(()),
                    false => bad("a list of Nmtokens"),
                }
            }
            AttrType::Entity => self.check_unparsed(def, value),
            AttrType::Entities => {
                if value.is_empty() {
                    return bad("a list of entity names");
                }
                value.split(' ').try_for_each(|name| self.check_unparsed(def, name))
            }
            AttrType::Enumeration | AttrType::Notation => {
                if def.enum_values.iter().any(|allowed| allowed == value) {
                    Ok(())
                } else {
                    Err(Problem::new(
                        ErrorCode::AttrValueNotInEnum,
                        format!(
                            "value \"{}\" of attribute '{}' is not one of ({})",
                            value,
                            def.name,
                            def.enum_values.join("|")
                        ),
                    ))
                }
            }
        }
    }

    fn check_unparsed(&self, def: &AttrDef, name: &str) -> Result<(), Problem> {
        match self.general_entities.get(name) {
            Some(entity) if entity.is_unparsed() => Ok(()),
            _ => Err(Problem::new(
                ErrorCode::NotUnparsedEntity,
                format!(
                    "value \"{}\" of attribute '{}' does not name an unparsed entity",
                    name, def.name
                ),
            )),
        }
    }

    /// Records an ID value. False if it was already used.
    pub fn register_id(&mut self, value: &str) -> bool {
        self.ids.insert(value.to_string())
    }

    pub fn add_idrefs(&mut self, value: &str) {
        for token in value.split(' ').filter(|t| !t.is_empty()) {
            *self.idrefs.entry(token.to_string()).or_insert(0) += 1;
        }
    }

    /// IDREF values that never matched an ID, sorted.
    pub fn unmatched_idrefs(&self) -> Vec<String> {
        let mut missing: Vec<String> = self
            .idrefs
            .keys()
            .filter(|id| !self.ids.contains(*id))
            .cloned()
            .collect();
        missing.sort();
        missing
    }

    /// Cross-declaration checks that can only run once the DTD is complete.
    pub fn check_dtd(&self) -> Vec<Problem> {
        let mut problems = Vec::new();
        for entity in self.general_entities.iter() {
            if let Some(notation) = &entity.notation {
                if !self.notations.contains(notation) {
                    problems.push(Problem::new(
                        ErrorCode::UndeclaredNotation,
                        format!(
                            "entity '{}' uses undeclared notation '{}'",
                            entity.name, notation
                        ),
                    ));
                }
            }
        }
        for element in self.elements.iter() {
            for def in element.attr_defs().iter() {
                if def.attr_type != AttrType::Notation {
                    continue;
                }
                for notation in &def.enum_values {
                    if !self.notations.contains(notation) {
                        problems.push(Problem::new(
                            ErrorCode::UndeclaredNotation,
                            format!(
                                "attribute '{}' of '{}' names undeclared notation '{}'",
                                def.name, element.name, notation
                            ),
                        ));
                    }
                }
            }
        }
        problems
    }
}

/// Attribute value normalization for non-CDATA types: runs of spaces
/// collapse to one and leading or trailing spaces are dropped. The input
/// has already had whitespace characters mapped to spaces.
pub fn normalize_tokenized(value: &str) -> String {
    value.split(' ').filter(|t| !t.is_empty()).collect::<Vec<_>>().join(" ")
}
