//! Declarations collected from a DTD and the checks that run against them.

pub mod content;
pub mod decl;
pub mod dfa;
pub mod pool;
pub mod validator;

pub use content::{ContentSpec, ElementRef};
pub use decl::{
    AttrDef, AttrType, ContentModelKind, DefaultKind, ElementDecl, ElementModel, EntityDecl,
    NotationDecl,
};
pub use dfa::Dfa;
pub use pool::{NameIdPool, PoolEntry};
pub use validator::{DtdValidator, Problem};

/// Outcome of matching a child element list against a content model.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValidResult {
    Success,
    /// The children ended before the model was satisfied.
    TooFew,
    /// The model was already complete at this child.
    TooMany(usize),
    /// This child is not allowed here.
    Mismatch(usize),
}
