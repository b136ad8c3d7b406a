//! Content specifications as written in an element declaration.

use std::fmt;

/// A child element named in a content model, with its pool id.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ElementRef {
    pub id: usize,
    pub name: String,
}

impl ElementRef {
    pub fn new(id: usize, name: impl Into<String>) -> ElementRef {
        ElementRef {
            id,
            name: name.into(),
        }
    }
}

// [47] children ::= (choice | seq) ('?' | '*' | '+')?
// [48] cp ::= (Name | choice | seq) ('?' | '*' | '+')?
// [49] choice ::= '(' S? cp ( S? '|' S? cp )+ S? ')'
// [50] seq ::= '(' S? cp ( S? ',' S? cp )* S? ')'
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ContentSpec {
    Leaf(ElementRef),
    /// A group of one is a sequence.
    Seq(Vec<ContentSpec>),
    Choice(Vec<ContentSpec>),
    ZeroOrOne(Box<ContentSpec>),
    ZeroOrMore(Box<ContentSpec>),
    OneOrMore(Box<ContentSpec>),
}

impl ContentSpec {
    pub fn leaf(id: usize, name: impl Into<String>) -> ContentSpec {
        ContentSpec::Leaf(ElementRef::new(id, name))
    }

    /// Number of element leaves as written.
    pub fn leaf_count(&self) -> usize {
        match self {
            ContentSpec::Leaf(_) => 1,
            ContentSpec::Seq(items) | ContentSpec::Choice(items) => {
                items.iter().map(ContentSpec::leaf_count).sum()
            }
            ContentSpec::ZeroOrOne(inner)
            | ContentSpec::ZeroOrMore(inner)
            | ContentSpec::OneOrMore(inner) => inner.leaf_count(),
        }
    }

    /// Every element named anywhere in the spec, in document order.
    pub fn elements(&self) -> Vec<&ElementRef> {
        let mut out = Vec::new();
        self.collect_elements(&mut out);
        out
    }

    fn collect_elements<'a>(&'a self, out: &mut Vec<&'a ElementRef>) {
        match self {
            ContentSpec::Leaf(elem) => out.push(elem),
            ContentSpec::Seq(items) | ContentSpec::Choice(items) => {
                for item in items {
                    item.collect_elements(out);
                }
            }
            ContentSpec::ZeroOrOne(inner)
            | ContentSpec::ZeroOrMore(inner)
            | ContentSpec::OneOrMore(inner) => inner.collect_elements(out),
        }
    }

    /// Whether the spec matches an empty child list.
    pub fn is_nullable(&self) -> bool {
        match self {
            ContentSpec::Leaf(_) => false,
            ContentSpec::Seq(items) => items.iter().all(ContentSpec::is_nullable),
            ContentSpec::Choice(items) => items.iter().any(ContentSpec::is_nullable),
            ContentSpec::ZeroOrOne(_) | ContentSpec::ZeroOrMore(_) => true,
            ContentSpec::OneOrMore(inner) => inner.is_nullable(),
        }
    }
}

fn write_group(f: &mut fmt::Formatter<'_>, items: &[ContentSpec], sep: char) -> fmt::Result {
    f.write_str("(")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, "{}", sep)?;
        }
        write!(f, "{}", item)?;
    }
    f.write_str(")")
}

/// Formats back to DTD syntax, e.g. `(a,(b|c)*)`.
impl fmt::Display for ContentSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentSpec::Leaf(elem) => f.write_str(&elem.name),
            ContentSpec::Seq(items) => write_group(f, items, ','),
            ContentSpec::Choice(items) => write_group(f, items, '|'),
            ContentSpec::ZeroOrOne(inner) => write!(f, "{}?", inner),
            ContentSpec::ZeroOrMore(inner) => write!(f, "{}*", inner),
            ContentSpec::OneOrMore(inner) => write!(f, "{}+", inner),
        }
    }
}
