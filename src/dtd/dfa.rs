//! Compilation of `children` content models into DFAs.
//!
//! The `ContentSpec` as written in the DTD is rewritten into a binary tree over `Seq`, `Alt`,
//! `Star` and `Epsilon` whose leaves carry unique positions, with a synthetic
//! end-of-content leaf appended. First, last and follow position sets give
//! the NFA, and subset construction turns it into a dense transition table
//! indexed by state and by child element column.

use std::collections::HashMap;

use super::{content::ContentSpec, ValidResult};

/// A fixed-size set of leaf positions.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
struct LeafSet {
    words: Vec<u64>,
}

impl LeafSet {
    fn new(size: usize) -> LeafSet {
        LeafSet {
            words: vec![0; size.div_ceil(64)],
        }
    }

    fn insert(&mut self, pos: usize) {
        self.words[pos / 64] |= 1u64 << (pos % 64);
    }

    fn contains(&self, pos: usize) -> bool {
        self.words[pos / 64] & (1u64 << (pos % 64)) != 0
    }

    fn union_with(&mut self, other: &LeafSet) {
        for (word, theirs) in self.words.iter_mut().zip(&other.words) {
            *word |= theirs;
        }
    }

    fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &word)| {
            (0..64)
                .filter(move |bit| word & (1u64 << bit) != 0)
                .map(move |bit| i * 64 + bit)
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Symbol {
    Element(usize),
    EndOfContent,
}

#[derive(Debug)]
enum Node {
    Leaf(usize),
    Epsilon,
    Seq(Box<Node>, Box<Node>),
    Alt(Box<Node>, Box<Node>),
    Star(Box<Node>),
}

#[derive(Default)]
struct Rewriter {
    symbols: Vec<Symbol>,
}

impl Rewriter {
    fn leaf(&mut self, symbol: Symbol) -> Node {
        let pos = self.symbols.len();
        self.symbols.push(symbol);
        Node::Leaf(pos)
    }

    fn rewrite(&mut self, spec: &ContentSpec) -> Node {
        match spec {
            ContentSpec::Leaf(elem) => self.leaf(Symbol::Element(elem.id)),
            ContentSpec::Seq(items) => self.fold(items, |a, b| Node::Seq(Box::new(a), Box::new(b))),
            ContentSpec::Choice(items) => {
                self.fold(items, |a, b| Node::Alt(Box::new(a), Box::new(b)))
            }
            ContentSpec::ZeroOrOne(inner) => {
                Node::Alt(Box::new(self.rewrite(inner)), Box::new(Node::Epsilon))
            }
            ContentSpec::ZeroOrMore(inner) => Node::Star(Box::new(self.rewrite(inner))),
            // x+ is x followed by x*, the copy gets its own positions.
            ContentSpec::OneOrMore(inner) => {
                let once = self.rewrite(inner);
                let again = self.rewrite(inner);
                Node::Seq(Box::new(once), Box::new(Node::Star(Box::new(again))))
            }
        }
    }

    fn fold(&mut self, items: &[ContentSpec], join: fn(Node, Node) -> Node) -> Node {
        let mut items = items.iter();
        let Some(first) = items.next() else {
            return Node::Epsilon;
        };
        let mut node = self.rewrite(first);
        for item in items {
            let right = self.rewrite(item);
            node = join(node, right);
        }
        node
    }
}

struct PosInfo {
    nullable: bool,
    first: LeafSet,
    last: LeafSet,
}

/// Computes nullable/first/last bottom-up and fills in `follow`.
fn analyze(node: &Node, size: usize, follow: &mut [LeafSet]) -> PosInfo {
    match node {
        Node::Leaf(pos) => {
            let mut set = LeafSet::new(size);
            set.insert(*pos);
            PosInfo {
                nullable: false,
                first: set.clone(),
                last: set,
            }
        }
        Node::Epsilon => PosInfo {
            nullable: true,
            first: LeafSet::new(size),
            last: LeafSet::new(size),
        },
        Node::Alt(left, right) => {
            let mut a = analyze(left, size, follow);
            let b = analyze(right, size, follow);
            a.first.union_with(&b.first);
            a.last.union_with(&b.last);
            PosInfo {
                nullable: a.nullable || b.nullable,
                first: a.first,
                last: a.last,
            }
        }
        Node::Seq(left, right) => {
            let a = analyze(left, size, follow);
            let b = analyze(right, size, follow);
            for pos in a.last.iter() {
                follow[pos].union_with(&b.first);
            }
            let mut first = a.first;
            if a.nullable {
                first.union_with(&b.first);
            }
            let mut last = b.last;
            if b.nullable {
                last.union_with(&a.last);
            }
            PosInfo {
                nullable: a.nullable && b.nullable,
                first,
                last,
            }
        }
        Node::Star(inner) => {
            let x = analyze(inner, size, follow);
            for pos in x.last.iter() {
                follow[pos].union_with(&x.first);
            }
            PosInfo {
                nullable: true,
                first: x.first,
                last: x.last,
            }
        }
    }
}

/// A compiled content model.
#[derive(Clone, Debug)]
pub struct Dfa {
    columns: HashMap<usize, usize>,
    column_ids: Vec<usize>,
    transitions: Vec<Vec<Option<usize>>>,
    finals: Vec<bool>,
    can_be_empty: bool,
    leaf_count: usize,
}

impl Dfa {
    pub fn compile(spec: &ContentSpec) -> Dfa {
        let mut rewriter = Rewriter::default();
        let body = rewriter.rewrite(spec);
        let end = rewriter.leaf(Symbol::EndOfContent);
        let root = Node::Seq(Box::new(body), Box::new(end));

        let symbols = rewriter.symbols;
        let size = symbols.len();
        let end_pos = size - 1;
        let mut follow = vec![LeafSet::new(size); size];
        let start = analyze(&root, size, &mut follow).first;

        // Dense columns over the distinct element ids, in order of appearance.
        let mut columns: HashMap<usize, usize> = HashMap::new();
        let mut column_ids = Vec::new();
        let mut leaves_by_column: Vec<Vec<usize>> = Vec::new();
        for (pos, symbol) in symbols.iter().enumerate() {
            if let Symbol::Element(id) = *symbol {
                let column = *columns.entry(id).or_insert_with(|| {
                    column_ids.push(id);
                    leaves_by_column.push(Vec::new());
                    column_ids.len() - 1
                });
                leaves_by_column[column].push(pos);
            }
        }

        let mut states = vec![start.clone()];
        let mut index: HashMap<LeafSet, usize> = HashMap::new();
        index.insert(start, 0);
        let mut transitions = Vec::new();
        let mut finals = Vec::new();

        let mut current = 0;
        while current < states.len() {
            let set = states[current].clone();
            finals.push(set.contains(end_pos));
            let mut row = vec![None; column_ids.len()];
            for (column, leaves) in leaves_by_column.iter().enumerate() {
                let mut next = LeafSet::new(size);
                for &pos in leaves {
                    if set.contains(pos) {
                        next.union_with(&follow[pos]);
                    }
                }
                if next.is_empty() {
                    continue;
                }
                let target = match index.get(&next) {
                    Some(&state) => state,
                    None => {
                        let state = states.len();
                        states.push(next.clone());
                        index.insert(next, state);
                        state
                    }
                };
                row[column] = Some(target);
            }
            transitions.push(row);
            current += 1;
        }

        log::debug!(
            "compiled {}: {} leaves, {} states, {} columns",
            spec,
            size - 1,
            states.len(),
            column_ids.len()
        );

        Dfa {
            columns,
            column_ids,
            can_be_empty: finals[0],
            transitions,
            finals,
            leaf_count: size - 1,
        }
    }

    /// Walks `children` (element ids) through the table.
    pub fn validate(&self, children: &[usize]) -> ValidResult {
        if children.is_empty() {
            return if self.can_be_empty {
                ValidResult::Success
            } else {
                ValidResult::TooFew
            };
        }
        let mut state = 0;
        for (i, id) in children.iter().enumerate() {
            let Some(&column) = self.columns.get(id) else {
                return ValidResult::Mismatch(i);
            };
            match self.transitions[state][column] {
                Some(next) => state = next,
                None if self.finals[state] => return ValidResult::TooMany(i),
                None => return ValidResult::Mismatch(i),
            }
        }
        if self.finals[state] {
            ValidResult::Success
        } else {
            ValidResult::TooFew
        }
    }

    pub fn can_be_empty(&self) -> bool {
        self.can_be_empty
    }

    pub fn state_count(&self) -> usize {
        self.transitions.len()
    }

    /// Distinct child element ids the model mentions.
    pub fn column_count(&self) -> usize {
        self.column_ids.len()
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    pub fn is_final(&self, state: usize) -> bool {
        self.finals.get(state).copied().unwrap_or(false)
    }

    pub fn next_state(&self, state: usize, element_id: usize) -> Option<usize> {
        let column = *self.columns.get(&element_id)?;
        self.transitions.get(state)?.get(column).copied().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(id: usize) -> ContentSpec {
        ContentSpec::leaf(id, format!("e{}", id))
    }

    fn seq(items: Vec<ContentSpec>) -> ContentSpec {
        ContentSpec::Seq(items)
    }

    fn choice(items: Vec<ContentSpec>) -> ContentSpec {
        ContentSpec::Choice(items)
    }

    const B: usize = 1;
    const C: usize = 2;

    #[test]
    fn sequence_of_two() {
        let dfa = Dfa::compile(&seq(vec![leaf(B), leaf(C)]));
        assert_eq!(dfa.validate(&[B, C]), ValidResult::Success);
        assert_eq!(dfa.validate(&[C, B]), ValidResult::Mismatch(0));
        assert_eq!(dfa.validate(&[B]), ValidResult::TooFew);
        assert_eq!(dfa.validate(&[]), ValidResult::TooFew);
        assert_eq!(dfa.validate(&[B, C, C]), ValidResult::TooMany(2));
        assert_eq!(dfa.validate(&[B, 99]), ValidResult::Mismatch(1));
        assert_eq!(dfa.column_count(), 2);
    }

    #[test]
    fn star_of_choice_is_one_state() {
        let dfa = Dfa::compile(&ContentSpec::ZeroOrMore(Box::new(choice(vec![
            leaf(B),
            leaf(C),
        ]))));
        assert_eq!(dfa.state_count(), 1);
        assert!(dfa.can_be_empty());
        assert_eq!(dfa.validate(&[]), ValidResult::Success);
        assert_eq!(dfa.validate(&[C, B, B, C]), ValidResult::Success);
    }

    #[test]
    fn one_or_more_needs_one() {
        let dfa = Dfa::compile(&ContentSpec::OneOrMore(Box::new(seq(vec![leaf(B)]))));
        assert_eq!(dfa.leaf_count(), 2);
        assert_eq!(dfa.validate(&[]), ValidResult::TooFew);
        assert_eq!(dfa.validate(&[B]), ValidResult::Success);
        assert_eq!(dfa.validate(&[B, B, B]), ValidResult::Success);
    }

    #[test]
    fn optional_tail() {
        // (a,(b|c)?,a)
        let dfa = Dfa::compile(&seq(vec![
            leaf(0),
            ContentSpec::ZeroOrOne(Box::new(choice(vec![leaf(B), leaf(C)]))),
            leaf(0),
        ]));
        assert_eq!(dfa.column_count(), 3);
        assert_eq!(dfa.validate(&[0, 0]), ValidResult::Success);
        assert_eq!(dfa.validate(&[0, C, 0]), ValidResult::Success);
        assert_eq!(dfa.validate(&[0, C, B]), ValidResult::Mismatch(2));
        assert_eq!(dfa.validate(&[0, 0, 0]), ValidResult::TooMany(2));
        assert_eq!(dfa.next_state(0, 0), Some(1));
        assert!(!dfa.is_final(0));
    }

    #[test]
    fn leaf_sets_past_one_word() {
        let mut set = LeafSet::new(130);
        set.insert(0);
        set.insert(64);
        set.insert(129);
        assert_eq!(set.iter().collect::<Vec<_>>(), [0, 64, 129]);
        assert!(set.contains(129));
        assert!(!set.contains(128));

        let wide = seq((0..100).map(leaf).collect());
        let dfa = Dfa::compile(&wide);
        let children: Vec<usize> = (0..100).collect();
        assert_eq!(dfa.validate(&children), ValidResult::Success);
        assert_eq!(dfa.validate(&children[..99]), ValidResult::TooFew);
    }
}
