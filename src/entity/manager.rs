use super::spooler::{Spooler, SpoolerNote};
use crate::{
    chars,
    error::{Error, XmlResult},
};

struct EntityFrame {
    spooler: Spooler,
    /// Name of the declared entity this frame expands; `None` for the
    /// document entity and the external subset.
    entity: Option<String>,
}

/// Reported when an entity frame is popped off the stack.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct EndedEntity {
    pub name: String,
    pub is_parameter: bool,
    pub spooler_id: u32,
}

/// A diagnostic noted by a spooler, with the entity it came from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct EntityNote {
    pub note: SpoolerNote,
    pub system_id: String,
}

/// The stack of entities being read, seen by the parser as one stream.
///
/// Exhausted entities are popped transparently. The root entity is the
/// floor: its end is reported once as `None` and then as `UnexpectedEof`.
#[derive(Default)]
pub(crate) struct EntityManager {
    stack: Vec<EntityFrame>,
    root_exhausted: bool,
    /// Frames at or below this depth are never popped implicitly.
    floor: usize,
    ended: Vec<EndedEntity>,
    notes: Vec<EntityNote>,
}

impl EntityManager {
    pub(crate) fn new() -> EntityManager {
        EntityManager::default()
    }

    pub(crate) fn reset(&mut self) {
        self.stack.clear();
        self.root_exhausted = false;
        self.floor = 1;
        self.ended.clear();
        self.notes.clear();
    }

    pub(crate) fn push_root(&mut self, spooler: Spooler) {
        self.reset();
        log::debug!(
            "root entity '{}' (spooler {})",
            spooler.system_id(),
            spooler.id()
        );
        self.stack.push(EntityFrame {
            spooler,
            entity: None,
        });
    }

    /// Pushes a nested entity. Fails if the same entity is already open.
    pub(crate) fn push_entity(&mut self, spooler: Spooler, entity: Option<String>) -> XmlResult<()> {
        let circular = self.stack.iter().any(|frame| {
            frame.spooler.system_id() == spooler.system_id()
                || (entity.is_some()
                    && frame.entity == entity
                    && frame.spooler.is_parameter() == spooler.is_parameter())
        });
        if circular {
            let name = entity.unwrap_or_else(|| spooler.system_id().to_string());
            log::debug!("circular reference to '{}'", name);
            return Err(Error::CircularEntityReference(name));
        }
        log::debug!(
            "push entity '{}' (spooler {}, depth {})",
            spooler.system_id(),
            spooler.id(),
            self.stack.len() + 1
        );
        self.stack.push(EntityFrame { spooler, entity });
        Ok(())
    }

    /// Pushes an entity that is read as a stream of its own: its end is
    /// reported as `None` instead of falling through to the entity below.
    /// Returns the previous floor for [`EntityManager::end_isolated`].
    pub(crate) fn push_isolated(&mut self, spooler: Spooler) -> XmlResult<usize> {
        self.push_entity(spooler, None)?;
        let previous = self.floor;
        self.floor = self.stack.len();
        Ok(previous)
    }

    /// Pops the isolated entity and everything above it.
    pub(crate) fn end_isolated(&mut self, previous_floor: usize) {
        while self.stack.len() >= self.floor && self.stack.len() > 1 {
            self.pop();
        }
        self.floor = previous_floor.max(1);
    }

    fn pop(&mut self) {
        if let Some(mut frame) = self.stack.pop() {
            log::debug!(
                "pop entity '{}' (spooler {})",
                frame.spooler.system_id(),
                frame.spooler.id()
            );
            self.collect_notes_from(&mut frame.spooler);
            if let Some(name) = frame.entity {
                self.ended.push(EndedEntity {
                    name,
                    is_parameter: frame.spooler.is_parameter(),
                    spooler_id: frame.spooler.id(),
                });
            }
        }
    }

    fn collect_notes_from(&mut self, spooler: &mut Spooler) {
        let system_id = spooler.system_id().to_string();
        self.notes
            .extend(spooler.take_notes().into_iter().map(|note| EntityNote {
                note,
                system_id: system_id.clone(),
            }));
    }

    /// Pops every exhausted entity above the floor.
    pub(crate) fn pop_exhausted(&mut self) -> XmlResult<()> {
        while self.stack.len() > self.floor.max(1) {
            let at_end = match self.stack.last_mut() {
                Some(frame) => frame.spooler.at_end()?,
                None => false,
            };
            if !at_end {
                break;
            }
            self.pop();
        }
        Ok(())
    }

    fn top(&mut self) -> XmlResult<&mut Spooler> {
        match self.stack.last_mut() {
            Some(frame) => Ok(&mut frame.spooler),
            None => Err(Error::UnexpectedEof),
        }
    }

    pub(crate) fn top_spooler(&mut self) -> Option<&mut Spooler> {
        self.stack.last_mut().map(|frame| &mut frame.spooler)
    }

    pub(crate) fn next_char(&mut self) -> XmlResult<Option<char>> {
        loop {
            if let Some(c) = self.top()?.next_char()? {
                return Ok(Some(c));
            }
            if self.stack.len() > self.floor.max(1) {
                self.pop();
                continue;
            }
            if self.stack.len() > 1 {
                return Ok(None);
            }
            if self.root_exhausted {
                return Err(Error::UnexpectedEof);
            }
            self.root_exhausted = true;
            log::trace!("root entity exhausted");
            return Ok(None);
        }
    }

    pub(crate) fn peek_char(&mut self) -> XmlResult<Option<char>> {
        self.pop_exhausted()?;
        self.top()?.peek_char()
    }

    /// Looks ahead inside the current entity only.
    pub(crate) fn peek_ahead(&mut self, n: usize) -> XmlResult<Option<char>> {
        self.pop_exhausted()?;
        self.top()?.peek_ahead(n)
    }

    pub(crate) fn skip_if(&mut self, expected: char) -> XmlResult<bool> {
        self.pop_exhausted()?;
        self.top()?.skip_if(expected)
    }

    /// Matches `expected` inside the current entity only.
    pub(crate) fn skip_string(&mut self, expected: &str) -> XmlResult<bool> {
        self.pop_exhausted()?;
        self.top()?.skip_string(expected)
    }

    /// Skips whitespace, crossing entity ends. Returns whether any was skipped.
    pub(crate) fn skip_spaces(&mut self) -> XmlResult<bool> {
        let mut skipped = false;
        while let Some(c) = self.peek_char()? {
            if !chars::is_whitespace(c) {
                break;
            }
            self.next_char()?;
            skipped = true;
        }
        Ok(skipped)
    }

    /// Reads a `Name` into `out`. Names never span an entity boundary.
    pub(crate) fn get_name(&mut self, out: &mut String) -> XmlResult<bool> {
        out.clear();
        self.pop_exhausted()?;
        let top = self.top()?;
        match top.peek_char()? {
            Some(c) if chars::is_name_start_char(c) => {}
            _ => return Ok(false),
        }
        while let Some(c) = top.peek_char()? {
            if !chars::is_name_char(c) {
                break;
            }
            out.push(c);
            top.next_char()?;
        }
        Ok(true)
    }

    /// Reads an `Nmtoken` into `out`.
    pub(crate) fn get_nmtoken(&mut self, out: &mut String) -> XmlResult<bool> {
        out.clear();
        self.pop_exhausted()?;
        let top = self.top()?;
        while let Some(c) = top.peek_char()? {
            if !chars::is_name_char(c) {
                break;
            }
            out.push(c);
            top.next_char()?;
        }
        Ok(!out.is_empty())
    }

    /// Reads a quoted literal with no reference expansion, as used for
    /// system and public ids. The quotes must be in the same entity.
    pub(crate) fn get_quoted_string(&mut self, out: &mut String) -> XmlResult<bool> {
        out.clear();
        self.pop_exhausted()?;
        let top = self.top()?;
        let quote = match top.peek_char()? {
            Some(q @ ('"' | '\'')) => q,
            _ => return Ok(false),
        };
        top.next_char()?;
        loop {
            match top.next_char()? {
                Some(c) if c == quote => return Ok(true),
                Some(c) => out.push(c),
                None => return Err(Error::UnexpectedEof),
            }
        }
    }

    pub(crate) fn cur_spooler_id(&self) -> u32 {
        self.stack.last().map_or(0, |frame| frame.spooler.id())
    }

    pub(crate) fn line(&self) -> u32 {
        self.stack.last().map_or(0, |frame| frame.spooler.line())
    }

    pub(crate) fn column(&self) -> u32 {
        self.stack.last().map_or(0, |frame| frame.spooler.column())
    }

    pub(crate) fn system_id(&self) -> &str {
        self.stack
            .last()
            .map_or("", |frame| frame.spooler.system_id())
    }

    /// System id of the innermost external entity, the base for relative ids.
    pub(crate) fn last_external_system_id(&self) -> &str {
        self.stack
            .iter()
            .rev()
            .find(|frame| frame.spooler.is_external())
            .map_or("", |frame| frame.spooler.system_id())
    }

    /// True while reading an entity that came from an external source.
    pub(crate) fn in_external_entity(&self) -> bool {
        self.stack.len() > 1 && self.stack.iter().skip(1).any(|f| f.spooler.is_external())
    }

    pub(crate) fn has_ended(&self) -> bool {
        !self.ended.is_empty()
    }

    pub(crate) fn take_ended(&mut self) -> Vec<EndedEntity> {
        std::mem::take(&mut self.ended)
    }

    pub(crate) fn take_notes(&mut self) -> Vec<EntityNote> {
        let mut notes = std::mem::take(&mut self.notes);
        for frame in &mut self.stack {
            let system_id = frame.spooler.system_id().to_string();
            notes.extend(
                frame
                    .spooler
                    .take_notes()
                    .into_iter()
                    .map(|note| EntityNote {
                        note,
                        system_id: system_id.clone(),
                    }),
            );
        }
        notes
    }
}
