use std::collections::HashMap;

/// An object that can live in a [`NameIdPool`].
pub trait PoolEntry {
    fn key(&self) -> &str;
    fn set_id(&mut self, id: usize);
}

/// Objects addressable both by name and by a dense id.
///
/// Ids are handed out in insertion order, starting at zero, and are never
/// reused for the lifetime of the pool.
#[derive(Clone, Debug)]
pub struct NameIdPool<T> {
    by_name: HashMap<String, usize>,
    items: Vec<T>,
}

impl<T> Default for NameIdPool<T> {
    fn default() -> Self {
        NameIdPool {
            by_name: HashMap::new(),
            items: Vec::new(),
        }
    }
}

impl<T: PoolEntry> NameIdPool<T> {
    pub fn new() -> Self {
        NameIdPool::default()
    }

    /// Adds `item` and returns its id, or hands the item back if the name is
    /// already taken.
    pub fn insert(&mut self, mut item: T) -> Result<usize, T> {
        if self.by_name.contains_key(item.key()) {
            return Err(item);
        }
        let id = self.items.len();
        item.set_id(id);
        self.by_name.insert(item.key().to_string(), id);
        self.items.push(item);
        Ok(id)
    }

    pub fn id_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.id_of(name).and_then(|id| self.items.get(id))
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut T> {
        match self.id_of(name) {
            Some(id) => self.items.get_mut(id),
            None => None,
        }
    }

    pub fn by_id(&self, id: usize) -> Option<&T> {
        self.items.get(id)
    }

    pub fn by_id_mut(&mut self, id: usize) -> Option<&mut T> {
        self.items.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterates in id order.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.items.iter_mut()
    }

    pub fn clear(&mut self) {
        self.by_name.clear();
        self.items.clear();
    }
}
