use crate::pending::item::{PendingItem, PendingItemKey};
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// Insertion-ordered sequence of pending items that is also a unique index by `PendingItemKey`.
/// Merging into an existing item keeps its position.
#[derive(Debug)]
pub struct PendingItems<O, G> {
    index: HashMap<PendingItemKey<O, G>, u64>,
    sequence: BTreeMap<u64, PendingItem<O, G>>,
    next_seq: u64,
}

impl<O, G> Default for PendingItems<O, G>
where
    O: Clone + Eq + Hash,
    G: Clone + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<O, G> PendingItems<O, G>
where
    O: Clone + Eq + Hash,
    G: Clone + Eq + Hash,
{
    pub fn new() -> Self {
        PendingItems {
            index: HashMap::new(),
            sequence: BTreeMap::new(),
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    pub fn contains_key(&self, key: &PendingItemKey<O, G>) -> bool {
        self.index.contains_key(key)
    }

    /// Appends `item` unless an item with the same key is already queued. Returns whether it was
    /// inserted.
    pub fn insert(&mut self, item: PendingItem<O, G>) -> bool {
        let key = item.key();
        if self.index.contains_key(&key) {
            return false;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.index.insert(key, seq);
        self.sequence.insert(seq, item);
        true
    }

    pub fn get_mut(&mut self, key: &PendingItemKey<O, G>) -> Option<&mut PendingItem<O, G>> {
        let seq = self.index.get(key)?;
        self.sequence.get_mut(seq)
    }

    pub fn remove(&mut self, key: &PendingItemKey<O, G>) -> Option<PendingItem<O, G>> {
        let seq = self.index.remove(key)?;
        self.sequence.remove(&seq)
    }

    /// Items in insertion order, each with the handle `remove_at()` takes.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &PendingItem<O, G>)> {
        self.sequence.iter().map(|(seq, item)| (*seq, item))
    }

    pub(crate) fn remove_at(&mut self, seq: u64) -> Option<PendingItem<O, G>> {
        let item = self.sequence.remove(&seq)?;
        self.index.remove(&item.key());
        Some(item)
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.sequence.clear();
    }
}
