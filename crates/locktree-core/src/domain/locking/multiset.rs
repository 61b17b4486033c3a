//! Tag-to-set multimap with a running pair count
//!
//! Every node keeps one of these, keyed by user, recording which of its
//! descendants each user currently holds.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Mapping from a tag to a set of items
///
/// A tag is present only while at least one item is recorded under it, so
/// [`num_tags`](Self::num_tags) counts tags with live entries.
#[derive(Debug, Clone)]
pub struct TaggedMultiset<T, S> {
    store: HashMap<T, HashSet<S>>,
    size: usize,
}

impl<T, S> Default for TaggedMultiset<T, S> {
    fn default() -> Self {
        Self {
            store: HashMap::new(),
            size: 0,
        }
    }
}

impl<T, S> TaggedMultiset<T, S>
where
    T: Eq + Hash,
    S: Eq + Hash,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of (tag, item) pairs
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of distinct tags
    pub fn num_tags(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn contains(&self, tag: &T) -> bool {
        self.store.contains_key(tag)
    }

    /// Items recorded under `tag`, in no particular order
    pub fn lookup(&self, tag: &T) -> Vec<S>
    where
        S: Clone,
    {
        self.store
            .get(tag)
            .map(|items| items.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// The tag, if exactly one tag is present
    pub fn sole_tag(&self) -> Option<&T> {
        let mut tags = self.store.keys();
        match (tags.next(), tags.next()) {
            (Some(tag), None) => Some(tag),
            _ => None,
        }
    }

    pub fn tags(&self) -> impl Iterator<Item = &T> {
        self.store.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&T, &HashSet<S>)> {
        self.store.iter()
    }

    /// Insert a pair; no-op if it is already present
    pub fn add_entry(&mut self, tag: T, item: S) {
        if self.store.entry(tag).or_default().insert(item) {
            self.size += 1;
        }
    }

    /// Remove a pair; no-op if it is absent. Drops the tag once its set is empty.
    pub fn remove_entry(&mut self, tag: &T, item: &S) {
        let Some(items) = self.store.get_mut(tag) else {
            return;
        };
        if items.remove(item) {
            self.size -= 1;
        }
        if items.is_empty() {
            self.store.remove(tag);
        }
    }
}
