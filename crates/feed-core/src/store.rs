//! Keyed, insertion-ordered collections with change notification.
//!
//! Both the context index and the visible feed are `Collection`s. Handles
//! are cheap to clone and share the same state; writers are expected to be
//! the owning `Feed` only.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;

/// Items stored in a collection expose a string key.
pub trait Keyed {
    fn key(&self) -> &str;
}

/// Items that can absorb a partial update of themselves.
pub trait Merge {
    fn merge(&mut self, other: Self);
}

struct Inner<T> {
    items: Vec<T>,
    index: HashMap<String, usize>,
}

impl<T: Keyed> Inner<T> {
    fn reindex(&mut self) {
        self.index = self
            .items
            .iter()
            .enumerate()
            .map(|(i, item)| (item.key().to_string(), i))
            .collect();
    }
}

/// Shared handle to a keyed collection.
pub struct Collection<T> {
    inner: Arc<RwLock<Inner<T>>>,
    revision: Arc<watch::Sender<u64>>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            revision: self.revision.clone(),
        }
    }
}

impl<T: Keyed + Clone> Default for Collection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Keyed + Clone> Collection<T> {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(RwLock::new(Inner {
                items: Vec::new(),
                index: HashMap::new(),
            })),
            revision: Arc::new(revision),
        }
    }

    /// Handle on a single entry.
    pub fn key<'a>(&'a self, key: &'a str) -> Entry<'a, T> {
        Entry {
            collection: self,
            key,
        }
    }

    /// Snapshot of every item, in insertion order.
    pub fn get(&self) -> Vec<T> {
        self.inner.read().items.clone()
    }

    /// Replace the whole contents with `f(current)`.
    pub fn update(&self, f: impl FnOnce(Vec<T>) -> Vec<T>) {
        {
            let mut inner = self.inner.write();
            let items = std::mem::take(&mut inner.items);
            inner.items = f(items);
            inner.reindex();
        }
        self.bump();
    }

    /// Insert unless the key is already present. Returns whether it was added.
    pub fn insert_absent(&self, item: T) -> bool {
        let added = {
            let mut inner = self.inner.write();
            if inner.index.contains_key(item.key()) {
                false
            } else {
                let key = item.key().to_string();
                let at = inner.items.len();
                inner.items.push(item);
                inner.index.insert(key, at);
                true
            }
        };
        if added {
            self.bump();
        }
        added
    }

    /// First-write-wins bulk insert. Returns the number of new items.
    pub fn extend_absent(&self, items: impl IntoIterator<Item = T>) -> usize {
        let mut added = 0;
        {
            let mut inner = self.inner.write();
            for item in items {
                if inner.index.contains_key(item.key()) {
                    continue;
                }
                let key = item.key().to_string();
                let at = inner.items.len();
                inner.items.push(item);
                inner.index.insert(key, at);
                added += 1;
            }
        }
        if added > 0 {
            self.bump();
        }
        added
    }

    pub fn len(&self) -> usize {
        self.inner.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Receiver that observes a revision counter bumped on every change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    fn bump(&self) {
        self.revision.send_modify(|r| *r += 1);
    }
}

/// Accessor for one key of a collection.
pub struct Entry<'a, T> {
    collection: &'a Collection<T>,
    key: &'a str,
}

impl<'a, T: Keyed + Clone> Entry<'a, T> {
    pub fn get(&self) -> Option<T> {
        let inner = self.collection.inner.read();
        inner.index.get(self.key).map(|&i| inner.items[i].clone())
    }

    pub fn exists(&self) -> bool {
        self.collection.inner.read().index.contains_key(self.key)
    }

    /// Insert or replace the value under this key.
    pub fn set(&self, value: T) {
        {
            let mut inner = self.collection.inner.write();
            match inner.index.get(self.key).copied() {
                Some(i) => inner.items[i] = value,
                None => {
                    let at = inner.items.len();
                    inner.items.push(value);
                    inner.index.insert(self.key.to_string(), at);
                }
            }
        }
        self.collection.bump();
    }

    /// Apply `f` to the stored value, if any. Returns whether it existed.
    pub fn update(&self, f: impl FnOnce(&mut T)) -> bool {
        let found = {
            let mut inner = self.collection.inner.write();
            match inner.index.get(self.key).copied() {
                Some(i) => {
                    f(&mut inner.items[i]);
                    true
                }
                None => false,
            }
        };
        if found {
            self.collection.bump();
        }
        found
    }
}

impl<'a, T: Keyed + Clone + Merge> Entry<'a, T> {
    /// Merge `partial` into the stored value, inserting it when absent.
    pub fn merge(&self, partial: T) {
        {
            let mut inner = self.collection.inner.write();
            match inner.index.get(self.key).copied() {
                Some(i) => inner.items[i].merge(partial),
                None => {
                    let at = inner.items.len();
                    inner.items.push(partial);
                    inner.index.insert(self.key.to_string(), at);
                }
            }
        }
        self.collection.bump();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::test_support::*;
    use crate::event::{DisplayEvent, Event};

    #[test]
    fn insert_absent_is_first_write_wins() {
        let c: Collection<Event> = Collection::new();
        let mut first = note("a", 1);
        first.content = "first".into();
        let mut second = note("a", 1);
        second.content = "second".into();

        assert!(c.insert_absent(first));
        assert!(!c.insert_absent(second));
        assert_eq!(c.key("a").get().unwrap().content, "first");
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn update_reindexes() {
        let c: Collection<Event> = Collection::new();
        c.extend_absent([note("a", 1), note("b", 2), note("c", 3)]);
        c.update(|items| items.into_iter().filter(|e| e.id != "a").collect());
        assert!(!c.key("a").exists());
        assert_eq!(c.key("c").get().unwrap().created_at, 3);
    }

    #[test]
    fn entry_set_update_merge() {
        let c: Collection<DisplayEvent> = Collection::new();
        c.key("n").set(DisplayEvent::new(note("n", 1)));
        assert!(c.key("n").update(|d| d.matches_filter = true));
        assert!(!c.key("missing").update(|d| d.matches_filter = true));

        let mut partial = DisplayEvent::new(note("n", 1));
        partial.reactions.push(reaction("r", 2, "n"));
        c.key("n").merge(partial);

        let stored = c.key("n").get().unwrap();
        assert!(stored.matches_filter);
        assert_eq!(stored.reactions.len(), 1);
    }

    #[test]
    fn revision_bumps_on_change_only() {
        let c: Collection<Event> = Collection::new();
        let rx = c.subscribe();
        c.insert_absent(note("a", 1));
        let after_insert = c.revision();
        c.insert_absent(note("a", 1));
        assert_eq!(c.revision(), after_insert);
        assert!(after_insert > 0);
        assert!(rx.has_changed().unwrap());
    }
}
