use crate::types::{FailureKind, Lookup};
use std::collections::HashMap;
use std::sync::RwLock;

/// Settled outcome of one item.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Done(T),
    Failed(FailureKind),
}

/// Index -> outcome map read synchronously by the consumer.
///
/// Bounded by the size of the image set; nothing is evicted within a session.
pub struct ResultStore<T> {
    entries: RwLock<HashMap<usize, Outcome<T>>>,
}

impl<T> Default for ResultStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ResultStore<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn put(&self, index: usize, outcome: Outcome<T>) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(index, outcome);
    }

    pub fn remove(&self, index: usize) -> Option<Outcome<T>> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(&index)
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> ResultStore<T> {
    pub fn get(&self, index: usize) -> Option<Outcome<T>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(&index).cloned()
    }

    /// Non-blocking lookup; anything not yet settled is `NotReady`.
    pub fn lookup(&self, index: usize) -> Lookup<T> {
        match self.get(index) {
            Some(Outcome::Done(value)) => Lookup::Done(value),
            Some(Outcome::Failed(kind)) => Lookup::Failed(kind),
            None => Lookup::NotReady,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_missing_is_not_ready() {
        let store: ResultStore<String> = ResultStore::new();
        assert_eq!(store.lookup(3), Lookup::NotReady);
        assert!(store.is_empty());
    }

    #[test]
    fn put_then_lookup() {
        let store = ResultStore::new();
        store.put(0, Outcome::Done("fox".to_string()));
        store.put(1, Outcome::Failed(FailureKind::fatal("boom")));
        assert_eq!(store.lookup(0), Lookup::Done("fox".to_string()));
        assert_eq!(store.lookup(1), Lookup::Failed(FailureKind::fatal("boom")));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn remove_and_clear() {
        let store = ResultStore::new();
        store.put(4, Outcome::Done(1u32));
        store.put(5, Outcome::Done(2u32));
        assert_eq!(store.remove(4), Some(Outcome::Done(1)));
        assert_eq!(store.lookup(4), Lookup::NotReady);
        store.clear();
        assert!(store.is_empty());
    }
}
