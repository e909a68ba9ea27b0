use std::collections::HashMap;
use std::hash::Hash;

/// Work parked until a dependency shows up, released in the order it was parked.
#[derive(Debug)]
pub struct PendingQueue<K, T> {
    waiting: HashMap<K, Vec<T>>,
    len: usize,
}

impl<K: Eq + Hash, T> Default for PendingQueue<K, T> {
    fn default() -> Self {
        Self {
            waiting: HashMap::new(),
            len: 0,
        }
    }
}

impl<K: Eq + Hash, T> PendingQueue<K, T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn defer(&mut self, dependency: K, item: T) {
        self.waiting.entry(dependency).or_default().push(item);
        self.len += 1;
    }

    /// Everything that was waiting on `dependency`.
    pub fn take_ready(&mut self, dependency: &K) -> Vec<T> {
        let ready = self.waiting.remove(dependency).unwrap_or_default();
        self.len -= ready.len();
        ready
    }

    /// Drops everything parked on `dependency`; returns how many items went.
    pub fn discard(&mut self, dependency: &K) -> usize {
        self.take_ready(dependency).len()
    }

    /// Drops every parked item matching `predicate`, whatever it waits on.
    pub fn discard_where(&mut self, mut predicate: impl FnMut(&T) -> bool) -> usize {
        let before = self.len;
        for items in self.waiting.values_mut() {
            items.retain(|item| !predicate(item));
        }
        self.waiting.retain(|_, items| !items.is_empty());
        self.len = self.waiting.values().map(Vec::len).sum();
        before - self.len
    }

    pub fn is_waiting_on(&self, dependency: &K) -> bool {
        self.waiting.contains_key(dependency)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
