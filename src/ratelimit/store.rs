//! Concurrent client key to visitor mapping.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;

use super::visitor::Visitor;

/// Outcome of looking up or creating a visitor.
#[derive(Debug)]
pub enum Entry {
    /// The key was already tracked
    Existing(Arc<Visitor>),
    /// A new visitor was inserted; its first token is already spent
    Created,
    /// The key is new and the store is at its client cap
    Full,
}

/// Map from client key to visitor, guarded by a single read/write lock.
///
/// The store lock covers structural operations only. Callers take a visitor's
/// own lock after the store lock has been released, except during deletion,
/// where the store lock is held while the visitor is re-checked.
pub struct VisitorStore {
    visitors: RwLock<HashMap<String, Arc<Visitor>>>,
    /// Maximum distinct keys; 0 means unbounded
    max_clients: usize,
}

impl VisitorStore {
    /// Create an empty store.
    pub fn new(max_clients: usize) -> Self {
        Self {
            visitors: RwLock::new(HashMap::new()),
            max_clients,
        }
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    pub fn set_max_clients(&mut self, max_clients: usize) {
        self.max_clients = max_clients;
    }

    /// Look up a visitor under the shared lock.
    pub fn get(&self, key: &str) -> Option<Arc<Visitor>> {
        self.visitors.read().get(key).cloned()
    }

    /// Return the visitor for `key`, creating it if absent and the cap allows.
    ///
    /// The lookup is optimistic under the shared lock and re-checked under the
    /// exclusive lock, so concurrent first requests create a single visitor.
    pub fn get_or_create(&self, key: &str, capacity: u32, now: Instant) -> Entry {
        if let Some(visitor) = self.get(key) {
            return Entry::Existing(visitor);
        }

        let mut visitors = self.visitors.write();
        if let Some(visitor) = visitors.get(key) {
            return Entry::Existing(Arc::clone(visitor));
        }

        if self.max_clients > 0 && visitors.len() >= self.max_clients {
            return Entry::Full;
        }

        visitors.insert(key.to_string(), Arc::new(Visitor::new(capacity, now)));
        Entry::Created
    }

    /// Snapshot the tracked keys. The lock is released before returning.
    pub fn keys(&self) -> Vec<String> {
        self.visitors.read().keys().cloned().collect()
    }

    /// Remove `key` if its visitor is still idle since before `cutoff`.
    ///
    /// Returns `true` if the entry was removed.
    pub fn remove_if_stale(&self, key: &str, cutoff: Instant) -> bool {
        let mut visitors = self.visitors.write();
        let stale = visitors
            .get(key)
            .is_some_and(|visitor| visitor.is_stale(cutoff));
        if stale {
            visitors.remove(key);
        }
        stale
    }

    pub fn len(&self) -> usize {
        self.visitors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.visitors.read().contains_key(key)
    }
}
