//! Per-key async mutexes.
//!
//! Ledger appends read the current quantity before writing the next absolute one, and order
//! transitions read the current state before writing the next. Both sequences must not
//! interleave for the same key inside this process; the database adds row locks on top where
//! the backend supports them.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug)]
pub struct KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    locks: DashMap<K, Arc<Mutex<()>>>,
}

/// Guards held for a set of keys; released together on drop.
#[derive(Debug)]
pub struct KeyGuards<K> {
    keys: Vec<K>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl<K> KeyGuards<K> {
    pub fn keys(&self) -> &[K] {
        &self.keys
    }
}

impl<K> Default for KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone + Ord,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &K) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn lock(&self, key: K) -> KeyGuards<K> {
        self.lock_all(vec![key]).await
    }

    /// Locks every key in ascending order so two callers never wait on each other crosswise.
    pub async fn lock_all(&self, mut keys: Vec<K>) -> KeyGuards<K> {
        keys.sort();
        keys.dedup();
        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            // The DashMap shard guard is released before awaiting.
            let slot = self.slot(key);
            guards.push(slot.lock_owned().await);
        }
        KeyGuards {
            keys,
            _guards: guards,
        }
    }

    /// Drops slots nobody is holding or waiting on.
    pub fn prune(&self) {
        self.locks.retain(|_, slot| Arc::strong_count(slot) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
