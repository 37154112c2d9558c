// tessera/core/execution/src/key_lock.rs

//! Per-block row ownership between concurrently executing contexts.
//!
//! Every row a context reads or writes is locked to that context until its
//! writes are settled into the block or thrown away. A second context
//! touching the row is aborted with a conflict and rescheduled.
//!
//! Reads that only steer dispatch, and range scans, take no lock. They are
//! recorded as observations instead and checked against the writes settled
//! ahead of the context.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Separates table and row key inside a lock key.
pub const LOCK_KEY_SEPARATOR: char = '\u{1f}';

pub fn lock_key(table: &str, key: &str) -> String {
    let mut out = String::with_capacity(table.len() + key.len() + 1);
    out.push_str(table);
    out.push(LOCK_KEY_SEPARATOR);
    out.push_str(key);
    out
}

/// Observation key standing for every row of `table`.
pub fn range_lock_key(table: &str) -> String {
    let mut out = String::with_capacity(table.len() + 2);
    out.push_str(table);
    out.push(LOCK_KEY_SEPARATOR);
    out.push(LOCK_KEY_SEPARATOR);
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyLockOutcome {
    Locked,
    Conflict { holder: i64 },
}

/// Row locks shared by every context of a block. Clones share the table.
#[derive(Clone, Default)]
pub struct KeyLockManager {
    holders: Arc<DashMap<String, i64>>,
    held: Arc<DashMap<i64, BTreeSet<String>>>,
    observed: Arc<DashMap<i64, BTreeSet<String>>>,
}

impl KeyLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks `key` for `context_id`. Re-acquiring an owned key succeeds.
    pub fn acquire(&self, context_id: i64, key: &str) -> KeyLockOutcome {
        match self.holders.entry(key.to_string()) {
            Entry::Occupied(entry) => {
                let holder = *entry.get();
                if holder == context_id {
                    KeyLockOutcome::Locked
                } else {
                    KeyLockOutcome::Conflict { holder }
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(context_id);
                self.held
                    .entry(context_id)
                    .or_default()
                    .insert(key.to_string());
                KeyLockOutcome::Locked
            }
        }
    }

    /// Records an unlocked read of `key` by `context_id`.
    pub fn observe(&self, context_id: i64, key: &str) {
        self.observed
            .entry(context_id)
            .or_default()
            .insert(key.to_string());
    }

    /// Keys `context_id` read without locking, sorted.
    pub fn observed_by(&self, context_id: i64) -> Vec<String> {
        self.observed
            .get(&context_id)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Frees every key held by `context_id` and forgets its observations.
    pub fn release(&self, context_id: i64) {
        self.observed.remove(&context_id);
        if let Some((_, keys)) = self.held.remove(&context_id) {
            debug!("Context {} released {} key locks", context_id, keys.len());
            for key in keys {
                self.holders.remove_if(&key, |_, holder| *holder == context_id);
            }
        }
    }

    pub fn release_all(&self) {
        self.holders.clear();
        self.held.clear();
        self.observed.clear();
    }

    pub fn holder(&self, key: &str) -> Option<i64> {
        self.holders.get(key).map(|holder| *holder)
    }

    /// Keys held by `context_id`, sorted.
    pub fn keys_held_by(&self, context_id: i64) -> Vec<String> {
        self.held
            .get(&context_id)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Keys held by any other context, sorted.
    pub fn keys_not_held_by(&self, context_id: i64) -> Vec<String> {
        let mut keys: Vec<String> = self
            .holders
            .iter()
            .filter(|entry| *entry.value() != context_id)
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.holders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holders.is_empty()
    }
}
