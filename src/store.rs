//! Process-local keyed stores with per-entry TTL.
//!
//! These back every piece of shared mutable state the services carry: the A2A
//! replay cache, consumed JWT `jti`s and KB nonces, WebAuthn challenges,
//! payment-method and agent tokens, shopping sessions, and the write-once
//! transaction log. Entries expire lazily on access plus whenever
//! [`TtlStore::purge_expired`] runs; handlers never hold a reference across an
//! await (dashmap guards are dropped before any suspension point).

use dashmap::DashMap;
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// A concurrent map whose entries each carry their own deadline.
pub struct TtlStore<V> {
    map: DashMap<String, Entry<V>>,
}

impl<V> Default for TtlStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> TtlStore<V> {
    pub fn new() -> Self {
        Self { map: DashMap::new() }
    }

    /// Inserts or replaces `key` with the given time to live.
    pub fn insert(&self, key: impl Into<String>, value: V, ttl: Duration) {
        self.map.insert(
            key.into(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Inserts `key` only if absent (or expired). Returns `false` when the key
    /// is still live — the primitive behind at-most-once consumption of
    /// message ids, jtis, and nonces.
    pub fn insert_once(&self, key: impl Into<String>, value: V, ttl: Duration) -> bool {
        use dashmap::mapref::entry::Entry as MapEntry;
        let now = Instant::now();
        let entry = Entry {
            value,
            expires_at: now + ttl,
        };
        match self.map.entry(key.into()) {
            MapEntry::Occupied(mut occupied) => {
                if occupied.get().expires_at <= now {
                    occupied.insert(entry);
                    true
                } else {
                    false
                }
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(entry);
                true
            }
        }
    }

    /// Removes `key`, returning its value if it was present and live.
    pub fn remove(&self, key: &str) -> Option<V> {
        let (_, entry) = self.map.remove(key)?;
        (entry.expires_at > Instant::now()).then_some(entry.value)
    }

    pub fn contains(&self, key: &str) -> bool {
        match self.map.get(key) {
            Some(entry) => entry.expires_at > Instant::now(),
            None => false,
        }
    }

    /// Drops every expired entry. Cheap enough to run from a periodic task.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.map.retain(|_, entry| entry.expires_at > now);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl<V: Clone> TtlStore<V> {
    /// Returns a clone of the live value under `key`, removing it if expired.
    pub fn get(&self, key: &str) -> Option<V> {
        let expired = {
            let entry = self.map.get(key)?;
            if entry.expires_at > Instant::now() {
                return Some(entry.value.clone());
            }
            true
        };
        if expired {
            self.map.remove(key);
        }
        None
    }
}
