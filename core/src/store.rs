//! In-memory correlation store shared by a stage's consumers.
//!
//! One [`CorrelationStore`] serves two purposes:
//!
//! - **Dedup set**: `CorrelationStore<()>` records which keys a stage has
//!   already processed (order id, `notificationType:orderId`, or event id).
//! - **Correlation map**: `CorrelationStore<DateTime<Utc>>` remembers when an
//!   order was received so a later event can be paired with it.
//!
//! # Concurrency
//!
//! The map is sharded. Each shard is guarded by a readers-writer lock, so reads
//! proceed in parallel, a write to a key excludes every other operation on that
//! key, and writers to keys in different shards never contend. Every operation
//! is linearizable per key: once [`put`](CorrelationStore::put) returns, any
//! later [`exists`](CorrelationStore::exists) on the same key observes it.
//!
//! # Lifetime
//!
//! State is per-process and non-durable. There is no eviction, TTL or size
//! bound; use [`len`](CorrelationStore::len) to monitor growth. A restarted
//! process forgets everything it deduplicated, while the broker may still
//! redeliver messages from before the restart.
//!
//! # Example
//!
//! ```
//! use fulfillment_core::store::CorrelationStore;
//!
//! let seen = CorrelationStore::<()>::new();
//! assert!(seen.put_if_absent("A1", ()));
//! assert!(!seen.put_if_absent("A1", ()));
//! assert!(seen.exists("A1"));
//! ```

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Thread-safe map from string keys to caller-defined values.
#[derive(Debug)]
pub struct CorrelationStore<V> {
    entries: DashMap<String, V>,
}

impl<V> Default for CorrelationStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> CorrelationStore<V> {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Insert or replace the value for `key`.
    pub fn put(&self, key: impl Into<String>, value: V) {
        self.entries.insert(key.into(), value);
    }

    /// Insert `value` only if `key` is absent.
    ///
    /// Returns `true` if this call inserted the entry. The check and the insert
    /// happen under one shard write lock, so of several concurrent callers with
    /// the same key exactly one gets `true`.
    pub fn put_if_absent(&self, key: impl Into<String>, value: V) -> bool {
        match self.entries.entry(key.into()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(value);
                true
            }
        }
    }

    /// Whether a value is stored for `key`.
    #[must_use]
    pub fn exists(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Remove the entry for `key`. Removing an absent key is a no-op.
    pub fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Remove and return the value for `key`.
    ///
    /// A get followed by a delete as one step: of several concurrent callers
    /// at most one receives the value.
    pub fn take(&self, key: &str) -> Option<V> {
        self.entries.remove(key).map(|(_, value)| value)
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V: Clone> CorrelationStore<V> {
    /// Return a copy of the value for `key`, or `None` if absent.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<V> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }
}
