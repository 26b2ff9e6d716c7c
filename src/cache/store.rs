//! Keyed cache store
//!
//! Capacity-bounded map from `(partition, key)` to a value with its own expiry.
//! Recency is tracked in a [`RecencyList`] indexed by a `HashMap`, so marking an
//! entry used and evicting the least-recently-used entry are both O(1).
//!
//! Expired entries read as absent. They are dropped lazily on access or in bulk
//! by [`KeyedCacheStore::purge_expired`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::clock::{Clock, SystemClock};
use super::lru::{RecencyList, SlotId};

/// A cached value with timing metadata
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub partition: String,
    /// Epoch millis when the value was set
    pub inserted_at: u64,
    /// Epoch millis at which the entry reads as absent
    pub expires_at: u64,
    /// Epoch millis of the last read or write
    pub last_accessed_at: u64,
}

impl<V> CacheEntry<V> {
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StoreKey {
    partition: String,
    key: String,
}

struct Slot<V> {
    key: StoreKey,
    entry: CacheEntry<V>,
}

/// Key of an entry pushed out by an insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evicted {
    pub partition: String,
    pub key: String,
}

pub struct KeyedCacheStore<V> {
    index: HashMap<StoreKey, SlotId>,
    recency: RecencyList<Slot<V>>,
    capacity: usize,
    clock: Arc<dyn Clock>,
}

impl<V> KeyedCacheStore<V> {
    /// Create a store holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        Self::with_clock(capacity, Arc::new(SystemClock))
    }

    pub fn with_clock(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            index: HashMap::new(),
            recency: RecencyList::new(),
            capacity: capacity.max(1),
            clock,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of stored entries, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn now(&self) -> u64 {
        self.clock.now_millis()
    }

    /// Insert or overwrite an entry.
    ///
    /// Overwriting never evicts. A new key inserted at capacity evicts exactly
    /// one entry, the least recently used, before insertion.
    pub fn set(&mut self, key: &str, value: V, partition: &str, ttl: Duration) -> Option<Evicted> {
        let now = self.now();
        let expires_at = now.saturating_add(ttl.as_millis().min(u128::from(u64::MAX)) as u64);
        let store_key = StoreKey {
            partition: partition.to_string(),
            key: key.to_string(),
        };

        if let Some(&slot) = self.index.get(&store_key) {
            if let Some(existing) = self.recency.get_mut(slot) {
                existing.entry = CacheEntry {
                    value,
                    partition: partition.to_string(),
                    inserted_at: now,
                    expires_at,
                    last_accessed_at: now,
                };
            }
            self.recency.move_to_back(slot);
            debug!(partition, key, ttl_ms = ttl.as_millis() as u64, "Cache overwrite");
            return None;
        }

        let evicted = if self.index.len() >= self.capacity {
            self.evict_lru()
        } else {
            None
        };

        let entry = CacheEntry {
            value,
            partition: partition.to_string(),
            inserted_at: now,
            expires_at,
            last_accessed_at: now,
        };
        let slot = self.recency.push_back(Slot {
            key: store_key.clone(),
            entry,
        });
        self.index.insert(store_key, slot);
        debug!(partition, key, ttl_ms = ttl.as_millis() as u64, "Cache set");
        evicted
    }

    /// Look up an entry, marking it most recently used.
    ///
    /// Expired entries are removed and reported as a miss.
    pub fn get(&mut self, key: &str, partition: &str) -> Option<&CacheEntry<V>> {
        let now = self.now();
        let store_key = StoreKey {
            partition: partition.to_string(),
            key: key.to_string(),
        };
        let slot = *self.index.get(&store_key)?;

        let expired = self
            .recency
            .get(slot)
            .map(|s| s.entry.is_expired(now))
            .unwrap_or(true);
        if expired {
            self.index.remove(&store_key);
            self.recency.remove(slot);
            debug!(partition, key, "Cache entry expired");
            return None;
        }

        self.recency.move_to_back(slot);
        let slot_ref = self.recency.get_mut(slot)?;
        slot_ref.entry.last_accessed_at = now;
        Some(&slot_ref.entry)
    }

    /// Look up an unexpired entry without touching recency
    pub fn peek(&self, key: &str, partition: &str) -> Option<&CacheEntry<V>> {
        let now = self.now();
        let store_key = StoreKey {
            partition: partition.to_string(),
            key: key.to_string(),
        };
        let slot = *self.index.get(&store_key)?;
        self.recency
            .get(slot)
            .map(|s| &s.entry)
            .filter(|e| !e.is_expired(now))
    }

    /// Whether an unexpired entry exists (does not touch recency)
    pub fn contains(&self, key: &str, partition: &str) -> bool {
        self.peek(key, partition).is_some()
    }

    /// Remove an entry. Returns true if something was removed.
    pub fn delete(&mut self, key: &str, partition: &str) -> bool {
        let store_key = StoreKey {
            partition: partition.to_string(),
            key: key.to_string(),
        };
        match self.index.remove(&store_key) {
            Some(slot) => self.recency.remove(slot).is_some(),
            None => false,
        }
    }

    /// Remove every entry tagged with `partition`. Returns the number removed.
    pub fn clear_partition(&mut self, partition: &str) -> usize {
        let doomed: Vec<(StoreKey, SlotId)> = self
            .index
            .iter()
            .filter(|(k, _)| k.partition == partition)
            .map(|(k, slot)| (k.clone(), *slot))
            .collect();

        let count = doomed.len();
        for (key, slot) in doomed {
            self.index.remove(&key);
            self.recency.remove(slot);
        }
        if count > 0 {
            debug!(partition, count, "Cleared cache partition");
        }
        count
    }

    /// Number of entries (expired or not) in a partition
    pub fn partition_len(&self, partition: &str) -> usize {
        self.index.keys().filter(|k| k.partition == partition).count()
    }

    /// Drop all expired entries. Returns the number removed.
    pub fn purge_expired(&mut self) -> usize {
        let now = self.now();
        let expired: Vec<(StoreKey, SlotId)> = self
            .recency
            .iter()
            .filter(|(_, s)| s.entry.is_expired(now))
            .map(|(slot, s)| (s.key.clone(), slot))
            .collect();

        let count = expired.len();
        for (key, slot) in expired {
            self.index.remove(&key);
            self.recency.remove(slot);
        }
        count
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.recency.clear();
    }

    /// Iterate unexpired entries from least to most recently used
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CacheEntry<V>)> {
        let now = self.now();
        self.recency
            .iter()
            .filter(move |(_, s)| !s.entry.is_expired(now))
            .map(|(_, s)| (s.key.key.as_str(), &s.entry))
    }

    fn evict_lru(&mut self) -> Option<Evicted> {
        let (slot, key) = {
            let (slot, oldest) = self.recency.front()?;
            (slot, oldest.key.clone())
        };
        self.recency.remove(slot);
        self.index.remove(&key);
        debug!(partition = %key.partition, key = %key.key, "Evicted least recently used entry");
        Some(Evicted {
            partition: key.partition,
            key: key.key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;

    const HOUR: Duration = Duration::from_secs(3600);

    fn store_with_clock(capacity: usize) -> (KeyedCacheStore<&'static str>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        (KeyedCacheStore::with_clock(capacity, clock.clone()), clock)
    }

    #[test]
    fn test_set_and_get() {
        let (mut store, _) = store_with_clock(10);
        assert!(store.get("k", "p").is_none());

        store.set("k", "v", "p", HOUR);
        let entry = store.get("k", "p").expect("should hit");
        assert_eq!(entry.value, "v");
        assert_eq!(entry.partition, "p");
    }

    #[test]
    fn test_partitions_are_namespaces() {
        let (mut store, _) = store_with_clock(10);
        store.set("k", "a", "p1", HOUR);
        store.set("k", "b", "p2", HOUR);

        assert_eq!(store.get("k", "p1").map(|e| e.value), Some("a"));
        assert_eq!(store.get("k", "p2").map(|e| e.value), Some("b"));

        assert_eq!(store.clear_partition("p1"), 1);
        assert!(store.get("k", "p1").is_none());
        assert_eq!(store.get("k", "p2").map(|e| e.value), Some("b"));
    }

    #[test]
    fn test_ttl_boundary() {
        let (mut store, clock) = store_with_clock(10);
        store.set("k", "v", "p", Duration::from_millis(100));

        clock.set_millis(99);
        assert!(store.get("k", "p").is_some());

        clock.set_millis(101);
        assert!(store.get("k", "p").is_none());
        // Expired entries are dropped on access
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_lru_evicts_first_inserted() {
        let (mut store, _) = store_with_clock(3);
        assert!(store.set("a", "1", "p", HOUR).is_none());
        assert!(store.set("b", "2", "p", HOUR).is_none());
        assert!(store.set("c", "3", "p", HOUR).is_none());

        let evicted = store.set("d", "4", "p", HOUR);
        assert_eq!(
            evicted,
            Some(Evicted {
                partition: "p".into(),
                key: "a".into()
            })
        );
        assert_eq!(store.len(), 3);
        assert!(!store.contains("a", "p"));
    }

    #[test]
    fn test_read_refreshes_recency() {
        let (mut store, _) = store_with_clock(3);
        store.set("a", "1", "p", HOUR);
        store.set("b", "2", "p", HOUR);
        store.set("c", "3", "p", HOUR);

        store.get("a", "p");
        store.set("d", "4", "p", HOUR);

        assert!(store.contains("a", "p"));
        assert!(!store.contains("b", "p"));
    }

    #[test]
    fn test_overwrite_does_not_evict_or_duplicate() {
        let (mut store, _) = store_with_clock(2);
        store.set("a", "1", "p", HOUR);
        store.set("b", "2", "p", HOUR);
        assert!(store.set("a", "updated", "p", HOUR).is_none());

        assert_eq!(store.len(), 2);
        assert_eq!(store.get("a", "p").map(|e| e.value), Some("updated"));
        // "a" is now most recent, so "b" goes next
        store.set("c", "3", "p", HOUR);
        assert!(!store.contains("b", "p"));
    }

    #[test]
    fn test_peek_does_not_touch() {
        let (mut store, _) = store_with_clock(2);
        store.set("a", "1", "p", HOUR);
        store.set("b", "2", "p", HOUR);
        assert!(store.peek("a", "p").is_some());
        store.set("c", "3", "p", HOUR);
        assert!(!store.contains("a", "p"));
    }

    #[test]
    fn test_delete_and_purge() {
        let (mut store, clock) = store_with_clock(10);
        store.set("short", "1", "p", Duration::from_millis(10));
        store.set("long", "2", "p", HOUR);
        store.set("gone", "3", "q", HOUR);

        assert!(store.delete("gone", "q"));
        assert!(!store.delete("gone", "q"));

        clock.advance_millis(50);
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.partition_len("p"), 1);
        assert_eq!(store.iter().map(|(k, _)| k).collect::<Vec<_>>(), vec!["long"]);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let (mut store, _) = store_with_clock(0);
        assert_eq!(store.capacity(), 1);
        store.set("a", "1", "p", HOUR);
        store.set("b", "2", "p", HOUR);
        assert_eq!(store.len(), 1);
        assert!(store.contains("b", "p"));
    }
}
