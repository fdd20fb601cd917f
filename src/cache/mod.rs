//! Bounded TTL cache.
//!
//! Generic key → value store with per-entry expiry and a maximum size.
//!
//! Eviction is insertion-ordered, not LRU: `get` never refreshes an entry's
//! position, so a frequently read entry that was inserted first is still the
//! first to go when the cache is full. Overwriting a key keeps its original
//! position and never evicts anything.
//!
//! Expiry is lazy. An expired entry is invisible to `get` (and removed by it)
//! even if `prune` has not run yet; `prune` only reclaims memory.
//!
//! Time comes from `tokio::time::Instant`, so tests can drive expiry with a
//! paused clock.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

/// Default entry lifetime when `set` is called without a TTL.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// Default maximum number of entries.
pub const DEFAULT_MAX_SIZE: usize = 10_000;

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
    /// Insertion sequence number, key into `TtlCache::order`.
    seq: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

/// Bounded cache with per-entry TTL and oldest-inserted eviction.
///
/// NOT internally synchronized - owners wrap it in a mutex.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    /// Insertion order: seq → key. First entry is the oldest.
    order: BTreeMap<u64, K>,
    next_seq: u64,
    default_ttl: Duration,
    max_size: usize,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create a cache. A `max_size` of zero is treated as one.
    pub fn new(default_ttl: Duration, max_size: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_seq: 0,
            default_ttl,
            max_size: max_size.max(1),
        }
    }

    /// Look up a live entry. A stale entry is deleted and reported absent.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let now = Instant::now();
        let expired = self.entries.get(key)?.is_expired(now);
        if expired {
            self.delete(key);
            return None;
        }
        self.entries.get(key).map(|entry| &entry.value)
    }

    /// Insert or overwrite `key`, expiring at `now + ttl` (default TTL if `None`).
    ///
    /// Inserting a new key into a full cache prunes expired entries first and,
    /// if still full, evicts the oldest-inserted entry.
    pub fn set(&mut self, key: K, value: V, ttl: Option<Duration>) {
        let expires_at = Instant::now() + ttl.unwrap_or(self.default_ttl);

        if let Some(entry) = self.entries.get_mut(&key) {
            entry.value = value;
            entry.expires_at = expires_at;
            return;
        }

        if self.entries.len() >= self.max_size {
            self.prune();
            if self.entries.len() >= self.max_size {
                self.evict_oldest();
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, key.clone());
        self.entries.insert(
            key,
            CacheEntry {
                value,
                expires_at,
                seq,
            },
        );
    }

    /// Remove `key` regardless of expiry, returning its value.
    pub fn delete(&mut self, key: &K) -> Option<V> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.seq);
        Some(entry.value)
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    /// Remove all expired entries, returning how many were removed.
    pub fn prune(&mut self) -> usize {
        let now = Instant::now();
        let expired: Vec<(u64, K)> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, entry)| (entry.seq, key.clone()))
            .collect();

        for (seq, key) in &expired {
            self.entries.remove(key);
            self.order.remove(seq);
        }
        expired.len()
    }

    /// Current entry count, including expired entries not yet pruned.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    fn evict_oldest(&mut self) -> Option<K> {
        let (_, key) = self.order.pop_first()?;
        self.entries.remove(&key);
        Some(key)
    }
}

impl<K, V> Default for TtlCache<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_MAX_SIZE)
    }
}

// =============================================================================
// Tests
// =============================================================================
