//! A concurrent key→value cache with per-entry time-to-live.
//!
//! Expired entries are dropped lazily on read; callers that keep a cache
//! around for a long time can run `purge_expired` periodically.

use std::hash::Hash;
use std::time::{Duration, Instant};

use dashmap::DashMap;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

pub struct TtlCache<K, V> {
    entries: DashMap<K, Entry<V>>,
    default_ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
        }
    }

    /// Returns the live value for `key`, dropping it if expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        // The shard guard must be released before remove_if touches the map.
        let live = self
            .entries
            .get(key)
            .and_then(|entry| (entry.expires_at > now).then(|| entry.value.clone()));
        if live.is_none() {
            // Remove only if still expired, so a concurrent re-insert is not
            // clobbered.
            self.entries.remove_if(key, |_, e| e.expires_at <= now);
        }
        live
    }

    pub fn insert(&self, key: K, value: V) {
        self.insert_with_ttl(key, value, self.default_ttl);
    }

    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) {
        self.entries.insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Stores `value` only when no live entry exists, returning the value
    /// that is in the cache afterwards. This is the idempotency-key pattern:
    /// the first writer wins until its entry expires.
    pub fn put_if_absent(&self, key: K, value: V) -> V {
        let now = Instant::now();
        let entry = self
            .entries
            .entry(key)
            .and_modify(|e| {
                if e.expires_at <= now {
                    e.value = value.clone();
                    e.expires_at = now + self.default_ttl;
                }
            })
            .or_insert_with(|| Entry {
                value: value.clone(),
                expires_at: now + self.default_ttl,
            });
        entry.value.clone()
    }

    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, e| e.expires_at > now);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
