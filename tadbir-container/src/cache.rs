//! Bounded cache for on-demand instances.
//!
//! One cache per container, shared by every on-demand registration that
//! carries a [`CachePolicy`]. Recency is tracked by an [`LruCache`]: LRU
//! entries are promoted on every hit while FIFO entries are only peeked, so
//! the least-recent end of the list is always the right eviction victim.
//! TTL expiry is checked lazily on access.
//!
//! Every operation that drops entries hands them back so the caller can run
//! their disposal hooks once the lock is released.

use std::time::Instant;

use lru::LruCache;
use tracing::trace;

use crate::key::DependencyKey;
use crate::lifetime::{CachePolicy, EvictionPolicy};
use crate::registry::Instance;

#[derive(Debug)]
struct CacheEntry {
    instance: Instance,
    policy: CachePolicy,
    inserted_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.policy
            .ttl
            .is_some_and(|ttl| now.saturating_duration_since(self.inserted_at) >= ttl)
    }
}

/// Entries dropped from the cache.
pub(crate) type Released = Vec<(DependencyKey, Instance)>;

/// Result of a cache lookup.
#[derive(Debug)]
pub(crate) enum Lookup {
    Hit(Instance),
    /// The entry outlived its TTL and was removed.
    Expired(Instance),
    Miss,
}

#[derive(Debug)]
pub(crate) struct OnDemandCache {
    entries: LruCache<DependencyKey, CacheEntry>,
}

impl OnDemandCache {
    pub fn new() -> Self {
        Self {
            entries: LruCache::unbounded(),
        }
    }

    /// Looks up `key`, dropping it if its TTL has run out.
    pub fn get(&mut self, key: &DependencyKey, now: Instant) -> Lookup {
        let (expired, eviction) = match self.entries.peek(key) {
            Some(entry) => (entry.is_expired(now), entry.policy.eviction),
            None => return Lookup::Miss,
        };

        if expired {
            trace!(key = %key, "Cached on-demand entry expired");
            return match self.entries.pop(key) {
                Some(entry) => Lookup::Expired(entry.instance),
                None => Lookup::Miss,
            };
        }

        let entry = match eviction {
            EvictionPolicy::Lru => self.entries.get(key),
            EvictionPolicy::Fifo => self.entries.peek(key),
        };
        match entry {
            Some(entry) => Lookup::Hit(entry.instance.clone()),
            None => Lookup::Miss,
        }
    }

    /// Reads an entry without touching recency or expiry.
    pub fn peek(&self, key: &DependencyKey) -> Option<Instance> {
        self.entries.peek(key).map(|entry| entry.instance.clone())
    }

    /// Inserts an instance under `policy`, evicting until it fits.
    ///
    /// Returns the evicted entries, including a replaced entry for `key`.
    /// A policy with `max_entries == Some(0)` caches nothing.
    pub fn insert(
        &mut self,
        key: DependencyKey,
        instance: Instance,
        policy: CachePolicy,
        now: Instant,
    ) -> Released {
        let mut evicted = Released::new();
        if let Some(previous) = self.entries.pop(&key) {
            evicted.push((key.clone(), previous.instance));
        }
        if policy.max_entries == Some(0) {
            return evicted;
        }

        if let Some(max) = policy.max_entries {
            while self.entries.len() >= max {
                match self.entries.pop_lru() {
                    Some((victim, entry)) => {
                        trace!(key = %victim, "Evicted on-demand entry");
                        evicted.push((victim, entry.instance));
                    }
                    None => break,
                }
            }
        }

        self.entries.push(
            key,
            CacheEntry {
                instance,
                policy,
                inserted_at: now,
            },
        );
        evicted
    }

    /// Drops every expired entry.
    pub fn purge_expired(&mut self, now: Instant) -> Released {
        let expired: Vec<DependencyKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|key| self.entries.pop(&key).map(|entry| (key, entry.instance)))
            .collect()
    }

    /// Removes everything.
    pub fn clear(&mut self) -> Released {
        let mut released = Released::with_capacity(self.entries.len());
        while let Some((key, entry)) = self.entries.pop_lru() {
            released.push((key, entry.instance));
        }
        released
    }

    pub fn contains(&self, key: &DependencyKey) -> bool {
        self.entries.contains(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
