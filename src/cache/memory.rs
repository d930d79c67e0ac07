//! In-process cache store.
//!
//! Entries and the tag → keys index live behind one lock, so an entry and its
//! index rows are always updated together.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use super::clock::SharedClock;
use super::keys::{CacheKey, CacheTag};
use super::lock::{rw_read, rw_write};
use super::store::{CacheEntry, CacheStore, StoreError};

const SOURCE: &str = "cache::memory";

#[derive(Default)]
struct Entries {
    by_key: HashMap<CacheKey, CacheEntry>,
    by_tag: HashMap<CacheTag, HashSet<CacheKey>>,
}

impl Entries {
    fn insert(&mut self, entry: CacheEntry) {
        self.remove(&entry.key);
        for tag in &entry.tags {
            self.by_tag
                .entry(tag.clone())
                .or_default()
                .insert(entry.key.clone());
        }
        self.by_key.insert(entry.key.clone(), entry);
    }

    fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let entry = self.by_key.remove(key)?;
        for tag in &entry.tags {
            if let Some(keys) = self.by_tag.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_tag.remove(tag);
                }
            }
        }
        Some(entry)
    }

    /// Key of the entry closest to expiry, the first to go when full.
    fn soonest_expiring(&self) -> Option<CacheKey> {
        self.by_key
            .values()
            .min_by_key(|entry| entry.expires_at)
            .map(|entry| entry.key.clone())
    }
}

/// In-memory `CacheStore` with lazy expiry and a bounded entry count.
pub struct MemoryStore {
    clock: SharedClock,
    capacity: NonZeroUsize,
    entries: RwLock<Entries>,
}

impl MemoryStore {
    pub fn new(clock: SharedClock, capacity: NonZeroUsize) -> Self {
        Self {
            clock,
            capacity,
            entries: RwLock::new(Entries::default()),
        }
    }

    /// Number of stored entries, expired ones included until evicted.
    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of tags that still index at least one entry.
    pub fn tag_count(&self) -> usize {
        rw_read(&self.entries, SOURCE, "tag_count").by_tag.len()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError> {
        let now = self.clock.now();
        {
            let entries = rw_read(&self.entries, SOURCE, "get");
            match entries.by_key.get(key) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.clone())),
                Some(_) => {}
            }
        }

        let mut entries = rw_write(&self.entries, SOURCE, "get.evict");
        if entries
            .by_key
            .get(key)
            .is_some_and(|entry| entry.is_expired(now))
        {
            entries.remove(key);
            debug!(cache = "memory", key = %key, "evicted expired entry on read");
        }
        Ok(None)
    }

    async fn set(&self, entry: CacheEntry) -> Result<(), StoreError> {
        let mut entries = rw_write(&self.entries, SOURCE, "set");
        if !entries.by_key.contains_key(&entry.key) && entries.by_key.len() >= self.capacity.get()
        {
            if let Some(victim) = entries.soonest_expiring() {
                entries.remove(&victim);
                debug!(cache = "memory", key = %victim, "evicted entry at capacity");
            }
        }
        entries.insert(entry);
        Ok(())
    }

    async fn purge_by_tag(&self, tag: &CacheTag) -> Result<usize, StoreError> {
        let mut entries = rw_write(&self.entries, SOURCE, "purge_by_tag");
        let keys = entries.by_tag.remove(tag).unwrap_or_default();
        let purged = keys
            .iter()
            .filter(|key| entries.remove(key).is_some())
            .count();
        Ok(purged)
    }

    async fn evict_expired(&self) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let mut entries = rw_write(&self.entries, SOURCE, "evict_expired");
        let expired: Vec<CacheKey> = entries
            .by_key
            .values()
            .filter(|entry| entry.is_expired(now))
            .map(|entry| entry.key.clone())
            .collect();
        for key in &expired {
            entries.remove(key);
        }
        Ok(expired.len())
    }
}
