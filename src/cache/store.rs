//! Cache store contract shared by the in-memory and Redis backends.

use std::collections::BTreeSet;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use time::OffsetDateTime;

use super::keys::{CacheKey, CacheTag};
use super::validators::Validators;

/// One cached response.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub body: Bytes,
    pub content_type: Option<String>,
    pub validators: Validators,
    pub tags: BTreeSet<CacheTag>,
    pub expires_at: OffsetDateTime,
}

impl CacheEntry {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),
    #[error("cache entry is corrupt: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt(message.into())
    }
}

/// Key → response storage with tag-based bulk removal.
///
/// Implementations never return an entry whose `expires_at` has passed, and
/// a `set` is never observed half-written by a concurrent `get`.
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    /// Short backend label used in logs and metrics.
    fn backend(&self) -> &'static str;

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError>;

    /// Insert or replace the entry stored under `entry.key`.
    async fn set(&self, entry: CacheEntry) -> Result<(), StoreError>;

    /// Remove every entry carrying `tag`, returning how many were removed.
    async fn purge_by_tag(&self, tag: &CacheTag) -> Result<usize, StoreError>;

    /// Drop entries whose lifetime has ended, returning how many were removed.
    async fn evict_expired(&self) -> Result<usize, StoreError>;
}
