//! Cache configuration.
//!
//! Resolved from the `[cache]` section of `wallwise.toml`; see
//! `crate::config` for the raw keys and their validation.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::clock::SharedClock;
use super::distributed::RedisStore;
use super::memory::MemoryStore;
use super::policy::PolicyTable;
use super::store::{CacheStore, StoreError};

pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;
pub const DEFAULT_REDIS_KEY_PREFIX: &str = "wallwise:";
pub const DEFAULT_REDIS_TIMEOUT_MS: u64 = 250;

/// Where cache entries live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackend {
    /// Process-local store; each instance keeps its own entries.
    Memory,
    /// Redis store shared by every instance.
    Redis {
        url: String,
        key_prefix: String,
        timeout: Duration,
    },
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// When off, the middleware is a pass-through and writes purge nothing.
    pub enabled: bool,
    pub backend: CacheBackend,
    /// Interval of the background expiry sweep.
    pub sweep_interval: Duration,
    /// Responses with larger bodies pass through uncached.
    pub max_body_bytes: usize,
    /// Memory store capacity.
    pub max_entries: NonZeroUsize,
    pub policies: PolicyTable,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: CacheBackend::Memory,
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            max_entries: NonZeroUsize::new(DEFAULT_MAX_ENTRIES).unwrap_or(NonZeroUsize::MIN),
            policies: PolicyTable::defaults(),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        let backend = match settings.redis.as_ref() {
            Some(redis) => CacheBackend::Redis {
                url: redis.url.clone(),
                key_prefix: redis.key_prefix.clone(),
                timeout: redis.timeout,
            },
            None => CacheBackend::Memory,
        };

        Self {
            enabled: settings.enabled,
            backend,
            sweep_interval: settings.sweep_interval,
            max_body_bytes: settings.max_body_bytes,
            max_entries: settings.max_entries,
            policies: settings.policies.clone(),
        }
    }
}

impl CacheConfig {
    /// Construct the configured store.
    ///
    /// The Redis backend only validates its URL here; it connects on first use.
    pub fn build_store(&self, clock: SharedClock) -> Result<Arc<dyn CacheStore>, StoreError> {
        let store: Arc<dyn CacheStore> = match &self.backend {
            CacheBackend::Memory => Arc::new(MemoryStore::new(clock, self.max_entries)),
            CacheBackend::Redis {
                url,
                key_prefix,
                timeout,
            } => Arc::new(RedisStore::new(url, key_prefix.clone(), *timeout, clock)?),
        };
        info!(
            backend = store.backend(),
            enabled = self.enabled,
            policies = self.policies.len(),
            "Cache store ready"
        );
        Ok(store)
    }
}
