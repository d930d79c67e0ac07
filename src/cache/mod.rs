//! Wallwise output cache.
//!
//! Sits between the router and the CRUD handlers of every resource type:
//!
//! - **Key policy**: per-resource lifetime and the query parameters a response varies by
//! - **Store**: in-memory or Redis, with tag-indexed bulk purge
//! - **Validators**: strong `ETag` over the body, `Last-Modified` from entity timestamps
//! - **Conditional requests**: `If-None-Match` / `If-Modified-Since` answered with 304
//! - **Invalidation**: successful writes purge the tags they made stale
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! distributed = false
//! max_body_bytes = 1048576
//!
//! [cache.policies.roles]
//! duration_seconds = 3600
//! vary_by_query = ["page", "size", "filter"]
//! ```

mod clock;
mod conditional;
mod config;
mod distributed;
mod invalidation;
mod keys;
mod lock;
mod memory;
mod middleware;
mod policy;
mod store;
mod validators;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use conditional::{
    Conditional, EntityTagCondition, MalformedConditionalHeader, evaluate, parse_entity_tags,
};
pub use config::{CacheBackend, CacheConfig};
pub(crate) use config::{
    DEFAULT_MAX_BODY_BYTES, DEFAULT_MAX_ENTRIES, DEFAULT_REDIS_KEY_PREFIX,
    DEFAULT_REDIS_TIMEOUT_MS, DEFAULT_SWEEP_INTERVAL_SECS,
};
pub use distributed::RedisStore;
pub use invalidation::{InvalidationCoordinator, WriteKind, WriteNotification};
pub use keys::{CacheKey, CacheTag, compute_key};
pub use memory::MemoryStore;
pub use middleware::{CacheBinding, CacheState, ContentTimestamp, X_CACHE, output_cache_layer};
pub use policy::{PolicyNotFound, PolicyTable, ResourceCachePolicy};
pub use store::{CacheEntry, CacheStore, StoreError};
pub use validators::{
    Validators, compute_validators, etag_for, format_http_date, max_entity_timestamp,
};

pub(crate) mod metric_names {
    pub(crate) use super::invalidation::{METRIC_INVALIDATION_FAILURE, METRIC_PURGED};
    pub(crate) use super::middleware::{METRIC_HIT, METRIC_MISS, METRIC_NOT_MODIFIED, METRIC_STORE_ERROR};
}
