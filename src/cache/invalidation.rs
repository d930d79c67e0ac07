//! Write-driven cache invalidation.
//!
//! Provides the post-write hook that purges the tags a write makes stale.
//! Purging runs to completion before the write's response is released, and a
//! failed purge never fails the write.

use std::sync::Arc;

use axum::http::Method;
use metrics::counter;
use tracing::{debug, info, warn};

use crate::domain::types::ResourceType;

use super::keys::CacheTag;
use super::store::CacheStore;

pub(crate) const METRIC_INVALIDATION_FAILURE: &str = "wallwise_cache_invalidation_failure_total";
pub(crate) const METRIC_PURGED: &str = "wallwise_cache_purged_total";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Created,
    Updated,
    Deleted,
}

impl WriteKind {
    /// Map a state-changing HTTP method to the write it performs.
    pub fn from_method(method: &Method) -> Option<Self> {
        match *method {
            Method::POST => Some(WriteKind::Created),
            Method::PUT | Method::PATCH => Some(WriteKind::Updated),
            Method::DELETE => Some(WriteKind::Deleted),
            _ => None,
        }
    }
}

/// Notice that a write committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteNotification {
    pub resource_type: ResourceType,
    pub kind: WriteKind,
    pub entity_id: Option<String>,
}

impl WriteNotification {
    pub fn new(resource_type: ResourceType, kind: WriteKind, entity_id: Option<String>) -> Self {
        Self {
            resource_type,
            kind,
            entity_id,
        }
    }

    /// Tags made stale by this write.
    ///
    /// The collection tag is always purged since every collection response
    /// embeds its members; updates and deletes also purge the entity tag.
    pub fn stale_tags(&self) -> Vec<CacheTag> {
        let mut tags = Vec::with_capacity(2);
        if matches!(self.kind, WriteKind::Updated | WriteKind::Deleted) {
            if let Some(id) = self.entity_id.as_deref() {
                tags.push(CacheTag::entity(self.resource_type, id));
            }
        }
        tags.push(CacheTag::collection(self.resource_type));
        tags
    }
}

/// Purges cache entries in response to writes.
pub struct InvalidationCoordinator {
    enabled: bool,
    store: Arc<dyn CacheStore>,
}

impl InvalidationCoordinator {
    pub fn new(enabled: bool, store: Arc<dyn CacheStore>) -> Self {
        Self { enabled, store }
    }

    /// Purge every tag the write made stale, returning the number of entries removed.
    ///
    /// Store failures are logged and counted; they never propagate.
    pub async fn invalidate(&self, notification: &WriteNotification) -> usize {
        if !self.enabled {
            debug!(?notification, "Cache invalidation skipped: cache disabled");
            return 0;
        }

        let mut purged = 0;
        for tag in notification.stale_tags() {
            match self.store.purge_by_tag(&tag).await {
                Ok(count) => {
                    purged += count;
                    counter!(METRIC_PURGED, "resource" => notification.resource_type.as_str())
                        .increment(count as u64);
                }
                Err(err) => {
                    counter!(
                        METRIC_INVALIDATION_FAILURE,
                        "resource" => notification.resource_type.as_str()
                    )
                    .increment(1);
                    warn!(
                        backend = self.store.backend(),
                        tag = %tag,
                        error = %err,
                        "Cache invalidation failed; entries stay until they expire"
                    );
                }
            }
        }

        info!(
            resource = %notification.resource_type,
            kind = ?notification.kind,
            entity_id = notification.entity_id.as_deref().unwrap_or(""),
            purged,
            "Cache invalidated after write"
        );
        purged
    }

    pub async fn created(&self, resource_type: ResourceType) -> usize {
        self.invalidate(&WriteNotification::new(resource_type, WriteKind::Created, None))
            .await
    }

    pub async fn updated(&self, resource_type: ResourceType, entity_id: &str) -> usize {
        self.invalidate(&WriteNotification::new(
            resource_type,
            WriteKind::Updated,
            Some(entity_id.to_string()),
        ))
        .await
    }

    pub async fn deleted(&self, resource_type: ResourceType, entity_id: &str) -> usize {
        self.invalidate(&WriteNotification::new(
            resource_type,
            WriteKind::Deleted,
            Some(entity_id.to_string()),
        ))
        .await
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }
}
