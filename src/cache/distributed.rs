//! Redis-backed cache store.
//!
//! Entries are JSON documents stored with a `PX` TTL. Each tag is a Redis set
//! of entry keys; a `set` writes the entry and its tag memberships in one
//! `MULTI`/`EXEC` pipeline. A tag set expires with its longest-lived member
//! (`PEXPIRE .. NX` then `GT`, Redis 7+). A purge only removes the members it
//! read, so a concurrent `set` stays indexed. Every command is bounded by a
//! timeout, and any connection or command failure surfaces as
//! `StoreError::Unavailable`.

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use redis::{AsyncCommands, RedisError, RedisResult, aio::ConnectionManager};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::clock::SharedClock;
use super::keys::{CacheKey, CacheTag};
use super::store::{CacheEntry, CacheStore, StoreError};
use super::validators::Validators;

impl From<RedisError> for StoreError {
    fn from(err: RedisError) -> Self {
        StoreError::unavailable(err.to_string())
    }
}

/// Wire form of a cache entry.
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    key: String,
    body: String,
    content_type: Option<String>,
    etag: String,
    last_modified: Option<i64>,
    tags: Vec<String>,
    expires_at_ms: i64,
}

fn unix_millis(at: OffsetDateTime) -> i64 {
    i64::try_from(at.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}

fn encode_entry(entry: &CacheEntry) -> Result<String, StoreError> {
    let stored = StoredEntry {
        key: entry.key.as_str().to_string(),
        body: BASE64.encode(&entry.body),
        content_type: entry.content_type.clone(),
        etag: entry.validators.etag.clone(),
        last_modified: entry.validators.last_modified.map(OffsetDateTime::unix_timestamp),
        tags: entry.tags.iter().map(|tag| tag.as_str().to_string()).collect(),
        expires_at_ms: unix_millis(entry.expires_at),
    };
    serde_json::to_string(&stored).map_err(|err| StoreError::corrupt(err.to_string()))
}

fn decode_entry(payload: &str) -> Result<CacheEntry, StoreError> {
    let stored: StoredEntry =
        serde_json::from_str(payload).map_err(|err| StoreError::corrupt(err.to_string()))?;
    let body = BASE64
        .decode(stored.body.as_bytes())
        .map_err(|err| StoreError::corrupt(format!("body: {err}")))?;
    let last_modified = stored
        .last_modified
        .map(OffsetDateTime::from_unix_timestamp)
        .transpose()
        .map_err(|err| StoreError::corrupt(format!("last_modified: {err}")))?;
    let expires_at =
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(stored.expires_at_ms) * 1_000_000)
            .map_err(|err| StoreError::corrupt(format!("expires_at: {err}")))?;

    Ok(CacheEntry {
        key: CacheKey::from_canonical(stored.key),
        body: Bytes::from(body),
        content_type: stored.content_type,
        validators: Validators {
            etag: stored.etag,
            last_modified,
        },
        tags: stored
            .tags
            .into_iter()
            .map(CacheTag::from_canonical)
            .collect::<BTreeSet<_>>(),
        expires_at,
    })
}

/// Shared Redis `CacheStore`.
///
/// The connection is established lazily on first use, so a Redis outage at
/// startup degrades to cache misses instead of aborting the process.
pub struct RedisStore {
    client: redis::Client,
    connection: OnceCell<ConnectionManager>,
    key_prefix: String,
    timeout: Duration,
    clock: SharedClock,
}

impl RedisStore {
    pub fn new(
        url: &str,
        key_prefix: impl Into<String>,
        timeout: Duration,
        clock: SharedClock,
    ) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            connection: OnceCell::new(),
            key_prefix: key_prefix.into(),
            timeout,
            clock,
        })
    }

    fn entry_key(&self, key: &CacheKey) -> String {
        format!("{}entry:{}", self.key_prefix, key)
    }

    fn tag_key(&self, tag: &CacheTag) -> String {
        format!("{}tag:{}", self.key_prefix, tag)
    }

    fn set_pipeline(&self, entry: &CacheEntry, payload: String, ttl_ms: u64) -> redis::Pipeline {
        let redis_key = self.entry_key(&entry.key);
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("SET")
            .arg(&redis_key)
            .arg(payload)
            .arg("PX")
            .arg(ttl_ms)
            .ignore();
        for tag in &entry.tags {
            let tag_key = self.tag_key(tag);
            pipe.sadd(&tag_key, &redis_key).ignore();
            pipe.cmd("PEXPIRE").arg(&tag_key).arg(ttl_ms).arg("NX").ignore();
            pipe.cmd("PEXPIRE").arg(&tag_key).arg(ttl_ms).arg("GT").ignore();
        }
        pipe
    }

    fn purge_pipeline(tag_key: &str, members: &[String]) -> redis::Pipeline {
        let mut pipe = redis::pipe();
        pipe.atomic().del(members).srem(tag_key, members).ignore();
        pipe
    }

    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        let manager = self
            .connection
            .get_or_try_init(|| {
                self.bounded("connect", ConnectionManager::new(self.client.clone()))
            })
            .await?;
        Ok(manager.clone())
    }

    async fn bounded<T, F>(&self, op: &'static str, command: F) -> Result<T, StoreError>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, command).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::unavailable(format!(
                "redis {op} timed out after {}ms",
                self.timeout.as_millis()
            ))),
        }
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError> {
        let mut conn = self.connection().await?;
        let redis_key = self.entry_key(key);
        let payload: Option<String> = self.bounded("get", conn.get(&redis_key)).await?;
        let Some(payload) = payload else {
            return Ok(None);
        };

        match decode_entry(&payload) {
            Ok(entry) if entry.is_expired(self.clock.now()) => Ok(None),
            Ok(entry) => Ok(Some(entry)),
            Err(err) => {
                warn!(cache = "redis", key = %key, error = %err, "dropping corrupt cache entry");
                let deleted: Result<(), StoreError> =
                    self.bounded("del", conn.del(&redis_key)).await;
                if let Err(err) = deleted {
                    warn!(cache = "redis", key = %key, error = %err, "failed to delete corrupt cache entry");
                }
                Ok(None)
            }
        }
    }

    async fn set(&self, entry: CacheEntry) -> Result<(), StoreError> {
        let ttl_ms = (entry.expires_at - self.clock.now()).whole_milliseconds();
        if ttl_ms <= 0 {
            debug!(cache = "redis", key = %entry.key, "skipping already expired entry");
            return Ok(());
        }
        let ttl_ms = u64::try_from(ttl_ms).unwrap_or(u64::MAX);

        let payload = encode_entry(&entry)?;
        let pipe = self.set_pipeline(&entry, payload, ttl_ms);

        let mut conn = self.connection().await?;
        let _: () = self.bounded("set", pipe.query_async(&mut conn)).await?;
        Ok(())
    }

    async fn purge_by_tag(&self, tag: &CacheTag) -> Result<usize, StoreError> {
        let mut conn = self.connection().await?;
        let tag_key = self.tag_key(tag);
        let members: Vec<String> = self.bounded("smembers", conn.smembers(&tag_key)).await?;

        if members.is_empty() {
            return Ok(0);
        }

        let pipe = Self::purge_pipeline(&tag_key, &members);
        let (purged,): (usize,) = self.bounded("purge", pipe.query_async(&mut conn)).await?;
        Ok(purged)
    }

    async fn evict_expired(&self) -> Result<usize, StoreError> {
        // Redis drops entries on their own TTL.
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use time::macros::datetime;

    use super::*;
    use crate::cache::clock::ManualClock;
    use crate::cache::validators::compute_validators;
    use crate::domain::types::ResourceType;

    fn sample_entry() -> CacheEntry {
        let body = Bytes::from_static(br#"{"items":[],"total":0}"#);
        CacheEntry {
            key: CacheKey::from_canonical("people|GET|/api/people?page=1"),
            validators: compute_validators(&body, Some(datetime!(2024-06-01 08:30:15 UTC))),
            body,
            content_type: Some("application/json".to_string()),
            tags: [
                CacheTag::collection(ResourceType::People),
                CacheTag::entity(ResourceType::People, "42"),
            ]
            .into_iter()
            .collect(),
            expires_at: datetime!(2024-06-01 08:35:15.250 UTC),
        }
    }

    fn store() -> RedisStore {
        let clock = Arc::new(ManualClock::new(datetime!(2024-06-01 08:30 UTC)));
        RedisStore::new(
            "redis://127.0.0.1:6379",
            "wallwise:",
            Duration::from_millis(50),
            clock,
        )
        .expect("valid redis url")
    }

    #[test]
    fn entry_survives_encoding() {
        let entry = sample_entry();
        let payload = encode_entry(&entry).expect("encode");
        assert_eq!(decode_entry(&payload).expect("decode"), entry);
    }

    #[test]
    fn corrupt_payload_is_reported() {
        assert!(matches!(
            decode_entry("{\"key\":1}"),
            Err(StoreError::Corrupt(_))
        ));
        assert!(matches!(decode_entry("not json"), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn redis_keys_are_namespaced() {
        let store = store();
        let key = CacheKey::from_canonical("roles|GET|/api/roles");
        assert_eq!(store.entry_key(&key), "wallwise:entry:roles|GET|/api/roles");
        assert_eq!(
            store.tag_key(&CacheTag::collection(ResourceType::Roles)),
            "wallwise:tag:roles"
        );
    }

    fn packed(pipe: &redis::Pipeline) -> String {
        String::from_utf8_lossy(&pipe.get_packed_pipeline()).into_owned()
    }

    fn resp_arg(value: &str) -> String {
        format!("${}\r\n{}\r\n", value.len(), value)
    }

    #[test]
    fn set_gives_every_tag_set_an_expiry() {
        let store = store();
        let entry = sample_entry();
        let packed = packed(&store.set_pipeline(&entry, "{}".to_string(), 300_250));

        for tag in &entry.tags {
            let tag_key = store.tag_key(tag);
            for mode in ["NX", "GT"] {
                let pexpire = format!(
                    "{}{}{}{}",
                    resp_arg("PEXPIRE"),
                    resp_arg(&tag_key),
                    resp_arg("300250"),
                    resp_arg(mode)
                );
                assert!(packed.contains(&pexpire), "missing {mode} expiry for {tag_key}");
            }
        }
        assert!(packed.contains(&format!("{}{}", resp_arg("PX"), resp_arg("300250"))));
    }

    #[test]
    fn purge_removes_only_the_members_it_read() {
        let store = store();
        let tag_key = store.tag_key(&CacheTag::collection(ResourceType::Roles));
        let members = vec![
            "wallwise:entry:roles|GET|/api/roles".to_string(),
            "wallwise:entry:roles|GET|/api/roles?page=2".to_string(),
        ];
        let packed = packed(&RedisStore::purge_pipeline(&tag_key, &members));

        let srem = format!(
            "{}{}{}{}",
            resp_arg("SREM"),
            resp_arg(&tag_key),
            resp_arg(&members[0]),
            resp_arg(&members[1])
        );
        assert!(packed.contains(&srem));
        assert!(!packed.contains(&format!("{}{}", resp_arg("DEL"), resp_arg(&tag_key))));
    }

    #[test]
    fn invalid_url_is_rejected() {
        let clock = Arc::new(ManualClock::new(datetime!(2024-06-01 08:30 UTC)));
        let result = RedisStore::new("not a url", "p:", Duration::from_millis(10), clock);
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }
}
