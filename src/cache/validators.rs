//! Response validators: strong ETags and Last-Modified timestamps.

use std::time::SystemTime;

use sha2::{Digest, Sha256};
use time::OffsetDateTime;

/// Number of digest bytes kept in an ETag (128 bits).
const ETAG_DIGEST_BYTES: usize = 16;

/// Validators served alongside a response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validators {
    /// Quoted strong entity tag, e.g. `"9f86d081884c7d659a2feaa0c55ad015"`.
    pub etag: String,
    /// Newest entity timestamp at second resolution; `None` for empty collections.
    pub last_modified: Option<OffsetDateTime>,
}

/// Compute validators for a serialized body.
///
/// The ETag depends only on `body`; `last_modified` is truncated to whole
/// seconds because HTTP dates cannot carry more.
pub fn compute_validators(body: &[u8], max_entity_timestamp: Option<OffsetDateTime>) -> Validators {
    Validators {
        etag: etag_for(body),
        last_modified: max_entity_timestamp.map(truncate_to_seconds),
    }
}

pub fn etag_for(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    format!("\"{}\"", hex::encode(&digest[..ETAG_DIGEST_BYTES]))
}

pub fn truncate_to_seconds(timestamp: OffsetDateTime) -> OffsetDateTime {
    timestamp.replace_nanosecond(0).unwrap_or(timestamp)
}

/// Newest of `created_at` / `updated_at` across a set of entities.
pub fn max_entity_timestamp<I>(timestamps: I) -> Option<OffsetDateTime>
where
    I: IntoIterator<Item = (OffsetDateTime, OffsetDateTime)>,
{
    timestamps
        .into_iter()
        .map(|(created_at, updated_at)| created_at.max(updated_at))
        .max()
}

/// Format a timestamp as an IMF-fixdate (`Sun, 06 Nov 1994 08:49:37 GMT`).
///
/// Instants before the Unix epoch are clamped to it.
pub fn format_http_date(timestamp: OffsetDateTime) -> String {
    let clamped = timestamp.max(OffsetDateTime::UNIX_EPOCH);
    httpdate::fmt_http_date(SystemTime::from(clamped))
}
