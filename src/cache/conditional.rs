//! Conditional request evaluation (`If-None-Match` / `If-Modified-Since`).
//!
//! Only safe methods are ever short-circuited. A header that cannot be parsed
//! is ignored as if it had not been sent.

use axum::http::{
    HeaderMap, Method,
    header::{IF_MODIFIED_SINCE, IF_NONE_MATCH},
};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::debug;

use super::validators::{Validators, truncate_to_seconds};

/// Outcome of evaluating request preconditions against current validators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conditional {
    /// Reply 304 with no body.
    NotModified,
    /// Serve the full representation.
    Proceed,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed {header} header: {reason}")]
pub struct MalformedConditionalHeader {
    pub header: &'static str,
    pub reason: String,
}

impl MalformedConditionalHeader {
    fn new(header: &'static str, reason: impl Into<String>) -> Self {
        Self {
            header,
            reason: reason.into(),
        }
    }
}

/// Parsed `If-None-Match` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityTagCondition {
    Any,
    /// Opaque tags including their quotes, weakness prefix removed.
    Tags(Vec<String>),
}

impl EntityTagCondition {
    /// Weak comparison, as required for `If-None-Match`.
    pub fn matches(&self, current_etag: &str) -> bool {
        let current = strip_weak(current_etag);
        match self {
            EntityTagCondition::Any => true,
            EntityTagCondition::Tags(tags) => tags.iter().any(|tag| tag == current),
        }
    }
}

pub fn evaluate(method: &Method, headers: &HeaderMap, current: &Validators) -> Conditional {
    if *method != Method::GET && *method != Method::HEAD {
        return Conditional::Proceed;
    }

    match if_none_match(headers) {
        Ok(Some(condition)) => {
            return if condition.matches(&current.etag) {
                Conditional::NotModified
            } else {
                Conditional::Proceed
            };
        }
        Ok(None) => {}
        Err(err) => debug!(error = %err, "ignoring conditional header"),
    }

    match if_modified_since(headers) {
        Ok(Some(since)) => match current.last_modified {
            Some(last_modified) if truncate_to_seconds(last_modified) <= since => {
                Conditional::NotModified
            }
            _ => Conditional::Proceed,
        },
        Ok(None) => Conditional::Proceed,
        Err(err) => {
            debug!(error = %err, "ignoring conditional header");
            Conditional::Proceed
        }
    }
}

/// Read every `If-None-Match` line; `Ok(None)` when the header is absent.
pub fn if_none_match(
    headers: &HeaderMap,
) -> Result<Option<EntityTagCondition>, MalformedConditionalHeader> {
    let mut values = Vec::new();
    for value in headers.get_all(IF_NONE_MATCH) {
        let text = value
            .to_str()
            .map_err(|_| MalformedConditionalHeader::new("If-None-Match", "non-ASCII value"))?;
        values.push(text);
    }
    if values.is_empty() {
        return Ok(None);
    }
    parse_entity_tags(&values.join(",")).map(Some)
}

/// Parse `If-Modified-Since`; `Ok(None)` when the header is absent.
pub fn if_modified_since(
    headers: &HeaderMap,
) -> Result<Option<OffsetDateTime>, MalformedConditionalHeader> {
    let Some(value) = headers.get(IF_MODIFIED_SINCE) else {
        return Ok(None);
    };
    let text = value
        .to_str()
        .map_err(|_| MalformedConditionalHeader::new("If-Modified-Since", "non-ASCII value"))?;
    httpdate::parse_http_date(text.trim())
        .map(|at| Some(OffsetDateTime::from(at)))
        .map_err(|err| MalformedConditionalHeader::new("If-Modified-Since", err.to_string()))
}

pub fn parse_entity_tags(raw: &str) -> Result<EntityTagCondition, MalformedConditionalHeader> {
    let malformed = |reason: &str| MalformedConditionalHeader::new("If-None-Match", reason);

    let trimmed = raw.trim();
    if trimmed == "*" {
        return Ok(EntityTagCondition::Any);
    }

    let mut tags = Vec::new();
    let mut rest = trimmed;
    loop {
        rest = rest.trim_start_matches(|c: char| c == ',' || c.is_ascii_whitespace());
        if rest.is_empty() {
            break;
        }
        if rest.starts_with('*') {
            return Err(malformed("`*` cannot be combined with entity tags"));
        }

        let unprefixed = rest.strip_prefix("W/").unwrap_or(rest);
        let opaque = unprefixed
            .strip_prefix('"')
            .ok_or_else(|| malformed("entity tag must be quoted"))?;
        let end = opaque
            .find('"')
            .ok_or_else(|| malformed("unterminated entity tag"))?;
        tags.push(format!("\"{}\"", &opaque[..end]));

        rest = opaque[end + 1..].trim_start();
        if !rest.is_empty() && !rest.starts_with(',') {
            return Err(malformed("entity tags must be comma separated"));
        }
    }

    if tags.is_empty() {
        return Err(malformed("no entity tags"));
    }
    Ok(EntityTagCondition::Tags(tags))
}

fn strip_weak(tag: &str) -> &str {
    tag.strip_prefix("W/").unwrap_or(tag)
}
