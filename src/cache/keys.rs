//! Cache key and tag definitions.
//!
//! A `CacheKey` identifies one cached response. A `CacheTag` groups entries
//! so that a write can purge every response that depends on it.

use std::collections::BTreeSet;
use std::fmt;

use axum::http::Method;
use url::form_urlencoded;

use crate::domain::types::ResourceType;

/// Canonical identity of a cached response.
///
/// Rendered as `<resource>|<method>|<path>[?<query>]`, where the query holds
/// only the parameters the resource varies by, sorted by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wrap a key that was already canonicalized, e.g. one read back from a store.
    pub fn from_canonical(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Invalidation label attached to cache entries.
///
/// Collection responses carry `"<resource>"`, single-entity responses carry
/// `"<resource>:<id>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheTag(String);

impl CacheTag {
    pub fn collection(resource: ResourceType) -> Self {
        Self(resource.as_str().to_string())
    }

    pub fn entity(resource: ResourceType, id: &str) -> Self {
        Self(format!("{}:{}", resource.as_str(), id.trim().to_ascii_lowercase()))
    }

    pub fn from_canonical(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the cache key for a request.
///
/// HEAD shares the GET key. Query parameters outside `vary_by_query` are
/// dropped, and the rest are sorted so their order never matters.
pub fn compute_key(
    resource: ResourceType,
    vary_by_query: &BTreeSet<String>,
    method: &Method,
    path: &str,
    query: Option<&str>,
) -> CacheKey {
    let method = if *method == Method::HEAD {
        Method::GET.as_str()
    } else {
        method.as_str()
    };

    let mut key = format!("{resource}|{method}|{}", normalize_path(path));
    let query = normalize_query(query.unwrap_or(""), vary_by_query);
    if !query.is_empty() {
        key.push('?');
        key.push_str(&query);
    }
    CacheKey(key)
}

/// Lower-case the path and drop trailing slashes (the root stays `/`).
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_ascii_lowercase()
    }
}

/// Keep only the varying parameters, lower-case their names, sort and re-encode.
pub fn normalize_query(query: &str, vary_by_query: &BTreeSet<String>) -> String {
    let mut pairs: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes())
        .map(|(name, value)| (name.to_ascii_lowercase(), value.into_owned()))
        .filter(|(name, _)| vary_by_query.contains(name))
        .collect();
    pairs.sort();

    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vary() -> BTreeSet<String> {
        ["page", "size", "filter"]
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    fn key(path: &str, query: Option<&str>) -> CacheKey {
        compute_key(ResourceType::People, &vary(), &Method::GET, path, query)
    }

    #[test]
    fn parameter_order_is_irrelevant() {
        assert_eq!(
            key("/api/people", Some("page=2&size=10")),
            key("/api/people", Some("size=10&page=2"))
        );
    }

    #[test]
    fn non_varying_parameters_are_ignored() {
        assert_eq!(
            key("/api/people", Some("page=2&_=1699999999")),
            key("/api/people", Some("page=2"))
        );
        assert_eq!(key("/api/people", Some("utm=x")), key("/api/people", None));
    }

    #[test]
    fn varying_parameters_split_keys() {
        assert_ne!(
            key("/api/people", Some("page=1")),
            key("/api/people", Some("page=2"))
        );
        assert_ne!(
            key("/api/people", Some("filter=ann")),
            key("/api/people", None)
        );
    }

    #[test]
    fn parameter_names_compare_case_insensitively() {
        assert_eq!(
            key("/api/people", Some("PAGE=3")),
            key("/api/people", Some("page=3"))
        );
    }

    #[test]
    fn path_is_normalized() {
        assert_eq!(key("/API/People/", None), key("/api/people", None));
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("///"), "/");
    }

    #[test]
    fn head_shares_get_key() {
        let head = compute_key(
            ResourceType::People,
            &vary(),
            &Method::HEAD,
            "/api/people",
            None,
        );
        assert_eq!(head, key("/api/people", None));
    }

    #[test]
    fn resource_type_is_part_of_the_key() {
        let roles = compute_key(ResourceType::Roles, &vary(), &Method::GET, "/x", None);
        let walls = compute_key(ResourceType::Walls, &vary(), &Method::GET, "/x", None);
        assert_ne!(roles, walls);
    }

    #[test]
    fn rendered_key_is_stable() {
        let key = key("/api/people", Some("size=10&filter=a+b&page=2"));
        assert_eq!(
            key.as_str(),
            "people|GET|/api/people?filter=a+b&page=2&size=10"
        );
    }

    #[test]
    fn tags_render_as_expected() {
        assert_eq!(CacheTag::collection(ResourceType::Walls).as_str(), "walls");
        assert_eq!(
            CacheTag::entity(ResourceType::People, "ABC-1").as_str(),
            "people:abc-1"
        );
    }
}
