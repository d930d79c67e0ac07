//! Per-resource cache policies.
//!
//! The policy table is built once at startup and never mutated afterwards.

use std::collections::{BTreeSet, HashMap};
use std::num::NonZeroU64;
use std::time::Duration;

use axum::http::Method;
use thiserror::Error;

use crate::domain::types::ResourceType;

use super::keys::{CacheKey, compute_key};

pub const DEFAULT_PEOPLE_DURATION_SECS: u64 = 300;
pub const DEFAULT_ROLES_DURATION_SECS: u64 = 3600;
pub const DEFAULT_WALLS_DURATION_SECS: u64 = 600;
pub const DEFAULT_WINDOWS_DURATION_SECS: u64 = 600;
pub const DEFAULT_VARY_BY_QUERY: [&str; 3] = ["page", "size", "filter"];

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("no cache policy registered for `{0}`")]
pub struct PolicyNotFound(pub ResourceType);

/// Cache lifetime and key shape for one resource type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceCachePolicy {
    pub resource_type: ResourceType,
    duration: NonZeroU64,
    vary_by_query: BTreeSet<String>,
}

impl ResourceCachePolicy {
    pub fn new<I, S>(resource_type: ResourceType, duration_seconds: NonZeroU64, vary_by_query: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            resource_type,
            duration: duration_seconds,
            vary_by_query: vary_by_query
                .into_iter()
                .map(|name| name.as_ref().trim().to_ascii_lowercase())
                .filter(|name| !name.is_empty())
                .collect(),
        }
    }

    /// The built-in policy for a resource type.
    pub fn default_for(resource_type: ResourceType) -> Self {
        let seconds = match resource_type {
            ResourceType::People => DEFAULT_PEOPLE_DURATION_SECS,
            ResourceType::Roles => DEFAULT_ROLES_DURATION_SECS,
            ResourceType::Walls => DEFAULT_WALLS_DURATION_SECS,
            ResourceType::Windows => DEFAULT_WINDOWS_DURATION_SECS,
        };
        Self::new(
            resource_type,
            NonZeroU64::new(seconds).unwrap_or(NonZeroU64::MIN),
            DEFAULT_VARY_BY_QUERY,
        )
    }

    pub fn duration_seconds(&self) -> u64 {
        self.duration.get()
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration.get())
    }

    pub fn vary_by_query(&self) -> &BTreeSet<String> {
        &self.vary_by_query
    }

    /// Value of the `Cache-Control` response header.
    pub fn cache_control(&self) -> String {
        format!("public, max-age={}", self.duration.get())
    }

    pub fn compute_key(&self, method: &Method, path: &str, query: Option<&str>) -> CacheKey {
        compute_key(
            self.resource_type,
            &self.vary_by_query,
            method,
            path,
            query,
        )
    }
}

/// Static `ResourceType -> ResourceCachePolicy` lookup.
#[derive(Debug, Clone, Default)]
pub struct PolicyTable {
    policies: HashMap<ResourceType, ResourceCachePolicy>,
}

impl PolicyTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Table with the built-in policy for every resource type.
    pub fn defaults() -> Self {
        ResourceType::ALL
            .into_iter()
            .map(ResourceCachePolicy::default_for)
            .fold(Self::empty(), Self::with_policy)
    }

    pub fn with_policy(mut self, policy: ResourceCachePolicy) -> Self {
        self.insert(policy);
        self
    }

    pub fn insert(&mut self, policy: ResourceCachePolicy) {
        self.policies.insert(policy.resource_type, policy);
    }

    pub fn get(&self, resource_type: ResourceType) -> Result<&ResourceCachePolicy, PolicyNotFound> {
        self.policies
            .get(&resource_type)
            .ok_or(PolicyNotFound(resource_type))
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_resource() {
        let table = PolicyTable::defaults();
        assert_eq!(table.len(), ResourceType::ALL.len());
        assert_eq!(
            table.get(ResourceType::People).map(|p| p.duration_seconds()),
            Ok(300)
        );
        assert_eq!(
            table.get(ResourceType::Roles).map(|p| p.duration_seconds()),
            Ok(3600)
        );
        assert_eq!(
            table.get(ResourceType::Walls).map(|p| p.duration_seconds()),
            Ok(600)
        );
        assert_eq!(
            table.get(ResourceType::Windows).map(|p| p.duration_seconds()),
            Ok(600)
        );
    }

    #[test]
    fn missing_policy_is_reported() {
        let table = PolicyTable::empty();
        assert_eq!(
            table.get(ResourceType::Walls),
            Err(PolicyNotFound(ResourceType::Walls))
        );
    }

    #[test]
    fn vary_names_are_normalized() {
        let policy = ResourceCachePolicy::new(
            ResourceType::Roles,
            NonZeroU64::MIN,
            [" Page ", "SIZE", ""],
        );
        let names: Vec<&str> = policy.vary_by_query().iter().map(String::as_str).collect();
        assert_eq!(names, ["page", "size"]);
    }

    #[test]
    fn cache_control_uses_duration() {
        let policy = ResourceCachePolicy::default_for(ResourceType::Roles);
        assert_eq!(policy.cache_control(), "public, max-age=3600");
    }
}
