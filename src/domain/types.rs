use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The CRUD entity categories served by the API.
///
/// Each resource type owns its own cache policy and its own invalidation tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    People,
    Roles,
    Walls,
    Windows,
}

impl ResourceType {
    pub const ALL: [ResourceType; 4] = [
        ResourceType::People,
        ResourceType::Roles,
        ResourceType::Walls,
        ResourceType::Windows,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceType::People => "people",
            ResourceType::Roles => "roles",
            ResourceType::Walls => "walls",
            ResourceType::Windows => "windows",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown resource type `{0}`")]
pub struct UnknownResourceType(pub String);

impl FromStr for ResourceType {
    type Err = UnknownResourceType;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ResourceType::ALL
            .into_iter()
            .find(|candidate| candidate.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| UnknownResourceType(value.to_string()))
    }
}
