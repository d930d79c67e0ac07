//! Records served by the CRUD API.
//!
//! Every record carries a server-assigned `id` plus `created_at` and
//! `updated_at` stamped from the injected clock. Drafts are the client-supplied
//! part of a record, used for both create and full update.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::{error::DomainError, types::ResourceType};

const MAX_TEXT_LEN: usize = 200;

/// Common behaviour of the stored record types.
pub trait Record: Clone + Serialize + Send + Sync + 'static {
    type Draft: DeserializeOwned + Send + 'static;

    const RESOURCE: ResourceType;

    fn id(&self) -> Uuid;
    fn created_at(&self) -> OffsetDateTime;
    fn updated_at(&self) -> OffsetDateTime;

    fn validate(draft: &Self::Draft) -> Result<(), DomainError>;
    fn from_draft(id: Uuid, draft: Self::Draft, now: OffsetDateTime) -> Self;
    /// Replace the client-owned fields, keeping `id` and `created_at`.
    fn apply(&mut self, draft: Self::Draft, now: OffsetDateTime);

    /// Text searched by the collection `filter` parameter.
    fn search_text(&self) -> String;
}

fn require_text(field: &'static str, value: &str) -> Result<(), DomainError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation(format!("{field} must not be empty")));
    }
    if trimmed.chars().count() > MAX_TEXT_LEN {
        return Err(DomainError::validation(format!(
            "{field} must be at most {MAX_TEXT_LEN} characters"
        )));
    }
    Ok(())
}

fn require_positive(field: &'static str, value: u32) -> Result<(), DomainError> {
    if value == 0 {
        return Err(DomainError::validation(format!("{field} must be greater than zero")));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Person {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub role_id: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PersonDraft {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role_id: Option<Uuid>,
}

impl Record for Person {
    type Draft = PersonDraft;

    const RESOURCE: ResourceType = ResourceType::People;

    fn id(&self) -> Uuid {
        self.id
    }

    fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    fn updated_at(&self) -> OffsetDateTime {
        self.updated_at
    }

    fn validate(draft: &PersonDraft) -> Result<(), DomainError> {
        require_text("name", &draft.name)?;
        if let Some(email) = draft.email.as_deref() {
            if !email.contains('@') {
                return Err(DomainError::validation("email must contain `@`"));
            }
        }
        Ok(())
    }

    fn from_draft(id: Uuid, draft: PersonDraft, now: OffsetDateTime) -> Self {
        Self {
            id,
            name: draft.name.trim().to_string(),
            email: draft.email,
            role_id: draft.role_id,
            created_at: now,
            updated_at: now,
        }
    }

    fn apply(&mut self, draft: PersonDraft, now: OffsetDateTime) {
        self.name = draft.name.trim().to_string();
        self.email = draft.email;
        self.role_id = draft.role_id;
        self.updated_at = now;
    }

    fn search_text(&self) -> String {
        match self.email.as_deref() {
            Some(email) => format!("{} {email}", self.name),
            None => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RoleDraft {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl Record for Role {
    type Draft = RoleDraft;

    const RESOURCE: ResourceType = ResourceType::Roles;

    fn id(&self) -> Uuid {
        self.id
    }

    fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    fn updated_at(&self) -> OffsetDateTime {
        self.updated_at
    }

    fn validate(draft: &RoleDraft) -> Result<(), DomainError> {
        require_text("name", &draft.name)
    }

    fn from_draft(id: Uuid, draft: RoleDraft, now: OffsetDateTime) -> Self {
        Self {
            id,
            name: draft.name.trim().to_string(),
            description: draft.description,
            created_at: now,
            updated_at: now,
        }
    }

    fn apply(&mut self, draft: RoleDraft, now: OffsetDateTime) {
        self.name = draft.name.trim().to_string();
        self.description = draft.description;
        self.updated_at = now;
    }

    fn search_text(&self) -> String {
        format!("{} {}", self.name, self.description)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Wall {
    pub id: Uuid,
    pub name: String,
    pub width_mm: u32,
    pub height_mm: u32,
    pub material: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WallDraft {
    pub name: String,
    pub width_mm: u32,
    pub height_mm: u32,
    #[serde(default)]
    pub material: String,
}

impl Record for Wall {
    type Draft = WallDraft;

    const RESOURCE: ResourceType = ResourceType::Walls;

    fn id(&self) -> Uuid {
        self.id
    }

    fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    fn updated_at(&self) -> OffsetDateTime {
        self.updated_at
    }

    fn validate(draft: &WallDraft) -> Result<(), DomainError> {
        require_text("name", &draft.name)?;
        require_positive("width_mm", draft.width_mm)?;
        require_positive("height_mm", draft.height_mm)
    }

    fn from_draft(id: Uuid, draft: WallDraft, now: OffsetDateTime) -> Self {
        Self {
            id,
            name: draft.name.trim().to_string(),
            width_mm: draft.width_mm,
            height_mm: draft.height_mm,
            material: draft.material,
            created_at: now,
            updated_at: now,
        }
    }

    fn apply(&mut self, draft: WallDraft, now: OffsetDateTime) {
        self.name = draft.name.trim().to_string();
        self.width_mm = draft.width_mm;
        self.height_mm = draft.height_mm;
        self.material = draft.material;
        self.updated_at = now;
    }

    fn search_text(&self) -> String {
        format!("{} {}", self.name, self.material)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Window {
    pub id: Uuid,
    pub wall_id: Option<Uuid>,
    pub label: String,
    pub width_mm: u32,
    pub height_mm: u32,
    pub glazing: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WindowDraft {
    #[serde(default)]
    pub wall_id: Option<Uuid>,
    pub label: String,
    pub width_mm: u32,
    pub height_mm: u32,
    #[serde(default)]
    pub glazing: String,
}

impl Record for Window {
    type Draft = WindowDraft;

    const RESOURCE: ResourceType = ResourceType::Windows;

    fn id(&self) -> Uuid {
        self.id
    }

    fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    fn updated_at(&self) -> OffsetDateTime {
        self.updated_at
    }

    fn validate(draft: &WindowDraft) -> Result<(), DomainError> {
        require_text("label", &draft.label)?;
        require_positive("width_mm", draft.width_mm)?;
        require_positive("height_mm", draft.height_mm)
    }

    fn from_draft(id: Uuid, draft: WindowDraft, now: OffsetDateTime) -> Self {
        Self {
            id,
            wall_id: draft.wall_id,
            label: draft.label.trim().to_string(),
            width_mm: draft.width_mm,
            height_mm: draft.height_mm,
            glazing: draft.glazing,
            created_at: now,
            updated_at: now,
        }
    }

    fn apply(&mut self, draft: WindowDraft, now: OffsetDateTime) {
        self.wall_id = draft.wall_id;
        self.label = draft.label.trim().to_string();
        self.width_mm = draft.width_mm;
        self.height_mm = draft.height_mm;
        self.glazing = draft.glazing;
        self.updated_at = now;
    }

    fn search_text(&self) -> String {
        format!("{} {}", self.label, self.glazing)
    }
}
