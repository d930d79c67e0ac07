//! In-memory persistence for the CRUD records.

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::application::pagination::{ListQuery, Page, PageRequest};
use crate::cache::SharedClock;
use crate::domain::{
    entities::{Person, Record, Role, Wall, Window},
    error::DomainError,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RepoError {
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
}

impl From<DomainError> for RepoError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation { message } => RepoError::InvalidInput { message },
        }
    }
}

/// Concurrent map of records keyed by id, stamped with the injected clock.
pub struct MemoryRepository<R: Record> {
    records: DashMap<Uuid, R>,
    clock: SharedClock,
}

impl<R: Record> MemoryRepository<R> {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            records: DashMap::new(),
            clock,
        }
    }

    /// Records ordered by creation time, optionally filtered by a
    /// case-insensitive substring match.
    pub fn list(&self, query: &ListQuery) -> Page<R> {
        let needle = query
            .filter
            .as_deref()
            .map(str::trim)
            .filter(|needle| !needle.is_empty())
            .map(str::to_lowercase);

        let mut matching: Vec<R> = self
            .records
            .iter()
            .filter(|entry| {
                needle
                    .as_deref()
                    .is_none_or(|needle| entry.search_text().to_lowercase().contains(needle))
            })
            .map(|entry| entry.value().clone())
            .collect();
        matching.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.id().cmp(&b.id()))
        });

        Page::from_sorted(matching, PageRequest::from(query))
    }

    pub fn get(&self, id: Uuid) -> Result<R, RepoError> {
        self.records
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(RepoError::NotFound)
    }

    pub fn create(&self, draft: R::Draft) -> Result<R, RepoError> {
        R::validate(&draft)?;
        let record = R::from_draft(Uuid::new_v4(), draft, self.clock.now());
        self.records.insert(record.id(), record.clone());
        debug!(resource = %R::RESOURCE, id = %record.id(), "record created");
        Ok(record)
    }

    pub fn update(&self, id: Uuid, draft: R::Draft) -> Result<R, RepoError> {
        R::validate(&draft)?;
        let mut entry = self.records.get_mut(&id).ok_or(RepoError::NotFound)?;
        entry.apply(draft, self.clock.now());
        debug!(resource = %R::RESOURCE, id = %id, "record updated");
        Ok(entry.value().clone())
    }

    pub fn delete(&self, id: Uuid) -> Result<(), RepoError> {
        self.records.remove(&id).ok_or(RepoError::NotFound)?;
        debug!(resource = %R::RESOURCE, id = %id, "record deleted");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// One repository per record type, sharing a clock.
#[derive(Clone)]
pub struct Repositories {
    pub people: Arc<MemoryRepository<Person>>,
    pub roles: Arc<MemoryRepository<Role>>,
    pub walls: Arc<MemoryRepository<Wall>>,
    pub windows: Arc<MemoryRepository<Window>>,
}

impl Repositories {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            people: Arc::new(MemoryRepository::new(clock.clone())),
            roles: Arc::new(MemoryRepository::new(clock.clone())),
            walls: Arc::new(MemoryRepository::new(clock.clone())),
            windows: Arc::new(MemoryRepository::new(clock)),
        }
    }
}
