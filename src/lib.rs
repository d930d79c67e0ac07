//! Wallwise: a CRUD API for people, roles, walls and windows, fronted by an
//! output cache with tag invalidation and conditional request handling.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
