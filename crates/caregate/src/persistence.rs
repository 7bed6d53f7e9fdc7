//! Storage contract shared by both engines.
//!
//! Repositories hand out entities wrapped in [`Versioned`] and accept writes only when the
//! caller presents the version it read. A mismatched version is reported as
//! [`RepositoryError::VersionConflict`], which the engines surface as `StaleState`.

use serde::{Deserialize, Serialize};

/// Entity snapshot paired with the optimistic-concurrency version it was read at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

impl<T> Versioned<T> {
    pub fn new(version: u64, value: T) -> Self {
        Self { version, value }
    }
}

/// Error enumeration for repository failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("record changed concurrently (expected version {expected}, found {found})")]
    VersionConflict { expected: u64, found: u64 },
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}
