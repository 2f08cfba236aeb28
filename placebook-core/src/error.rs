use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        source: toml::de::Error,
        path: PathBuf,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Coarse failure category surfaced to callers of the directory core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Forbidden,
    Conflict,
    Configuration,
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Storage => "storage",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("forbidden: {reason}")]
    Forbidden { reason: String },
    #[error("listing {listing_id} changed concurrently, expected status {expected}")]
    Conflict {
        listing_id: String,
        expected: String,
    },
    #[error("listing {listing_id} cannot move from {from} to {to}")]
    InvalidTransition {
        listing_id: String,
        from: String,
        to: String,
    },
    #[error("place {place_id} is still referenced by {listings} listing(s)")]
    PlaceReferenced { place_id: String, listings: usize },
    #[error("sort mode {sort} requires {missing}")]
    Configuration {
        sort: &'static str,
        missing: &'static str,
    },
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("database path not configured")]
    MissingStore,
    #[error("failed to open database at {path}: {source}")]
    OpenDatabase {
        path: PathBuf,
        source: rusqlite::Error,
    },
}

impl DirectoryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DirectoryError::Validation { .. } => ErrorKind::Validation,
            DirectoryError::NotFound { .. } => ErrorKind::NotFound,
            DirectoryError::Forbidden { .. } => ErrorKind::Forbidden,
            DirectoryError::Conflict { .. }
            | DirectoryError::InvalidTransition { .. }
            | DirectoryError::PlaceReferenced { .. } => ErrorKind::Conflict,
            DirectoryError::Configuration { .. } => ErrorKind::Configuration,
            DirectoryError::Database(_)
            | DirectoryError::Serde(_)
            | DirectoryError::MissingStore
            | DirectoryError::OpenDatabase { .. } => ErrorKind::Storage,
        }
    }

    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        DirectoryError::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn forbidden(reason: impl Into<String>) -> Self {
        DirectoryError::Forbidden {
            reason: reason.into(),
        }
    }

    pub(crate) fn place_not_found(id: impl Into<String>) -> Self {
        DirectoryError::NotFound {
            entity: "place",
            id: id.into(),
        }
    }

    pub(crate) fn listing_not_found(id: impl Into<String>) -> Self {
        DirectoryError::NotFound {
            entity: "listing",
            id: id.into(),
        }
    }
}

pub type DirectoryResult<T> = std::result::Result<T, DirectoryError>;
