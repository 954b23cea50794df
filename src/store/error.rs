//! Error types for record store operations.

use thiserror::Error;

use crate::db::DbErrorKind;

/// Errors that can occur while reading or updating history records.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// No record has the requested id.
    #[error("history record '{id}' not found")]
    NotFound {
        /// The id that was looked up.
        id: String,
    },

    /// The value is not a valid record id.
    #[error(
        "invalid record id '{value}'\n  Suggestion: Record ids are lower-case hexadecimal strings"
    )]
    InvalidId {
        /// The rejected value.
        value: String,
    },

    /// The backing database failed.
    #[error("record store database error ({kind}): {message}")]
    Database {
        /// Typed classification of the database failure.
        kind: DbErrorKind,
        /// Human-readable database error text.
        message: String,
    },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database {
            kind: DbErrorKind::from_sqlx(&err),
            message: err.to_string(),
        }
    }
}

impl StoreError {
    /// Creates a `NotFound` error.
    #[must_use]
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Creates an `InvalidId` error.
    #[must_use]
    pub fn invalid_id(value: impl Into<String>) -> Self {
        Self::InvalidId {
            value: value.into(),
        }
    }

    /// Returns the database error kind when this is a database failure.
    #[must_use]
    pub fn db_kind(&self) -> Option<DbErrorKind> {
        match self {
            Self::Database { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
