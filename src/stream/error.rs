//! Error types for stream operations.

use thiserror::Error;

use crate::db::DbErrorKind;

/// Errors that can occur during stream operations.
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    /// The backing database could not serve the request.
    #[error("stream unavailable ({kind}): {message}")]
    Unavailable {
        /// Typed classification of the database failure.
        kind: DbErrorKind,
        /// Human-readable database error text.
        message: String,
    },

    /// The stream does not exist and the caller did not opt into creating it.
    #[error(
        "stream '{stream}' does not exist\n  Suggestion: Append to the stream first or create the group with create_stream enabled"
    )]
    StreamMissing {
        /// Name of the missing stream.
        stream: String,
    },

    /// The consumer group does not exist on the stream.
    #[error(
        "consumer group '{group}' does not exist on stream '{stream}'\n  Suggestion: Call ensure_group before claiming"
    )]
    GroupMissing {
        /// Stream name.
        stream: String,
        /// Group name.
        group: String,
    },

    /// A stored entry could not be decoded.
    #[error("entry {entry_id} has a malformed field map: {message}")]
    MalformedEntry {
        /// Offending entry id.
        entry_id: i64,
        /// Decoder message.
        message: String,
    },

    /// A blocking claim was cancelled before any entry was delivered.
    #[error("claim cancelled")]
    Cancelled,
}

impl From<sqlx::Error> for StreamError {
    fn from(err: sqlx::Error) -> Self {
        Self::Unavailable {
            kind: DbErrorKind::from_sqlx(&err),
            message: err.to_string(),
        }
    }
}

impl StreamError {
    /// Creates a `StreamMissing` error.
    #[must_use]
    pub fn stream_missing(stream: &str) -> Self {
        Self::StreamMissing {
            stream: stream.to_string(),
        }
    }

    /// Creates a `GroupMissing` error.
    #[must_use]
    pub fn group_missing(stream: &str, group: &str) -> Self {
        Self::GroupMissing {
            stream: stream.to_string(),
            group: group.to_string(),
        }
    }

    /// Returns true for transport/database failures worth retrying after a backoff.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}
