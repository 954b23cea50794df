//! History record types.

use std::fmt;
use std::str::FromStr;

use sqlx::FromRow;

use super::StoreError;

/// Opaque record identifier: a non-empty hexadecimal string, kept in lower case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(String);

impl RecordId {
    /// Generates a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for RecordId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !s.is_empty() && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(Self(s.to_ascii_lowercase()))
        } else {
            Err(StoreError::invalid_id(s))
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RecordId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A persisted history record.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct HistoryRecord {
    /// Hex id, immutable.
    pub id: String,
    /// Source URL to crawl.
    pub url: String,
    /// Tag selecting the extractor (`nga`, `tieba`).
    pub source_type: String,
    /// Last extracted title, empty until the first success.
    pub title: String,
    /// Last extracted page count, zero until the first success.
    pub total_page_count: i64,
    /// Soft-delete flag; `None` was never set and counts as not deleted.
    pub deleted: Option<bool>,
    /// When the record was created.
    pub created_at: String,
    /// When the record was last updated.
    pub updated_at: String,
}

impl HistoryRecord {
    /// Returns the typed record id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidId`] if the stored id is not hex.
    pub fn record_id(&self) -> Result<RecordId, StoreError> {
        self.id.parse()
    }

    /// Returns true when the record is eligible for publishing.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.deleted.unwrap_or(false)
    }
}

impl fmt::Display for HistoryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HistoryRecord {{ id: {}, source_type: {}, url: {} }}",
            self.id, self.source_type, self.url
        )
    }
}

/// Field changes applied by [`HistoryStore::update`](super::HistoryStore::update).
///
/// `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordUpdate {
    /// New title.
    pub title: Option<String>,
    /// New total page count.
    pub total_page_count: Option<u32>,
}
