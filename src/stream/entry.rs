//! Stream entry and pending-entry types.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use sqlx::FromRow;

use super::StreamError;

/// Flat string-keyed payload carried by an entry.
pub type Fields = BTreeMap<String, String>;

/// One appended unit of a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    /// Monotonic id assigned by the stream on append.
    pub id: i64,
    /// Entry payload.
    pub fields: Fields,
}

impl StreamEntry {
    /// Returns the value stored under `key`, if any.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

impl fmt::Display for StreamEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamEntry {{ id: {}, fields: {:?} }}", self.id, self.fields)
    }
}

/// Raw entry row as stored in `stream_entries`.
#[derive(Debug, FromRow)]
pub(crate) struct EntryRow {
    pub(crate) id: i64,
    pub(crate) fields: String,
}

impl TryFrom<EntryRow> for StreamEntry {
    type Error = StreamError;

    fn try_from(row: EntryRow) -> Result<Self, Self::Error> {
        let fields =
            serde_json::from_str(&row.fields).map_err(|e| StreamError::MalformedEntry {
                entry_id: row.id,
                message: e.to_string(),
            })?;
        Ok(Self { id: row.id, fields })
    }
}

/// An entry delivered to a consumer and not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    /// Entry id.
    pub entry_id: i64,
    /// Consumer currently holding the entry.
    pub consumer: String,
    /// How many times the entry has been delivered.
    pub delivery_count: i64,
    /// Time since the most recent delivery.
    pub idle: Duration,
}

#[derive(Debug, FromRow)]
pub(crate) struct PendingRow {
    pub(crate) entry_id: i64,
    pub(crate) consumer: String,
    pub(crate) delivery_count: i64,
    pub(crate) delivered_at: i64,
}

impl PendingRow {
    pub(crate) fn into_pending(self, now_ms: i64) -> PendingEntry {
        let idle_ms = u64::try_from(now_ms.saturating_sub(self.delivered_at)).unwrap_or(0);
        PendingEntry {
            entry_id: self.entry_id,
            consumer: self.consumer,
            delivery_count: self.delivery_count,
            idle: Duration::from_millis(idle_ms),
        }
    }
}

/// Options for [`StreamClient::claim`](super::StreamClient::claim).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimOptions {
    /// Maximum number of entries delivered by one claim.
    pub count: u32,
    /// How long to wait for new entries; `None` waits indefinitely.
    pub block: Option<Duration>,
}

impl ClaimOptions {
    /// Claim one entry, waiting at most `block`.
    #[must_use]
    pub fn blocking_for(block: Duration) -> Self {
        Self {
            count: 1,
            block: Some(block),
        }
    }
}

impl Default for ClaimOptions {
    fn default() -> Self {
        Self {
            count: 1,
            block: None,
        }
    }
}
