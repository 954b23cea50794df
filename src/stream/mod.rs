//! Durable append-only streams with consumer-group delivery.
//!
//! Streams live in the same `SQLite` database as the history records. Each
//! consumer group keeps a cursor (`last_delivered_id`) and a pending entries
//! list (PEL). An entry handed to one consumer stays in the PEL, invisible to
//! the rest of the group, until it is acknowledged or reclaimed after sitting
//! idle for longer than the visibility timeout.
//!
//! # Overview
//!
//! - [`StreamClient::append`] - durable append, creates the stream on demand
//! - [`StreamClient::ensure_group`] - idempotent group creation at the tail
//! - [`StreamClient::claim`] - cancellable blocking delivery of new entries
//! - [`StreamClient::ack`] - idempotent removal from the PEL
//! - [`StreamClient::reclaim_idle`] - visibility-timeout redelivery
//!
//! # Example
//!
//! ```ignore
//! use history_refresh::stream::{ClaimOptions, Fields, StreamClient};
//! use tokio_util::sync::CancellationToken;
//!
//! let client = StreamClient::new(db);
//! client.ensure_group("jobs", "workers", true).await?;
//! client.append("jobs", &Fields::from([("id".into(), "abc".into())])).await?;
//!
//! let cancel = CancellationToken::new();
//! let entries = client
//!     .claim("jobs", "workers", "consumer-1", ClaimOptions::default(), &cancel)
//!     .await?;
//! for entry in entries {
//!     client.ack("jobs", "workers", entry.id).await?;
//! }
//! ```

mod entry;
mod error;

pub use entry::{ClaimOptions, Fields, PendingEntry, StreamEntry};
pub use error::StreamError;

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sqlx::{Row, SqliteConnection};
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::db::Database;
use entry::{EntryRow, PendingRow};

/// Result type for stream operations.
pub type Result<T> = std::result::Result<T, StreamError>;

/// How often a blocked claim re-checks the database when no in-process append
/// has woken it. Appends from other processes are only seen at this cadence.
pub const DEFAULT_WAKE_INTERVAL: Duration = Duration::from_secs(1);

/// Options for [`StreamClient::reclaim_idle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReclaimOptions {
    /// Minimum time since last delivery before an entry may be reassigned.
    pub min_idle: Duration,
    /// Entries delivered this many times are left parked in the PEL.
    pub max_deliveries: Option<u32>,
    /// Maximum number of entries reassigned per call.
    pub count: u32,
}

/// Result of [`StreamClient::reclaim_idle`].
#[derive(Debug, Clone, Default)]
pub struct Reclaimed {
    /// Entries reassigned to the calling consumer.
    pub entries: Vec<StreamEntry>,
    /// Ids of idle entries left parked because they hit `max_deliveries`.
    pub parked: Vec<i64>,
}

/// Client for stream and consumer-group operations.
///
/// Clones share the database pool and the in-process wakeup signal, so an
/// append through any clone wakes claims blocked on every other clone.
#[derive(Debug, Clone)]
pub struct StreamClient {
    db: Database,
    wakeup: Arc<Notify>,
    wake_interval: Duration,
}

impl StreamClient {
    /// Creates a stream client over the given database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self {
            db,
            wakeup: Arc::new(Notify::new()),
            wake_interval: DEFAULT_WAKE_INTERVAL,
        }
    }

    /// Overrides the cross-process re-check interval.
    #[must_use]
    pub fn with_wake_interval(mut self, wake_interval: Duration) -> Self {
        self.wake_interval = wake_interval.max(Duration::from_millis(1));
        self
    }

    /// Durably appends an entry, creating the stream if absent.
    ///
    /// # Returns
    ///
    /// The id assigned to the new entry.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Unavailable`] if the database write fails.
    #[instrument(skip(self, fields), fields(stream = %stream))]
    pub async fn append(&self, stream: &str, fields: &Fields) -> Result<i64> {
        let payload = serde_json::to_string(fields).map_err(|e| StreamError::MalformedEntry {
            entry_id: 0,
            message: e.to_string(),
        })?;

        let mut tx = self.db.pool().begin().await?;
        sqlx::query("INSERT OR IGNORE INTO streams (name) VALUES (?)")
            .bind(stream)
            .execute(&mut *tx)
            .await?;
        let row = sqlx::query("INSERT INTO stream_entries (stream, fields) VALUES (?, ?) RETURNING id")
            .bind(stream)
            .bind(&payload)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        let id: i64 = row.get("id");
        debug!(entry_id = id, "appended entry");
        self.wakeup.notify_waiters();
        Ok(id)
    }

    /// Creates `group` on `stream` unless it already exists.
    ///
    /// A new group starts at the tail of the stream: only entries appended
    /// after this call are delivered to it.
    ///
    /// # Returns
    ///
    /// `true` if the group was created, `false` if it already existed.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::StreamMissing`] if the stream does not exist and
    /// `create_stream` is false, or [`StreamError::Unavailable`] on database failure.
    #[instrument(skip(self), fields(stream = %stream, group = %group))]
    pub async fn ensure_group(&self, stream: &str, group: &str, create_stream: bool) -> Result<bool> {
        if create_stream {
            sqlx::query("INSERT OR IGNORE INTO streams (name) VALUES (?)")
                .bind(stream)
                .execute(self.db.pool())
                .await?;
        }

        let result = sqlx::query(
            r"INSERT OR IGNORE INTO consumer_groups (stream, name, last_delivered_id)
              SELECT s.name, ?, COALESCE(
                  (SELECT MAX(id) FROM stream_entries WHERE stream = s.name), 0)
              FROM streams s
              WHERE s.name = ?",
        )
        .bind(group)
        .bind(stream)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 1 {
            info!("created consumer group");
            return Ok(true);
        }

        if self.groups(stream).await?.iter().any(|name| name == group) {
            debug!("consumer group already exists");
            Ok(false)
        } else {
            Err(StreamError::stream_missing(stream))
        }
    }

    /// Lists the consumer groups registered on `stream`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Unavailable`] if the query fails.
    #[instrument(skip(self))]
    pub async fn groups(&self, stream: &str) -> Result<Vec<String>> {
        let names = sqlx::query_scalar::<_, String>(
            r"SELECT name FROM consumer_groups WHERE stream = ? ORDER BY name",
        )
        .bind(stream)
        .fetch_all(self.db.pool())
        .await?;
        Ok(names)
    }

    /// Returns the number of entries ever appended to `stream`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Unavailable`] if the query fails.
    #[instrument(skip(self))]
    pub async fn len(&self, stream: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stream_entries WHERE stream = ?")
            .bind(stream)
            .fetch_one(self.db.pool())
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Delivers new entries to `consumer`, waiting for them if necessary.
    ///
    /// Entries are taken in id order from beyond the group cursor, the cursor
    /// is advanced, and each entry is recorded as pending for `consumer`, all in
    /// one transaction. When nothing is available the call suspends until an
    /// append wakes it, `options.block` elapses (returning an empty vector), or
    /// `cancel` fires.
    ///
    /// # Errors
    ///
    /// - [`StreamError::Cancelled`] if `cancel` fired first; nothing was delivered.
    /// - [`StreamError::GroupMissing`] if the group does not exist.
    /// - [`StreamError::Unavailable`] on database failure.
    #[instrument(skip(self, options, cancel), fields(stream = %stream, group = %group, consumer = %consumer))]
    pub async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        options: ClaimOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<StreamEntry>> {
        let deadline = options.block.map(|block| Instant::now() + block);
        let count = options.count.max(1);

        loop {
            // Register for the wakeup before looking, so an append racing
            // with the lookup is not missed.
            let notified = self.wakeup.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if cancel.is_cancelled() {
                return Err(StreamError::Cancelled);
            }

            let entries = self.claim_new(stream, group, consumer, count).await?;
            if !entries.is_empty() {
                debug!(delivered = entries.len(), "claimed entries");
                return Ok(entries);
            }

            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(Vec::new());
                    }
                    (deadline - now).min(self.wake_interval)
                }
                None => self.wake_interval,
            };

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(StreamError::Cancelled),
                () = &mut notified => {}
                () = tokio::time::sleep(wait) => {}
            }
        }
    }

    async fn claim_new(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: u32,
    ) -> Result<Vec<StreamEntry>> {
        let mut tx = self.db.pool().begin().await?;
        lock_group(&mut tx, stream, group).await?;

        let rows = sqlx::query_as::<_, EntryRow>(
            r"SELECT e.id, e.fields
              FROM stream_entries e
              JOIN consumer_groups g ON g.stream = e.stream AND g.name = ?
              WHERE e.stream = ? AND e.id > g.last_delivered_id
              ORDER BY e.id
              LIMIT ?",
        )
        .bind(group)
        .bind(stream)
        .bind(i64::from(count))
        .fetch_all(&mut *tx)
        .await?;

        let Some(last) = rows.last().map(|row| row.id) else {
            return Ok(Vec::new());
        };

        sqlx::query("UPDATE consumer_groups SET last_delivered_id = ? WHERE stream = ? AND name = ?")
            .bind(last)
            .bind(stream)
            .bind(group)
            .execute(&mut *tx)
            .await?;

        let now = now_ms();
        for row in &rows {
            sqlx::query(
                r"INSERT INTO pending_entries
                    (stream, group_name, entry_id, consumer, delivery_count, delivered_at)
                  VALUES (?, ?, ?, ?, 1, ?)",
            )
            .bind(stream)
            .bind(group)
            .bind(row.id)
            .bind(consumer)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(rows.into_iter().map(decode_entry).collect())
    }

    /// Removes an entry from the group's pending list.
    ///
    /// # Returns
    ///
    /// The number of entries acknowledged: 1, or 0 if it was already acknowledged
    /// (or never delivered).
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Unavailable`] if the delete fails.
    #[instrument(skip(self), fields(stream = %stream, group = %group))]
    pub async fn ack(&self, stream: &str, group: &str, entry_id: i64) -> Result<u64> {
        let result = sqlx::query(
            r"DELETE FROM pending_entries
              WHERE stream = ? AND group_name = ? AND entry_id = ?",
        )
        .bind(stream)
        .bind(group)
        .bind(entry_id)
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// Lists entries delivered but not yet acknowledged, oldest id first.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Unavailable`] if the query fails.
    #[instrument(skip(self), fields(stream = %stream, group = %group))]
    pub async fn pending(&self, stream: &str, group: &str) -> Result<Vec<PendingEntry>> {
        let rows = sqlx::query_as::<_, PendingRow>(
            r"SELECT entry_id, consumer, delivery_count, delivered_at
              FROM pending_entries
              WHERE stream = ? AND group_name = ?
              ORDER BY entry_id",
        )
        .bind(stream)
        .bind(group)
        .fetch_all(self.db.pool())
        .await?;

        let now = now_ms();
        Ok(rows.into_iter().map(|row| row.into_pending(now)).collect())
    }

    /// Reassigns pending entries idle for at least `options.min_idle` to `consumer`.
    ///
    /// Each reassigned entry has its delivery count incremented and its idle
    /// clock reset. Idle entries that already reached `options.max_deliveries`
    /// stay parked in the pending list; their ids are returned in
    /// [`Reclaimed::parked`] and logged as a warning.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::GroupMissing`] if the group does not exist, or
    /// [`StreamError::Unavailable`] on database failure.
    #[instrument(skip(self, options), fields(stream = %stream, group = %group, consumer = %consumer))]
    pub async fn reclaim_idle(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        options: ReclaimOptions,
    ) -> Result<Reclaimed> {
        let now = now_ms();
        let idle_before = now.saturating_sub(duration_ms(options.min_idle));
        let max_deliveries = options.max_deliveries.map(i64::from);

        let mut tx = self.db.pool().begin().await?;
        lock_group(&mut tx, stream, group).await?;

        let rows = sqlx::query_as::<_, EntryRow>(
            r"SELECT e.id, e.fields
              FROM pending_entries p
              JOIN stream_entries e ON e.id = p.entry_id
              WHERE p.stream = ? AND p.group_name = ?
                AND p.delivered_at <= ?
                AND (? IS NULL OR p.delivery_count < ?)
              ORDER BY p.entry_id
              LIMIT ?",
        )
        .bind(stream)
        .bind(group)
        .bind(idle_before)
        .bind(max_deliveries)
        .bind(max_deliveries)
        .bind(i64::from(options.count.max(1)))
        .fetch_all(&mut *tx)
        .await?;

        let parked = match max_deliveries {
            Some(limit) => {
                sqlx::query_scalar::<_, i64>(
                    r"SELECT entry_id FROM pending_entries
                      WHERE stream = ? AND group_name = ?
                        AND delivered_at <= ? AND delivery_count >= ?
                      ORDER BY entry_id",
                )
                .bind(stream)
                .bind(group)
                .bind(idle_before)
                .bind(limit)
                .fetch_all(&mut *tx)
                .await?
            }
            None => Vec::new(),
        };

        for row in &rows {
            sqlx::query(
                r"UPDATE pending_entries
                  SET consumer = ?, delivery_count = delivery_count + 1, delivered_at = ?
                  WHERE stream = ? AND group_name = ? AND entry_id = ?",
            )
            .bind(consumer)
            .bind(now)
            .bind(stream)
            .bind(group)
            .bind(row.id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        if !rows.is_empty() {
            info!(reclaimed = rows.len(), "reclaimed idle entries");
        }
        if !parked.is_empty() {
            warn!(
                parked = parked.len(),
                entry_ids = ?parked,
                "idle entries at delivery limit left pending"
            );
        }
        Ok(Reclaimed {
            entries: rows.into_iter().map(decode_entry).collect(),
            parked,
        })
    }
}

/// Takes the database write lock up front and checks the group exists.
///
/// The no-op update makes the transaction a writer from its first statement,
/// so concurrent claimers queue on the busy timeout instead of failing on a
/// stale read snapshot.
async fn lock_group(conn: &mut SqliteConnection, stream: &str, group: &str) -> Result<()> {
    let result = sqlx::query(
        "UPDATE consumer_groups SET last_delivered_id = last_delivered_id WHERE stream = ? AND name = ?",
    )
    .bind(stream)
    .bind(group)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StreamError::group_missing(stream, group));
    }
    Ok(())
}

/// Decodes a stored row, delivering undecodable payloads with an empty field map
/// so consumers see them as malformed rather than losing them.
fn decode_entry(row: EntryRow) -> StreamEntry {
    let id = row.id;
    StreamEntry::try_from(row).unwrap_or_else(|error| {
        warn!(entry_id = id, error = %error, "delivering entry with undecodable fields");
        StreamEntry {
            id,
            fields: Fields::new(),
        }
    })
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(duration_ms)
        .unwrap_or(0)
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
