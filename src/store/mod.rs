//! Persistence of history records.
//!
//! The worker and publisher depend on the [`HistoryStore`] trait; the
//! [`SqliteHistoryStore`] implementation keeps records in the shared database.

mod error;
mod record;

pub use error::StoreError;
pub use record::{HistoryRecord, RecordId, RecordUpdate};

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::db::Database;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Data-access contract for history records.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Loads one record by id.
    async fn find(&self, id: &RecordId) -> Result<HistoryRecord>;

    /// Applies `update` to the record; unset fields keep their stored value.
    async fn update(&self, id: &RecordId, update: &RecordUpdate) -> Result<()>;

    /// Lists records whose deleted flag is false or unset, oldest first.
    async fn list_active(&self) -> Result<Vec<HistoryRecord>>;
}

/// `SQLite`-backed history record store.
#[derive(Debug, Clone)]
pub struct SqliteHistoryStore {
    db: Database,
}

impl SqliteHistoryStore {
    /// Creates a store over the given database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Creates a record and returns its generated id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the insert fails.
    #[instrument(skip(self))]
    pub async fn insert(&self, url: &str, source_type: &str) -> Result<RecordId> {
        let id = RecordId::generate();
        sqlx::query("INSERT INTO history (id, url, source_type) VALUES (?, ?, ?)")
            .bind(id.as_str())
            .bind(url)
            .bind(source_type)
            .execute(self.db.pool())
            .await?;

        debug!(id = %id, "inserted history record");
        Ok(id)
    }

    /// Sets or clears the soft-delete flag.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no record has the id, or
    /// [`StoreError::Database`] if the update fails.
    #[instrument(skip(self), fields(id = %id))]
    pub async fn set_deleted(&self, id: &RecordId, deleted: bool) -> Result<()> {
        let result = sqlx::query(
            "UPDATE history SET deleted = ?, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(deleted)
        .bind(id.as_str())
        .execute(self.db.pool())
        .await?;

        check_affected(result.rows_affected(), id)
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    #[instrument(skip(self), fields(id = %id))]
    async fn find(&self, id: &RecordId) -> Result<HistoryRecord> {
        sqlx::query_as::<_, HistoryRecord>(
            r"SELECT id, url, source_type, title, total_page_count, deleted, created_at, updated_at
              FROM history
              WHERE id = ?",
        )
        .bind(id.as_str())
        .fetch_optional(self.db.pool())
        .await?
        .ok_or_else(|| StoreError::not_found(id.as_str()))
    }

    #[instrument(skip(self, update), fields(id = %id))]
    async fn update(&self, id: &RecordId, update: &RecordUpdate) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE history
              SET title = COALESCE(?, title),
                  total_page_count = COALESCE(?, total_page_count),
                  updated_at = datetime('now')
              WHERE id = ?",
        )
        .bind(update.title.as_deref())
        .bind(update.total_page_count.map(i64::from))
        .bind(id.as_str())
        .execute(self.db.pool())
        .await?;

        check_affected(result.rows_affected(), id)
    }

    #[instrument(skip(self))]
    async fn list_active(&self) -> Result<Vec<HistoryRecord>> {
        let records = sqlx::query_as::<_, HistoryRecord>(
            r"SELECT id, url, source_type, title, total_page_count, deleted, created_at, updated_at
              FROM history
              WHERE deleted IS NULL OR deleted = 0
              ORDER BY created_at ASC, rowid ASC",
        )
        .fetch_all(self.db.pool())
        .await?;

        Ok(records)
    }
}

fn check_affected(rows_affected: u64, id: &RecordId) -> Result<()> {
    if rows_affected == 0 {
        return Err(StoreError::not_found(id.as_str()));
    }
    Ok(())
}
