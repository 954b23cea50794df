//! Long-running stream consumer that refreshes history records.
//!
//! Each claimed entry moves through
//! `CLAIMED -> LOADED -> EXTRACTED -> PERSISTED -> ACKED`. Entries whose record
//! has an unsupported source type are acknowledged without processing
//! (`SKIPPED`); every other failure leaves the entry pending (`ABANDONED`) so it
//! is redelivered by the visibility-timeout reclaim.
//!
//! # Architecture
//!
//! ```text
//! Worker
//!     │
//!     ├─► reclaim_idle / claim (StreamClient)
//!     ├─► find record (HistoryStore)
//!     ├─► crawl page (Crawler)
//!     ├─► update record (HistoryStore)
//!     └─► ack (StreamClient)
//! ```

mod backoff;
mod stats;

pub use backoff::Backoff;
pub use stats::{WorkerReport, WorkerStats};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

use crate::extract::{Crawler, ExtractError, Extraction, Forum, MissingField};
use crate::store::{HistoryStore, RecordId, RecordUpdate, StoreError};
use crate::stream::{ClaimOptions, ReclaimOptions, StreamClient, StreamEntry, StreamError};

/// Default stream name.
pub const DEFAULT_STREAM: &str = "backend.history.refresh";

/// Default consumer group name.
pub const DEFAULT_GROUP: &str = "backend.history.refresh.workers";

/// Default budget for processing one entry.
pub const DEFAULT_ENTRY_TIMEOUT: Duration = Duration::from_secs(20);

/// Default idle time before another consumer may reclaim an entry.
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(300);

/// Default bound on a blocking claim when reclaim is enabled.
pub const DEFAULT_RECLAIM_INTERVAL: Duration = Duration::from_secs(30);

/// Default delivery limit before an entry is parked.
pub const DEFAULT_MAX_DELIVERIES: u32 = 5;

/// Payload key carrying the record id.
pub const ID_FIELD: &str = "id";

/// Worker settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Stream to consume.
    pub stream: String,
    /// Consumer group to consume as.
    pub group: String,
    /// This process's consumer id.
    pub consumer: String,
    /// Budget covering load, extract, persist and ack of one entry.
    pub entry_timeout: Duration,
    /// Idle time before pending entries are reclaimed; zero disables reclaim.
    pub visibility_timeout: Duration,
    /// Longest a claim blocks before the worker checks for idle entries.
    pub reclaim_interval: Duration,
    /// Entries delivered this many times are left parked.
    pub max_deliveries: u32,
    /// Delay schedule while the stream is unavailable.
    pub backoff: Backoff,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            stream: DEFAULT_STREAM.to_string(),
            group: DEFAULT_GROUP.to_string(),
            consumer: uuid::Uuid::new_v4().to_string(),
            entry_timeout: DEFAULT_ENTRY_TIMEOUT,
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
            reclaim_interval: DEFAULT_RECLAIM_INTERVAL,
            max_deliveries: DEFAULT_MAX_DELIVERIES,
            backoff: Backoff::default(),
        }
    }
}

/// Why an entry was left pending.
#[derive(Debug, Clone)]
pub enum AbandonReason {
    /// The payload has no `id` field.
    MissingId,
    /// The payload `id` is not a record id.
    InvalidId(StoreError),
    /// The record could not be loaded.
    Load(StoreError),
    /// The page yielded nothing usable.
    Extract(ExtractError),
    /// The record update failed.
    Persist(StoreError),
    /// The acknowledgement failed after persisting.
    Ack(StreamError),
    /// The entry exceeded its processing budget.
    Timeout(Duration),
}

impl fmt::Display for AbandonReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingId => write!(f, "payload has no '{ID_FIELD}' field"),
            Self::InvalidId(e) => write!(f, "bad payload id: {e}"),
            Self::Load(e) => write!(f, "load failed: {e}"),
            Self::Extract(e) => write!(f, "extraction failed: {e}"),
            Self::Persist(e) => write!(f, "update failed: {e}"),
            Self::Ack(e) => write!(f, "ack failed: {e}"),
            Self::Timeout(budget) => write!(f, "timed out after {budget:?}"),
        }
    }
}

/// Terminal state of one entry.
#[derive(Debug, Clone)]
pub enum EntryOutcome {
    /// Record updated and entry acknowledged.
    Persisted {
        /// True if only one field was available.
        degraded: bool,
    },
    /// Unsupported source type; acknowledged without processing.
    Skipped {
        /// The unsupported tag.
        source_type: String,
    },
    /// Left pending for redelivery.
    Abandoned(AbandonReason),
}

/// Stream consumer refreshing history records.
pub struct Worker {
    stream: StreamClient,
    store: Arc<dyn HistoryStore>,
    crawler: Crawler,
    config: WorkerConfig,
    stats: WorkerStats,
    span: Span,
}

impl Worker {
    /// Creates a worker. Its logs go to a `worker` span carrying the consumer id.
    #[must_use]
    pub fn new(
        stream: StreamClient,
        store: Arc<dyn HistoryStore>,
        crawler: Crawler,
        config: WorkerConfig,
    ) -> Self {
        let span = info_span!("worker", consumer = %config.consumer, group = %config.group);
        Self {
            stream,
            store,
            crawler,
            config,
            stats: WorkerStats::new(),
            span,
        }
    }

    /// Replaces the span the worker logs under.
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Returns the worker settings.
    #[must_use]
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Returns the live outcome counters.
    #[must_use]
    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Consumes entries until `shutdown` is cancelled.
    ///
    /// The group is created (with its stream) if absent. Stream outages are
    /// retried with backoff. Cancellation interrupts only the wait for new
    /// entries; an entry already being processed is finished first.
    pub async fn run(&self, shutdown: CancellationToken) -> WorkerReport {
        self.run_loop(&shutdown).instrument(self.span.clone()).await;
        let report = self.stats.report();
        info!(parent: &self.span, ?report, "worker stopped");
        report
    }

    async fn run_loop(&self, shutdown: &CancellationToken) {
        info!(stream = %self.config.stream, "worker started");
        let mut group_ready = false;
        let mut failures = 0u32;

        while !shutdown.is_cancelled() {
            let step = if group_ready {
                self.run_once(shutdown).await.map(|_| ())
            } else {
                let ensured = self
                    .stream
                    .ensure_group(&self.config.stream, &self.config.group, true)
                    .await;
                group_ready = ensured.is_ok();
                ensured.map(|_| ())
            };

            match step {
                Ok(()) => failures = 0,
                Err(StreamError::Cancelled) => break,
                Err(err) => {
                    if matches!(err, StreamError::GroupMissing { .. }) {
                        group_ready = false;
                    }
                    failures = failures.saturating_add(1);
                    let delay = self.config.backoff.delay(failures);
                    warn!(error = %err, failures, delay_ms = delay.as_millis(), "stream unavailable, backing off");
                    tokio::select! {
                        () = shutdown.cancelled() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Takes the next entries (reclaimed idle ones first) and processes them.
    ///
    /// # Errors
    ///
    /// Returns the stream error if reclaiming or claiming fails, including
    /// [`StreamError::Cancelled`] when `shutdown` fires during the wait.
    pub async fn run_once(&self, shutdown: &CancellationToken) -> Result<Vec<EntryOutcome>, StreamError> {
        let entries = self.next_entries(shutdown).await?;
        let mut outcomes = Vec::with_capacity(entries.len());
        for entry in &entries {
            outcomes.push(self.process_entry(entry).await);
        }
        Ok(outcomes)
    }

    async fn next_entries(&self, shutdown: &CancellationToken) -> Result<Vec<StreamEntry>, StreamError> {
        let reclaim = self.reclaim_options();
        if let Some(options) = reclaim {
            let reclaimed = self
                .stream
                .reclaim_idle(&self.config.stream, &self.config.group, &self.config.consumer, options)
                .await?;
            if !reclaimed.entries.is_empty() {
                return Ok(reclaimed.entries);
            }
        }

        let claim = ClaimOptions {
            count: 1,
            block: reclaim.map(|_| self.config.reclaim_interval),
        };
        self.stream
            .claim(
                &self.config.stream,
                &self.config.group,
                &self.config.consumer,
                claim,
                shutdown,
            )
            .await
    }

    fn reclaim_options(&self) -> Option<ReclaimOptions> {
        if self.config.visibility_timeout.is_zero() {
            return None;
        }
        Some(ReclaimOptions {
            min_idle: self.config.visibility_timeout,
            max_deliveries: Some(self.config.max_deliveries),
            count: 1,
        })
    }

    /// Processes one claimed entry within the entry timeout and records the outcome.
    pub async fn process_entry(&self, entry: &StreamEntry) -> EntryOutcome {
        let span = info_span!(parent: &self.span, "entry", entry_id = entry.id);
        let budget = self.config.entry_timeout;

        let outcome = match tokio::time::timeout(budget, self.handle_entry(entry))
            .instrument(span.clone())
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => EntryOutcome::Abandoned(AbandonReason::Timeout(budget)),
        };

        let _entered = span.enter();
        match &outcome {
            EntryOutcome::Persisted { degraded } => self.stats.increment_persisted(*degraded),
            EntryOutcome::Skipped { source_type } => {
                warn!(source_type = %source_type, "acked entry with no extractor");
                self.stats.increment_skipped();
            }
            EntryOutcome::Abandoned(reason) => {
                error!(reason = %reason, "abandoned entry, left pending");
                self.stats.increment_abandoned();
            }
        }
        outcome
    }

    async fn handle_entry(&self, entry: &StreamEntry) -> EntryOutcome {
        debug!(fields = ?entry.fields, "claimed entry");
        let Some(raw_id) = entry.field(ID_FIELD) else {
            return EntryOutcome::Abandoned(AbandonReason::MissingId);
        };
        let id: RecordId = match raw_id.parse() {
            Ok(id) => id,
            Err(e) => return EntryOutcome::Abandoned(AbandonReason::InvalidId(e)),
        };

        let record = match self.store.find(&id).await {
            Ok(record) => record,
            Err(e) => return EntryOutcome::Abandoned(AbandonReason::Load(e)),
        };
        info!(record = %record, "loaded record");

        let forum: Forum = match record.source_type.parse() {
            Ok(forum) => forum,
            Err(_) => {
                if let Err(e) = self.ack(entry).await {
                    return EntryOutcome::Abandoned(AbandonReason::Ack(e));
                }
                return EntryOutcome::Skipped {
                    source_type: record.source_type,
                };
            }
        };

        let extraction = self.crawler.crawl(forum, &record.url).await;
        let (update, degraded) = match extraction {
            Extraction::Complete(info) => (
                RecordUpdate {
                    title: Some(info.title),
                    total_page_count: Some(info.total_page_count),
                },
                false,
            ),
            Extraction::Degraded { info, missing } => {
                warn!(missing = %missing, url = %record.url, "partial extraction, persisting available field");
                let update = match missing {
                    MissingField::Title => RecordUpdate {
                        title: None,
                        total_page_count: Some(info.total_page_count),
                    },
                    MissingField::TotalPageCount => RecordUpdate {
                        title: Some(info.title),
                        total_page_count: None,
                    },
                };
                (update, true)
            }
            Extraction::Failed(e) => return EntryOutcome::Abandoned(AbandonReason::Extract(e)),
        };

        if let Err(e) = self.store.update(&id, &update).await {
            return EntryOutcome::Abandoned(AbandonReason::Persist(e));
        }
        info!(title = ?update.title, total_page_count = ?update.total_page_count, "updated record");

        if let Err(e) = self.ack(entry).await {
            return EntryOutcome::Abandoned(AbandonReason::Ack(e));
        }
        EntryOutcome::Persisted { degraded }
    }

    async fn ack(&self, entry: &StreamEntry) -> Result<(), StreamError> {
        let acked = self
            .stream
            .ack(&self.config.stream, &self.config.group, entry.id)
            .await?;
        if acked == 0 {
            info!("ack already done");
        } else {
            debug!("acked entry");
        }
        Ok(())
    }
}
