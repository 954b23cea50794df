//! Enqueues active history records for refresh.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, info, info_span, warn};

use crate::store::HistoryStore;
use crate::stream::{Fields, StreamClient, StreamError};
use crate::worker::ID_FIELD;

/// Outcome of one publish cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Active records found in the store.
    pub listed: usize,
    /// Entries appended.
    pub published: usize,
    /// Records whose append failed.
    pub failed: usize,
}

/// Errors that abort a publish cycle before any append.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The consumer group could not be ensured.
    #[error("failed to ensure consumer group: {0}")]
    Group(#[from] StreamError),

    /// Active records could not be listed.
    #[error("failed to list active records: {0}")]
    List(#[from] crate::store::StoreError),
}

/// Appends one `{id}` entry per active record.
pub struct Publisher {
    stream: StreamClient,
    store: Arc<dyn HistoryStore>,
    stream_name: String,
    group: String,
    create_stream: bool,
    span: Span,
}

impl Publisher {
    /// Creates a publisher for `stream_name`, ensuring `group` exists first.
    #[must_use]
    pub fn new(
        stream: StreamClient,
        store: Arc<dyn HistoryStore>,
        stream_name: impl Into<String>,
        group: impl Into<String>,
    ) -> Self {
        let stream_name = stream_name.into();
        let span = info_span!("publisher", stream = %stream_name);
        Self {
            stream,
            store,
            stream_name,
            group: group.into(),
            create_stream: true,
            span,
        }
    }

    /// Sets whether a missing stream is created when ensuring the group.
    #[must_use]
    pub fn with_create_stream(mut self, create_stream: bool) -> Self {
        self.create_stream = create_stream;
        self
    }

    /// Replaces the span the publisher logs under.
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Runs one publish cycle.
    ///
    /// Per-record failures (a stored id that is not hex, or a failed append)
    /// are logged and counted; they never abort the batch.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] if the group cannot be ensured or the store
    /// cannot be listed.
    pub async fn publish(&self) -> Result<PublishReport, PublishError> {
        self.publish_inner().instrument(self.span.clone()).await
    }

    async fn publish_inner(&self) -> Result<PublishReport, PublishError> {
        self.stream
            .ensure_group(&self.stream_name, &self.group, self.create_stream)
            .await?;
        let records = self.store.list_active().await?;

        let mut report = PublishReport {
            listed: records.len(),
            ..PublishReport::default()
        };
        for record in &records {
            let id = match record.record_id() {
                Ok(id) => id,
                Err(e) => {
                    warn!(error = %e, "skipping record with unusable id");
                    report.failed += 1;
                    continue;
                }
            };
            let fields = Fields::from([(ID_FIELD.to_string(), id.to_string())]);
            match self.stream.append(&self.stream_name, &fields).await {
                Ok(_) => report.published += 1,
                Err(e) => {
                    warn!(id = %id, error = %e, "failed to publish record");
                    report.failed += 1;
                }
            }
        }

        info!(
            listed = report.listed,
            published = report.published,
            failed = report.failed,
            "publish cycle finished"
        );
        Ok(report)
    }

    /// Publishes every `interval` until `shutdown` is cancelled.
    ///
    /// Cycle failures are logged and the next cycle runs on schedule.
    pub async fn run(&self, interval: Duration, shutdown: CancellationToken) -> PublishReport {
        let mut total = PublishReport::default();
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match self.publish().await {
                Ok(report) => {
                    total.listed += report.listed;
                    total.published += report.published;
                    total.failed += report.failed;
                }
                Err(e) => warn!(parent: &self.span, error = %e, "publish cycle failed"),
            }
        }
        total
    }
}
