//! History Refresh Library
//!
//! Keeps forum thread history records fresh. A publisher enqueues active
//! records on a durable stream; workers in a consumer group claim entries,
//! crawl the thread page, store its title and page count, and acknowledge.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`db`] - Database connection and schema management
//! - [`stream`] - Durable streams with consumer-group delivery
//! - [`store`] - History record persistence
//! - [`extract`] - Per-forum page fetching and field extraction
//! - [`publisher`] - Enqueues active records
//! - [`worker`] - Claim, crawl, persist, acknowledge loop
//! - [`config`] - TOML configuration
//! - [`telemetry`] - Tracing subscriber setup

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod db;
pub mod extract;
pub mod publisher;
pub mod store;
pub mod stream;
pub mod telemetry;
pub mod worker;

mod user_agent;

// Re-export commonly used types
pub use config::{Config, ConfigError};
pub use db::{Database, DatabaseOptions, DbError, DbErrorKind};
pub use extract::{CrawlOptions, Crawler, ExtractError, Extraction, Forum, PageInfo};
pub use publisher::{PublishError, PublishReport, Publisher};
pub use store::{HistoryRecord, HistoryStore, RecordId, RecordUpdate, SqliteHistoryStore, StoreError};
pub use stream::{ClaimOptions, Fields, PendingEntry, ReclaimOptions, Reclaimed, StreamClient, StreamEntry, StreamError};
pub use worker::{EntryOutcome, Worker, WorkerConfig, WorkerReport, WorkerStats};
