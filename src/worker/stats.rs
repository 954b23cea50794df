//! Per-worker outcome counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters updated as entries finish.
#[derive(Debug, Default)]
pub struct WorkerStats {
    persisted: AtomicU64,
    degraded: AtomicU64,
    skipped: AtomicU64,
    abandoned: AtomicU64,
}

/// Point-in-time copy of [`WorkerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    /// Entries whose record was updated (complete or degraded).
    pub persisted: u64,
    /// Subset of `persisted` that only had one field.
    pub degraded: u64,
    /// Entries acknowledged without processing.
    pub skipped: u64,
    /// Entries left pending after a failure.
    pub abandoned: u64,
}

impl WorkerStats {
    /// Creates a tracker with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of persisted entries.
    #[must_use]
    pub fn persisted(&self) -> u64 {
        self.persisted.load(Ordering::SeqCst)
    }

    /// Returns the number of degraded entries.
    #[must_use]
    pub fn degraded(&self) -> u64 {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Returns the number of skipped entries.
    #[must_use]
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::SeqCst)
    }

    /// Returns the number of abandoned entries.
    #[must_use]
    pub fn abandoned(&self) -> u64 {
        self.abandoned.load(Ordering::SeqCst)
    }

    /// Copies the current counts.
    #[must_use]
    pub fn report(&self) -> WorkerReport {
        WorkerReport {
            persisted: self.persisted(),
            degraded: self.degraded(),
            skipped: self.skipped(),
            abandoned: self.abandoned(),
        }
    }

    pub(crate) fn increment_persisted(&self, degraded: bool) {
        self.persisted.fetch_add(1, Ordering::SeqCst);
        if degraded {
            self.degraded.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub(crate) fn increment_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_abandoned(&self) {
        self.abandoned.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degraded_counts_as_persisted() {
        let stats = WorkerStats::new();
        stats.increment_persisted(false);
        stats.increment_persisted(true);
        stats.increment_skipped();
        stats.increment_abandoned();

        assert_eq!(
            stats.report(),
            WorkerReport {
                persisted: 2,
                degraded: 1,
                skipped: 1,
                abandoned: 1,
            }
        );
    }
}
