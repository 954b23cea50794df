//! Exponential backoff with jitter for stream outages.

use std::time::Duration;

use rand::Rng;

/// Default delay after the first consecutive failure.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default delay cap.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Backoff schedule used while the stream is unavailable.
///
/// ```text
/// delay = min(base * 2^(failures - 1), max) + jitter(0..=base/2)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE_DELAY,
            max: DEFAULT_MAX_DELAY,
        }
    }
}

impl Backoff {
    /// Creates a schedule; `max` is raised to at least `base`.
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    /// Returns the base delay.
    #[must_use]
    pub fn base(&self) -> Duration {
        self.base
    }

    /// Returns the delay cap.
    #[must_use]
    pub fn max(&self) -> Duration {
        self.max
    }

    /// Returns the delay before the next attempt after `failures` consecutive failures.
    #[must_use]
    pub fn delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        let scaled = self.base.saturating_mul(1 << exponent).min(self.max);
        scaled + self.jitter()
    }

    fn jitter(&self) -> Duration {
        let max_jitter_ms = u64::try_from(self.base.as_millis() / 2).unwrap_or(u64::MAX);
        let jitter_ms = rand::thread_rng().gen_range(0..=max_jitter_ms);
        Duration::from_millis(jitter_ms)
    }
}
