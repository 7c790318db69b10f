//! Exponential backoff delay computation for the retry engine.

use std::time::Duration;

/// Exponential backoff: `delay = min(base_delay * exponential_base^attempt, max_delay)`.
///
/// `attempt` is zero-indexed: the delay before the first retry uses `attempt == 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    base_delay: Duration,
    max_delay: Duration,
    exponential_base: f64,
}

impl Backoff {
    pub fn new(base_delay: Duration, max_delay: Duration, exponential_base: f64) -> Self {
        Self { base_delay, max_delay, exponential_base: exponential_base.max(1.0) }
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Compute the delay for the given zero-indexed attempt, capped at `max_delay`.
    pub fn delay(&self, attempt: usize) -> Duration {
        let factor = self.exponential_base.powi(attempt.min(u16::MAX as usize) as i32);
        let millis = self.base_delay.as_secs_f64() * factor * 1000.0;
        let capped = millis.min(self.max_delay.as_secs_f64() * 1000.0);
        Duration::from_millis(capped.max(0.0) as u64)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30), 2.0)
    }
}
