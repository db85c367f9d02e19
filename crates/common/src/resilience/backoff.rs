//! Capped exponential backoff.

use std::time::Duration;

/// Delay schedule for retrying transient failures.
///
/// The first retry waits `base`, each following retry doubles it, and no
/// delay exceeds `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max: max.max(base) }
    }

    /// Delay before retry number `retry_number` (1-based).
    pub fn delay(&self, retry_number: u32) -> Duration {
        let shift = retry_number.saturating_sub(1).min(16);
        let multiplier = 1u32 << shift;
        self.base.saturating_mul(multiplier).min(self.max)
    }

    /// Sleep for the delay of `retry_number`, skipping zero delays.
    pub async fn wait(&self, retry_number: u32) {
        let delay = self.delay(retry_number);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(200), Duration::from_secs(30))
    }
}
