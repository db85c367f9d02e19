//! Request throttle for remote APIs with per-key rate limits
//!
//! Every outbound call first awaits [`RequestThrottle::acquire`]. The throttle
//! keeps two rules:
//! - **Minimum interval**: consecutive calls are at least `min_interval`
//!   apart.
//! - **Burst cooldown**: after `burst_size` calls without a natural pause,
//!   the next call waits `burst_cooldown`.
//!
//! Clones share state, so one throttle governs all workers of a run. The
//! state lock is held across the wait: two workers can never both observe a
//! stale `last_call` and fire together.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Configuration for [`RequestThrottle`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleConfig {
    /// Minimum spacing between two calls
    pub min_interval: Duration,
    /// Calls allowed before a burst cooldown (0 disables the cooldown)
    pub burst_size: u32,
    /// Pause applied once `burst_size` calls went out back to back
    pub burst_cooldown: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(200),
            burst_size: 50,
            burst_cooldown: Duration::from_secs(5),
        }
    }
}

impl ThrottleConfig {
    /// Create a new configuration builder
    pub fn builder() -> ThrottleConfigBuilder {
        ThrottleConfigBuilder::new()
    }

    /// Throttle that never waits. Handy for tests and local mocks.
    pub const fn unthrottled() -> Self {
        Self { min_interval: Duration::ZERO, burst_size: 0, burst_cooldown: Duration::ZERO }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.burst_size > 0 && self.burst_cooldown < self.min_interval {
            return Err("burst_cooldown must not be shorter than min_interval".to_string());
        }
        Ok(())
    }
}

/// Builder for [`ThrottleConfig`]
#[derive(Debug, Default)]
pub struct ThrottleConfigBuilder {
    config: ThrottleConfig,
}

impl ThrottleConfigBuilder {
    pub fn new() -> Self {
        Self { config: ThrottleConfig::default() }
    }

    pub const fn min_interval(mut self, interval: Duration) -> Self {
        self.config.min_interval = interval;
        self
    }

    pub const fn burst_size(mut self, size: u32) -> Self {
        self.config.burst_size = size;
        self
    }

    pub const fn burst_cooldown(mut self, cooldown: Duration) -> Self {
        self.config.burst_cooldown = cooldown;
        self
    }

    pub fn build(self) -> Result<ThrottleConfig, String> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[derive(Debug, Default)]
struct ThrottleState {
    last_call: Option<Instant>,
    consecutive: u32,
}

/// Shared spacing gate for outbound requests
#[derive(Debug, Clone)]
pub struct RequestThrottle {
    config: ThrottleConfig,
    state: Arc<Mutex<ThrottleState>>,
}

impl RequestThrottle {
    pub fn new(config: ThrottleConfig) -> Self {
        Self { config, state: Arc::new(Mutex::new(ThrottleState::default())) }
    }

    pub const fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// Wait until the next call may go out, then record it.
    ///
    /// Returns how long the caller was held back.
    pub async fn acquire(&self) -> Duration {
        let mut state = self.state.lock().await;

        let since_last = state.last_call.map(|last| last.elapsed());
        let mut wait =
            since_last.map_or(Duration::ZERO, |since| self.config.min_interval.saturating_sub(since));

        if self.config.burst_size > 0 {
            // A natural pause as long as the cooldown resets the burst.
            if since_last.is_some_and(|since| since >= self.config.burst_cooldown) {
                state.consecutive = 0;
            }
            if state.consecutive >= self.config.burst_size {
                let cooldown = since_last.map_or(self.config.burst_cooldown, |since| {
                    self.config.burst_cooldown.saturating_sub(since)
                });
                wait = wait.max(cooldown);
                state.consecutive = 0;
                debug!(
                    burst_size = self.config.burst_size,
                    cooldown_ms = u64::try_from(cooldown.as_millis()).unwrap_or(u64::MAX),
                    "request burst limit reached, cooling down"
                );
            }
        }

        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        state.last_call = Some(Instant::now());
        state.consecutive = state.consecutive.saturating_add(1);
        wait
    }
}
