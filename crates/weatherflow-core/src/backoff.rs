//! Exponential reconnect backoff with jitter.

use std::time::Duration;

use rand::Rng as _;

/// Backoff tuning, usually read from the `ingest` config section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Upper bound for any single delay.
    pub max: Duration,
    /// Retry budget per outage. 0 retries forever.
    pub max_retries: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            max_retries: 0,
        }
    }
}

/// Doubling delay generator.
///
/// Each call to [`next_delay`](Self::next_delay) doubles the base delay up
/// to `max`, then adds up to 10% random jitter so a fleet of consumers does
/// not reconnect in lockstep. [`reset`](Self::reset) once the connection
/// has delivered a message.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    attempt: u32,
}

impl ExponentialBackoff {
    /// Create a backoff at attempt zero.
    pub const fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Retries taken since the last reset.
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay before the next retry, or `None` once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.config.max_retries > 0 && self.attempt >= self.config.max_retries {
            return None;
        }

        let base = self.base_delay();
        self.attempt = self.attempt.saturating_add(1);

        let jitter_cap = u64::try_from(base.as_millis() / 10).unwrap_or(u64::MAX);
        let jitter = if jitter_cap == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_cap)
        };
        Some(base.saturating_add(Duration::from_millis(jitter)))
    }

    /// Start over from the initial delay.
    pub const fn reset(&mut self) {
        self.attempt = 0;
    }

    fn base_delay(&self) -> Duration {
        let factor = 2_u32.checked_pow(self.attempt).unwrap_or(u32::MAX);
        self.config
            .initial
            .checked_mul(factor)
            .map_or(self.config.max, |d| d.min(self.config.max))
    }
}
