//! Backoff for read requests that fail to reach the store.
//!
//! Only connection-level failures of read requests are retried. Upload
//! chunks are never retried; see [`crate::upload`].

use std::time::Duration;

/// How often, and how patiently, a read request is resent.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Resends allowed after the first attempt; 0 disables retrying.
    pub max_retries: u32,
    /// Pause before the first resend.
    pub initial_delay: Duration,
    /// Longest pause between two attempts.
    pub max_delay: Duration,
    /// Growth of the pause per failed attempt.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Pause to take before the next resend, given the pause just taken.
    /// Never exceeds `max_delay`.
    pub fn delay_after(&self, previous: Duration) -> Duration {
        let grown = previous.as_millis() as f64 * self.multiplier;
        Duration::from_millis(grown as u64).min(self.max_delay)
    }
}

/// Whether a transport error is worth another attempt.
pub fn is_retryable(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout()
}
