//! Delay between attempts of one dispatch

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default fixed delay between attempts
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;
/// Base delay of the exponential schedule (doubles each retry)
pub const EXPONENTIAL_BASE_MS: u64 = 1_000;
/// Maximum backoff in milliseconds (30 seconds)
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// How the delay grows between attempts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// Same delay before every retry
    #[default]
    Fixed,
    /// `min(1000 * 2^(retry-1), 30000)` ms
    Exponential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    backoff: Backoff,
    delay: Duration,
}

impl RetryPolicy {
    pub fn new(backoff: Backoff, delay: Duration) -> Self {
        Self { backoff, delay }
    }

    pub fn fixed(delay: Duration) -> Self {
        Self::new(Backoff::Fixed, delay)
    }

    pub fn exponential() -> Self {
        Self::new(Backoff::Exponential, Duration::from_millis(DEFAULT_RETRY_DELAY_MS))
    }

    /// No delay at all between attempts
    pub fn immediate() -> Self {
        Self::fixed(Duration::ZERO)
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Delay to sleep before attempt `attempt` (0-based); zero for the first
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential => Duration::from_millis(calculate_backoff(attempt)),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_millis(DEFAULT_RETRY_DELAY_MS))
    }
}

/// Exponential backoff in milliseconds for retry number `retry` (1-based)
///
/// `EXPONENTIAL_BASE_MS * 2^(retry-1)`, saturating, capped at
/// [`MAX_BACKOFF_MS`].
pub fn calculate_backoff(retry: u32) -> u64 {
    let exponent = retry.saturating_sub(1);
    EXPONENTIAL_BASE_MS
        .saturating_mul(2_u64.saturating_pow(exponent))
        .min(MAX_BACKOFF_MS)
}
