//! Per-provider circuit breaker
//!
//! Two states only. A breaker opens once `failure_threshold` consecutive call
//! failures are recorded and closes again, lazily, the first time it is
//! consulted after `reset_timeout` has passed since the last failure. There is
//! no half-open probe: the provider is simply admitted back and the regular
//! health probe decides. Any recorded success closes the breaker outright.

use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Default consecutive failures before a breaker opens
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
/// Default time an open breaker stays open
pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_secs(60);

/// Breaker settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSettings {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            reset_timeout: DEFAULT_RESET_TIMEOUT,
        }
    }
}

impl BreakerSettings {
    /// Settings under which no breaker ever opens
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// Externally visible breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitState {
    Closed,
    Open,
}

/// Breaker bookkeeping for one provider
#[derive(Debug, Clone, Copy)]
pub struct BreakerState {
    failure_count: u32,
    last_failure: Option<Instant>,
    is_open: bool,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            failure_count: 0,
            last_failure: None,
            is_open: false,
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn last_failure(&self) -> Option<Instant> {
        self.last_failure
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    fn reset_due(&self, reset_timeout: Duration, now: Instant) -> bool {
        self.last_failure
            .is_none_or(|at| now.saturating_duration_since(at) >= reset_timeout)
    }
}

/// Circuit breakers for every provider id
#[derive(Debug)]
pub struct CircuitBreaker {
    settings: BreakerSettings,
    states: RwLock<HashMap<String, BreakerState>>,
}

impl CircuitBreaker {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            states: RwLock::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &BreakerSettings {
        &self.settings
    }

    /// Whether the breaker for `provider_id` is currently open
    ///
    /// Pure read: an expired open breaker still reports open until
    /// [`admit`](Self::admit) resets it. Always false when disabled.
    pub async fn is_open(&self, provider_id: &str) -> bool {
        if !self.settings.enabled {
            return false;
        }
        self.states
            .read()
            .await
            .get(provider_id)
            .is_some_and(|s| s.is_open)
    }

    pub async fn state(&self, provider_id: &str) -> CircuitState {
        if self.is_open(provider_id).await {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }

    /// Decide whether `provider_id` may take part in this availability pass
    ///
    /// Closes an open breaker whose reset timeout has elapsed, with a zeroed
    /// failure count, and admits the provider.
    pub async fn admit(&self, provider_id: &str) -> bool {
        if !self.settings.enabled {
            return true;
        }

        let mut states = self.states.write().await;
        let Some(state) = states.get_mut(provider_id) else {
            return true;
        };
        if !state.is_open {
            return true;
        }

        if state.reset_due(self.settings.reset_timeout, Instant::now()) {
            *state = BreakerState::closed();
            tracing::info!(
                provider_id = %provider_id,
                reset_timeout_ms = self.settings.reset_timeout.as_millis() as u64,
                "Circuit breaker reset to closed after timeout"
            );
            true
        } else {
            tracing::debug!(provider_id = %provider_id, "Circuit breaker open, skipping provider");
            false
        }
    }

    /// Record a failed call; returns true if this failure opened the breaker
    pub async fn record_failure(&self, provider_id: &str) -> bool {
        if !self.settings.enabled {
            return false;
        }

        let mut states = self.states.write().await;
        let state = states
            .entry(provider_id.to_string())
            .or_insert_with(BreakerState::closed);

        state.failure_count += 1;
        state.last_failure = Some(Instant::now());

        if !state.is_open && state.failure_count >= self.settings.failure_threshold {
            state.is_open = true;
            tracing::warn!(
                provider_id = %provider_id,
                failure_count = state.failure_count,
                reset_timeout_ms = self.settings.reset_timeout.as_millis() as u64,
                "Circuit breaker opened"
            );
            return true;
        }
        false
    }

    /// Record a successful call, fully closing the breaker
    pub async fn record_success(&self, provider_id: &str) {
        if !self.settings.enabled {
            return;
        }

        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(provider_id) {
            if state.is_open {
                tracing::info!(provider_id = %provider_id, "Circuit breaker closed by success");
            }
            *state = BreakerState::closed();
        }
    }

    pub async fn snapshot(&self, provider_id: &str) -> Option<BreakerState> {
        self.states.read().await.get(provider_id).copied()
    }

    pub async fn remove(&self, provider_id: &str) {
        self.states.write().await.remove(provider_id);
    }

    pub async fn clear(&self) {
        self.states.write().await.clear();
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, reset_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(BreakerSettings {
            enabled: true,
            failure_threshold: threshold,
            reset_timeout: Duration::from_millis(reset_ms),
        })
    }

    #[tokio::test]
    async fn test_opens_at_threshold() {
        let breaker = breaker(3, 1000);
        assert!(!breaker.record_failure("alpha").await);
        assert!(!breaker.record_failure("alpha").await);
        assert!(!breaker.is_open("alpha").await);

        assert!(breaker.record_failure("alpha").await);
        assert!(breaker.is_open("alpha").await);
        assert_eq!(breaker.state("alpha").await, CircuitState::Open);
        assert!(!breaker.admit("alpha").await);
    }

    #[tokio::test]
    async fn test_success_fully_resets() {
        let breaker = breaker(2, 1000);
        breaker.record_failure("alpha").await;
        breaker.record_failure("alpha").await;
        assert!(breaker.is_open("alpha").await);

        breaker.record_success("alpha").await;
        let state = breaker.snapshot("alpha").await.expect("state should exist");
        assert!(!state.is_open());
        assert_eq!(state.failure_count(), 0);
        assert!(state.last_failure().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_admit_resets_after_timeout() {
        let breaker = breaker(1, 60_000);
        breaker.record_failure("alpha").await;
        assert!(!breaker.admit("alpha").await);

        tokio::time::advance(Duration::from_millis(59_999)).await;
        assert!(!breaker.admit("alpha").await);

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(breaker.admit("alpha").await);
        let state = breaker.snapshot("alpha").await.expect("state should exist");
        assert!(!state.is_open());
        assert_eq!(state.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_is_open_does_not_reset() {
        let breaker = breaker(1, 100);
        breaker.record_failure("alpha").await;
        tokio::time::advance(Duration::from_millis(200)).await;

        // Reset is lazy and only happens when admitting
        assert!(breaker.is_open("alpha").await);
        assert!(breaker.admit("alpha").await);
        assert!(!breaker.is_open("alpha").await);
    }

    #[tokio::test]
    async fn test_disabled_never_opens() {
        let breaker = CircuitBreaker::new(BreakerSettings::disabled());
        for _ in 0..50 {
            assert!(!breaker.record_failure("alpha").await);
        }
        assert!(!breaker.is_open("alpha").await);
        assert!(breaker.admit("alpha").await);
    }

    #[tokio::test]
    async fn test_unknown_provider_is_admitted() {
        let breaker = CircuitBreaker::default();
        assert!(breaker.admit("ghost").await);
        assert_eq!(breaker.state("ghost").await, CircuitState::Closed);
    }
}
