//! Provider availability
//!
//! Combines the circuit breaker, the consecutive probe-failure tracker, and
//! concurrent health probes into the list of providers a strategy may choose
//! from.

pub mod circuit_breaker;
pub mod health;

pub use circuit_breaker::{BreakerSettings, BreakerState, CircuitBreaker, CircuitState};
pub use health::{HealthTracker, ProviderHealth};

use crate::metrics::{HealthSample, MetricsCollector};
use crate::provider::Provider;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Default bound on a single health probe
pub const DEFAULT_HEALTH_CHECK_TIMEOUT: Duration = Duration::from_millis(5_000);
/// Default maximum acceptable probe latency
pub const DEFAULT_LATENCY_THRESHOLD: Duration = Duration::from_millis(10_000);

/// Health probe settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSettings {
    pub check_timeout: Duration,
    pub max_consecutive_failures: u32,
    pub latency_threshold: Duration,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            check_timeout: DEFAULT_HEALTH_CHECK_TIMEOUT,
            max_consecutive_failures: health::DEFAULT_MAX_CONSECUTIVE_FAILURES,
            latency_threshold: DEFAULT_LATENCY_THRESHOLD,
        }
    }
}

/// Result of probing one provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Probe reported healthy, with reported (or measured) latency
    Healthy { latency: Duration },
    /// Probe returned an error or `healthy: false`
    Unhealthy { reason: String },
    /// Probe did not finish within the check timeout
    TimedOut,
}

impl ProbeOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy { .. })
    }
}

/// Probe a provider's health under `timeout`
///
/// Never fails: errors, unhealthy reports and timeouts are all folded into
/// the outcome.
pub async fn probe(provider: &dyn Provider, timeout: Duration) -> ProbeOutcome {
    let started = Instant::now();
    match tokio::time::timeout(timeout, provider.check_health()).await {
        Ok(Ok(report)) if report.healthy => ProbeOutcome::Healthy {
            latency: report
                .latency_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| started.elapsed()),
        },
        Ok(Ok(report)) => ProbeOutcome::Unhealthy {
            reason: report
                .error
                .unwrap_or_else(|| "provider reported unhealthy".to_string()),
        },
        Ok(Err(e)) => ProbeOutcome::Unhealthy {
            reason: e.to_string(),
        },
        Err(_elapsed) => ProbeOutcome::TimedOut,
    }
}

/// Shared availability state for one dispatcher
#[derive(Debug)]
pub struct AvailabilityTracker {
    settings: HealthSettings,
    health: HealthTracker,
    breaker: CircuitBreaker,
}

impl AvailabilityTracker {
    pub fn new(settings: HealthSettings, breaker: BreakerSettings) -> Self {
        Self {
            settings,
            health: HealthTracker::new(settings.max_consecutive_failures),
            breaker: CircuitBreaker::new(breaker),
        }
    }

    pub fn settings(&self) -> &HealthSettings {
        &self.settings
    }

    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub async fn register(&self, provider_id: &str) {
        self.health.register(provider_id).await;
        self.breaker.remove(provider_id).await;
    }

    pub async fn remove(&self, provider_id: &str) {
        self.health.remove(provider_id).await;
        self.breaker.remove(provider_id).await;
    }

    pub async fn clear(&self) {
        self.health.clear().await;
        self.breaker.clear().await;
    }

    /// Compute the providers eligible for selection, in the given order
    ///
    /// Skips providers whose breaker is open (resetting expired breakers) or
    /// whose probe-failure count has reached the limit, then probes the rest
    /// concurrently. A provider is included only if its probe is healthy and
    /// its latency is within the threshold.
    pub async fn available(
        &self,
        providers: &[Arc<dyn Provider>],
        metrics: &MetricsCollector,
    ) -> Vec<Arc<dyn Provider>> {
        let mut candidates = Vec::with_capacity(providers.len());
        for provider in providers {
            if !self.breaker.admit(provider.id()).await {
                continue;
            }
            if self.health.is_excluded(provider.id()).await {
                tracing::debug!(
                    provider_id = %provider.id(),
                    max_consecutive_failures = self.settings.max_consecutive_failures,
                    "Skipping provider with too many failed health probes"
                );
                continue;
            }
            candidates.push(Arc::clone(provider));
        }

        let outcomes = self.probe_and_record(&candidates, metrics).await;

        let available: Vec<Arc<dyn Provider>> = candidates
            .into_iter()
            .zip(outcomes)
            .filter_map(|(provider, outcome)| match outcome {
                ProbeOutcome::Healthy { latency } if latency <= self.settings.latency_threshold => {
                    Some(provider)
                }
                ProbeOutcome::Healthy { latency } => {
                    tracing::debug!(
                        provider_id = %provider.id(),
                        latency_ms = latency.as_millis() as u64,
                        threshold_ms = self.settings.latency_threshold.as_millis() as u64,
                        "Provider healthy but above latency threshold"
                    );
                    None
                }
                _ => None,
            })
            .collect();

        tracing::debug!(
            registered = providers.len(),
            available = available.len(),
            "Computed available providers"
        );
        available
    }

    /// Probe every provider regardless of its failure count
    ///
    /// Used by background health checks so that excluded providers can
    /// recover. Expired breakers are reset along the way; open ones are
    /// still probed so their samples keep flowing.
    pub async fn check_all(
        &self,
        providers: &[Arc<dyn Provider>],
        metrics: &MetricsCollector,
    ) -> Vec<(String, ProbeOutcome)> {
        for provider in providers {
            self.breaker.admit(provider.id()).await;
        }
        let outcomes = self.probe_and_record(providers, metrics).await;
        providers
            .iter()
            .map(|p| p.id().to_string())
            .zip(outcomes)
            .collect()
    }

    async fn probe_and_record(
        &self,
        providers: &[Arc<dyn Provider>],
        metrics: &MetricsCollector,
    ) -> Vec<ProbeOutcome> {
        let timeout = self.settings.check_timeout;
        let outcomes = join_all(providers.iter().map(|p| probe(p.as_ref(), timeout))).await;

        for (provider, outcome) in providers.iter().zip(&outcomes) {
            let id = provider.id();
            match outcome {
                ProbeOutcome::Healthy { latency } => {
                    self.health.mark_success(id).await;
                    metrics.record_health(id, HealthSample::healthy(latency.as_millis() as u64));
                }
                ProbeOutcome::Unhealthy { reason } => {
                    tracing::debug!(provider_id = %id, reason = %reason, "Health probe failed");
                    self.health.mark_failure(id).await;
                    metrics.record_health(id, HealthSample::unhealthy(reason.clone()));
                }
                ProbeOutcome::TimedOut => {
                    tracing::debug!(
                        provider_id = %id,
                        timeout_ms = timeout.as_millis() as u64,
                        "Health probe timed out"
                    );
                    self.health.mark_failure(id).await;
                    metrics.record_health(
                        id,
                        HealthSample::unhealthy(format!(
                            "health check timed out after {}ms",
                            timeout.as_millis()
                        )),
                    );
                }
            }
        }

        outcomes
    }
}
