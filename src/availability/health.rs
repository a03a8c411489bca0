//! Consecutive probe-failure tracking
//!
//! A provider whose health probe fails `max_consecutive_failures` times in a
//! row is no longer probed by the per-call availability pass. Background
//! health checks keep probing it and one successful probe restores it.

use std::collections::HashMap;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Default number of consecutive probe failures before exclusion
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Probe health for a single provider
///
/// Fields are private so counters only move through the tracker.
#[derive(Clone, Debug)]
pub struct ProviderHealth {
    provider_id: String,
    healthy: bool,
    last_check: Option<Instant>,
    consecutive_failures: u32,
}

impl ProviderHealth {
    fn new(provider_id: &str) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            healthy: true,
            last_check: None,
            consecutive_failures: 0,
        }
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    /// Whether the counter is below the exclusion threshold
    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    /// When the provider was last probed, if ever
    pub fn last_check(&self) -> Option<Instant> {
        self.last_check
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

/// Tracks consecutive probe failures per provider id
#[derive(Debug)]
pub struct HealthTracker {
    status: RwLock<HashMap<String, ProviderHealth>>,
    max_consecutive_failures: u32,
}

impl HealthTracker {
    pub fn new(max_consecutive_failures: u32) -> Self {
        Self {
            status: RwLock::new(HashMap::new()),
            max_consecutive_failures,
        }
    }

    pub fn max_consecutive_failures(&self) -> u32 {
        self.max_consecutive_failures
    }

    /// Start tracking a provider from a clean slate
    pub async fn register(&self, provider_id: &str) {
        self.status
            .write()
            .await
            .insert(provider_id.to_string(), ProviderHealth::new(provider_id));
    }

    pub async fn remove(&self, provider_id: &str) {
        self.status.write().await.remove(provider_id);
    }

    pub async fn clear(&self) {
        self.status.write().await.clear();
    }

    /// Whether the provider is excluded from the per-call probe pass
    ///
    /// Unknown providers are not excluded; they have no failures on record.
    pub async fn is_excluded(&self, provider_id: &str) -> bool {
        self.consecutive_failures(provider_id).await >= self.max_consecutive_failures
    }

    pub async fn consecutive_failures(&self, provider_id: &str) -> u32 {
        self.status
            .read()
            .await
            .get(provider_id)
            .map(|h| h.consecutive_failures)
            .unwrap_or(0)
    }

    /// Record a failed probe and return the new consecutive failure count
    pub async fn mark_failure(&self, provider_id: &str) -> u32 {
        let mut status = self.status.write().await;
        let health = status
            .entry(provider_id.to_string())
            .or_insert_with(|| ProviderHealth::new(provider_id));

        health.consecutive_failures += 1;
        health.last_check = Some(Instant::now());

        if health.consecutive_failures >= self.max_consecutive_failures {
            if health.healthy {
                // Log only on transition to excluded
                tracing::warn!(
                    provider_id = %health.provider_id,
                    consecutive_failures = health.consecutive_failures,
                    "Provider excluded after {} consecutive failed health probes",
                    health.consecutive_failures
                );
            }
            health.healthy = false;
        } else {
            tracing::debug!(
                provider_id = %health.provider_id,
                consecutive_failures = health.consecutive_failures,
                "Health probe failure recorded (still eligible)"
            );
        }

        health.consecutive_failures
    }

    /// Record a successful probe, resetting the failure count
    pub async fn mark_success(&self, provider_id: &str) {
        let mut status = self.status.write().await;
        let health = status
            .entry(provider_id.to_string())
            .or_insert_with(|| ProviderHealth::new(provider_id));

        let was_unhealthy = !health.healthy;
        health.consecutive_failures = 0;
        health.healthy = true;
        health.last_check = Some(Instant::now());

        if was_unhealthy {
            tracing::info!(
                provider_id = %health.provider_id,
                "Provider recovered after successful health probe"
            );
        }
    }

    pub async fn get(&self, provider_id: &str) -> Option<ProviderHealth> {
        self.status.read().await.get(provider_id).cloned()
    }

    /// All tracked statuses, for display/debugging
    pub async fn get_all_statuses(&self) -> Vec<ProviderHealth> {
        self.status.read().await.values().cloned().collect()
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONSECUTIVE_FAILURES)
    }
}
