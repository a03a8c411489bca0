//! Outcome bookkeeping for providers and strategies
//!
//! The collector records selection events, request outcomes, and health
//! samples, and derives aggregate statistics from them. It never calls out
//! to a provider. Every recorded event is also mirrored into Prometheus
//! series (see [`exporter`]).

pub mod exporter;

pub use exporter::{Outcome, PrometheusExporter};

use crate::provider::{CostPerToken, Usage};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

/// Smoothing factor for the exponential moving average of call latency
pub const LATENCY_SMOOTHING: f64 = 0.1;

/// Maximum number of health samples kept per provider
pub const HEALTH_HISTORY_CAPACITY: usize = 100;

/// A single health probe observation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSample {
    pub timestamp: SystemTime,
    pub healthy: bool,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
}

impl HealthSample {
    pub fn healthy(latency_ms: u64) -> Self {
        Self {
            timestamp: SystemTime::now(),
            healthy: true,
            latency_ms: Some(latency_ms),
            error: None,
        }
    }

    pub fn unhealthy(error: impl Into<String>) -> Self {
        Self {
            timestamp: SystemTime::now(),
            healthy: false,
            latency_ms: None,
            error: Some(error.into()),
        }
    }
}

/// Cumulative statistics for one provider
#[derive(Debug, Clone, Serialize)]
pub struct ProviderMetrics {
    pub provider_id: String,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    /// Exponential moving average of successful call latency
    pub average_latency_ms: Option<f64>,
    pub health_history: VecDeque<HealthSample>,
    pub last_used: Option<SystemTime>,
    pub last_success: Option<SystemTime>,
    pub last_failure: Option<SystemTime>,
    pub last_error: Option<String>,
}

impl ProviderMetrics {
    fn new(provider_id: &str) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
            total_cost: 0.0,
            average_latency_ms: None,
            health_history: VecDeque::with_capacity(HEALTH_HISTORY_CAPACITY),
            last_used: None,
            last_success: None,
            last_failure: None,
            last_error: None,
        }
    }

    /// Fraction of calls that failed, 0.0 with no calls
    pub fn error_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.failed_requests as f64 / self.total_requests as f64
        }
    }

    /// Fraction of calls that succeeded, 1.0 with no calls
    pub fn success_rate(&self) -> f64 {
        1.0 - self.error_rate()
    }

    /// Most recent health sample, if any
    pub fn latest_health(&self) -> Option<&HealthSample> {
        self.health_history.back()
    }

    fn push_health(&mut self, sample: HealthSample) {
        if self.health_history.len() == HEALTH_HISTORY_CAPACITY {
            self.health_history.pop_front();
        }
        self.health_history.push_back(sample);
    }

    fn observe_latency(&mut self, latency_ms: f64) {
        self.average_latency_ms = Some(match self.average_latency_ms {
            Some(avg) => LATENCY_SMOOTHING * latency_ms + (1.0 - LATENCY_SMOOTHING) * avg,
            None => latency_ms,
        });
    }
}

/// Selection statistics across all strategies
#[derive(Debug, Clone, Default, Serialize)]
pub struct StrategyMetrics {
    pub total_selections: u64,
    pub selections_by_provider: HashMap<String, u64>,
    pub selections_by_strategy: HashMap<String, u64>,
    pub average_selection_latency_ms: f64,
}

/// Append-only record of one provider call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestHistoryEntry {
    pub timestamp: SystemTime,
    pub provider_id: String,
    pub success: bool,
    pub latency_ms: u64,
    pub usage: Option<Usage>,
    pub cost: Option<f64>,
    pub error: Option<String>,
}

/// Read-side filter for the request history
///
/// `limit` keeps the most recent matching entries.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub since: Option<SystemTime>,
    pub until: Option<SystemTime>,
    pub provider_id: Option<String>,
    pub limit: Option<usize>,
}

impl HistoryFilter {
    pub fn for_provider(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self
    }

    pub fn since(mut self, since: SystemTime) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: SystemTime) -> Self {
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, entry: &RequestHistoryEntry) -> bool {
        self.since.is_none_or(|since| entry.timestamp >= since)
            && self.until.is_none_or(|until| entry.timestamp <= until)
            && self
                .provider_id
                .as_deref()
                .is_none_or(|id| entry.provider_id == id)
    }
}

/// Totals across every provider the collector has seen
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregateMetrics {
    pub provider_count: usize,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub error_rate: f64,
    /// Mean of per-provider latency averages, weighted by successful calls
    pub average_latency_ms: f64,
    pub total_tokens: u64,
    pub total_cost: f64,
}

/// Point-in-time copy of everything the collector knows
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub providers: HashMap<String, ProviderMetrics>,
    pub strategy: StrategyMetrics,
    pub aggregate: AggregateMetrics,
}

#[derive(Default)]
struct CollectorState {
    providers: HashMap<String, ProviderMetrics>,
    strategy: StrategyMetrics,
    history: Vec<RequestHistoryEntry>,
}

impl CollectorState {
    fn provider_mut(&mut self, provider_id: &str) -> &mut ProviderMetrics {
        self.providers
            .entry(provider_id.to_string())
            .or_insert_with(|| ProviderMetrics::new(provider_id))
    }

    fn aggregate(&self) -> AggregateMetrics {
        let mut aggregate = AggregateMetrics {
            provider_count: self.providers.len(),
            ..AggregateMetrics::default()
        };
        let mut weighted_latency = 0.0;
        let mut latency_weight = 0u64;

        for metrics in self.providers.values() {
            aggregate.total_requests += metrics.total_requests;
            aggregate.successful_requests += metrics.successful_requests;
            aggregate.failed_requests += metrics.failed_requests;
            aggregate.total_tokens += metrics.total_tokens;
            aggregate.total_cost += metrics.total_cost;
            if let Some(avg) = metrics.average_latency_ms {
                weighted_latency += avg * metrics.successful_requests as f64;
                latency_weight += metrics.successful_requests;
            }
        }

        if aggregate.total_requests > 0 {
            aggregate.error_rate =
                aggregate.failed_requests as f64 / aggregate.total_requests as f64;
        }
        if latency_weight > 0 {
            aggregate.average_latency_ms = weighted_latency / latency_weight as f64;
        }
        aggregate
    }
}

/// Thread-safe metrics collector
///
/// Counters are keyed by provider id and outlive provider registration.
pub struct MetricsCollector {
    state: Mutex<CollectorState>,
    exporter: PrometheusExporter,
}

impl MetricsCollector {
    /// Create an empty collector with its Prometheus registry
    ///
    /// # Errors
    ///
    /// Returns an error if Prometheus series registration fails.
    pub fn new() -> Result<Self, prometheus::Error> {
        Ok(Self {
            state: Mutex::new(CollectorState::default()),
            exporter: PrometheusExporter::new()?,
        })
    }

    fn lock(&self) -> MutexGuard<'_, CollectorState> {
        // Bookkeeping stays usable even if a recording thread panicked
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record that `strategy` picked `provider_id`, taking `latency` to decide
    pub fn record_selection(&self, provider_id: &str, strategy: &str, latency: Duration) {
        {
            let mut state = self.lock();
            let metrics = &mut state.strategy;
            metrics.total_selections += 1;
            *metrics
                .selections_by_provider
                .entry(provider_id.to_string())
                .or_insert(0) += 1;
            *metrics
                .selections_by_strategy
                .entry(strategy.to_string())
                .or_insert(0) += 1;

            let latency_ms = latency.as_secs_f64() * 1000.0;
            let n = metrics.total_selections as f64;
            metrics.average_selection_latency_ms +=
                (latency_ms - metrics.average_selection_latency_ms) / n;
        }

        if let Err(e) = self.exporter.record_selection(provider_id, strategy) {
            tracing::warn!(
                provider_id = %provider_id,
                strategy = %strategy,
                error = %e,
                "Failed to export selection metric"
            );
        }
    }

    /// Record a successful provider call
    ///
    /// Token totals are updated when `usage` is reported; cost is derived from
    /// `cost_per_token` when both are known.
    pub fn record_success(
        &self,
        provider_id: &str,
        latency: Duration,
        usage: Option<&Usage>,
        cost_per_token: Option<&CostPerToken>,
    ) {
        let latency_ms = latency.as_secs_f64() * 1000.0;
        let cost = usage.zip(cost_per_token).map(|(u, c)| c.cost_of(u));
        let now = SystemTime::now();

        {
            let mut state = self.lock();
            let metrics = state.provider_mut(provider_id);
            metrics.total_requests += 1;
            metrics.successful_requests += 1;
            metrics.last_used = Some(now);
            metrics.last_success = Some(now);
            metrics.observe_latency(latency_ms);
            if let Some(usage) = usage {
                metrics.prompt_tokens += usage.prompt_tokens;
                metrics.completion_tokens += usage.completion_tokens;
                metrics.total_tokens += usage.total_tokens;
            }
            if let Some(cost) = cost {
                metrics.total_cost += cost;
            }

            state.history.push(RequestHistoryEntry {
                timestamp: now,
                provider_id: provider_id.to_string(),
                success: true,
                latency_ms: latency.as_millis() as u64,
                usage: usage.copied(),
                cost,
                error: None,
            });
        }

        if let Err(e) = self
            .exporter
            .record_request(provider_id, Outcome::Success, latency_ms)
        {
            tracing::warn!(provider_id = %provider_id, error = %e, "Failed to export request metric");
        }
    }

    /// Record a failed provider call
    pub fn record_failure(&self, provider_id: &str, latency: Duration, error: &str) {
        let latency_ms = latency.as_secs_f64() * 1000.0;
        let now = SystemTime::now();

        {
            let mut state = self.lock();
            let metrics = state.provider_mut(provider_id);
            metrics.total_requests += 1;
            metrics.failed_requests += 1;
            metrics.last_used = Some(now);
            metrics.last_failure = Some(now);
            metrics.last_error = Some(error.to_string());

            state.history.push(RequestHistoryEntry {
                timestamp: now,
                provider_id: provider_id.to_string(),
                success: false,
                latency_ms: latency.as_millis() as u64,
                usage: None,
                cost: None,
                error: Some(error.to_string()),
            });
        }

        if let Err(e) = self
            .exporter
            .record_request(provider_id, Outcome::Failure, latency_ms)
        {
            tracing::warn!(provider_id = %provider_id, error = %e, "Failed to export request metric");
        }
    }

    /// Append a health sample, evicting the oldest beyond capacity
    pub fn record_health(&self, provider_id: &str, sample: HealthSample) {
        let healthy = sample.healthy;
        self.lock().provider_mut(provider_id).push_health(sample);

        if let Err(e) = self.exporter.record_health_check(provider_id, healthy) {
            tracing::warn!(provider_id = %provider_id, error = %e, "Failed to export health metric");
        }
    }

    /// Metrics for one provider, if it has ever been recorded
    pub fn provider(&self, provider_id: &str) -> Option<ProviderMetrics> {
        self.lock().providers.get(provider_id).cloned()
    }

    pub fn strategy(&self) -> StrategyMetrics {
        self.lock().strategy.clone()
    }

    pub fn aggregate(&self) -> AggregateMetrics {
        self.lock().aggregate()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.lock();
        MetricsSnapshot {
            providers: state.providers.clone(),
            strategy: state.strategy.clone(),
            aggregate: state.aggregate(),
        }
    }

    /// Request history matching `filter`, oldest first
    pub fn history(&self, filter: &HistoryFilter) -> Vec<RequestHistoryEntry> {
        let state = self.lock();
        let matching: Vec<&RequestHistoryEntry> =
            state.history.iter().filter(|e| filter.matches(e)).collect();
        let skip = filter
            .limit
            .map_or(0, |limit| matching.len().saturating_sub(limit));
        matching.into_iter().skip(skip).cloned().collect()
    }

    /// Forget all bookkeeping (Prometheus counters are monotonic and stay)
    pub fn reset(&self) {
        *self.lock() = CollectorState::default();
    }

    /// Render the Prometheus series in text exposition format
    pub fn render_prometheus(&self) -> Result<String, prometheus::Error> {
        self.exporter.gather()
    }
}
