//! Prometheus mirror of the collector's counters
//!
//! Series are labelled by provider id. Provider ids come from the registry,
//! so cardinality is bounded by the number of registered providers.

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Outcome label for request counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
        }
    }
}

/// Prometheus metrics for the dispatcher
#[derive(Clone)]
pub struct PrometheusExporter {
    registry: Arc<Registry>,
    requests_total: IntCounterVec,
    request_duration: HistogramVec,
    selections_total: IntCounterVec,
    health_checks_total: IntCounterVec,
}

impl PrometheusExporter {
    /// Register all series with a fresh registry
    ///
    /// # Errors
    ///
    /// Returns an error if metric registration fails (e.g., duplicate names).
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new(
                "llm_relay_requests_total",
                "Total provider calls by provider and outcome",
            ),
            &["provider", "outcome"],
        )?;

        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "llm_relay_request_duration_ms",
                "Provider call latency in milliseconds",
            )
            .buckets(vec![
                50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0,
            ]),
            &["provider"],
        )?;

        let selections_total = IntCounterVec::new(
            Opts::new(
                "llm_relay_selections_total",
                "Total provider selections by provider and strategy",
            ),
            &["provider", "strategy"],
        )?;

        let health_checks_total = IntCounterVec::new(
            Opts::new(
                "llm_relay_health_checks_total",
                "Total health probes by provider and result",
            ),
            &["provider", "result"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;
        registry.register(Box::new(selections_total.clone()))?;
        registry.register(Box::new(health_checks_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            requests_total,
            request_duration,
            selections_total,
            health_checks_total,
        })
    }

    /// Record a completed provider call
    ///
    /// # Errors
    ///
    /// Returns an error if `duration_ms` is not finite and non-negative, or
    /// the label set does not match the registered series.
    pub fn record_request(
        &self,
        provider: &str,
        outcome: Outcome,
        duration_ms: f64,
    ) -> Result<(), prometheus::Error> {
        // NaN and infinity poison every percentile of the histogram
        if !duration_ms.is_finite() || duration_ms < 0.0 {
            return Err(prometheus::Error::Msg(format!(
                "Histogram value must be finite and non-negative, got: {}",
                duration_ms
            )));
        }

        self.requests_total
            .get_metric_with_label_values(&[provider, outcome.as_str()])?
            .inc();
        self.request_duration
            .get_metric_with_label_values(&[provider])?
            .observe(duration_ms);
        Ok(())
    }

    pub fn record_selection(&self, provider: &str, strategy: &str) -> Result<(), prometheus::Error> {
        self.selections_total
            .get_metric_with_label_values(&[provider, strategy])?
            .inc();
        Ok(())
    }

    pub fn record_health_check(&self, provider: &str, healthy: bool) -> Result<(), prometheus::Error> {
        let result = if healthy { "healthy" } else { "unhealthy" };
        self.health_checks_total
            .get_metric_with_label_values(&[provider, result])?
            .inc();
        Ok(())
    }

    /// Gather all series and encode them in Prometheus text format
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or produces invalid UTF-8.
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let metric_families = self.registry.gather();

        tracing::debug!(
            metric_family_count = metric_families.len(),
            "Encoding metrics to Prometheus text format"
        );

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&metric_families, &mut buffer)?;

        String::from_utf8(buffer).map_err(|e| {
            prometheus::Error::Msg(format!(
                "Prometheus encoder produced invalid UTF-8 at byte {}",
                e.utf8_error().valid_up_to()
            ))
        })
    }
}
