//! Health-aware selection
//!
//! Ranks providers by a score built from the outcomes fed back through
//! [`SelectionStrategy::update`]:
//!
//! ```text
//! score          = success_rate * latency_factor
//! success_rate   = successes / (successes + failures)      (1.0 with no data)
//! latency_factor = max(0, 1 - (avg_latency_ms - 1000) / 4000)   (1.0 with no data)
//! ```
//!
//! Providers scoring below `min_health_score` are skipped. The dispatcher only
//! hands over providers that passed a fresh health probe, so by default no
//! further probing happens here; set `reprobe` to probe every candidate again
//! on each selection.

use super::{SelectionContext, SelectionFeedback, SelectionStrategy, filter_attempted};
use crate::availability::{self, ProbeOutcome};
use crate::provider::Provider;
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(crate) const NAME: &str = "health_aware";

pub const DEFAULT_MIN_HEALTH_SCORE: f64 = 0.3;

/// Latency at which the latency factor is exactly 1.0
const LATENCY_FLOOR_MS: f64 = 1_000.0;
/// Latency span over which the latency factor falls from 1.0 to 0.0
const LATENCY_SPAN_MS: f64 = 4_000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthAwareSettings {
    pub min_health_score: f64,
    pub prefer_low_latency: bool,
    pub reprobe: bool,
    pub probe_timeout: Duration,
}

impl Default for HealthAwareSettings {
    fn default() -> Self {
        Self {
            min_health_score: DEFAULT_MIN_HEALTH_SCORE,
            prefer_low_latency: true,
            reprobe: false,
            probe_timeout: availability::DEFAULT_HEALTH_CHECK_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct FeedbackStats {
    successes: u64,
    failures: u64,
    samples: u64,
    average_latency_ms: f64,
}

impl FeedbackStats {
    fn record(&mut self, success: bool, latency: Duration) {
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.samples += 1;
        let latency_ms = latency.as_secs_f64() * 1_000.0;
        self.average_latency_ms += (latency_ms - self.average_latency_ms) / self.samples as f64;
    }

    fn success_rate(&self) -> f64 {
        let total = self.successes + self.failures;
        if total == 0 {
            1.0
        } else {
            self.successes as f64 / total as f64
        }
    }

    fn latency_factor(&self) -> f64 {
        if self.samples == 0 {
            return 1.0;
        }
        (1.0 - (self.average_latency_ms - LATENCY_FLOOR_MS) / LATENCY_SPAN_MS).max(0.0)
    }

    fn score(&self) -> f64 {
        self.success_rate() * self.latency_factor()
    }
}

#[derive(Debug, Default)]
pub struct HealthAwareStrategy {
    settings: HealthAwareSettings,
    stats: Mutex<HashMap<String, FeedbackStats>>,
}

impl HealthAwareStrategy {
    pub fn new(settings: HealthAwareSettings) -> Self {
        Self {
            settings,
            stats: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &HealthAwareSettings {
        &self.settings
    }

    /// Current score for `provider_id`, 1.0 if nothing was recorded
    pub fn score(&self, provider_id: &str) -> f64 {
        self.stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(provider_id)
            .map(FeedbackStats::score)
            .unwrap_or(1.0)
    }

    async fn reprobe(&self, candidates: Vec<Arc<dyn Provider>>) -> Vec<Arc<dyn Provider>> {
        let timeout = self.settings.probe_timeout;
        let outcomes = join_all(
            candidates
                .iter()
                .map(|p| availability::probe(p.as_ref(), timeout)),
        )
        .await;
        candidates
            .into_iter()
            .zip(outcomes)
            .filter_map(|(p, outcome)| match outcome {
                ProbeOutcome::Healthy { .. } => Some(p),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl SelectionStrategy for HealthAwareStrategy {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn select(
        &self,
        providers: &[Arc<dyn Provider>],
        context: &SelectionContext,
    ) -> Option<Arc<dyn Provider>> {
        let mut candidates = filter_attempted(providers, context);
        if self.settings.reprobe && !candidates.is_empty() {
            candidates = self.reprobe(candidates).await;
        }

        let mut ranked: Vec<(Arc<dyn Provider>, f64, f64)> = {
            let stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
            candidates
                .into_iter()
                .map(|p| {
                    let entry = stats.get(p.id()).copied().unwrap_or_default();
                    (p, entry.score(), entry.average_latency_ms)
                })
                .collect()
        };

        ranked.retain(|(_, score, _)| *score >= self.settings.min_health_score);

        let prefer_low_latency = self.settings.prefer_low_latency;
        ranked.sort_by(|(_, score_a, latency_a), (_, score_b, latency_b)| {
            let by_score = score_b.total_cmp(score_a);
            if prefer_low_latency {
                by_score.then(latency_a.total_cmp(latency_b))
            } else {
                by_score
            }
        });

        let (chosen, score, _) = ranked.into_iter().next()?;
        tracing::debug!(
            provider_id = %chosen.id(),
            score = score,
            call_id = %context.call_id(),
            "Selected provider by health score"
        );
        Some(chosen)
    }

    fn update(&self, provider_id: &str, success: bool, feedback: &SelectionFeedback) {
        self.stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(provider_id.to_string())
            .or_default()
            .record(success, feedback.latency);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_support::{StubProvider, id_of, providers};

    fn feedback(latency_ms: u64) -> SelectionFeedback {
        SelectionFeedback::success(Duration::from_millis(latency_ms), None)
    }

    #[test]
    fn test_score_without_data_is_one() {
        let strategy = HealthAwareStrategy::default();
        assert_eq!(strategy.score("fresh"), 1.0);
    }

    #[test]
    fn test_score_combines_success_rate_and_latency() {
        let strategy = HealthAwareStrategy::default();
        strategy.update("a", true, &feedback(3_000));
        strategy.update("a", false, &feedback(3_000));
        // success_rate 0.5, latency_factor 1 - 2000/4000 = 0.5
        assert!((strategy.score("a") - 0.25).abs() < 1e-9);

        strategy.update("slow", true, &feedback(6_000));
        assert_eq!(strategy.score("slow"), 0.0);
    }

    #[tokio::test]
    async fn test_prefers_higher_score() {
        let strategy = HealthAwareStrategy::default();
        strategy.update("flaky", true, &feedback(100));
        strategy.update("flaky", false, &feedback(100));
        strategy.update("solid", true, &feedback(100));

        let list = providers(&["flaky", "solid"]);
        assert_eq!(
            id_of(strategy.select(&list, &SelectionContext::default()).await).as_deref(),
            Some("solid")
        );
    }

    #[tokio::test]
    async fn test_excludes_below_min_score() {
        let strategy = HealthAwareStrategy::new(HealthAwareSettings {
            min_health_score: 0.6,
            ..HealthAwareSettings::default()
        });
        strategy.update("a", false, &feedback(1_000));
        strategy.update("a", true, &feedback(1_000));

        let list = providers(&["a"]);
        assert!(strategy.select(&list, &SelectionContext::default()).await.is_none());
    }

    #[test]
    fn test_fast_providers_score_above_one() {
        let strategy = HealthAwareStrategy::default();
        strategy.update("fast", true, &feedback(200));
        assert!((strategy.score("fast") - 1.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_ties_broken_by_latency() {
        let settings = HealthAwareSettings {
            min_health_score: 0.0,
            ..HealthAwareSettings::default()
        };
        // Both past the point where the latency factor bottoms out at zero
        let strategy = HealthAwareStrategy::new(settings);
        strategy.update("a", true, &feedback(8_000));
        strategy.update("b", true, &feedback(6_000));

        let list = providers(&["a", "b"]);
        assert_eq!(
            id_of(strategy.select(&list, &SelectionContext::default()).await).as_deref(),
            Some("b")
        );

        let stable = HealthAwareStrategy::new(HealthAwareSettings {
            prefer_low_latency: false,
            ..settings
        });
        stable.update("a", true, &feedback(8_000));
        stable.update("b", true, &feedback(6_000));
        assert_eq!(
            id_of(stable.select(&list, &SelectionContext::default()).await).as_deref(),
            Some("a")
        );
    }

    #[tokio::test]
    async fn test_reprobe_drops_unhealthy() {
        let strategy = HealthAwareStrategy::new(HealthAwareSettings {
            reprobe: true,
            ..HealthAwareSettings::default()
        });
        let list = vec![
            StubProvider::new("down").unhealthy().arc(),
            StubProvider::new("up").arc(),
        ];
        assert_eq!(
            id_of(strategy.select(&list, &SelectionContext::default()).await).as_deref(),
            Some("up")
        );
    }

    #[tokio::test]
    async fn test_skips_attempted() {
        let strategy = HealthAwareStrategy::default();
        let list = providers(&["a", "b"]);
        let context = SelectionContext::default().with_attempted(["a"]);
        assert_eq!(
            id_of(strategy.select(&list, &context).await).as_deref(),
            Some("b")
        );
    }
}
