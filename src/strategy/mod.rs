//! Provider selection strategies
//!
//! A strategy picks one provider from the list the dispatcher hands it. It
//! never looks providers up in the registry; it only sees that list, the
//! per-call [`SelectionContext`], and whatever private running state it keeps
//! (rotation cursor, feedback statistics, RNG).

pub mod fallback;
pub mod health_aware;
pub mod priority;
pub mod round_robin;
pub mod weighted;

pub use fallback::FallbackStrategy;
pub use health_aware::{HealthAwareSettings, HealthAwareStrategy};
pub use priority::PriorityStrategy;
pub use round_robin::RoundRobinStrategy;
pub use weighted::WeightedStrategy;

use crate::config::ProviderConfig;
use crate::provider::{ChatMessage, ChatOptions, Provider, Usage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Per-call state visible to strategies
///
/// `attempted` grows as attempts fail and is read by every strategy to avoid
/// picking the same provider twice within one call.
#[derive(Debug, Clone)]
pub struct SelectionContext {
    call_id: Uuid,
    messages: Vec<ChatMessage>,
    options: ChatOptions,
    attempted: Vec<String>,
}

impl SelectionContext {
    pub fn new(messages: Vec<ChatMessage>, options: ChatOptions) -> Self {
        Self {
            call_id: Uuid::new_v4(),
            messages,
            options,
            attempted: Vec::new(),
        }
    }

    /// Identifier used to correlate the log lines of one call
    pub fn call_id(&self) -> Uuid {
        self.call_id
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn options(&self) -> &ChatOptions {
        &self.options
    }

    /// Provider ids already attempted in this call, in attempt order
    pub fn attempted(&self) -> &[String] {
        &self.attempted
    }

    pub fn has_attempted(&self, provider_id: &str) -> bool {
        self.attempted.iter().any(|id| id == provider_id)
    }

    pub fn record_attempt(&mut self, provider_id: &str) {
        if !self.has_attempted(provider_id) {
            self.attempted.push(provider_id.to_string());
        }
    }

    pub fn with_attempted<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for id in ids {
            let id = id.into();
            self.record_attempt(&id);
        }
        self
    }
}

impl Default for SelectionContext {
    fn default() -> Self {
        Self::new(Vec::new(), ChatOptions::default())
    }
}

/// What the dispatcher observed about one attempt
#[derive(Debug, Clone, Default)]
pub struct SelectionFeedback {
    pub latency: Duration,
    pub usage: Option<Usage>,
    pub error: Option<String>,
}

impl SelectionFeedback {
    pub fn success(latency: Duration, usage: Option<Usage>) -> Self {
        Self {
            latency,
            usage,
            error: None,
        }
    }

    pub fn failure(latency: Duration, error: impl Into<String>) -> Self {
        Self {
            latency,
            usage: None,
            error: Some(error.into()),
        }
    }
}

/// Policy for choosing one provider among the available ones
#[async_trait]
pub trait SelectionStrategy: Send + Sync {
    /// Short stable name, used as a metrics label
    fn name(&self) -> &'static str;

    /// Pick a provider, or `None` if no non-attempted provider qualifies
    async fn select(
        &self,
        providers: &[Arc<dyn Provider>],
        context: &SelectionContext,
    ) -> Option<Arc<dyn Provider>>;

    /// Feedback after an attempt; strategies without running state ignore it
    fn update(&self, _provider_id: &str, _success: bool, _feedback: &SelectionFeedback) {}
}

/// Drop providers already attempted in this call, keeping order
pub fn filter_attempted(
    providers: &[Arc<dyn Provider>],
    context: &SelectionContext,
) -> Vec<Arc<dyn Provider>> {
    providers
        .iter()
        .filter(|p| !context.has_attempted(p.id()))
        .cloned()
        .collect()
}

fn default_min_health_score() -> f64 {
    health_aware::DEFAULT_MIN_HEALTH_SCORE
}

fn default_true() -> bool {
    true
}

fn default_probe_timeout_ms() -> u64 {
    crate::availability::DEFAULT_HEALTH_CHECK_TIMEOUT.as_millis() as u64
}

/// Declarative strategy choice, as found in the `[strategy]` config table
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyConfig {
    RoundRobin,
    Priority {
        /// Lower is preferred; merged over `[[providers]].priority`
        #[serde(default)]
        priorities: HashMap<String, u32>,
    },
    Fallback {
        #[serde(default)]
        order: Vec<String>,
    },
    Weighted {
        /// Merged over `[[providers]].weight`
        #[serde(default)]
        weights: HashMap<String, f64>,
        #[serde(default)]
        cost_aware: bool,
        /// Fixed RNG seed, for reproducible selection sequences
        #[serde(default)]
        seed: Option<u64>,
    },
    HealthAware {
        #[serde(default = "default_min_health_score")]
        min_health_score: f64,
        #[serde(default = "default_true")]
        prefer_low_latency: bool,
        /// Probe every candidate again on each selection
        #[serde(default)]
        reprobe: bool,
        #[serde(default = "default_probe_timeout_ms")]
        probe_timeout_ms: u64,
    },
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self::RoundRobin
    }
}

impl StrategyConfig {
    /// Name of the strategy this config builds
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::RoundRobin => round_robin::NAME,
            Self::Priority { .. } => priority::NAME,
            Self::Fallback { .. } => fallback::NAME,
            Self::Weighted { .. } => weighted::NAME,
            Self::HealthAware { .. } => health_aware::NAME,
        }
    }

    /// Build the strategy, merging per-provider priority and weight entries
    ///
    /// Values in the strategy table win over values on `[[providers]]`.
    pub fn build(&self, providers: &[ProviderConfig]) -> Arc<dyn SelectionStrategy> {
        match self {
            Self::RoundRobin => Arc::new(RoundRobinStrategy::new()),
            Self::Priority { priorities } => {
                let mut merged: HashMap<String, u32> = providers
                    .iter()
                    .filter_map(|p| p.priority().map(|prio| (p.id().to_string(), prio)))
                    .collect();
                merged.extend(priorities.iter().map(|(k, v)| (k.clone(), *v)));
                Arc::new(PriorityStrategy::new(merged))
            }
            Self::Fallback { order } => Arc::new(FallbackStrategy::new(order.clone())),
            Self::Weighted {
                weights,
                cost_aware,
                seed,
            } => {
                let mut merged: HashMap<String, f64> = providers
                    .iter()
                    .filter_map(|p| p.weight().map(|w| (p.id().to_string(), w)))
                    .collect();
                merged.extend(weights.iter().map(|(k, v)| (k.clone(), *v)));
                let strategy = match seed {
                    Some(seed) => WeightedStrategy::with_seed(merged, *seed),
                    None => WeightedStrategy::new(merged),
                };
                Arc::new(strategy.cost_aware(*cost_aware))
            }
            Self::HealthAware {
                min_health_score,
                prefer_low_latency,
                reprobe,
                probe_timeout_ms,
            } => Arc::new(HealthAwareStrategy::new(HealthAwareSettings {
                min_health_score: *min_health_score,
                prefer_low_latency: *prefer_low_latency,
                reprobe: *reprobe,
                probe_timeout: Duration::from_millis(*probe_timeout_ms),
            })),
        }
    }
}
