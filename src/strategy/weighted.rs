//! Weighted random selection
//!
//! Providers receive traffic in proportion to their weight. In cost-aware
//! mode the weight is divided by the provider's average cost per token, so
//! cheaper providers are favoured.

use super::{SelectionContext, SelectionStrategy, filter_attempted};
use crate::provider::Provider;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub(crate) const NAME: &str = "weighted";

/// Weight given to providers missing from the table
pub const DEFAULT_WEIGHT: f64 = 1.0;
/// Added to the cost divisor in cost-aware mode
pub const COST_EPSILON: f64 = 1e-6;

#[derive(Debug)]
pub struct WeightedStrategy {
    weights: HashMap<String, f64>,
    cost_aware: bool,
    rng: Mutex<StdRng>,
}

impl WeightedStrategy {
    pub fn new(weights: HashMap<String, f64>) -> Self {
        Self::with_rng(weights, StdRng::from_os_rng())
    }

    /// Deterministic draw sequence, for reproducible runs and tests
    pub fn with_seed(weights: HashMap<String, f64>, seed: u64) -> Self {
        Self::with_rng(weights, StdRng::seed_from_u64(seed))
    }

    fn with_rng(weights: HashMap<String, f64>, rng: StdRng) -> Self {
        Self {
            weights,
            cost_aware: false,
            rng: Mutex::new(rng),
        }
    }

    pub fn cost_aware(mut self, cost_aware: bool) -> Self {
        self.cost_aware = cost_aware;
        self
    }

    pub fn is_cost_aware(&self) -> bool {
        self.cost_aware
    }

    /// Weight used for `provider` in the draw
    ///
    /// A provider without cost metadata counts as free in cost-aware mode.
    pub fn effective_weight(&self, provider: &dyn Provider) -> f64 {
        let weight = self
            .weights
            .get(provider.id())
            .copied()
            .unwrap_or(DEFAULT_WEIGHT);
        if !self.cost_aware {
            return weight;
        }
        let cost = provider
            .metadata()
            .cost_per_token
            .map(|c| c.average())
            .unwrap_or(0.0);
        weight / (cost + COST_EPSILON)
    }
}

#[async_trait]
impl SelectionStrategy for WeightedStrategy {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn select(
        &self,
        providers: &[Arc<dyn Provider>],
        context: &SelectionContext,
    ) -> Option<Arc<dyn Provider>> {
        let candidates = filter_attempted(providers, context);
        let weighted: Vec<(Arc<dyn Provider>, f64)> = candidates
            .into_iter()
            .map(|p| {
                let w = self.effective_weight(p.as_ref());
                (p, w)
            })
            .collect();

        let total_weight: f64 = weighted.iter().map(|(_, w)| *w).sum();
        if !(total_weight > 0.0 && total_weight.is_finite()) {
            if let Some((first, _)) = weighted.first() {
                tracing::debug!(
                    provider_id = %first.id(),
                    total_weight = total_weight,
                    "Zero total weight, using first available provider"
                );
            }
            return weighted.into_iter().next().map(|(p, _)| p);
        }

        let mut remaining = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            rng.random_range(0.0..total_weight)
        };

        let last_index = weighted.len() - 1;
        for (index, (provider, weight)) in weighted.into_iter().enumerate() {
            remaining -= weight;
            if remaining < 0.0 || index == last_index {
                tracing::debug!(
                    provider_id = %provider.id(),
                    weight = weight,
                    total_weight = total_weight,
                    "Selected provider via weighted random draw"
                );
                return Some(provider);
            }
        }
        None
    }
}
