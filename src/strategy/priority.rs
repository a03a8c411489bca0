//! Priority selection: lowest number wins, ties keep list order

use super::{SelectionContext, SelectionStrategy, filter_attempted};
use crate::provider::Provider;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

pub(crate) const NAME: &str = "priority";

/// Priority given to providers missing from the table
pub const DEFAULT_PRIORITY: u32 = 999;

#[derive(Debug, Clone, Default)]
pub struct PriorityStrategy {
    priorities: HashMap<String, u32>,
}

impl PriorityStrategy {
    pub fn new(priorities: HashMap<String, u32>) -> Self {
        Self { priorities }
    }

    pub fn priority_of(&self, provider_id: &str) -> u32 {
        self.priorities
            .get(provider_id)
            .copied()
            .unwrap_or(DEFAULT_PRIORITY)
    }
}

#[async_trait]
impl SelectionStrategy for PriorityStrategy {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn select(
        &self,
        providers: &[Arc<dyn Provider>],
        context: &SelectionContext,
    ) -> Option<Arc<dyn Provider>> {
        let mut candidates = filter_attempted(providers, context);
        // sort_by_key is stable
        candidates.sort_by_key(|p| self.priority_of(p.id()));
        candidates.into_iter().next()
    }
}
