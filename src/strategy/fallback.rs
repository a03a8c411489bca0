//! Fallback selection: a fixed preference order

use super::{SelectionContext, SelectionStrategy, filter_attempted};
use crate::provider::Provider;
use async_trait::async_trait;
use std::sync::Arc;

pub(crate) const NAME: &str = "fallback";

/// Picks the first id of `order` that is available
///
/// When none of the listed ids is available, the first available provider
/// is used instead.
#[derive(Debug, Clone, Default)]
pub struct FallbackStrategy {
    order: Vec<String>,
}

impl FallbackStrategy {
    pub fn new(order: Vec<String>) -> Self {
        Self { order }
    }

    pub fn order(&self) -> &[String] {
        &self.order
    }
}

#[async_trait]
impl SelectionStrategy for FallbackStrategy {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn select(
        &self,
        providers: &[Arc<dyn Provider>],
        context: &SelectionContext,
    ) -> Option<Arc<dyn Provider>> {
        let candidates = filter_attempted(providers, context);
        self.order
            .iter()
            .find_map(|id| candidates.iter().find(|p| p.id() == id))
            .or_else(|| candidates.first())
            .cloned()
    }
}
