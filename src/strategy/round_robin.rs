//! Round-robin selection
//!
//! One cursor shared across calls, applied to whichever filtered list the
//! current call sees. Since the list may shrink between calls, a cursor past
//! the end starts over at zero.

use super::{SelectionContext, SelectionStrategy, filter_attempted};
use crate::provider::Provider;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

pub(crate) const NAME: &str = "round_robin";

#[derive(Debug, Default)]
pub struct RoundRobinStrategy {
    cursor: Mutex<usize>,
}

impl RoundRobinStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SelectionStrategy for RoundRobinStrategy {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn select(
        &self,
        providers: &[Arc<dyn Provider>],
        context: &SelectionContext,
    ) -> Option<Arc<dyn Provider>> {
        let candidates = filter_attempted(providers, context);
        if candidates.is_empty() {
            return None;
        }

        let mut cursor = self.cursor.lock().unwrap_or_else(|e| e.into_inner());
        if *cursor >= candidates.len() {
            *cursor = 0;
        }
        let chosen = Arc::clone(&candidates[*cursor]);
        *cursor = (*cursor + 1) % candidates.len();
        Some(chosen)
    }
}
