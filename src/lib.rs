//! llm-relay - health-aware selection and dispatch across LLM providers
//!
//! Callers register [`Provider`] adapters with a [`Dispatcher`]. Each request
//! is routed to one provider chosen by a [`SelectionStrategy`] among those
//! that pass health probes and whose circuit breaker is closed; failed
//! attempts are retried on other providers.

pub mod availability;
pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod provider;
pub mod strategy;
pub mod telemetry;

pub use config::Config;
pub use dispatcher::{DispatchSettings, Dispatcher};
pub use error::{ProviderError, RelayError, RelayResult};
pub use metrics::{HistoryFilter, MetricsCollector, MetricsSnapshot};
pub use provider::{
    ChatMessage, ChatOptions, ChatResponse, ChatStream, HealthReport, ImageOptions, ImageResponse,
    Provider, ProviderMetadata, StreamChunk, Usage,
};
pub use strategy::{SelectionContext, SelectionStrategy, StrategyConfig};
