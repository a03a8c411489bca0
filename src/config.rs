//! Configuration management for llm-relay
//!
//! Parses TOML configuration files and provides typed access to settings.
//! Every section is optional; omitted values take the documented defaults.

use crate::availability::{BreakerSettings, HealthSettings};
use crate::dispatcher::retry::{Backoff, DEFAULT_RETRY_DELAY_MS, RetryPolicy};
use crate::error::{RelayError, RelayResult};
use crate::strategy::{SelectionStrategy, StrategyConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound for every millisecond timeout in the file (5 minutes)
pub const MAX_TIMEOUT_MS: u64 = 300_000;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Retry loop and per-call settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatcherConfig {
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Attempts per call; defaults to the number of registered providers
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default)]
    pub backoff: Backoff,
    /// Language every response should be written in
    #[serde(default)]
    pub force_language: Option<String>,
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            max_retries: None,
            retry_delay_ms: default_retry_delay_ms(),
            backoff: Backoff::default(),
            force_language: None,
        }
    }
}

impl DispatcherConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.backoff, Duration::from_millis(self.retry_delay_ms))
    }
}

/// Health probe settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthConfig {
    #[serde(default = "default_check_timeout_ms")]
    pub check_timeout_ms: u64,
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    #[serde(default = "default_latency_threshold_ms")]
    pub latency_threshold_ms: u64,
    /// Background health check period; no background checks when unset
    #[serde(default)]
    pub check_interval_ms: Option<u64>,
}

fn default_check_timeout_ms() -> u64 {
    5_000
}

fn default_max_consecutive_failures() -> u32 {
    crate::availability::health::DEFAULT_MAX_CONSECUTIVE_FAILURES
}

fn default_latency_threshold_ms() -> u64 {
    10_000
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_timeout_ms: default_check_timeout_ms(),
            max_consecutive_failures: default_max_consecutive_failures(),
            latency_threshold_ms: default_latency_threshold_ms(),
            check_interval_ms: None,
        }
    }
}

impl HealthConfig {
    pub fn settings(&self) -> HealthSettings {
        HealthSettings {
            check_timeout: Duration::from_millis(self.check_timeout_ms),
            max_consecutive_failures: self.max_consecutive_failures,
            latency_threshold: Duration::from_millis(self.latency_threshold_ms),
        }
    }

    pub fn check_interval(&self) -> Option<Duration> {
        self.check_interval_ms.map(Duration::from_millis)
    }
}

/// Circuit breaker settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_failure_threshold() -> u32 {
    crate::availability::circuit_breaker::DEFAULT_FAILURE_THRESHOLD
}

fn default_reset_timeout_ms() -> u64 {
    60_000
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn settings(&self) -> BreakerSettings {
        BreakerSettings {
            enabled: self.enabled,
            failure_threshold: self.failure_threshold,
            reset_timeout: Duration::from_millis(self.reset_timeout_ms),
        }
    }
}

/// Declarative description of one provider
///
/// Adapters are built from these entries outside this crate; the dispatcher
/// itself only uses `priority` and `weight` when building a strategy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    id: String,
    #[serde(rename = "type")]
    provider_type: String,
    base_url: String,
    /// Name of the environment variable holding the API key
    #[serde(default)]
    api_key_env: Option<String>,
    #[serde(default)]
    priority: Option<u32>,
    #[serde(default)]
    weight: Option<f64>,
}

impl ProviderConfig {
    pub fn new(
        id: impl Into<String>,
        provider_type: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            provider_type: provider_type.into(),
            base_url: base_url.into(),
            api_key_env: None,
            priority: None,
            weight: None,
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn with_api_key_env(mut self, var: impl Into<String>) -> Self {
        self.api_key_env = Some(var.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn provider_type(&self) -> &str {
        &self.provider_type
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_key_env(&self) -> Option<&str> {
        self.api_key_env.as_deref()
    }

    /// Resolve the API key from the environment, if configured and set
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
    }

    pub fn priority(&self) -> Option<u32> {
        self.priority
    }

    pub fn weight(&self) -> Option<f64> {
        self.weight
    }
}

/// Observability configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn check_timeout(name: &str, value_ms: u64) -> RelayResult<()> {
    if value_ms == 0 {
        return Err(RelayError::Config(format!(
            "{} must be greater than 0",
            name
        )));
    }
    if value_ms > MAX_TIMEOUT_MS {
        return Err(RelayError::Config(format!(
            "{} cannot exceed {} ms (5 minutes), got {}",
            name, MAX_TIMEOUT_MS, value_ms
        )));
    }
    Ok(())
}

fn check_weight(owner: &str, weight: f64) -> RelayResult<()> {
    if !weight.is_finite() || weight < 0.0 {
        return Err(RelayError::Config(format!(
            "{} has invalid weight {}. \
            Weight must be a finite number >= 0.",
            owner, weight
        )));
    }
    Ok(())
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> RelayResult<Self> {
        let path_display = path.as_ref().display().to_string();

        let content = std::fs::read_to_string(path.as_ref()).map_err(|source| {
            RelayError::ConfigFileRead {
                path: path_display.clone(),
                source,
            }
        })?;

        let config: Self =
            toml::from_str(&content).map_err(|source| RelayError::ConfigParseFailed {
                path: path_display.clone(),
                source,
            })?;

        config
            .validate()
            .map_err(|e| RelayError::ConfigValidationFailed {
                path: path_display,
                reason: e.to_string(),
            })?;

        Ok(config)
    }

    /// Build the configured selection strategy
    pub fn build_strategy(&self) -> Arc<dyn SelectionStrategy> {
        self.strategy.build(&self.providers)
    }

    pub fn provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.id == id)
    }

    /// Validate configuration after parsing
    ///
    /// Called by `from_file()` and `from_str()`; call it explicitly for
    /// configs built in code.
    pub fn validate(&self) -> RelayResult<()> {
        check_timeout("dispatcher.request_timeout_ms", self.dispatcher.request_timeout_ms)?;
        if self.dispatcher.retry_delay_ms > MAX_TIMEOUT_MS {
            return Err(RelayError::Config(format!(
                "dispatcher.retry_delay_ms cannot exceed {} ms, got {}",
                MAX_TIMEOUT_MS, self.dispatcher.retry_delay_ms
            )));
        }
        if let Some(language) = &self.dispatcher.force_language {
            if language.trim().is_empty() {
                return Err(RelayError::Config(
                    "dispatcher.force_language must not be empty when set"
                        .to_string(),
                ));
            }
        }

        check_timeout("health.check_timeout_ms", self.health.check_timeout_ms)?;
        check_timeout("health.latency_threshold_ms", self.health.latency_threshold_ms)?;
        if let Some(interval) = self.health.check_interval_ms {
            if interval == 0 {
                return Err(RelayError::Config(
                    "health.check_interval_ms must be greater than 0"
                        .to_string(),
                ));
            }
        }
        if self.health.max_consecutive_failures == 0 {
            return Err(RelayError::Config(
                "health.max_consecutive_failures must be greater than 0"
                    .to_string(),
            ));
        }

        if self.circuit_breaker.failure_threshold == 0 {
            return Err(RelayError::Config(
                "circuit_breaker.failure_threshold must be greater than 0"
                    .to_string(),
            ));
        }
        check_timeout(
            "circuit_breaker.reset_timeout_ms",
            self.circuit_breaker.reset_timeout_ms,
        )?;

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if provider.id.trim().is_empty() {
                return Err(RelayError::Config(
                    "provider id must not be empty".to_string(),
                ));
            }
            if !seen.insert(provider.id.as_str()) {
                return Err(RelayError::Config(format!(
                    "duplicate provider id '{}'. Provider ids must be unique.",
                    provider.id
                )));
            }
            if !provider.base_url.starts_with("http://")
                && !provider.base_url.starts_with("https://")
            {
                return Err(RelayError::Config(format!(
                    "Provider '{}' has invalid base_url '{}'. \
                    base_url must start with 'http://' or 'https://'.",
                    provider.id, provider.base_url
                )));
            }
            if let Some(weight) = provider.weight {
                check_weight(&format!("Provider '{}'", provider.id), weight)?;
            }
        }

        match &self.strategy {
            StrategyConfig::Weighted { weights, .. } => {
                for (id, weight) in weights {
                    check_weight(&format!("strategy.weights entry '{}'", id), *weight)?;
                }
            }
            StrategyConfig::Fallback { order } => {
                if order.iter().any(|id| id.trim().is_empty()) {
                    return Err(RelayError::Config(
                        "strategy.order must not contain empty ids"
                            .to_string(),
                    ));
                }
            }
            StrategyConfig::HealthAware {
                min_health_score,
                probe_timeout_ms,
                ..
            } => {
                if !(0.0..=1.0).contains(min_health_score) {
                    return Err(RelayError::Config(format!(
                        "strategy.min_health_score must be between 0.0 and 1.0, got {}",
                        min_health_score
                    )));
                }
                check_timeout("strategy.probe_timeout_ms", *probe_timeout_ms)?;
            }
            StrategyConfig::RoundRobin | StrategyConfig::Priority { .. } => {}
        }

        Ok(())
    }
}

impl FromStr for Config {
    type Err = RelayError;

    fn from_str(toml_str: &str) -> Result<Self, Self::Err> {
        let config: Config =
            toml::from_str(toml_str).map_err(|source| RelayError::ConfigParseFailed {
                path: "<string>".to_string(),
                source,
            })?;

        config.validate()?;
        Ok(config)
    }
}
