//! Command-line interface for llm-relay
//!
//! Provider adapters live outside this crate, so the binary only deals with
//! configuration: writing a template and checking an existing file.

use crate::config::Config;
use crate::strategy::StrategyConfig;
use clap::{Parser, Subcommand};
use std::fmt::Write as _;

/// Selection and dispatch across interchangeable LLM providers
#[derive(Parser)]
#[command(name = "llm-relay")]
#[command(version)]
#[command(about = "Selection and dispatch across interchangeable LLM providers")]
#[command(
    long_about = "llm-relay picks a provider for every request using a pluggable strategy, \
    skips unhealthy providers and providers with an open circuit breaker, and retries \
    failed requests on other providers."
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "llm-relay.toml", global = true)]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate a template configuration file
    Config {
        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Load and validate the configuration, then print a summary
    Check,
}

/// Human-readable summary of a validated configuration
pub fn summarize(config: &Config) -> String {
    let mut out = String::new();
    let strategy = &config.strategy;
    let _ = writeln!(out, "strategy: {}", strategy.kind_name());
    match strategy {
        StrategyConfig::Weighted { cost_aware, .. } if *cost_aware => {
            let _ = writeln!(out, "  cost-aware weighting enabled");
        }
        StrategyConfig::Fallback { order } if !order.is_empty() => {
            let _ = writeln!(out, "  order: {}", order.join(" -> "));
        }
        StrategyConfig::HealthAware {
            min_health_score, ..
        } => {
            let _ = writeln!(out, "  min health score: {}", min_health_score);
        }
        _ => {}
    }

    let dispatcher = &config.dispatcher;
    let _ = writeln!(
        out,
        "dispatch: timeout {}ms, retries {}, {:?} backoff",
        dispatcher.request_timeout_ms,
        dispatcher
            .max_retries
            .map_or_else(|| "per provider".to_string(), |n| n.to_string()),
        dispatcher.backoff
    );
    if config.circuit_breaker.enabled {
        let _ = writeln!(
            out,
            "circuit breaker: opens after {} failures, resets after {}ms",
            config.circuit_breaker.failure_threshold, config.circuit_breaker.reset_timeout_ms
        );
    } else {
        let _ = writeln!(out, "circuit breaker: disabled");
    }

    let _ = writeln!(out, "providers: {}", config.providers.len());
    for provider in &config.providers {
        let _ = write!(
            out,
            "  - {} ({}) {}",
            provider.id(),
            provider.provider_type(),
            provider.base_url()
        );
        if let Some(priority) = provider.priority() {
            let _ = write!(out, " priority={}", priority);
        }
        if let Some(weight) = provider.weight() {
            let _ = write!(out, " weight={}", weight);
        }
        if let Some(var) = provider.api_key_env() {
            let status = if provider.api_key().is_some() {
                "set"
            } else {
                "missing"
            };
            let _ = write!(out, " key=${} ({})", var, status);
        }
        out.push('\n');
    }
    out
}

/// Generate template configuration content
pub fn generate_config_template() -> &'static str {
    r#"# llm-relay Configuration
# =======================
#
# Every section is optional. Values shown are the defaults unless noted.

# ─────────────────────────────────────────────────────────────────────────────
# DISPATCH
# ─────────────────────────────────────────────────────────────────────────────

[dispatcher]
# Per-attempt timeout in milliseconds (1..=300000)
request_timeout_ms = 30000

# Attempts per request. Defaults to the number of registered providers.
# max_retries = 3

# Delay between attempts in milliseconds ("fixed" backoff)
retry_delay_ms = 1000

# "fixed" waits retry_delay_ms before each retry
# "exponential" waits min(1000 * 2^(retry-1), 30000) ms
backoff = "fixed"

# Ask every provider to answer in this language
# force_language = "English"

# ─────────────────────────────────────────────────────────────────────────────
# HEALTH PROBES
# ─────────────────────────────────────────────────────────────────────────────

[health]
# Timeout of a single health probe in milliseconds
check_timeout_ms = 5000

# Failed probes in a row before a provider is skipped until it recovers
max_consecutive_failures = 3

# Providers slower than this (ms) are treated as unavailable
latency_threshold_ms = 10000

# Probe all providers in the background at this interval (ms)
# check_interval_ms = 30000

# ─────────────────────────────────────────────────────────────────────────────
# CIRCUIT BREAKER
# ─────────────────────────────────────────────────────────────────────────────

[circuit_breaker]
enabled = true

# Failed requests in a row before the breaker opens
failure_threshold = 5

# Time (ms) an open breaker waits before admitting the provider again
reset_timeout_ms = 60000

# ─────────────────────────────────────────────────────────────────────────────
# SELECTION STRATEGY
# ─────────────────────────────────────────────────────────────────────────────
#
#   - "round_robin": rotate through available providers
#   - "priority":    lowest priority number first (priorities = { id = n })
#   - "fallback":    fixed order (order = ["a", "b"])
#   - "weighted":    random, proportional to weight (weights = { id = w },
#                    cost_aware = true favours cheaper providers)
#   - "health_aware": rank by observed success rate and latency
#                    (min_health_score = 0.3, prefer_low_latency = true)

[strategy]
kind = "round_robin"

# ─────────────────────────────────────────────────────────────────────────────
# PROVIDERS
# ─────────────────────────────────────────────────────────────────────────────
#
# Fields:
#   - id: unique provider identifier
#   - type: adapter type
#   - base_url: API base URL (http:// or https://)
#   - api_key_env: environment variable holding the API key
#   - priority: used by the "priority" strategy (lower = preferred)
#   - weight: used by the "weighted" strategy

[[providers]]
id = "primary"
type = "openai"
base_url = "https://api.openai.com/v1"
api_key_env = "OPENAI_API_KEY"
priority = 1
weight = 1.0

[[providers]]
id = "local"
type = "ollama"
base_url = "http://localhost:11434"
priority = 2
weight = 1.0

# ─────────────────────────────────────────────────────────────────────────────
# OBSERVABILITY
# ─────────────────────────────────────────────────────────────────────────────

[observability]
# Log level: "trace", "debug", "info", "warn", "error" (RUST_LOG overrides)
log_level = "info"
"#
}
