//! Error types for llm-relay
//!
//! `RelayError` is what callers of the dispatcher see. `ProviderError` is what
//! provider adapters return; the dispatcher wraps it with provider and attempt
//! context before it ever reaches a caller.

use thiserror::Error;

/// Errors raised by a provider adapter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("{0} is not supported by this provider")]
    Unsupported(&'static str),

    #[error("provider reported unhealthy: {0}")]
    Unhealthy(String),
}

/// Main error type for the dispatcher
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read config file {path}: {source}")]
    ConfigFileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ConfigParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration in {path}: {reason}")]
    ConfigValidationFailed { path: String, reason: String },

    #[error("Provider {provider_id} failed on attempt {attempt}: {source}")]
    Provider {
        provider_id: String,
        attempt: usize,
        #[source]
        source: ProviderError,
    },

    #[error("Provider {provider_id} timed out after {timeout_ms}ms on attempt {attempt}")]
    Timeout {
        provider_id: String,
        attempt: usize,
        timeout_ms: u64,
    },

    #[error(
        "No available providers (registered: {registered}, already attempted: [{}])",
        .attempted.join(", ")
    )]
    NoAvailableProviders {
        registered: usize,
        attempted: Vec<String>,
    },

    #[error(
        "All {attempts} attempts failed (tried: [{}]); last error: {last}",
        .attempted.join(", ")
    )]
    ExhaustedRetries {
        attempts: usize,
        attempted: Vec<String>,
        #[source]
        last: Box<RelayError>,
    },

    #[error("Failed to get a response from any provider")]
    AllProvidersFailed,

    #[error("No registered provider supports image generation (registered: {registered})")]
    ImageGenerationUnsupported { registered: usize },

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl RelayError {
    /// Whether another provider may succeed where this attempt failed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Provider { .. } | Self::Timeout { .. })
    }

    /// Provider id the error is attributed to, if any
    ///
    /// For `ExhaustedRetries` this is the provider behind the last failure.
    pub fn provider_id(&self) -> Option<&str> {
        match self {
            Self::Provider { provider_id, .. } | Self::Timeout { provider_id, .. } => {
                Some(provider_id)
            }
            Self::ExhaustedRetries { last, .. } => last.provider_id(),
            _ => None,
        }
    }
}

/// Convenience type alias for Results
pub type RelayResult<T> = Result<T, RelayError>;
