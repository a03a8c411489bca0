//! Provider capability surface
//!
//! The dispatcher never speaks a vendor wire format. Adapters implement
//! [`Provider`] and the dispatcher only sees these types.

pub mod types;

pub use types::{
    ChatMessage, ChatOptions, ChatResponse, ChatStream, CostPerToken, HealthReport, ImageOptions,
    ImageResponse, ProviderMetadata, Role, StreamChunk, Usage,
};

use crate::error::ProviderError;
use async_trait::async_trait;

/// A remote text (and optionally image) generation endpoint
///
/// Implementations must be cheap to share: the dispatcher holds them as
/// `Arc<dyn Provider>` and calls them from many tasks at once.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable identifier, unique within one dispatcher
    fn id(&self) -> &str;

    /// Descriptive metadata and capability flags
    fn metadata(&self) -> &ProviderMetadata;

    /// Lightweight liveness probe
    ///
    /// Returning `Err` and returning `healthy: false` are treated the same.
    async fn check_health(&self) -> Result<HealthReport, ProviderError>;

    /// Send a chat request and wait for the full response
    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatResponse, ProviderError>;

    /// Send a chat request and return a stream of chunks
    ///
    /// Errors raised after the stream is returned are the caller's concern.
    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatStream, ProviderError>;

    /// Generate images from a prompt
    ///
    /// Only called on providers whose metadata sets `supports_image_generation`.
    async fn generate_image(
        &self,
        _prompt: &str,
        _options: &ImageOptions,
    ) -> Result<ImageResponse, ProviderError> {
        Err(ProviderError::Unsupported("image generation"))
    }
}

impl std::fmt::Debug for dyn Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("id", &self.id())
            .field("name", &self.metadata().name)
            .finish()
    }
}
