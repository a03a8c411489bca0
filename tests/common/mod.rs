//! Shared test doubles for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use llm_relay::config::Config;
use llm_relay::error::ProviderError;
use llm_relay::provider::{
    ChatMessage, ChatOptions, ChatResponse, ChatStream, HealthReport, ImageOptions,
    ImageResponse, Provider, ProviderMetadata, StreamChunk, Usage,
};
use llm_relay::Dispatcher;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scriptable provider that counts every call it receives
pub struct MockProvider {
    id: String,
    metadata: ProviderMetadata,
    healthy: AtomicBool,
    failing: AtomicBool,
    health_latency_ms: Option<u64>,
    health_delay: Option<Duration>,
    chat_delay: Option<Duration>,
    usage: Option<Usage>,
    chat_calls: AtomicUsize,
    stream_calls: AtomicUsize,
    image_calls: AtomicUsize,
    health_checks: AtomicUsize,
    last_messages: Mutex<Vec<ChatMessage>>,
}

impl MockProvider {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            metadata: ProviderMetadata::new(id),
            healthy: AtomicBool::new(true),
            failing: AtomicBool::new(false),
            health_latency_ms: Some(5),
            health_delay: None,
            chat_delay: None,
            usage: None,
            chat_calls: AtomicUsize::new(0),
            stream_calls: AtomicUsize::new(0),
            image_calls: AtomicUsize::new(0),
            health_checks: AtomicUsize::new(0),
            last_messages: Mutex::new(Vec::new()),
        }
    }

    /// Every chat, stream and image call fails
    pub fn failing(self) -> Self {
        self.failing.store(true, Ordering::SeqCst);
        self
    }

    /// Every health probe reports unhealthy
    pub fn unhealthy(self) -> Self {
        self.healthy.store(false, Ordering::SeqCst);
        self
    }

    pub fn with_health_latency(mut self, latency_ms: u64) -> Self {
        self.health_latency_ms = Some(latency_ms);
        self
    }

    /// Health probe sleeps this long before answering
    pub fn with_health_delay(mut self, delay: Duration) -> Self {
        self.health_delay = Some(delay);
        self
    }

    /// Calls sleep this long before answering
    pub fn with_chat_delay(mut self, delay: Duration) -> Self {
        self.chat_delay = Some(delay);
        self
    }

    pub fn with_usage(mut self, prompt_tokens: u64, completion_tokens: u64) -> Self {
        self.usage = Some(Usage::new(prompt_tokens, completion_tokens));
        self
    }

    pub fn with_cost(mut self, prompt: f64, completion: f64) -> Self {
        self.metadata = self.metadata.with_cost(prompt, completion);
        self
    }

    pub fn with_image_generation(mut self) -> Self {
        self.metadata = self.metadata.with_image_generation();
        self
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn chat_calls(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    pub fn image_calls(&self) -> usize {
        self.image_calls.load(Ordering::SeqCst)
    }

    pub fn health_checks(&self) -> usize {
        self.health_checks.load(Ordering::SeqCst)
    }

    pub fn last_messages(&self) -> Vec<ChatMessage> {
        self.last_messages
            .lock()
            .expect("mock lock poisoned")
            .clone()
    }

    pub fn response_text(&self) -> String {
        format!("response from {}", self.id)
    }

    async fn simulate_call(&self) -> Result<(), ProviderError> {
        if let Some(delay) = self.chat_delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            Err(ProviderError::Request(format!("{} is down", self.id)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    async fn check_health(&self) -> Result<HealthReport, ProviderError> {
        self.health_checks.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.health_delay {
            tokio::time::sleep(delay).await;
        }
        if !self.healthy.load(Ordering::SeqCst) {
            return Ok(HealthReport::unhealthy(format!("{} is unhealthy", self.id)));
        }
        Ok(match self.health_latency_ms {
            Some(ms) => HealthReport::healthy_with_latency(ms),
            None => HealthReport::healthy(),
        })
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        _options: &ChatOptions,
    ) -> Result<ChatResponse, ProviderError> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_messages.lock().expect("mock lock poisoned") = messages.to_vec();
        self.simulate_call().await?;
        let response = ChatResponse::new(self.response_text());
        Ok(match self.usage {
            Some(usage) => response.with_usage(usage),
            None => response,
        })
    }

    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        _options: &ChatOptions,
    ) -> Result<ChatStream, ProviderError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_messages.lock().expect("mock lock poisoned") = messages.to_vec();
        self.simulate_call().await?;
        let chunks = vec![
            Ok(StreamChunk {
                content: format!("chunk from {}", self.id),
                done: false,
                finish_reason: None,
                usage: None,
            }),
            Ok(StreamChunk {
                content: String::new(),
                done: true,
                finish_reason: Some("stop".to_string()),
                usage: self.usage,
            }),
        ];
        Ok(futures::stream::iter(chunks).boxed())
    }

    async fn generate_image(
        &self,
        _prompt: &str,
        _options: &ImageOptions,
    ) -> Result<ImageResponse, ProviderError> {
        self.image_calls.fetch_add(1, Ordering::SeqCst);
        if !self.metadata.supports_image_generation {
            return Err(ProviderError::Unsupported("image generation"));
        }
        self.simulate_call().await?;
        Ok(ImageResponse {
            images: vec![format!("image from {}", self.id)],
            model: None,
            usage: self.usage,
        })
    }
}

/// Default configuration with no delay between attempts
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.dispatcher.retry_delay_ms = 0;
    config
}

/// Config whose strategy is parsed from a `[strategy]` table body
pub fn config_with_strategy(strategy_toml: &str) -> Config {
    let mut config = test_config();
    config.strategy = toml::from_str(strategy_toml).expect("strategy table should parse");
    config
}

/// Dispatcher with the given providers registered in order
pub async fn dispatcher_with(config: &Config, providers: &[Arc<MockProvider>]) -> Dispatcher {
    let dispatcher = Dispatcher::new(config).expect("dispatcher should build");
    for provider in providers {
        dispatcher.register_provider(provider.clone()).await;
    }
    dispatcher
}

pub fn user(text: &str) -> Vec<ChatMessage> {
    vec![ChatMessage::user(text)]
}

pub fn ids(providers: &[Arc<dyn Provider>]) -> Vec<String> {
    providers.iter().map(|p| p.id().to_string()).collect()
}
