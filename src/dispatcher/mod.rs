//! Provider registry and dispatch loop
//!
//! The [`Dispatcher`] owns the provider registry, availability state, metrics
//! and the active selection strategy. Every call runs the same loop:
//!
//! 1. compute the available providers (breaker, failure counter, fresh probes)
//! 2. let the strategy pick one that was not attempted yet in this call
//! 3. call it under a timeout
//! 4. on success record and return; on failure record, exclude, and retry
//!
//! A call gives up immediately when nothing is available, and after
//! `max_retries` attempts (default: one per registered provider) otherwise.

pub mod language;
pub mod retry;

pub use language::LanguageDirective;
pub use retry::{Backoff, RetryPolicy, calculate_backoff};

use crate::availability::{AvailabilityTracker, CircuitState, ProbeOutcome};
use crate::config::Config;
use crate::error::{ProviderError, RelayError, RelayResult};
use crate::metrics::{HistoryFilter, MetricsCollector, MetricsSnapshot, RequestHistoryEntry};
use crate::provider::{
    ChatMessage, ChatOptions, ChatResponse, ChatStream, ImageOptions, ImageResponse, Provider,
    Usage,
};
use crate::strategy::{SelectionContext, SelectionFeedback, SelectionStrategy};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Default per-attempt timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Settings of the dispatch loop
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchSettings {
    pub request_timeout: Duration,
    /// Attempts per call; one per registered provider when unset
    pub max_retries: Option<u32>,
    pub retry: RetryPolicy,
    pub language: Option<LanguageDirective>,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_retries: None,
            retry: RetryPolicy::default(),
            language: None,
        }
    }
}

impl From<&Config> for DispatchSettings {
    fn from(config: &Config) -> Self {
        Self {
            request_timeout: config.dispatcher.request_timeout(),
            max_retries: config.dispatcher.max_retries,
            retry: config.dispatcher.retry_policy(),
            language: config
                .dispatcher
                .force_language
                .as_deref()
                .map(LanguageDirective::new),
        }
    }
}

/// Kind of provider call a dispatch performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Chat,
    ChatStream,
    ImageGeneration,
}

impl Operation {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::ChatStream => "chat_stream",
            Self::ImageGeneration => "image_generation",
        }
    }

    fn accepts(&self, provider: &dyn Provider) -> bool {
        match self {
            Self::ImageGeneration => provider.metadata().supports_image_generation,
            Self::Chat | Self::ChatStream => true,
        }
    }
}

/// Token usage reported by a successful attempt, if any
trait AttemptOutput {
    fn usage(&self) -> Option<Usage> {
        None
    }
}

impl AttemptOutput for ChatResponse {
    fn usage(&self) -> Option<Usage> {
        self.usage
    }
}

impl AttemptOutput for ImageResponse {
    fn usage(&self) -> Option<Usage> {
        self.usage
    }
}

// Usage of a stream is only known once it is consumed
impl AttemptOutput for ChatStream {}

struct DispatcherInner {
    settings: DispatchSettings,
    registry: RwLock<Vec<Arc<dyn Provider>>>,
    availability: AvailabilityTracker,
    metrics: MetricsCollector,
    strategy: RwLock<Arc<dyn SelectionStrategy>>,
    health_task: Mutex<Option<JoinHandle<()>>>,
}

impl DispatcherInner {
    async fn snapshot(&self) -> Vec<Arc<dyn Provider>> {
        self.registry.read().await.clone()
    }

    async fn run_health_checks(&self) -> Vec<(String, ProbeOutcome)> {
        let providers = self.snapshot().await;
        let outcomes = self.availability.check_all(&providers, &self.metrics).await;
        let healthy = outcomes.iter().filter(|(_, o)| o.is_healthy()).count();
        tracing::debug!(
            checked = outcomes.len(),
            healthy = healthy,
            "Background health check completed"
        );
        outcomes
    }
}

impl Drop for DispatcherInner {
    fn drop(&mut self) {
        let slot = self
            .health_task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }
}

/// Selects providers and dispatches calls to them with retry and fallback
///
/// Cheap to clone; clones share the registry and all state.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    /// Build a dispatcher from a validated configuration
    ///
    /// The strategy comes from `[strategy]`. Providers are registered
    /// separately with [`register_provider`](Self::register_provider).
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the metrics
    /// registry cannot be created.
    pub fn new(config: &Config) -> RelayResult<Self> {
        config.validate()?;
        Self::with_parts(
            DispatchSettings::from(config),
            AvailabilityTracker::new(config.health.settings(), config.circuit_breaker.settings()),
            config.build_strategy(),
        )
    }

    /// Build a dispatcher from explicit parts
    pub fn with_parts(
        settings: DispatchSettings,
        availability: AvailabilityTracker,
        strategy: Arc<dyn SelectionStrategy>,
    ) -> RelayResult<Self> {
        let metrics = MetricsCollector::new()?;
        tracing::info!(
            strategy = strategy.name(),
            request_timeout_ms = settings.request_timeout.as_millis() as u64,
            max_retries = ?settings.max_retries,
            "Dispatcher created"
        );
        Ok(Self {
            inner: Arc::new(DispatcherInner {
                settings,
                registry: RwLock::new(Vec::new()),
                availability,
                metrics,
                strategy: RwLock::new(strategy),
                health_task: Mutex::new(None),
            }),
        })
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.inner.settings
    }

    pub fn availability(&self) -> &AvailabilityTracker {
        &self.inner.availability
    }

    // ── Registry ────────────────────────────────────────────────────────

    /// Add a provider, replacing any provider with the same id in place
    ///
    /// Breaker and probe-failure state for the id start fresh; metrics are
    /// kept.
    pub async fn register_provider(&self, provider: Arc<dyn Provider>) {
        let id = provider.id().to_string();
        {
            let mut registry = self.inner.registry.write().await;
            match registry.iter_mut().find(|p| p.id() == id) {
                Some(existing) => {
                    tracing::warn!(provider_id = %id, "Replacing already registered provider");
                    *existing = provider;
                }
                None => registry.push(provider),
            }
        }
        self.inner.availability.register(&id).await;
        tracing::info!(provider_id = %id, "Provider registered");
    }

    /// Remove a provider; returns false if the id was not registered
    pub async fn unregister_provider(&self, provider_id: &str) -> bool {
        let removed = {
            let mut registry = self.inner.registry.write().await;
            let before = registry.len();
            registry.retain(|p| p.id() != provider_id);
            registry.len() != before
        };
        if removed {
            self.inner.availability.remove(provider_id).await;
            tracing::info!(provider_id = %provider_id, "Provider unregistered");
        }
        removed
    }

    pub async fn get_provider(&self, provider_id: &str) -> Option<Arc<dyn Provider>> {
        self.inner
            .registry
            .read()
            .await
            .iter()
            .find(|p| p.id() == provider_id)
            .cloned()
    }

    /// All registered providers, in registration order
    pub async fn get_all_providers(&self) -> Vec<Arc<dyn Provider>> {
        self.inner.snapshot().await
    }

    pub async fn provider_count(&self) -> usize {
        self.inner.registry.read().await.len()
    }

    // ── Selection ───────────────────────────────────────────────────────

    /// Providers currently eligible for selection, in registration order
    ///
    /// Probes every candidate; see [`AvailabilityTracker::available`].
    pub async fn get_available_providers(&self) -> Vec<Arc<dyn Provider>> {
        let providers = self.inner.snapshot().await;
        self.inner
            .availability
            .available(&providers, &self.inner.metrics)
            .await
    }

    /// Run availability and the strategy once, without calling the provider
    pub async fn select_provider(
        &self,
        context: Option<&SelectionContext>,
    ) -> Option<Arc<dyn Provider>> {
        let available = self.get_available_providers().await;
        let fresh;
        let context = match context {
            Some(context) => context,
            None => {
                fresh = SelectionContext::default();
                &fresh
            }
        };
        let strategy = self.current_strategy().await;
        self.select_with(strategy.as_ref(), &available, context).await
    }

    pub async fn set_strategy(&self, strategy: Arc<dyn SelectionStrategy>) {
        let mut slot = self.inner.strategy.write().await;
        tracing::info!(
            from = slot.name(),
            to = strategy.name(),
            "Selection strategy replaced"
        );
        *slot = strategy;
    }

    pub async fn strategy_name(&self) -> &'static str {
        self.inner.strategy.read().await.name()
    }

    async fn current_strategy(&self) -> Arc<dyn SelectionStrategy> {
        Arc::clone(&*self.inner.strategy.read().await)
    }

    async fn select_with(
        &self,
        strategy: &dyn SelectionStrategy,
        available: &[Arc<dyn Provider>],
        context: &SelectionContext,
    ) -> Option<Arc<dyn Provider>> {
        let started = Instant::now();
        let selected = strategy.select(available, context).await?;
        self.inner
            .metrics
            .record_selection(selected.id(), strategy.name(), started.elapsed());
        tracing::debug!(
            call_id = %context.call_id(),
            provider_id = %selected.id(),
            strategy = strategy.name(),
            available = available.len(),
            "Provider selected"
        );
        Some(selected)
    }

    // ── Dispatch ────────────────────────────────────────────────────────

    /// Send a chat request, retrying on other providers on failure
    ///
    /// # Errors
    ///
    /// - [`RelayError::NoAvailableProviders`] when no provider can be selected
    /// - [`RelayError::ExhaustedRetries`] when every attempt failed
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> RelayResult<ChatResponse> {
        let messages = self.prepare_messages(messages);
        let mut context = SelectionContext::new(messages.clone(), options.clone());
        let timeout = options.timeout.unwrap_or(self.inner.settings.request_timeout);
        let (messages, options) = (&messages, options);
        self.execute(Operation::Chat, &mut context, timeout, move |provider| async move {
            provider.chat(messages, options).await
        })
        .await
    }

    /// Open a chat stream, retrying on other providers until one opens
    ///
    /// Only opening the stream is retried. Once a stream is returned, the
    /// attempt counts as a success and errors inside the stream are passed
    /// through as-is.
    pub async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> RelayResult<ChatStream> {
        let messages = self.prepare_messages(messages);
        let mut context = SelectionContext::new(messages.clone(), options.clone());
        let timeout = options.timeout.unwrap_or(self.inner.settings.request_timeout);
        let (messages, options) = (&messages, options);
        self.execute(Operation::ChatStream, &mut context, timeout, move |provider| async move {
            provider.chat_stream(messages, options).await
        })
        .await
    }

    /// Generate images on providers that declare image support
    ///
    /// # Errors
    ///
    /// [`RelayError::ImageGenerationUnsupported`] without calling anything
    /// if no registered provider declares image support; otherwise as
    /// [`chat`](Self::chat).
    pub async fn generate_image(
        &self,
        prompt: &str,
        options: &ImageOptions,
    ) -> RelayResult<ImageResponse> {
        let providers = self.inner.snapshot().await;
        if !providers
            .iter()
            .any(|p| Operation::ImageGeneration.accepts(p.as_ref()))
        {
            return Err(RelayError::ImageGenerationUnsupported {
                registered: providers.len(),
            });
        }

        let mut context =
            SelectionContext::new(vec![ChatMessage::user(prompt)], ChatOptions::default());
        let timeout = options.timeout.unwrap_or(self.inner.settings.request_timeout);
        self.execute(
            Operation::ImageGeneration,
            &mut context,
            timeout,
            move |provider| async move { provider.generate_image(prompt, options).await },
        )
        .await
    }

    fn prepare_messages(&self, messages: &[ChatMessage]) -> Vec<ChatMessage> {
        match &self.inner.settings.language {
            Some(directive) => directive.apply(messages),
            None => messages.to_vec(),
        }
    }

    fn max_attempts(&self, candidates: usize) -> usize {
        self.inner
            .settings
            .max_retries
            .map_or(candidates, |n| n as usize)
            .max(1)
    }

    async fn execute<T, F, Fut>(
        &self,
        operation: Operation,
        context: &mut SelectionContext,
        timeout: Duration,
        call: F,
    ) -> RelayResult<T>
    where
        T: AttemptOutput,
        F: Fn(Arc<dyn Provider>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let registered = self.provider_count().await;
        let candidates = if operation == Operation::ImageGeneration {
            self.inner
                .registry
                .read()
                .await
                .iter()
                .filter(|p| operation.accepts(p.as_ref()))
                .count()
        } else {
            registered
        };
        let max_attempts = self.max_attempts(candidates);
        let call_id = context.call_id();

        let mut last_error: Option<RelayError> = None;
        let mut attempts_made = 0usize;

        for attempt in 0..max_attempts {
            let delay = self.inner.settings.retry.delay_before(attempt as u32);
            if !delay.is_zero() {
                tracing::debug!(
                    call_id = %call_id,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Waiting before retry"
                );
                tokio::time::sleep(delay).await;
            }

            let mut available = self.get_available_providers().await;
            available.retain(|p| operation.accepts(p.as_ref()));

            let strategy = self.current_strategy().await;
            let Some(provider) = self
                .select_with(strategy.as_ref(), &available, context)
                .await
            else {
                tracing::error!(
                    call_id = %call_id,
                    operation = operation.as_str(),
                    attempt = attempt + 1,
                    max_attempts = max_attempts,
                    registered = registered,
                    attempted = ?context.attempted(),
                    "No available providers"
                );
                return Err(RelayError::NoAvailableProviders {
                    registered,
                    attempted: context.attempted().to_vec(),
                });
            };

            let provider_id = provider.id().to_string();
            if context.has_attempted(&provider_id) {
                tracing::warn!(
                    call_id = %call_id,
                    provider_id = %provider_id,
                    strategy = strategy.name(),
                    "Strategy returned an already attempted provider, skipping"
                );
                continue;
            }

            attempts_made += 1;
            tracing::debug!(
                call_id = %call_id,
                operation = operation.as_str(),
                provider_id = %provider_id,
                attempt = attempts_made,
                max_attempts = max_attempts,
                timeout_ms = timeout.as_millis() as u64,
                "Dispatching to provider"
            );

            let started = Instant::now();
            let result = tokio::time::timeout(timeout, call(Arc::clone(&provider))).await;
            let latency = started.elapsed();

            let error = match result {
                Ok(Ok(output)) => {
                    let usage = output.usage();
                    strategy.update(
                        &provider_id,
                        true,
                        &SelectionFeedback::success(latency, usage),
                    );
                    self.inner.availability.breaker().record_success(&provider_id).await;
                    self.inner.metrics.record_success(
                        &provider_id,
                        latency,
                        usage.as_ref(),
                        provider.metadata().cost_per_token.as_ref(),
                    );
                    tracing::info!(
                        call_id = %call_id,
                        operation = operation.as_str(),
                        provider_id = %provider_id,
                        attempt = attempts_made,
                        latency_ms = latency.as_millis() as u64,
                        "Provider call succeeded"
                    );
                    return Ok(output);
                }
                Ok(Err(source)) => RelayError::Provider {
                    provider_id: provider_id.clone(),
                    attempt: attempts_made,
                    source,
                },
                Err(_elapsed) => RelayError::Timeout {
                    provider_id: provider_id.clone(),
                    attempt: attempts_made,
                    timeout_ms: timeout.as_millis() as u64,
                },
            };

            let message = error.to_string();
            tracing::warn!(
                call_id = %call_id,
                operation = operation.as_str(),
                provider_id = %provider_id,
                attempt = attempts_made,
                max_attempts = max_attempts,
                latency_ms = latency.as_millis() as u64,
                error = %message,
                "Provider call failed, excluding from retries"
            );
            context.record_attempt(&provider_id);
            strategy.update(
                &provider_id,
                false,
                &SelectionFeedback::failure(latency, message.clone()),
            );
            self.inner.availability.breaker().record_failure(&provider_id).await;
            self.inner
                .metrics
                .record_failure(&provider_id, latency, &message);
            last_error = Some(error);
        }

        tracing::error!(
            call_id = %call_id,
            operation = operation.as_str(),
            attempts = attempts_made,
            max_attempts = max_attempts,
            attempted = ?context.attempted(),
            "All attempts exhausted"
        );
        Err(match last_error {
            Some(last) => RelayError::ExhaustedRetries {
                attempts: attempts_made,
                attempted: context.attempted().to_vec(),
                last: Box::new(last),
            },
            None => RelayError::AllProvidersFailed,
        })
    }

    // ── Health checks ───────────────────────────────────────────────────

    /// Probe every registered provider once, including excluded ones
    pub async fn run_health_checks(&self) -> Vec<(String, ProbeOutcome)> {
        self.inner.run_health_checks().await
    }

    /// Probe all providers every `interval` in a background task
    ///
    /// Replaces a running background task. The first round runs one
    /// `interval` after the call. Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if `interval` is zero.
    pub fn start_health_checks(&self, interval: Duration) -> RelayResult<()> {
        if interval.is_zero() {
            return Err(RelayError::Config(
                "health check interval must be greater than 0".to_string(),
            ));
        }

        let weak: Weak<DispatcherInner> = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.run_health_checks().await;
            }
        });

        let mut slot = self
            .inner
            .health_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
        tracing::info!(
            interval_ms = interval.as_millis() as u64,
            "Background health checks started"
        );
        Ok(())
    }

    /// Start background checks at the configured interval, if one was set
    pub fn start_configured_health_checks(&self, config: &Config) -> RelayResult<bool> {
        match config.health.check_interval() {
            Some(interval) => self.start_health_checks(interval).map(|()| true),
            None => Ok(false),
        }
    }

    /// Stop background checks; returns false if none were running
    pub fn stop_health_checks(&self) -> bool {
        let handle = self
            .inner
            .health_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match handle {
            Some(handle) => {
                handle.abort();
                tracing::info!("Background health checks stopped");
                true
            }
            None => false,
        }
    }

    pub fn health_checks_running(&self) -> bool {
        self.inner
            .health_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    // ── Metrics ─────────────────────────────────────────────────────────

    pub fn get_metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn request_history(&self, filter: &HistoryFilter) -> Vec<RequestHistoryEntry> {
        self.inner.metrics.history(filter)
    }

    pub fn metrics_collector(&self) -> &MetricsCollector {
        &self.inner.metrics
    }

    /// Prometheus text exposition of the dispatcher's series
    pub fn render_prometheus(&self) -> RelayResult<String> {
        Ok(self.inner.metrics.render_prometheus()?)
    }

    pub async fn circuit_state(&self, provider_id: &str) -> CircuitState {
        self.inner.availability.breaker().state(provider_id).await
    }

    /// Stop background checks and clear the registry
    ///
    /// Safe to call more than once. Metrics are kept.
    pub async fn dispose(&self) {
        self.stop_health_checks();
        self.inner.registry.write().await.clear();
        self.inner.availability.clear().await;
        tracing::info!("Dispatcher disposed");
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("settings", &self.inner.settings)
            .finish_non_exhaustive()
    }
}
