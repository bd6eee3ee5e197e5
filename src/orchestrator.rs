//! Mode-based routing across provider adapters
//!
//! FAST calls one adapter and lets its error propagate. REGULAR and EXPERT fan out to
//! every configured adapter, wait for all of them to settle, and turn each failure into
//! a placeholder result so the caller always gets one entry per provider.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::llm::{ProviderAdapter, ProviderError, ProviderReply, build_adapter};
use crate::pricing::{PricingError, PricingTable};
use crate::providers::Provider;
use crate::types::{Answer, ErrorCode, GenerationMode, Message, ModelTokenUsage, TokenUsage};

/// Default per-provider deadline
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(90);

/// Why a provider slot holds a placeholder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderFailure {
    pub code: ErrorCode,
    pub message: String,
}

/// Outcome of one adapter call within a generation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderResult {
    pub provider: Provider,
    pub model: String,
    pub raw_text: String,
    pub answer: Answer,
    pub usage: TokenUsage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ProviderFailure>,
    pub latency_ms: u64,
}

impl ProviderResult {
    fn from_reply(provider: Provider, reply: ProviderReply, latency_ms: u64) -> Self {
        Self {
            provider,
            model: reply.model,
            raw_text: reply.raw_text,
            answer: reply.answer,
            usage: reply.usage,
            error: None,
            latency_ms,
        }
    }

    /// Uniform placeholder for a provider that errored, timed out or panicked
    pub fn failed(
        provider: Provider,
        model: impl Into<String>,
        message: impl Into<String>,
        latency_ms: u64,
    ) -> Self {
        let message = message.into();
        Self {
            provider,
            model: model.into(),
            raw_text: String::new(),
            answer: Answer::failed(ErrorCode::NetworkError, &message, vec![message.clone()]),
            usage: TokenUsage::default(),
            error: Some(ProviderFailure {
                code: ErrorCode::NetworkError,
                message,
            }),
            latency_ms,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Everything one `generate` call produced
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Generation {
    pub mode: GenerationMode,
    pub primary: Answer,
    pub primary_provider: Provider,
    /// One entry per adapter invoked, in configured order
    pub providers: Vec<ProviderResult>,
}

impl Generation {
    /// True when every provider errored
    pub fn all_failed(&self) -> bool {
        self.providers.iter().all(ProviderResult::is_error)
    }

    /// Token usage to bill, per model. Errored providers contribute nothing.
    pub fn token_usage(&self) -> Vec<ModelTokenUsage> {
        self.providers
            .iter()
            .filter(|r| !r.is_error() && !r.usage.is_zero())
            .map(|r| ModelTokenUsage::new(r.provider, r.model.clone(), r.usage))
            .collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("No providers are configured")]
    NoProviders,
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("Configured model cannot be metered: {0}")]
    Unpriced(#[from] PricingError),
}

/// Routes generations to adapters according to mode
pub struct Orchestrator {
    adapters: Vec<Arc<dyn ProviderAdapter>>,
    fast_provider: Provider,
    provider_timeout: Duration,
}

impl Orchestrator {
    /// Adapters are dispatched, and results reported, in the given order
    pub fn new(adapters: Vec<Arc<dyn ProviderAdapter>>) -> Self {
        Self {
            adapters,
            fast_provider: Provider::OpenAI,
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_fast_provider(mut self, provider: Provider) -> Self {
        self.fast_provider = provider;
        self
    }

    #[must_use]
    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    /// Build adapters for every provider with an API key
    pub fn from_config(config: &Config) -> Result<Self, OrchestratorError> {
        config.check_models_priced(&PricingTable::standard())?;
        let mut adapters = Vec::new();
        for (provider, provider_config) in config.configured_providers() {
            adapters.push(build_adapter(provider, provider_config, config.retry)?);
        }
        if adapters.is_empty() {
            return Err(OrchestratorError::NoProviders);
        }
        Ok(Self::new(adapters)
            .with_fast_provider(config.fast_provider)
            .with_provider_timeout(Duration::from_secs(config.orchestrator.provider_timeout_secs)))
    }

    pub fn providers(&self) -> Vec<Provider> {
        self.adapters.iter().map(|a| a.provider()).collect()
    }

    /// Run one generation
    pub async fn generate(
        &self,
        mode: GenerationMode,
        messages: &[Message],
    ) -> Result<Generation, OrchestratorError> {
        if self.adapters.is_empty() {
            return Err(OrchestratorError::NoProviders);
        }
        if mode.is_multi_provider() {
            Ok(self.generate_parallel(mode, messages).await)
        } else {
            self.generate_single(mode, messages).await
        }
    }

    fn fast_adapter(&self) -> Option<&Arc<dyn ProviderAdapter>> {
        self.adapters
            .iter()
            .find(|a| a.provider() == self.fast_provider)
            .or_else(|| self.adapters.first())
    }

    async fn generate_single(
        &self,
        mode: GenerationMode,
        messages: &[Message],
    ) -> Result<Generation, OrchestratorError> {
        let adapter = self.fast_adapter().ok_or(OrchestratorError::NoProviders)?;
        let provider = adapter.provider();
        let start = Instant::now();

        let reply = tokio::time::timeout(self.provider_timeout, adapter.generate(messages, mode))
            .await
            .map_err(|_| ProviderError::Timeout { provider })??;

        let result = ProviderResult::from_reply(provider, reply, elapsed_ms(start));
        tracing::info!(
            %provider,
            %mode,
            confidence = ?result.answer.confidence,
            latency_ms = result.latency_ms,
            "single-provider generation finished"
        );

        Ok(Generation {
            mode,
            primary: result.answer.clone(),
            primary_provider: provider,
            providers: vec![result],
        })
    }

    async fn generate_parallel(&self, mode: GenerationMode, messages: &[Message]) -> Generation {
        let messages: Arc<[Message]> = Arc::from(messages);
        let timeout = self.provider_timeout;

        let (slots, handles): (Vec<_>, Vec<_>) = self
            .adapters
            .iter()
            .map(|adapter| {
                let adapter = Arc::clone(adapter);
                let messages = Arc::clone(&messages);
                let provider = adapter.provider();
                let model = adapter.model_for(mode);
                let slot = (provider, model.clone());
                let handle = tokio::spawn(async move {
                    let start = Instant::now();
                    match tokio::time::timeout(timeout, adapter.generate(&messages, mode)).await {
                        Ok(Ok(reply)) => {
                            ProviderResult::from_reply(provider, reply, elapsed_ms(start))
                        }
                        Ok(Err(e)) => {
                            crate::log_warn!("⚠️ {} failed: {}", provider, e);
                            ProviderResult::failed(provider, model, e.to_string(), elapsed_ms(start))
                        }
                        Err(_) => {
                            crate::log_warn!(
                                "⏱️ {} timed out after {}s",
                                provider,
                                timeout.as_secs()
                            );
                            ProviderResult::failed(
                                provider,
                                model,
                                format!("{provider} timed out after {}s", timeout.as_secs()),
                                elapsed_ms(start),
                            )
                        }
                    }
                });
                (slot, handle)
            })
            .unzip();

        let providers: Vec<ProviderResult> = slots
            .into_iter()
            .zip(join_all(handles).await)
            .map(|((provider, model), joined)| {
                joined.unwrap_or_else(|e| {
                    crate::log_error!("💥 {} task failed: {}", provider, e);
                    ProviderResult::failed(provider, model, format!("{provider} task failed: {e}"), 0)
                })
            })
            .collect();

        let primary_index = select_primary(&providers);
        let failed = providers.iter().filter(|r| r.is_error()).count();
        tracing::info!(
            %mode,
            providers = providers.len(),
            failed,
            primary = %providers[primary_index].provider,
            "multi-provider generation finished"
        );

        Generation {
            mode,
            primary: providers[primary_index].answer.clone(),
            primary_provider: providers[primary_index].provider,
            providers,
        }
    }
}

/// Index of the highest-confidence non-error result; earlier entries win ties.
/// Falls back to the first entry when everything errored.
pub fn select_primary(results: &[ProviderResult]) -> usize {
    let mut best: Option<usize> = None;
    for (i, result) in results.iter().enumerate() {
        if result.is_error() {
            continue;
        }
        match best {
            Some(b) if results[b].answer.confidence >= result.answer.confidence => {}
            _ => best = Some(i),
        }
    }
    best.unwrap_or(0)
}

#[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}
