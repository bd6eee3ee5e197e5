//! Provider adapters
//!
//! One adapter per LLM vendor, all behind [`ProviderAdapter`]. An adapter maps the
//! generation mode to its own model tier, serializes the conversation for its vendor,
//! retries transient failures and hands the reply text to the response parser. It never
//! touches storage.

mod anthropic;
mod gemini;
mod http;
mod openai;
mod retry;

pub use anthropic::AnthropicAdapter;
pub use gemini::GeminiAdapter;
pub use http::VendorClient;
pub use openai::OpenAiAdapter;
pub use retry::RetryPolicy;

use async_trait::async_trait;
use std::sync::Arc;

use crate::providers::{Provider, ProviderConfig};
use crate::types::{Answer, GenerationMode, Message, TokenUsage};

/// Successful adapter call
#[derive(Debug, Clone)]
pub struct ProviderReply {
    /// Model id the request was sent to
    pub model: String,
    pub raw_text: String,
    pub answer: Answer,
    /// Vendor-reported counts, verbatim
    pub usage: TokenUsage,
}

/// Uniform capability every vendor integration provides
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    /// Vendor model id used for a mode
    fn model_for(&self, mode: GenerationMode) -> String;

    async fn generate(
        &self,
        messages: &[Message],
        mode: GenerationMode,
    ) -> Result<ProviderReply, ProviderError>;
}

/// Adapter failure, classified for retry
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("{provider} rate limited the request (HTTP {status}): {message}")]
    RateLimited {
        provider: Provider,
        status: u16,
        message: String,
    },
    #[error("{provider} is overloaded (HTTP {status}): {message}")]
    Overloaded {
        provider: Provider,
        status: u16,
        message: String,
    },
    #[error("{provider} rejected the API key (HTTP {status})")]
    Auth { provider: Provider, status: u16 },
    #[error("{provider} API error (HTTP {status}): {message}")]
    Api {
        provider: Provider,
        status: u16,
        message: String,
        transient: bool,
    },
    #[error("{provider} network error: {message}")]
    Network { provider: Provider, message: String },
    #[error("{provider} request timed out")]
    Timeout { provider: Provider },
    #[error("{provider} returned an unreadable response: {message}")]
    InvalidResponse { provider: Provider, message: String },
    #[error("No API key configured for {0}")]
    MissingApiKey(Provider),
}

impl ProviderError {
    /// Whether a retry has a chance of succeeding
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. }
            | Self::Overloaded { .. }
            | Self::Network { .. }
            | Self::Timeout { .. } => true,
            Self::Api { transient, .. } => *transient,
            Self::Auth { .. } | Self::InvalidResponse { .. } | Self::MissingApiKey(_) => false,
        }
    }

    pub fn provider(&self) -> Provider {
        match self {
            Self::RateLimited { provider, .. }
            | Self::Overloaded { provider, .. }
            | Self::Auth { provider, .. }
            | Self::Api { provider, .. }
            | Self::Network { provider, .. }
            | Self::Timeout { provider }
            | Self::InvalidResponse { provider, .. } => *provider,
            Self::MissingApiKey(provider) => *provider,
        }
    }

    /// HTTP status, when the vendor answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RateLimited { status, .. }
            | Self::Overloaded { status, .. }
            | Self::Auth { status, .. }
            | Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Build the adapter for a provider
pub fn build_adapter(
    provider: Provider,
    config: &ProviderConfig,
    retry: RetryPolicy,
) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
    if !config.has_api_key() {
        return Err(ProviderError::MissingApiKey(provider));
    }
    let client = VendorClient::new(provider, retry);
    Ok(match provider {
        Provider::OpenAI => Arc::new(OpenAiAdapter::new(config, client)),
        Provider::Anthropic => Arc::new(AnthropicAdapter::new(config, client)),
        Provider::Google => Arc::new(GeminiAdapter::new(config, client)),
    })
}
