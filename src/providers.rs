//! LLM Provider configuration.
//!
//! Single source of truth for supported providers, their defaults and the
//! model each one uses per generation mode.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::GenerationMode;

/// Supported LLM providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    OpenAI,
    Anthropic,
    Google,
}

impl Provider {
    /// All available providers, in dispatch order
    pub const ALL: &'static [Provider] = &[Provider::OpenAI, Provider::Anthropic, Provider::Google];

    /// Provider name as used in config files and CLI
    pub const fn name(&self) -> &'static str {
        match self {
            Self::OpenAI => "openai",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
        }
    }

    /// Cheap, fast model used for FAST mode
    pub const fn default_fast_model(&self) -> &'static str {
        match self {
            Self::OpenAI => "gpt-4o-mini",
            Self::Anthropic => "claude-haiku-4-5",
            Self::Google => "gemini-2.5-flash",
        }
    }

    /// Balanced model used for REGULAR mode
    pub const fn default_model(&self) -> &'static str {
        match self {
            Self::OpenAI => "gpt-4o",
            Self::Anthropic => "claude-sonnet-4-5",
            Self::Google => "gemini-2.5-pro",
        }
    }

    /// Strongest tier, used for EXPERT mode
    pub const fn default_expert_model(&self) -> &'static str {
        match self {
            Self::OpenAI => "o3",
            Self::Anthropic => "claude-opus-4-1",
            Self::Google => "gemini-2.5-pro",
        }
    }

    /// Public API root
    pub const fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAI => "https://api.openai.com",
            Self::Anthropic => "https://api.anthropic.com",
            Self::Google => "https://generativelanguage.googleapis.com",
        }
    }

    /// Environment variable name for the API key
    pub const fn api_key_env(&self) -> &'static str {
        match self {
            Self::OpenAI => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::Google => "GOOGLE_API_KEY",
        }
    }

    /// Get all provider names as strings
    pub fn all_names() -> Vec<&'static str> {
        Self::ALL.iter().map(Self::name).collect()
    }
}

impl FromStr for Provider {
    type Err = ProviderConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        // Legacy vendor aliases
        let normalized = match lower.as_str() {
            "claude" => "anthropic",
            "gemini" => "google",
            other => other,
        };

        Self::ALL
            .iter()
            .find(|p| p.name() == normalized)
            .copied()
            .ok_or_else(|| ProviderConfigError::Unknown(s.to_string()))
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Provider configuration error
#[derive(Debug, thiserror::Error)]
pub enum ProviderConfigError {
    #[error("Unknown provider: {0}. Supported: openai, anthropic, google")]
    Unknown(String),
}

/// Per-provider configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// API key (loaded from env or config)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key: String,
    /// API root override (tests, proxies)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Model for FAST mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fast_model: Option<String>,
    /// Model for REGULAR mode
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model: String,
    /// Model for EXPERT mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expert_model: Option<String>,
    /// Output token cap sent with each request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

impl ProviderConfig {
    /// Create config with defaults for a provider
    pub fn with_defaults(provider: Provider) -> Self {
        Self {
            api_key: String::new(),
            base_url: None,
            fast_model: Some(provider.default_fast_model().to_string()),
            model: provider.default_model().to_string(),
            expert_model: Some(provider.default_expert_model().to_string()),
            max_output_tokens: None,
        }
    }

    /// Resolve the model tiers, falling back to provider defaults
    pub fn model_tiers(&self, provider: Provider) -> ModelTiers {
        ModelTiers {
            fast: self
                .fast_model
                .clone()
                .unwrap_or_else(|| provider.default_fast_model().to_string()),
            regular: if self.model.is_empty() {
                provider.default_model().to_string()
            } else {
                self.model.clone()
            },
            expert: self
                .expert_model
                .clone()
                .unwrap_or_else(|| provider.default_expert_model().to_string()),
        }
    }

    /// Get effective API root (configured or default)
    pub fn effective_base_url(&self, provider: Provider) -> String {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| provider.default_base_url())
            .trim_end_matches('/')
            .to_string()
    }

    /// Get effective output token cap
    pub fn effective_max_output_tokens(&self) -> u32 {
        self.max_output_tokens.unwrap_or(4096)
    }

    /// Check if this config has an API key set
    pub fn has_api_key(&self) -> bool {
        !self.api_key.is_empty()
    }
}

/// Adapter-local mapping from generation mode to vendor model id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelTiers {
    pub fast: String,
    pub regular: String,
    pub expert: String,
}

impl ModelTiers {
    pub fn defaults(provider: Provider) -> Self {
        ProviderConfig::default().model_tiers(provider)
    }

    pub fn for_mode(&self, mode: GenerationMode) -> &str {
        match mode {
            GenerationMode::Fast => &self.fast,
            GenerationMode::Regular => &self.regular,
            GenerationMode::Expert => &self.expert,
        }
    }
}
