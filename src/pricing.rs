//! Model pricing table and cost calculation.
//!
//! Prices are USD per million tokens. The table is the single source of truth for
//! unit prices; reporting code consumes the costs computed here verbatim.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::{ModelTokenUsage, TokenUsage};

const PER_MILLION: f64 = 1_000_000.0;

/// Dated snapshot suffixes such as `-2024-08-06` or `-20250929`
static SNAPSHOT_SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"-(\d{4}-\d{2}-\d{2}|\d{8})$").expect("Should compile: SNAPSHOT_SUFFIX_RE")
});

/// Per-million-token prices for one model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input: f64,
    pub output: f64,
    /// Extended-reasoning rate. `None` when the vendor already folds reasoning
    /// into the output count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<f64>,
}

impl ModelPrice {
    pub const fn new(input: f64, output: f64) -> Self {
        Self {
            input,
            output,
            thinking: None,
        }
    }

    #[must_use]
    pub const fn with_thinking(mut self, thinking: f64) -> Self {
        self.thinking = Some(thinking);
        self
    }

    /// Cost of one token bucket at these prices
    #[allow(clippy::cast_precision_loss)] // Token counts never approach 2^52
    pub fn cost(&self, usage: &TokenUsage) -> f64 {
        let input = usage.input_tokens as f64 / PER_MILLION * self.input;
        let output = usage.output_tokens as f64 / PER_MILLION * self.output;
        let thinking = match (self.thinking, usage.thinking_tokens) {
            (Some(price), Some(tokens)) if tokens > 0 => tokens as f64 / PER_MILLION * price,
            _ => 0.0,
        };
        input + output + thinking
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PricingError {
    #[error("No price defined for model '{0}'")]
    UnknownModel(String),
}

/// Model key to price lookup with legacy aliases
#[derive(Debug, Clone)]
pub struct PricingTable {
    prices: HashMap<String, ModelPrice>,
    aliases: HashMap<String, String>,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl PricingTable {
    /// Empty table, for tests and custom deployments
    pub fn empty() -> Self {
        Self {
            prices: HashMap::new(),
            aliases: HashMap::new(),
        }
    }

    /// Current vendor list prices for every model the adapters use by default
    pub fn standard() -> Self {
        Self::empty()
            // OpenAI reports reasoning inside completion tokens
            .with_model("gpt-4o-mini", ModelPrice::new(0.15, 0.60))
            .with_model("gpt-4o", ModelPrice::new(2.50, 10.00))
            .with_model("o3", ModelPrice::new(2.00, 8.00))
            .with_model("claude-haiku-4-5", ModelPrice::new(1.00, 5.00))
            .with_model("claude-sonnet-4-5", ModelPrice::new(3.00, 15.00))
            .with_model("claude-opus-4-1", ModelPrice::new(15.00, 75.00))
            .with_model(
                "gemini-2.5-flash",
                ModelPrice::new(0.30, 2.50).with_thinking(2.50),
            )
            .with_model(
                "gemini-2.5-pro",
                ModelPrice::new(1.25, 10.00).with_thinking(10.00),
            )
            // Retired keys still present in historical usage rows
            .with_alias("gpt-4-turbo", "gpt-4o")
            .with_alias("claude-3-5-sonnet", "claude-sonnet-4-5")
            .with_alias("gemini-1.5-pro", "gemini-2.5-pro")
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>, price: ModelPrice) -> Self {
        self.prices.insert(model.into(), price);
        self
    }

    #[must_use]
    pub fn with_alias(mut self, legacy: impl Into<String>, successor: impl Into<String>) -> Self {
        self.aliases.insert(legacy.into(), successor.into());
        self
    }

    /// Resolve a model key to its price.
    ///
    /// Exact key first, then a legacy alias, then the same two lookups with a dated
    /// snapshot suffix removed. Anything else is an error.
    pub fn price(&self, model: &str) -> Result<&ModelPrice, PricingError> {
        if let Some(price) = self.lookup(model) {
            return Ok(price);
        }
        let base = SNAPSHOT_SUFFIX_RE.replace(model, "");
        if base != model
            && let Some(price) = self.lookup(&base)
        {
            return Ok(price);
        }
        Err(PricingError::UnknownModel(model.to_string()))
    }

    fn lookup(&self, model: &str) -> Option<&ModelPrice> {
        self.prices.get(model).or_else(|| {
            self.aliases
                .get(model)
                .and_then(|successor| self.prices.get(successor))
        })
    }

    /// Cost of one token bucket for a model
    pub fn cost(&self, model: &str, usage: &TokenUsage) -> Result<f64, PricingError> {
        Ok(self.price(model)?.cost(usage))
    }

    /// Sum of per-bucket costs. Buckets are never blended before pricing.
    pub fn total_cost(&self, usages: &[ModelTokenUsage]) -> Result<f64, PricingError> {
        usages
            .iter()
            .try_fold(0.0, |acc, u| Ok(acc + self.cost(&u.model, &u.usage)?))
    }

    /// Priced model keys, sorted
    pub fn models(&self) -> Vec<(&str, &ModelPrice)> {
        let mut models: Vec<_> = self
            .prices
            .iter()
            .map(|(k, v)| (k.as_str(), v))
            .collect();
        models.sort_by(|a, b| a.0.cmp(b.0));
        models
    }

    /// Legacy keys and their successors, sorted
    pub fn aliases(&self) -> Vec<(&str, &str)> {
        let mut aliases: Vec<_> = self
            .aliases
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        aliases.sort_unstable();
        aliases
    }
}

/// Format a cost value for display.
///
/// Uses 4 decimal places for values under $0.01, 2 otherwise.
pub fn format_cost(cost: f64) -> String {
    if cost.abs() < 0.01 {
        format!("${cost:.4}")
    } else {
        format!("${cost:.2}")
    }
}
