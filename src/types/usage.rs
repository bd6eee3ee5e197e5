//! Token accounting types

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};

use crate::providers::Provider;

/// Vendor-reported token counts for one call. Copied verbatim, never estimated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Extended-reasoning tokens, when the vendor reports them separately
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_tokens: Option<u64>,
}

impl TokenUsage {
    pub const fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            thinking_tokens: None,
        }
    }

    #[must_use]
    pub const fn with_thinking(mut self, thinking_tokens: u64) -> Self {
        self.thinking_tokens = Some(thinking_tokens);
        self
    }

    pub fn total(&self) -> u64 {
        self.input_tokens
            .saturating_add(self.output_tokens)
            .saturating_add(self.thinking_tokens.unwrap_or(0))
    }

    pub fn is_zero(&self) -> bool {
        self.total() == 0
    }
}

impl Add for TokenUsage {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        let thinking_tokens = match (self.thinking_tokens, rhs.thinking_tokens) {
            (None, None) => None,
            (a, b) => Some(a.unwrap_or(0).saturating_add(b.unwrap_or(0))),
        };
        Self {
            input_tokens: self.input_tokens.saturating_add(rhs.input_tokens),
            output_tokens: self.output_tokens.saturating_add(rhs.output_tokens),
            thinking_tokens,
        }
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

/// Token usage attributed to one provider model within a generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelTokenUsage {
    pub provider: Provider,
    /// Pricing-table model key
    pub model: String,
    pub usage: TokenUsage,
}

impl ModelTokenUsage {
    pub fn new(provider: Provider, model: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            provider,
            model: model.into(),
            usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_keeps_thinking_optional() {
        let a = TokenUsage::new(10, 5);
        let b = TokenUsage::new(1, 2);
        assert_eq!((a + b).thinking_tokens, None);

        let c = TokenUsage::new(1, 1).with_thinking(7);
        let sum = a + c;
        assert_eq!(sum.input_tokens, 11);
        assert_eq!(sum.output_tokens, 6);
        assert_eq!(sum.thinking_tokens, Some(7));
        assert_eq!(sum.total(), 24);
    }
}
