//! Homework solver - multi-provider answer generation
//!
//! This library routes a question to one or more LLM providers, turns their free-text
//! replies into typed answers with a confidence-scored parser cascade, and meters every
//! generation against a per-user monthly entitlement.

#![allow(clippy::uninlined_format_args)] // Style preference
#![allow(clippy::format_push_string)] // Performance improvement but stylistic
#![allow(clippy::return_self_not_must_use)] // Builder pattern is clear enough
#![allow(clippy::items_after_statements)] // Locally-scoped use statements are fine

pub mod cli;
pub mod config;
pub mod llm;
pub mod logger;
pub mod orchestrator;
pub mod parser;
pub mod pricing;
pub mod prompt;
pub mod providers;
pub mod types;
pub mod usage;

// Re-export important structs and functions for easier testing
pub use config::Config;
pub use llm::{ProviderAdapter, ProviderError, ProviderReply, RetryPolicy};
pub use orchestrator::{Generation, Orchestrator, OrchestratorError, ProviderResult};
pub use parser::ResponseParser;
pub use pricing::{PricingError, PricingTable};
pub use providers::{Provider, ProviderConfig};
pub use types::{
    Answer, Confidence, ErrorCode, GenerationMode, ImageAttachment, Message, ModelTokenUsage,
    ParseMethod, TokenUsage,
};
pub use usage::{EntitlementService, UsageCheck, UsageError};
