//! Shared data model
//!
//! - Conversation messages and generation modes
//! - Parsed answers, confidence tiers and the parse attempt log
//! - Token usage

mod answer;
mod message;
mod usage;

pub use answer::{
    Answer, ChoiceOption, Confidence, ContentSection, ErrorCode, ParseAttempt, ParseMethod,
    StructuredContent,
};
pub use message::{GenerationMode, ImageAttachment, Message, Role};
pub use usage::{ModelTokenUsage, TokenUsage};
