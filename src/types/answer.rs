//! Parsed answer types
//!
//! `Answer` is the only shape that leaves the parser. Every vendor reply, however
//! malformed, is coerced into it; callers never branch on reply format.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, IntoStaticStr};

/// Coarse quality tier attached to a parsed answer. A policy signal, not a probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Confidence {
    Failed,
    Low,
    Medium,
    High,
}

impl Confidence {
    /// Numeric value of the tier
    pub const fn value(self) -> f64 {
        match self {
            Self::High => 0.9,
            Self::Medium => 0.7,
            Self::Low => 0.5,
            Self::Failed => 0.0,
        }
    }
}

/// Which parser strategy produced the answer
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ParseMethod {
    /// The whole reply was a valid structured document
    Direct,
    /// Valid after stripping fences, comments, trailing commas and smart quotes
    Cleanup,
    /// A balanced `{...}` literal found inside surrounding text
    Extraction,
    /// A short-answer field recovered by permissive patterns
    Pattern,
    /// Short answer and steps scraped independently from raw text
    Partial,
    /// Nothing usable
    Failed,
}

/// Stable failure codes surfaced on answers and provider results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    EmptyResponse,
    ParseFailed,
    NetworkError,
}

/// One entry of the parser's attempt log. Observability metadata only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseAttempt {
    pub method: ParseMethod,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ParseAttempt {
    pub fn succeeded(method: ParseMethod) -> Self {
        Self {
            method,
            success: true,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(method: ParseMethod, error: impl Into<String>) -> Self {
        Self {
            method,
            success: false,
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }
}

/// One option of a multiple-choice question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ChoiceOption {
    /// Option label such as "A"
    pub label: String,
    /// Option text
    pub text: String,
}

/// A titled block of a long-form answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ContentSection {
    pub title: String,
    pub body: String,
}

/// Typed payload some questions carry in addition to (or instead of) steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StructuredContent {
    /// Multiple-choice question with the labels of the correct options
    MultipleChoice {
        options: Vec<ChoiceOption>,
        correct: Vec<String>,
    },
    /// A numeric result with an optional unit
    Numeric {
        value: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unit: Option<String>,
    },
    /// Essay-style answer broken into sections
    Sections { sections: Vec<ContentSection> },
}

/// Typed answer produced by the response parser
///
/// Serialised with a derived `confidenceScore` in [0, 1] next to the `confidence` tier.
/// The score is ignored when deserialising; the tier is authoritative.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    /// Always non-empty
    pub short_answer: String,
    /// Never absent; possibly empty
    pub steps: Vec<String>,
    pub confidence: Confidence,
    pub parse_method: ParseMethod,
    pub warnings: Vec<String>,
    pub partial_failure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<StructuredContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorCode>,
    #[serde(default)]
    pub attempts: Vec<ParseAttempt>,
}

impl Answer {
    /// Terminal answer carrying a failure code and diagnostic steps
    pub fn failed(code: ErrorCode, reason: &str, diagnostics: Vec<String>) -> Self {
        let reason = reason.trim();
        let short_answer = if reason.is_empty() {
            format!("Error: {code}")
        } else {
            format!("Error: {reason}")
        };
        Self {
            short_answer,
            steps: diagnostics,
            confidence: Confidence::Failed,
            parse_method: ParseMethod::Failed,
            warnings: Vec::new(),
            partial_failure: false,
            structured_content: None,
            error: Some(code),
            attempts: Vec::new(),
        }
    }

    /// Numeric confidence of this answer
    pub fn confidence_score(&self) -> f64 {
        self.confidence.value()
    }

    pub fn is_failed(&self) -> bool {
        self.confidence == Confidence::Failed
    }
}

impl Serialize for Answer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Answer", 10)?;
        state.serialize_field("shortAnswer", &self.short_answer)?;
        state.serialize_field("steps", &self.steps)?;
        state.serialize_field("confidence", &self.confidence)?;
        state.serialize_field("confidenceScore", &self.confidence_score())?;
        state.serialize_field("parseMethod", &self.parse_method)?;
        state.serialize_field("warnings", &self.warnings)?;
        state.serialize_field("partialFailure", &self.partial_failure)?;
        match &self.structured_content {
            Some(content) => state.serialize_field("structuredContent", content)?,
            None => state.skip_field("structuredContent")?,
        }
        match &self.error {
            Some(code) => state.serialize_field("error", code)?,
            None => state.skip_field("error")?,
        }
        state.serialize_field("attempts", &self.attempts)?;
        state.end()
    }
}
