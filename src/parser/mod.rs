//! Response Parser
//!
//! Turns a provider's raw reply into a typed [`Answer`]. Strategies run strictest first
//! and the first success wins; confidence degrades with each fallback instead of the
//! parse failing. Every attempt is kept in the answer's attempt log.

mod coerce;
mod strategies;

pub use coerce::{SHORT_ANSWER_KEYS, STEPS_KEYS};
pub use strategies::clean_document;

use crate::types::{Answer, Confidence, ErrorCode, ParseAttempt, ParseMethod};
use strategies::Strategy;

/// Cascade order with the confidence each stage earns
const CASCADE: &[(ParseMethod, Confidence, Strategy)] = &[
    (ParseMethod::Direct, Confidence::High, strategies::direct),
    (ParseMethod::Cleanup, Confidence::Medium, strategies::cleanup),
    (
        ParseMethod::Extraction,
        Confidence::Medium,
        strategies::extraction,
    ),
    (ParseMethod::Pattern, Confidence::Medium, strategies::pattern),
    (ParseMethod::Partial, Confidence::Low, strategies::partial),
];

/// Response parser for model replies
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseParser;

impl ResponseParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse a raw reply. Never fails; malformed input yields a lower-confidence answer.
    pub fn parse(&self, raw: &str) -> Answer {
        crate::log_debug!("🔍 Parser: Parsing response - {} chars", raw.len());

        if raw.trim().is_empty() {
            crate::log_debug!("🚨 Parser: Empty response");
            let mut answer = Answer::failed(
                ErrorCode::EmptyResponse,
                "Empty response from model",
                vec!["The model returned no text.".to_string()],
            );
            answer
                .attempts
                .push(ParseAttempt::failed(ParseMethod::Failed, "response was empty"));
            return answer;
        }

        let mut attempts = Vec::with_capacity(CASCADE.len());

        for &(method, confidence, strategy) in CASCADE {
            match strategy(raw) {
                Ok(candidate) => {
                    crate::log_debug!("✅ Parser: {} parse succeeded", method);
                    attempts.push(ParseAttempt::succeeded(method));
                    return Answer {
                        short_answer: candidate.short_answer,
                        steps: candidate.steps,
                        confidence,
                        parse_method: method,
                        warnings: candidate.warnings,
                        partial_failure: method == ParseMethod::Partial,
                        structured_content: candidate.structured_content,
                        error: None,
                        attempts,
                    };
                }
                Err(reason) => {
                    crate::log_debug!("❌ Parser: {} parse failed: {}", method, reason);
                    attempts.push(ParseAttempt::failed(method, reason));
                }
            }
        }

        crate::log_debug!(
            "🚨 Parser: All strategies failed. Preview: {}",
            raw.chars().take(200).collect::<String>()
        );

        let diagnostics = attempts
            .iter()
            .map(|a| {
                format!(
                    "{} parse failed: {}",
                    a.method,
                    a.error.as_deref().unwrap_or("unknown error")
                )
            })
            .collect();
        let mut answer = Answer::failed(
            ErrorCode::ParseFailed,
            "Could not parse model response",
            diagnostics,
        );
        answer.attempts = attempts;
        answer
    }
}

/// Parse with a default parser
pub fn parse(raw: &str) -> Answer {
    ResponseParser::new().parse(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_reply_is_direct_high() {
        let answer = parse(r#"{"short_answer": "x = 4", "steps": ["2x = 8", "x = 4"]}"#);
        assert_eq!(answer.confidence, Confidence::High);
        assert_eq!(answer.parse_method, ParseMethod::Direct);
        assert!(answer.warnings.is_empty());
        assert_eq!(answer.attempts.len(), 1);
        assert!(answer.attempts[0].success);
    }

    #[test]
    fn test_fenced_reply_is_cleanup_medium() {
        let answer = parse("```json\n{\"short_answer\": \"7\", \"steps\": [\"3 + 4\"]}\n```");
        assert_eq!(answer.confidence, Confidence::Medium);
        assert_eq!(answer.parse_method, ParseMethod::Cleanup);
        assert!(answer.warnings.iter().any(|w| w.contains("cleanup applied")));
        assert_eq!(answer.attempts.len(), 2);
        assert!(!answer.attempts[0].success);
    }

    #[test]
    fn test_empty_reply() {
        for raw in ["", "   \n\t "] {
            let answer = parse(raw);
            assert_eq!(answer.confidence, Confidence::Failed);
            assert_eq!(answer.error, Some(ErrorCode::EmptyResponse));
            assert!(answer.short_answer.starts_with("Error: "));
        }
    }

    #[test]
    fn test_partial_reply_is_low() {
        let answer = parse("Step 1: Factor\nStep 2: Solve\nAnswer: x = 3");
        assert_eq!(answer.confidence, Confidence::Low);
        assert!(answer.partial_failure);
        assert_eq!(answer.short_answer, "x = 3");
        assert_eq!(answer.steps, vec!["Factor", "Solve"]);
        assert_eq!(answer.attempts.len(), 5);
    }

    #[test]
    fn test_unparseable_reply_fails_with_diagnostics() {
        let answer = parse("I'm sorry, I can't help with that.");
        assert_eq!(answer.confidence, Confidence::Failed);
        assert_eq!(answer.error, Some(ErrorCode::ParseFailed));
        assert_eq!(answer.parse_method, ParseMethod::Failed);
        assert_eq!(answer.steps.len(), 5);
        assert!(answer.attempts.iter().all(|a| !a.success));
    }
}
