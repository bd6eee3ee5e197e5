//! Coercion of loosely shaped reply documents into answer fields
//!
//! Vendors and older prompt revisions disagree on field names and value types. Everything
//! here maps those variants onto one candidate shape so nothing untyped leaves the parser.

use serde_json::{Map, Value};

use crate::types::StructuredContent;

/// Keys that may carry the short answer, in priority order
pub const SHORT_ANSWER_KEYS: &[&str] = &[
    "short_answer",
    "shortAnswer",
    "final_answer",
    "finalAnswer",
    "answer",
    "result",
];

/// Keys that may carry the solution steps, in priority order
pub const STEPS_KEYS: &[&str] = &["steps", "solution_steps", "solutionSteps", "work", "reasoning"];

const STRUCTURED_KEYS: &[&str] = &["structured_content", "structuredContent"];

/// Wrapper objects some replies nest the real payload under
const ENVELOPE_KEYS: &[&str] = &["solution", "response", "data", "answer", "result"];

const STEP_TITLE_KEYS: &[&str] = &["title", "step", "label", "name", "heading"];
const STEP_BODY_KEYS: &[&str] = &["content", "description", "text", "explanation", "detail"];

/// Answer fields recovered by one strategy, before a confidence tier is assigned
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Candidate {
    pub short_answer: String,
    pub steps: Vec<String>,
    pub structured_content: Option<StructuredContent>,
    pub warnings: Vec<String>,
}

/// How much of a document must be present for it to count as a success
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// Short answer plus steps or structured content
    Complete,
    /// Short answer only
    ShortAnswer,
}

/// Coerce a parsed document into a candidate
pub fn coerce_document(value: &Value, requirement: Requirement) -> Result<Candidate, String> {
    let Some(obj) = value.as_object() else {
        return Err(format!("expected an object, found {}", type_name(value)));
    };
    let obj = unwrap_envelope(obj);

    let short_answer = SHORT_ANSWER_KEYS
        .iter()
        .filter_map(|key| obj.get(*key))
        .find_map(convert_to_string)
        .ok_or_else(|| "no short answer field".to_string())?;

    let mut warnings = Vec::new();

    let steps = match STEPS_KEYS.iter().find_map(|key| obj.get(*key)) {
        Some(value) if !value.is_null() => Some(convert_to_steps(value)),
        _ => obj
            .get("explanation")
            .and_then(convert_to_string)
            .map(|text| vec![text]),
    };

    let structured_content = match STRUCTURED_KEYS.iter().find_map(|key| obj.get(*key)) {
        None | Some(Value::Null) => None,
        Some(raw) => match serde_json::from_value::<StructuredContent>(raw.clone()) {
            Ok(content) => Some(content),
            Err(e) => {
                warnings.push(format!("Ignored malformed structured content: {e}"));
                None
            }
        },
    };

    if steps.is_none() && structured_content.is_none() {
        match requirement {
            Requirement::Complete => {
                return Err("short answer present but no steps or structured content".into());
            }
            Requirement::ShortAnswer => warnings.push("Reply contained no solution steps".into()),
        }
    }

    Ok(Candidate {
        short_answer,
        steps: steps.unwrap_or_default(),
        structured_content,
        warnings,
    })
}

/// Descend one level when the payload is wrapped, e.g. `{"solution": {...}}`
fn unwrap_envelope(obj: &Map<String, Value>) -> &Map<String, Value> {
    let has_short = |m: &Map<String, Value>| {
        SHORT_ANSWER_KEYS
            .iter()
            .any(|k| m.get(*k).is_some_and(|v| convert_to_string(v).is_some()))
    };
    if has_short(obj) {
        return obj;
    }
    ENVELOPE_KEYS
        .iter()
        .filter_map(|key| obj.get(*key).and_then(Value::as_object))
        .find(|inner| has_short(inner))
        .unwrap_or(obj)
}

/// Scalar to non-empty trimmed string. Arrays of scalars are joined.
pub fn convert_to_string(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(convert_to_string)
            .collect::<Vec<_>>()
            .join(", "),
        Value::Null | Value::Object(_) => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Any steps-like value to a list of strings
pub fn convert_to_steps(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(convert_step).collect(),
        other => convert_step(other).into_iter().collect(),
    }
}

fn convert_step(value: &Value) -> Option<String> {
    match value {
        Value::Object(obj) => {
            let title = STEP_TITLE_KEYS
                .iter()
                .find_map(|k| obj.get(*k).and_then(convert_to_string));
            let body = STEP_BODY_KEYS
                .iter()
                .find_map(|k| obj.get(*k).and_then(convert_to_string));
            match (title, body) {
                (Some(title), Some(body)) => Some(format!("{title}: {body}")),
                (Some(text), None) | (None, Some(text)) => Some(text),
                (None, None) if obj.is_empty() => None,
                (None, None) => Some(Value::Object(obj.clone()).to_string()),
            }
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(convert_step).collect();
            (!parts.is_empty()).then(|| parts.join(" "))
        }
        other => convert_to_string(other),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
