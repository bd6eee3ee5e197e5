//! Parsing strategies, strictest first
//!
//! Each strategy is a pure function from raw reply text to a candidate or a reason it
//! did not apply. None of them share state.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::coerce::{Candidate, Requirement, coerce_document, convert_to_steps};

pub type Strategy = fn(&str) -> Result<Candidate, String>;

/// The whole reply is a complete structured document
pub fn direct(raw: &str) -> Result<Candidate, String> {
    let value: Value = serde_json::from_str(raw.trim()).map_err(|e| e.to_string())?;
    coerce_document(&value, Requirement::Complete)
}

/// Valid once fences, comments, trailing commas and smart quotes are dealt with
pub fn cleanup(raw: &str) -> Result<Candidate, String> {
    let (cleaned, applied) = clean_document(raw);
    if applied.is_empty() {
        return Err("nothing to clean".into());
    }
    let value: Value = serde_json::from_str(&cleaned).map_err(|e| e.to_string())?;
    let mut candidate = coerce_document(&value, Requirement::ShortAnswer)?;
    candidate
        .warnings
        .insert(0, format!("cleanup applied: {}", applied.join(", ")));
    Ok(candidate)
}

/// First balanced `{...}` literal embedded in surrounding prose that parses
pub fn extraction(raw: &str) -> Result<Candidate, String> {
    let mut last_error = "no balanced object found".to_string();
    for literal in balanced_objects(raw) {
        let parsed = serde_json::from_str::<Value>(literal).or_else(|_| {
            let (cleaned, _) = clean_document(literal);
            serde_json::from_str::<Value>(&cleaned)
        });
        match parsed {
            Ok(value) => match coerce_document(&value, Requirement::ShortAnswer) {
                Ok(mut candidate) => {
                    candidate
                        .warnings
                        .insert(0, "Extracted structured reply from surrounding text".into());
                    return Ok(candidate);
                }
                Err(e) => last_error = e,
            },
            Err(e) => last_error = e.to_string(),
        }
    }
    Err(last_error)
}

static SHORT_ANSWER_FIELD_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Well-formed string value, tolerant of escapes
        r#""(?:short_answer|shortAnswer|final_answer|finalAnswer)"\s*:\s*"((?:[^"\\]|\\.)*)""#,
        r#""(?:answer|result)"\s*:\s*"((?:[^"\\]|\\.)*)""#,
        // Bare scalar value
        r#""(?:short_answer|shortAnswer|final_answer|finalAnswer|answer|result)"\s*:\s*(-?[\w.+\-/^*]+)"#,
        // Single quoted keys and values
        r"'(?:short_answer|shortAnswer|final_answer|finalAnswer|answer)'\s*:\s*'([^']+)'",
        // Unquoted keys
        r#"(?m)^\s*(?:short_answer|shortAnswer|final_answer|finalAnswer)\s*[:=]\s*"?([^"\n,}]+)"#,
        // Truncated string value
        r#""(?:short_answer|shortAnswer|final_answer|finalAnswer|answer)"\s*:\s*"([^"\n]+)"#,
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("Should compile: SHORT_ANSWER_FIELD_RES"))
    .collect()
});

static STEPS_ARRAY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)"(?:steps|solution_steps|solutionSteps|work|reasoning)"\s*:\s*\[(.*?)\]"#)
        .expect("Should compile: STEPS_ARRAY_RE")
});

static QUOTED_ITEM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""((?:[^"\\]|\\.)*)""#).expect("Should compile: QUOTED_ITEM_RE")
});

static PROSE_ANSWER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[\s>*#_-]*(?:final\s+answer|short\s+answer|answer|result)\s*[*_]*\s*[:=]\s*[*_]*\s*(.+?)\s*[*_]*\s*$")
        .expect("Should compile: PROSE_ANSWER_RE")
});

static NUMBERED_STEP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*(?:step\s*\d+\s*[:.)-]|\d+\s*[.)]|[-*•])\s+(.+?)\s*$")
        .expect("Should compile: NUMBERED_STEP_RE")
});

/// A short-answer field captured by increasingly permissive patterns
pub fn pattern(raw: &str) -> Result<Candidate, String> {
    let short_answer = SHORT_ANSWER_FIELD_RES
        .iter()
        .find_map(|re| {
            re.captures(raw)
                .and_then(|caps| caps.get(1))
                .map(|m| unescape(m.as_str()))
                .filter(|s| !s.is_empty())
        })
        .ok_or_else(|| "no short answer pattern matched".to_string())?;

    let steps = scrape_steps_array(raw).unwrap_or_default();
    let mut warnings = vec!["Short answer recovered by pattern match".to_string()];
    if steps.is_empty() {
        warnings.push("Reply contained no recoverable solution steps".into());
    }
    Ok(Candidate {
        short_answer,
        steps,
        structured_content: None,
        warnings,
    })
}

/// Short answer and steps scraped independently from raw text
pub fn partial(raw: &str) -> Result<Candidate, String> {
    let short_answer = PROSE_ANSWER_RE
        .captures_iter(raw)
        .filter_map(|caps| caps.get(1))
        .map(|m| strip_markup(m.as_str()))
        .find(|s| !s.is_empty())
        .ok_or_else(|| "no answer-like line found".to_string())?;

    let steps = scrape_steps_array(raw).unwrap_or_else(|| {
        NUMBERED_STEP_RE
            .captures_iter(raw)
            .filter_map(|caps| caps.get(1))
            .map(|m| strip_markup(m.as_str()))
            .filter(|s| !s.is_empty())
            .collect()
    });

    Ok(Candidate {
        short_answer,
        steps,
        structured_content: None,
        warnings: vec!["Answer assembled from partially structured text".into()],
    })
}

fn scrape_steps_array(raw: &str) -> Option<Vec<String>> {
    let body = STEPS_ARRAY_RE.captures(raw)?.get(1)?.as_str();
    if let Ok(value) = serde_json::from_str::<Value>(&format!("[{body}]")) {
        let steps = convert_to_steps(&value);
        if !steps.is_empty() {
            return Some(steps);
        }
    }
    let steps: Vec<String> = QUOTED_ITEM_RE
        .captures_iter(body)
        .filter_map(|caps| caps.get(1))
        .map(|m| unescape(m.as_str()))
        .filter(|s| !s.is_empty())
        .collect();
    (!steps.is_empty()).then_some(steps)
}

/// Decode JSON string escapes, falling back to the raw capture
fn unescape(captured: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{captured}\""))
        .unwrap_or_else(|_| captured.to_string())
        .trim()
        .to_string()
}

fn strip_markup(text: &str) -> String {
    text.trim()
        .trim_matches(|c: char| matches!(c, '*' | '_' | '`'))
        .trim()
        .to_string()
}

/// Clean a reply into something a strict JSON parser accepts.
///
/// Returns the cleaned text and the names of the fixes that changed it.
pub fn clean_document(raw: &str) -> (String, Vec<&'static str>) {
    let mut applied = Vec::new();
    let mut text = raw.trim().to_string();

    if let Some(inner) = strip_fences(&text) {
        text = inner;
        applied.push("removed code fences");
    }

    let normalized = normalize_quotes(&text);
    if normalized != text {
        text = normalized;
        applied.push("normalized quotes");
    }

    let (without_comments, removed_comments) = strip_comments(&text);
    if removed_comments {
        text = without_comments;
        applied.push("removed comments");
    }

    let (without_commas, removed_commas) = strip_trailing_commas(&text);
    if removed_commas {
        text = without_commas;
        applied.push("removed trailing commas");
    }

    (text.trim().to_string(), applied)
}

fn strip_fences(text: &str) -> Option<String> {
    let open = text.find("```")?;
    let after_open = &text[open + 3..];
    // Skip the language tag on the opening fence line
    let content_start = after_open.find('\n').map_or_else(
        || {
            after_open
                .find(|c: char| !c.is_ascii_alphanumeric())
                .unwrap_or(after_open.len())
        },
        |i| i + 1,
    );
    let content = &after_open[content_start..];
    let inner = match content.find("```") {
        Some(close) => &content[..close],
        None => content,
    };
    Some(inner.trim().to_string())
}

fn normalize_quotes(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' => '"',
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' => '\'',
            other => other,
        })
        .collect()
}

/// Remove `//` and `/* */` comments that sit outside string literals
fn strip_comments(text: &str) -> (String, bool) {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut removed = false;
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;

    while let Some(&c) = chars.get(i) {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        match (c, chars.get(i + 1)) {
            ('"', _) => {
                in_string = true;
                out.push(c);
                i += 1;
            }
            ('/', Some('/')) => {
                removed = true;
                while chars.get(i).is_some_and(|&c| c != '\n') {
                    i += 1;
                }
            }
            ('/', Some('*')) => {
                removed = true;
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 2;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    (out, removed)
}

/// Drop commas directly followed (modulo whitespace) by a closing bracket
fn strip_trailing_commas(text: &str) -> (String, bool) {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut removed = false;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
        } else if c == '"' {
            in_string = true;
        } else if c == ',' {
            let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
            if matches!(next, Some('}' | ']')) {
                removed = true;
                continue;
            }
        }
        out.push(c);
    }
    (out, removed)
}

/// Top-level balanced `{...}` spans, in order of appearance.
///
/// Braces inside string values are ignored. An unterminated object ends the scan.
pub fn balanced_objects(text: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0
                    && let Some(s) = start.take()
                {
                    spans.push(&text[s..=i]);
                }
            }
            _ => {}
        }
    }
    spans
}
