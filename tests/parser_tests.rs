use homework_solver::parser::{ResponseParser, parse};
use homework_solver::types::{Confidence, ErrorCode, ParseMethod, StructuredContent};

#[test]
fn test_parse_always_returns_a_usable_answer() {
    let inputs = [
        "",
        "   ",
        "{",
        "}}}{{{",
        "null",
        "[]",
        "42",
        r#"{"short_answer": ""}"#,
        r#"{"steps": ["no answer here"]}"#,
        "The answer is probably 12 but I am not sure.",
        "```\n```",
        "\u{201c}smart\u{201d} quotes only",
        r#"{"short_answer": "x", "steps": ["unterminated"#,
    ];
    for raw in inputs {
        let answer = parse(raw);
        assert!(!answer.short_answer.trim().is_empty(), "empty short answer for {raw:?}");
        assert!(!answer.attempts.is_empty(), "no attempts logged for {raw:?}");
        if answer.is_failed() {
            assert!(answer.error.is_some());
            assert!(answer.short_answer.starts_with("Error: "));
        }
    }
}

#[test]
fn test_well_formed_reply_is_direct() {
    let answer = parse(
        r#"{"short_answer": "B", "steps": ["Eliminate A", "Eliminate C"],
            "structured_content": {"type": "multiple_choice",
                "options": [{"label": "A", "text": "1"}, {"label": "B", "text": "2"}],
                "correct": ["B"]}}"#,
    );
    assert_eq!(answer.confidence, Confidence::High);
    assert_eq!(answer.parse_method, ParseMethod::Direct);
    assert_eq!(answer.steps, vec!["Eliminate A", "Eliminate C"]);
    assert!(matches!(
        answer.structured_content,
        Some(StructuredContent::MultipleChoice { ref correct, .. }) if correct == &["B"]
    ));
    assert!(!answer.partial_failure);
}

#[test]
fn test_structured_content_can_replace_steps() {
    let answer = parse(r#"{"answer": "9.8 m/s^2", "structured_content": {"type": "numeric", "value": 9.8, "unit": "m/s^2"}}"#);
    assert_eq!(answer.parse_method, ParseMethod::Direct);
    assert!(answer.steps.is_empty());
    assert!(matches!(
        answer.structured_content,
        Some(StructuredContent::Numeric { value, .. }) if (value - 9.8).abs() < f64::EPSILON
    ));
}

#[test]
fn test_legacy_field_names_are_aliased() {
    let answer = parse(r#"{"finalAnswer": 12, "explanation": "Multiply 3 by 4"}"#);
    assert_eq!(answer.parse_method, ParseMethod::Direct);
    assert_eq!(answer.short_answer, "12");
    assert_eq!(answer.steps, vec!["Multiply 3 by 4"]);

    let wrapped = parse(
        r#"{"solution": {"result": "x = 2", "solution_steps": [{"title": "Divide", "content": "x = 4 / 2"}]}}"#,
    );
    assert_eq!(wrapped.short_answer, "x = 2");
    assert_eq!(wrapped.steps, vec!["Divide: x = 4 / 2"]);
}

#[test]
fn test_fenced_reply_with_trailing_comma_needs_cleanup() {
    let raw = "```json\n{\n  \"short_answer\": \"5\",\n  \"steps\": [\"2 + 3\",],\n}\n```";
    let answer = parse(raw);
    assert_eq!(answer.confidence, Confidence::Medium);
    assert_eq!(answer.parse_method, ParseMethod::Cleanup);
    let warning = answer
        .warnings
        .iter()
        .find(|w| w.contains("cleanup applied"))
        .expect("cleanup warning");
    assert!(warning.contains("removed code fences"));
    assert!(warning.contains("removed trailing commas"));
}

#[test]
fn test_object_embedded_in_prose_is_extracted() {
    let raw = r#"Sure! Here is the solution: {"short_answer": "a {brace} inside", "steps": ["note the } in a string"]} Hope it helps."#;
    let answer = parse(raw);
    assert_eq!(answer.parse_method, ParseMethod::Extraction);
    assert_eq!(answer.confidence, Confidence::Medium);
    assert_eq!(answer.short_answer, "a {brace} inside");
}

#[test]
fn test_broken_document_falls_back_to_pattern() {
    let raw = r#"{"short_answer": "x = 7", "steps": ["add 2", "divide" "#;
    let answer = parse(raw);
    assert_eq!(answer.parse_method, ParseMethod::Pattern);
    assert_eq!(answer.confidence, Confidence::Medium);
    assert_eq!(answer.short_answer, "x = 7");
    assert!(!answer.partial_failure);
}

#[test]
fn test_prose_with_numbered_steps_is_partial() {
    let raw = "1. Factor the quadratic\n2. Set each factor to zero\nAnswer: x = 2 or x = 3";
    let answer = parse(raw);
    assert_eq!(answer.parse_method, ParseMethod::Partial);
    assert_eq!(answer.confidence, Confidence::Low);
    assert!(answer.partial_failure);
    assert_eq!(answer.short_answer, "x = 2 or x = 3");
}

#[test]
fn test_failure_codes() {
    let empty = parse("  \n ");
    assert_eq!(empty.error, Some(ErrorCode::EmptyResponse));
    assert_eq!(empty.confidence, Confidence::Failed);

    let garbage = ResponseParser::new().parse("<html>502 Bad Gateway</html>");
    assert_eq!(garbage.error, Some(ErrorCode::ParseFailed));
    assert_eq!(garbage.parse_method, ParseMethod::Failed);
    assert!(!garbage.steps.is_empty());
    assert!(garbage.attempts.iter().all(|a| !a.success));
}

#[test]
fn test_attempt_log_is_ordered() {
    let answer = parse("Answer: 3");
    let methods: Vec<_> = answer.attempts.iter().map(|a| a.method).collect();
    assert_eq!(
        methods,
        vec![
            ParseMethod::Direct,
            ParseMethod::Cleanup,
            ParseMethod::Extraction,
            ParseMethod::Pattern,
            ParseMethod::Partial,
        ]
    );
    assert!(answer.attempts.last().is_some_and(|a| a.success));
}
