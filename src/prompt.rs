//! System prompt shared by every provider adapter

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::types::{GenerationMode, StructuredContent};

/// Reply shape requested from the models. The parser accepts far more than this.
#[derive(Serialize, Deserialize, JsonSchema, Debug, Clone)]
pub struct SolutionReply {
    /// The final answer, as briefly as possible (a value, a choice label, one sentence)
    pub short_answer: String,
    /// Ordered solution steps, each a self-contained sentence or equation
    pub steps: Vec<String>,
    /// Optional typed payload for multiple-choice, numeric or essay questions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<StructuredContent>,
}

/// Build the system prompt for a generation mode
pub fn system_prompt(mode: GenerationMode) -> String {
    let schema = schemars::schema_for!(SolutionReply);
    let schema_str = serde_json::to_string_pretty(&schema).unwrap_or_default();

    let mut prompt = String::from(
        "You are a patient, precise tutor helping a student with a homework question. \
        The question may include a photo of a worksheet or textbook page; read it carefully.

        Follow these rules exactly:

        1. Solve the problem completely before writing the answer.
        2. Put the final result in short_answer. Keep it short: a number with units, a choice label, or one sentence.
        3. Put the working in steps, one step per array element, in the order a student would follow.
        4. For multiple-choice questions, also fill structured_content with the options and the correct labels.
        5. For numeric results, also fill structured_content with the value and unit.
        6. Use plain text and simple inline math notation. Do not use markdown headings.
        7. If the question is ambiguous, state the assumption you made as the first step.
        ",
    );

    if mode == GenerationMode::Expert {
        prompt.push_str(
            "
        8. Before answering, verify the result independently (substitute it back, check units, or solve a second way) and add the verification as the final step.
        ",
        );
    }

    prompt.push_str(&format!(
        "
        Respond with a single JSON object and nothing else. No code fences, no commentary.
        The object must conform to this schema:

        {schema_str}"
    ));

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_embeds_schema() {
        let prompt = system_prompt(GenerationMode::Regular);
        assert!(prompt.contains("\"short_answer\""));
        assert!(prompt.contains("\"steps\""));
        assert!(!prompt.contains("verify the result"));
    }

    #[test]
    fn test_expert_prompt_asks_for_verification() {
        assert!(system_prompt(GenerationMode::Expert).contains("verify the result"));
    }
}
