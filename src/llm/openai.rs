//! OpenAI chat completions adapter

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ProviderAdapter, ProviderError, ProviderReply, VendorClient};
use crate::parser::ResponseParser;
use crate::prompt::system_prompt;
use crate::providers::{ModelTiers, Provider, ProviderConfig};
use crate::types::{GenerationMode, Message, Role, TokenUsage};

pub struct OpenAiAdapter {
    client: VendorClient,
    api_key: String,
    base_url: String,
    tiers: ModelTiers,
    max_output_tokens: u32,
    parser: ResponseParser,
}

impl OpenAiAdapter {
    pub fn new(config: &ProviderConfig, client: VendorClient) -> Self {
        Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.effective_base_url(Provider::OpenAI),
            tiers: config.model_tiers(Provider::OpenAI),
            max_output_tokens: config.effective_max_output_tokens(),
            parser: ResponseParser::new(),
        }
    }

    fn headers(&self) -> Result<HeaderMap, ProviderError> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|_| ProviderError::MissingApiKey(Provider::OpenAI))?;
        headers.insert(AUTHORIZATION, bearer);
        Ok(headers)
    }

    fn request_body(&self, messages: &[Message], mode: GenerationMode) -> Value {
        let mut wire = vec![json!({"role": "system", "content": system_prompt(mode)})];
        wire.extend(messages.iter().map(message_to_wire));
        json!({
            "model": self.tiers.for_mode(mode),
            "messages": wire,
            "response_format": {"type": "json_object"},
            "max_completion_tokens": self.max_output_tokens,
        })
    }
}

fn message_to_wire(message: &Message) -> Value {
    let role = match message.role {
        Role::User => "user",
        Role::Assistant => "assistant",
    };
    match &message.image {
        Some(image) => json!({
            "role": role,
            "content": [
                {"type": "text", "text": message.text},
                {"type": "image_url", "image_url": {"url": image.data_url()}},
            ],
        }),
        None => json!({"role": role, "content": message.text}),
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    completion_tokens_details: Option<CompletionDetails>,
}

#[derive(Debug, Default, Deserialize)]
struct CompletionDetails {
    #[serde(default)]
    reasoning_tokens: Option<u64>,
}

impl From<Usage> for TokenUsage {
    fn from(usage: Usage) -> Self {
        // Reasoning tokens are a subset of completion_tokens; they are kept for
        // reporting and carry no separate price.
        let reasoning = usage
            .completion_tokens_details
            .and_then(|d| d.reasoning_tokens)
            .filter(|&n| n > 0);
        let base = TokenUsage::new(usage.prompt_tokens, usage.completion_tokens);
        match reasoning {
            Some(n) => base.with_thinking(n),
            None => base,
        }
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn provider(&self) -> Provider {
        Provider::OpenAI
    }

    fn model_for(&self, mode: GenerationMode) -> String {
        self.tiers.for_mode(mode).to_string()
    }

    async fn generate(
        &self,
        messages: &[Message],
        mode: GenerationMode,
    ) -> Result<ProviderReply, ProviderError> {
        let model = self.model_for(mode);
        crate::log_debug!("🤖 OpenAI: {} mode via {}", mode, model);

        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = self.request_body(messages, mode);
        let completion: ChatCompletion = self
            .client
            .post_json(&url, &self.headers()?, &body)
            .await?;

        let raw_text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        let usage = completion.usage.map(TokenUsage::from).unwrap_or_default();
        let answer = self.parser.parse(&raw_text);

        Ok(ProviderReply {
            model,
            raw_text,
            answer,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ImageAttachment;

    #[test]
    fn test_request_inlines_image_as_data_url() {
        let adapter = OpenAiAdapter::new(
            &ProviderConfig::with_defaults(Provider::OpenAI),
            VendorClient::new(Provider::OpenAI, super::super::RetryPolicy::none()),
        );
        let messages = vec![
            Message::user("What is shown?").with_image(ImageAttachment::new("image/png", vec![0])),
            Message::assistant("A triangle."),
        ];
        let body = adapter.request_body(&messages, GenerationMode::Expert);
        assert_eq!(body["model"], "o3");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(
            body["messages"][1]["content"][1]["image_url"]["url"],
            "data:image/png;base64,AA=="
        );
        assert_eq!(body["messages"][2]["content"], "A triangle.");
        assert_eq!(body["response_format"]["type"], "json_object");
    }

    #[test]
    fn test_usage_keeps_reasoning_separate() {
        let usage: Usage = serde_json::from_value(json!({
            "prompt_tokens": 100,
            "completion_tokens": 400,
            "completion_tokens_details": {"reasoning_tokens": 300}
        }))
        .expect("usage parses");
        let usage = TokenUsage::from(usage);
        assert_eq!(usage.input_tokens, 100);
        assert_eq!(usage.output_tokens, 400);
        assert_eq!(usage.thinking_tokens, Some(300));
    }
}
