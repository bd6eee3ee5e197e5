//! Anthropic messages adapter

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ProviderAdapter, ProviderError, ProviderReply, VendorClient};
use crate::parser::ResponseParser;
use crate::prompt::system_prompt;
use crate::providers::{ModelTiers, Provider, ProviderConfig};
use crate::types::{GenerationMode, Message, Role, TokenUsage};

const API_VERSION: &str = "2023-06-01";

pub struct AnthropicAdapter {
    client: VendorClient,
    api_key: String,
    base_url: String,
    tiers: ModelTiers,
    max_output_tokens: u32,
    parser: ResponseParser,
}

impl AnthropicAdapter {
    pub fn new(config: &ProviderConfig, client: VendorClient) -> Self {
        Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.effective_base_url(Provider::Anthropic),
            tiers: config.model_tiers(Provider::Anthropic),
            max_output_tokens: config.effective_max_output_tokens(),
            parser: ResponseParser::new(),
        }
    }

    fn headers(&self) -> Result<HeaderMap, ProviderError> {
        let key = HeaderValue::from_str(&self.api_key)
            .map_err(|_| ProviderError::MissingApiKey(Provider::Anthropic))?;
        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static("x-api-key"), key);
        headers.insert(
            HeaderName::from_static("anthropic-version"),
            HeaderValue::from_static(API_VERSION),
        );
        Ok(headers)
    }

    fn request_body(&self, messages: &[Message], mode: GenerationMode) -> Value {
        json!({
            "model": self.tiers.for_mode(mode),
            "max_tokens": self.max_output_tokens,
            "system": system_prompt(mode),
            "messages": messages.iter().map(message_to_wire).collect::<Vec<_>>(),
        })
    }
}

fn message_to_wire(message: &Message) -> Value {
    let role = match message.role {
        Role::User => "user",
        Role::Assistant => "assistant",
    };
    let mut content = Vec::with_capacity(2);
    if let Some(image) = &message.image {
        content.push(json!({
            "type": "image",
            "source": {
                "type": "base64",
                "media_type": image.media_type,
                "data": image.base64(),
            },
        }));
    }
    content.push(json!({"type": "text", "text": message.text}));
    json!({"role": role, "content": content})
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn provider(&self) -> Provider {
        Provider::Anthropic
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
        crate::log_debug!("🤖 Anthropic: {} mode via {}", mode, model);

        let url = format!("{}/v1/messages", self.base_url);
        let body = self.request_body(messages, mode);
        let response: MessagesResponse = self
            .client
            .post_json(&url, &self.headers()?, &body)
            .await?;

        let raw_text = response
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");
        let usage = TokenUsage::new(response.usage.input_tokens, response.usage.output_tokens);
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
    fn test_request_shape() {
        let adapter = AnthropicAdapter::new(
            &ProviderConfig::with_defaults(Provider::Anthropic),
            VendorClient::new(Provider::Anthropic, super::super::RetryPolicy::none()),
        );
        let messages =
            vec![Message::user("Solve").with_image(ImageAttachment::new("image/jpeg", vec![1, 2, 3]))];
        let body = adapter.request_body(&messages, GenerationMode::Fast);
        assert_eq!(body["model"], "claude-haiku-4-5");
        assert!(body["system"].as_str().is_some_and(|s| s.contains("short_answer")));
        let content = &body["messages"][0]["content"];
        assert_eq!(content[0]["source"]["media_type"], "image/jpeg");
        assert_eq!(content[0]["source"]["data"], "AQID");
        assert_eq!(content[1]["text"], "Solve");
    }
}
