//! Google Gemini `generateContent` adapter

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ProviderAdapter, ProviderError, ProviderReply, VendorClient};
use crate::parser::ResponseParser;
use crate::prompt::system_prompt;
use crate::providers::{ModelTiers, Provider, ProviderConfig};
use crate::types::{GenerationMode, Message, Role, TokenUsage};

pub struct GeminiAdapter {
    client: VendorClient,
    api_key: String,
    base_url: String,
    tiers: ModelTiers,
    max_output_tokens: u32,
    parser: ResponseParser,
}

impl GeminiAdapter {
    pub fn new(config: &ProviderConfig, client: VendorClient) -> Self {
        Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.effective_base_url(Provider::Google),
            tiers: config.model_tiers(Provider::Google),
            max_output_tokens: config.effective_max_output_tokens(),
            parser: ResponseParser::new(),
        }
    }

    fn headers(&self) -> Result<HeaderMap, ProviderError> {
        // Header rather than `?key=` so the key never appears in URLs or logs
        let key = HeaderValue::from_str(&self.api_key)
            .map_err(|_| ProviderError::MissingApiKey(Provider::Google))?;
        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static("x-goog-api-key"), key);
        Ok(headers)
    }

    fn request_body(&self, messages: &[Message], mode: GenerationMode) -> Value {
        json!({
            "systemInstruction": {"parts": [{"text": system_prompt(mode)}]},
            "contents": messages.iter().map(message_to_wire).collect::<Vec<_>>(),
            "generationConfig": {
                "maxOutputTokens": self.max_output_tokens,
                "responseMimeType": "application/json",
            },
        })
    }
}

fn message_to_wire(message: &Message) -> Value {
    let role = match message.role {
        Role::User => "user",
        Role::Assistant => "model",
    };
    let mut parts = vec![json!({"text": message.text})];
    if let Some(image) = &message.image {
        parts.push(json!({
            "inlineData": {"mimeType": image.media_type, "data": image.base64()},
        }));
    }
    json!({"role": role, "parts": parts})
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: UsageMetadata,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
    /// Thought summaries are not part of the answer
    #[serde(default)]
    thought: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
    #[serde(default)]
    thoughts_token_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

impl From<UsageMetadata> for TokenUsage {
    fn from(meta: UsageMetadata) -> Self {
        let base = TokenUsage::new(meta.prompt_token_count, meta.candidates_token_count);
        match meta.thoughts_token_count {
            Some(n) => base.with_thinking(n),
            None => base,
        }
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn provider(&self) -> Provider {
        Provider::Google
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
        crate::log_debug!("🤖 Gemini: {} mode via {}", mode, model);

        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, model);
        let body = self.request_body(messages, mode);
        let response: GenerateContentResponse = self
            .client
            .post_json(&url, &self.headers()?, &body)
            .await?;

        if let Some(reason) = response
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
        {
            return Err(ProviderError::Api {
                provider: Provider::Google,
                status: 200,
                message: format!("prompt blocked: {reason}"),
                transient: false,
            });
        }

        let raw_text = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter(|part| !part.thought)
                    .filter_map(|part| part.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        let usage = TokenUsage::from(response.usage_metadata);
        let answer = self.parser.parse(&raw_text);

        Ok(ProviderReply {
            model,
            raw_text,
            answer,
            usage,
        })
    }
}
