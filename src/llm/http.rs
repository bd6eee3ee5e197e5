//! HTTP plumbing shared by the vendor adapters

use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

use super::{ProviderError, RetryPolicy};
use crate::providers::Provider;

/// Body substrings vendors use for conditions worth retrying
const TRANSIENT_MARKERS: &[&str] = &["rate limit", "overloaded", "resource_exhausted", "try again"];

/// Longest error body kept in an error message
const MAX_ERROR_BODY: usize = 500;

/// One vendor's HTTP client plus its retry policy
#[derive(Debug, Clone)]
pub struct VendorClient {
    provider: Provider,
    client: Client,
    retry: RetryPolicy,
}

impl VendorClient {
    pub fn new(provider: Provider, retry: RetryPolicy) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            provider,
            client,
            retry,
        }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// POST a JSON body and decode the JSON reply, retrying transient failures
    pub async fn post_json<T>(
        &self,
        url: &str,
        headers: &HeaderMap,
        body: &Value,
    ) -> Result<T, ProviderError>
    where
        T: DeserializeOwned,
    {
        let label = format!("{} {}", self.provider, url);
        self.retry
            .run(&label, move || self.post_once(url, headers.clone(), body))
            .await
    }

    async fn post_once<T>(
        &self,
        url: &str,
        headers: HeaderMap,
        body: &Value,
    ) -> Result<T, ProviderError>
    where
        T: DeserializeOwned,
    {
        let response = self
            .client
            .post(url)
            .headers(headers)
            .json(body)
            .send()
            .await
            .map_err(|e| classify_transport(self.provider, &e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(self.provider, status, &text));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| classify_transport(self.provider, &e))?;
        serde_json::from_slice(&bytes).map_err(|e| ProviderError::InvalidResponse {
            provider: self.provider,
            message: e.to_string(),
        })
    }
}

/// Map a non-success HTTP status to an error
pub fn classify_status(provider: Provider, status: StatusCode, body: &str) -> ProviderError {
    let code = status.as_u16();
    let message: String = body.chars().take(MAX_ERROR_BODY).collect();
    match code {
        401 | 403 => ProviderError::Auth {
            provider,
            status: code,
        },
        429 => ProviderError::RateLimited {
            provider,
            status: code,
            message,
        },
        500 | 502 | 503 | 504 | 529 => ProviderError::Overloaded {
            provider,
            status: code,
            message,
        },
        _ => {
            let lower = body.to_lowercase();
            let transient = TRANSIENT_MARKERS.iter().any(|m| lower.contains(m));
            ProviderError::Api {
                provider,
                status: code,
                message,
                transient,
            }
        }
    }
}

/// Map a transport-level failure to an error
pub fn classify_transport(provider: Provider, err: &reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout { provider }
    } else if err.is_decode() {
        ProviderError::InvalidResponse {
            provider,
            message: err.to_string(),
        }
    } else {
        ProviderError::Network {
            provider,
            message: err.to_string(),
        }
    }
}
