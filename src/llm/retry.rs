//! Bounded exponential backoff for transient vendor failures

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_retry::RetryIf;
use tokio_retry::strategy::ExponentialBackoff;

use super::ProviderError;

/// Retry settings shared by all adapters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: usize,
    /// First delay; each later delay doubles
    pub base_delay_ms: u64,
    /// Upper bound for any single delay
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

impl RetryPolicy {
    /// No retries at all
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Delays between attempts: `base`, `2·base`, `4·base`, … capped at `max_delay_ms`
    pub fn delays(&self) -> impl Iterator<Item = Duration> + use<> {
        // ExponentialBackoff yields factor·2, factor·4, ... for a base of 2
        ExponentialBackoff::from_millis(2)
            .factor(self.base_delay_ms / 2)
            .max_delay(Duration::from_millis(self.max_delay_ms))
            .take(self.max_retries)
    }

    /// Run `action`, retrying while it fails with a transient error
    pub async fn run<T, F, Fut>(&self, label: &str, mut action: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt = 0usize;
        let max_retries = self.max_retries;
        RetryIf::spawn(
            self.delays(),
            || {
                attempt += 1;
                crate::log_debug!("📡 {}: attempt {}/{}", label, attempt, max_retries + 1);
                action()
            },
            |err: &ProviderError| {
                let transient = err.is_transient();
                if transient {
                    crate::log_warn!("⏳ {}: transient failure, backing off: {}", label, err);
                } else {
                    crate::log_debug!("🛑 {}: terminal failure: {}", label, err);
                }
                transient
            },
        )
        .await
    }
}
