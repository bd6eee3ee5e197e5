use crate::llm::RetryPolicy;
use crate::log_debug;
use crate::pricing::{PricingError, PricingTable};
use crate::providers::{Provider, ProviderConfig};
use crate::usage::{Entitlement, PlanCatalog, PlanSettings, PlanTier, UsageError, UserPlan};

use anyhow::{Context, Result, anyhow};
use dirs::{config_dir, data_dir};
use serde::de::{self, Deserializer};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Directory name under the platform config/data dirs
pub const APP_DIR: &str = "homework-solver";

/// Configuration structure for the solver
#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    /// Provider used for FAST mode
    #[serde(default, deserialize_with = "provider_name")]
    pub fast_provider: Provider,
    /// Provider-specific configurations, keyed by provider
    #[serde(default, deserialize_with = "keyed_by")]
    pub providers: BTreeMap<Provider, ProviderConfig>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub usage: UsageConfig,
    /// Entitlement overrides per plan tier
    #[serde(default, deserialize_with = "keyed_by")]
    pub plans: BTreeMap<PlanTier, PlanSettings>,
    /// Static plan assignments
    #[serde(default)]
    pub users: HashMap<String, UserPlan>,
    /// Tier for users not listed under `users`
    #[serde(default)]
    pub default_tier: PlanTier,
}

#[derive(Deserialize, Clone, Debug)]
pub struct OrchestratorConfig {
    /// Per-provider deadline for one generation
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            provider_timeout_secs: default_provider_timeout_secs(),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct UsageConfig {
    /// SQLite file; defaults to the platform data dir
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

fn default_provider_timeout_secs() -> u64 {
    90
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_cache_capacity() -> u64 {
    10_000
}

fn provider_name<'de, D>(deserializer: D) -> Result<Provider, D::Error>
where
    D: Deserializer<'de>,
{
    let name = String::deserialize(deserializer)?;
    name.parse().map_err(de::Error::custom)
}

/// Deserialize a string-keyed table into a map keyed by a parsed type
fn keyed_by<'de, D, K, V>(deserializer: D) -> Result<BTreeMap<K, V>, D::Error>
where
    D: Deserializer<'de>,
    K: FromStr + Ord,
    K::Err: fmt::Display,
    V: Deserialize<'de>,
{
    BTreeMap::<String, V>::deserialize(deserializer)?
        .into_iter()
        .map(|(key, value)| {
            key.parse::<K>()
                .map(|key| (key, value))
                .map_err(de::Error::custom)
        })
        .collect()
}

impl Config {
    /// Load the configuration from the default location, falling back to defaults
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let mut config = Self::default();
            config.apply_env_keys(|name| std::env::var(name).ok());
            log_debug!("No config file at {}, using defaults", config_path.display());
            Ok(config)
        }
    }

    /// Load the configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config = Self::from_toml(&content)
            .with_context(|| format!("Invalid configuration file {}", path.display()))?;
        config.apply_env_keys(|name| std::env::var(name).ok());
        log_debug!(
            "Configuration loaded from {}: providers {:?}, fast provider {}",
            path.display(),
            config.configured_providers().iter().map(|(p, _)| *p).collect::<Vec<_>>(),
            config.fast_provider
        );
        Ok(config)
    }

    /// Parse and validate TOML without touching the environment
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.plan_catalog()?;
        if config.orchestrator.provider_timeout_secs == 0 {
            return Err(anyhow!("orchestrator.provider_timeout_secs must be positive"));
        }
        config
            .check_models_priced(&PricingTable::standard())
            .context("Every configured model needs a price to be metered")?;
        Ok(config)
    }

    /// Fill missing API keys from each provider's environment variable
    pub fn apply_env_keys(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for &provider in Provider::ALL {
            let Some(key) = lookup(provider.api_key_env()).filter(|k| !k.trim().is_empty())
            else {
                continue;
            };
            let entry = self
                .providers
                .entry(provider)
                .or_insert_with(|| ProviderConfig::with_defaults(provider));
            if !entry.has_api_key() {
                entry.api_key = key;
            }
        }
    }

    /// Providers with an API key, in canonical order
    pub fn configured_providers(&self) -> Vec<(Provider, &ProviderConfig)> {
        Provider::ALL
            .iter()
            .filter_map(|p| {
                self.providers
                    .get(p)
                    .filter(|c| c.has_api_key())
                    .map(|c| (*p, c))
            })
            .collect()
    }

    /// Fail on any model tier the pricing table cannot bill
    pub fn check_models_priced(&self, pricing: &PricingTable) -> Result<(), PricingError> {
        for (provider, provider_config) in &self.providers {
            let tiers = provider_config.model_tiers(*provider);
            for model in [&tiers.fast, &tiers.regular, &tiers.expert] {
                pricing.price(model)?;
            }
        }
        Ok(())
    }

    /// Built-in plans with the configured overrides applied
    pub fn plan_catalog(&self) -> Result<PlanCatalog, UsageError> {
        self.plans
            .iter()
            .try_fold(PlanCatalog::default(), |catalog, (tier, settings)| {
                let entitlement = Entitlement::try_from(settings.clone()).map_err(|e| {
                    UsageError::InvalidPlan(format!("[plans.{tier}] {e}"))
                })?;
                Ok(catalog.with_plan(*tier, entitlement))
            })
    }

    /// Where the usage database lives
    pub fn database_path(&self) -> PathBuf {
        self.usage.database_path.clone().unwrap_or_else(|| {
            data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_DIR)
                .join("usage.db")
        })
    }

    /// Get the path to the configuration file
    pub fn config_path() -> Result<PathBuf> {
        let mut path =
            config_dir().ok_or_else(|| anyhow!("Unable to determine config directory"))?;
        path.push(APP_DIR);
        path.push("config.toml");
        Ok(path)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fast_provider: Provider::default(),
            providers: BTreeMap::new(),
            retry: RetryPolicy::default(),
            orchestrator: OrchestratorConfig::default(),
            usage: UsageConfig::default(),
            plans: BTreeMap::new(),
            users: HashMap::new(),
            default_tier: PlanTier::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::EntitlementKind;

    #[test]
    fn test_defaults() {
        let config = Config::from_toml("").expect("empty config is valid");
        assert_eq!(config.fast_provider, Provider::OpenAI);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.orchestrator.provider_timeout_secs, 90);
        assert_eq!(config.usage.cache_ttl_secs, 300);
        assert!(config.configured_providers().is_empty());
        assert_eq!(
            config.plan_catalog().expect("catalog"),
            PlanCatalog::default()
        );
    }

    #[test]
    fn test_env_keys_fill_gaps_only() {
        let mut config = Config::from_toml(
            r#"
            [providers.anthropic]
            api_key = "from-file"
            "#,
        )
        .expect("valid config");
        config.apply_env_keys(|name| match name {
            "ANTHROPIC_API_KEY" => Some("from-env".into()),
            "GOOGLE_API_KEY" => Some("g-key".into()),
            _ => None,
        });

        let configured = config.configured_providers();
        let providers: Vec<_> = configured.iter().map(|(p, _)| *p).collect();
        assert_eq!(providers, vec![Provider::Anthropic, Provider::Google]);
        assert_eq!(configured[0].1.api_key, "from-file");
        assert_eq!(configured[1].1.api_key, "g-key");
    }

    #[test]
    fn test_unknown_provider_is_rejected() {
        let err = Config::from_toml("[providers.mistral]\napi_key = \"x\"\n")
            .expect_err("unknown provider");
        let message = format!("{err:#}");
        assert!(message.contains("mistral"), "{message}");
        assert!(message.contains("openai, anthropic, google"), "{message}");
    }

    #[test]
    fn test_plan_overrides() {
        let config = Config::from_toml(
            r#"
            default_tier = "plus"

            [plans.plus]
            cost_limit_usd = 5.0
            expert_allowed = true

            [users.ada]
            tier = "pro"
            admin = true
            "#,
        )
        .expect("valid config");
        let catalog = config.plan_catalog().expect("catalog");
        let plus = catalog.entitlement(PlanTier::Plus);
        assert_eq!(plus.kind, EntitlementKind::CostCapped { limit_usd: 5.0 });
        assert!(plus.expert_allowed);
        assert_eq!(catalog.entitlement(PlanTier::Free), Entitlement::solves(20));
        assert_eq!(config.default_tier, PlanTier::Plus);
        assert!(config.users["ada"].is_admin);
    }

    #[test]
    fn test_unpriced_model_is_rejected() {
        let err = Config::from_toml("[providers.openai]\napi_key = \"sk\"\nmodel = \"gpt-4.1\"\n")
            .expect_err("model without a price");
        assert!(format!("{err:#}").contains("gpt-4.1"));

        let legacy = Config::from_toml("[providers.anthropic]\nmodel = \"claude-3-5-sonnet\"\n");
        assert!(legacy.is_ok());
    }

    #[test]
    fn test_invalid_plan_is_rejected() {
        let err = Config::from_toml("[plans.free]\nsolve_limit = 1\ncost_limit_usd = 1.0\n")
            .expect_err("ambiguous plan");
        assert!(format!("{err:#}").contains("plans.free"));
    }
}
