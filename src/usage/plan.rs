//! Plan tiers and the entitlements they resolve to

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use strum::IntoEnumIterator;
use strum_macros::EnumIter;

use super::UsageError;

/// Subscription tier. Subscription state itself lives outside this crate.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize, EnumIter,
)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    #[default]
    Free,
    Plus,
    Pro,
}

impl PlanTier {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Plus => "plus",
            Self::Pro => "pro",
        }
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PlanTier {
    type Err = UsageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        Self::iter().find(|t| t.name() == lower).ok_or_else(|| {
            UsageError::InvalidPlan(format!("Unknown plan tier: {s}. Supported: free, plus, pro"))
        })
    }
}

/// Which monthly quantity a plan caps
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntitlementKind {
    /// Count generations against a monthly limit
    SolveCapped { limit: u64 },
    /// Sum generation cost against a monthly USD limit
    CostCapped { limit_usd: f64 },
}

/// Resolved quota rule for a plan
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Entitlement {
    pub kind: EntitlementKind,
    pub expert_allowed: bool,
}

impl Entitlement {
    pub const fn solves(limit: u64) -> Self {
        Self {
            kind: EntitlementKind::SolveCapped { limit },
            expert_allowed: false,
        }
    }

    pub const fn cost(limit_usd: f64) -> Self {
        Self {
            kind: EntitlementKind::CostCapped { limit_usd },
            expert_allowed: false,
        }
    }

    #[must_use]
    pub const fn with_expert(mut self, allowed: bool) -> Self {
        self.expert_allowed = allowed;
        self
    }
}

/// Plan entry as written in the config file
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PlanSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solve_limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_limit_usd: Option<f64>,
    #[serde(default)]
    pub expert_allowed: bool,
}

impl TryFrom<PlanSettings> for Entitlement {
    type Error = UsageError;

    fn try_from(settings: PlanSettings) -> Result<Self, Self::Error> {
        let base = match (settings.solve_limit, settings.cost_limit_usd) {
            (Some(limit), None) => Self::solves(limit),
            (None, Some(limit_usd)) if limit_usd.is_finite() && limit_usd >= 0.0 => {
                Self::cost(limit_usd)
            }
            (None, Some(limit_usd)) => {
                return Err(UsageError::InvalidPlan(format!(
                    "cost_limit_usd must be a non-negative number, got {limit_usd}"
                )));
            }
            _ => {
                return Err(UsageError::InvalidPlan(
                    "exactly one of solve_limit and cost_limit_usd must be set".into(),
                ));
            }
        };
        Ok(base.with_expert(settings.expert_allowed))
    }
}

/// Entitlement per tier
#[derive(Debug, Clone, PartialEq)]
pub struct PlanCatalog {
    entitlements: BTreeMap<PlanTier, Entitlement>,
}

impl Default for PlanCatalog {
    fn default() -> Self {
        let mut entitlements = BTreeMap::new();
        entitlements.insert(PlanTier::Free, Entitlement::solves(20));
        entitlements.insert(PlanTier::Plus, Entitlement::solves(300));
        entitlements.insert(PlanTier::Pro, Entitlement::cost(16.0).with_expert(true));
        Self { entitlements }
    }
}

impl PlanCatalog {
    #[must_use]
    pub fn with_plan(mut self, tier: PlanTier, entitlement: Entitlement) -> Self {
        self.entitlements.insert(tier, entitlement);
        self
    }

    pub fn entitlement(&self, tier: PlanTier) -> Entitlement {
        self.entitlements
            .get(&tier)
            .copied()
            .unwrap_or_else(|| Self::default().entitlement(tier))
    }

    pub fn iter(&self) -> impl Iterator<Item = (PlanTier, Entitlement)> + '_ {
        self.entitlements.iter().map(|(t, e)| (*t, *e))
    }
}

/// A user's resolved plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserPlan {
    pub tier: PlanTier,
    #[serde(default, rename = "admin")]
    pub is_admin: bool,
}

impl UserPlan {
    pub const fn new(tier: PlanTier) -> Self {
        Self {
            tier,
            is_admin: false,
        }
    }

    pub const fn admin() -> Self {
        Self {
            tier: PlanTier::Pro,
            is_admin: true,
        }
    }
}

/// Source of truth for which plan a user is on
#[async_trait]
pub trait PlanResolver: Send + Sync {
    async fn resolve(&self, user_id: &str) -> Result<UserPlan, UsageError>;
}

/// Fixed user-to-plan table, falling back to a default tier
#[derive(Debug, Clone, Default)]
pub struct StaticPlanResolver {
    users: HashMap<String, UserPlan>,
    default_tier: PlanTier,
}

impl StaticPlanResolver {
    pub fn new(default_tier: PlanTier) -> Self {
        Self {
            users: HashMap::new(),
            default_tier,
        }
    }

    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>, plan: UserPlan) -> Self {
        self.users.insert(user_id.into(), plan);
        self
    }
}

#[async_trait]
impl PlanResolver for StaticPlanResolver {
    async fn resolve(&self, user_id: &str) -> Result<UserPlan, UsageError> {
        Ok(self
            .users
            .get(user_id)
            .copied()
            .unwrap_or_else(|| UserPlan::new(self.default_tier)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog() {
        let catalog = PlanCatalog::default();
        assert_eq!(catalog.entitlement(PlanTier::Free), Entitlement::solves(20));
        assert_eq!(catalog.entitlement(PlanTier::Plus), Entitlement::solves(300));
        let pro = catalog.entitlement(PlanTier::Pro);
        assert!(pro.expert_allowed);
        assert_eq!(pro.kind, EntitlementKind::CostCapped { limit_usd: 16.0 });
    }

    #[test]
    fn test_plan_settings_validation() {
        let ok = Entitlement::try_from(PlanSettings {
            solve_limit: Some(5),
            cost_limit_usd: None,
            expert_allowed: true,
        })
        .expect("solve-capped plan");
        assert!(ok.expert_allowed);

        let both = PlanSettings {
            solve_limit: Some(5),
            cost_limit_usd: Some(1.0),
            expert_allowed: false,
        };
        assert!(Entitlement::try_from(both).is_err());
        assert!(Entitlement::try_from(PlanSettings::default()).is_err());
        let negative = PlanSettings {
            cost_limit_usd: Some(-1.0),
            ..PlanSettings::default()
        };
        assert!(Entitlement::try_from(negative).is_err());
    }

    #[test]
    fn test_tier_parsing() {
        assert_eq!("PRO".parse::<PlanTier>().ok(), Some(PlanTier::Pro));
        assert!("enterprise".parse::<PlanTier>().is_err());
    }

    #[tokio::test]
    async fn test_static_resolver_defaults() {
        let resolver = StaticPlanResolver::new(PlanTier::Free).with_user("ada", UserPlan::admin());
        assert!(resolver.resolve("ada").await.expect("known user").is_admin);
        assert_eq!(
            resolver.resolve("someone").await.expect("default user"),
            UserPlan::new(PlanTier::Free)
        );
    }
}
