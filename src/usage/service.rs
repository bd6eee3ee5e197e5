//! Entitlement checks and usage recording
//!
//! `check_limit` fails closed: anything that prevents reading the plan or the month's usage
//! yields a denial. `record_generation` is the opposite: it never surfaces an error to the
//! caller, because the answer has already been produced by the time it runs.

use chrono::{Datelike, Days, Months, NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::{
    EntitlementKind, ModelCost, MokaUsageCache, MonthKey, MonthlyUsage, PlanCatalog,
    PlanResolver, PlanTier, SqliteUsageStore, StaticPlanResolver, UsageAggregate, UsageCache,
    UsageDelta, UsageError, UsageStore,
};
use crate::config::Config;
use crate::pricing::PricingTable;
use crate::types::{GenerationMode, ModelTokenUsage};

/// Source of "today"
pub type Clock = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

/// Which quantity a check was measured against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    Solves,
    Cost,
    Unlimited,
}

/// Result of an entitlement check
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageCheck {
    pub allowed: bool,
    /// `None` when the plan could not be resolved
    pub plan: Option<PlanTier>,
    pub limit_kind: LimitKind,
    pub limit: Option<f64>,
    pub used: f64,
    pub remaining: Option<f64>,
    pub mode_allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl UsageCheck {
    fn unverifiable(plan: Option<PlanTier>, err: &UsageError) -> Self {
        Self {
            allowed: false,
            plan,
            limit_kind: LimitKind::Unlimited,
            limit: None,
            used: 0.0,
            remaining: None,
            mode_allowed: true,
            reason: Some(format!("Usage could not be verified: {err}")),
        }
    }
}

/// First day of the month containing `date`, and first day of the following month
pub fn month_bounds(date: NaiveDate) -> (NaiveDate, NaiveDate) {
    let start = date - Days::new(u64::from(date.day0()));
    let end = start
        .checked_add_months(Months::new(1))
        .unwrap_or(NaiveDate::MAX);
    (start, end)
}

fn utc_today() -> NaiveDate {
    Utc::now().date_naive()
}

pub struct EntitlementService {
    plans: Arc<dyn PlanResolver>,
    catalog: PlanCatalog,
    store: Arc<dyn UsageStore>,
    cache: Arc<dyn UsageCache>,
    pricing: PricingTable,
    clock: Clock,
}

impl EntitlementService {
    pub fn new(
        plans: Arc<dyn PlanResolver>,
        catalog: PlanCatalog,
        store: Arc<dyn UsageStore>,
        cache: Arc<dyn UsageCache>,
        pricing: PricingTable,
    ) -> Self {
        Self {
            plans,
            catalog,
            store,
            cache,
            pricing,
            clock: Arc::new(utc_today),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Wire up the bundled resolver, SQLite store and moka cache from configuration
    pub fn from_config(config: &Config) -> Result<Self, UsageError> {
        let mut resolver = StaticPlanResolver::new(config.default_tier);
        for (user_id, plan) in &config.users {
            resolver = resolver.with_user(user_id.clone(), *plan);
        }
        let store = SqliteUsageStore::open(&config.database_path())?;
        let cache = MokaUsageCache::new(
            Duration::from_secs(config.usage.cache_ttl_secs),
            config.usage.cache_capacity,
        );
        Ok(Self::new(
            Arc::new(resolver),
            config.plan_catalog()?,
            Arc::new(store),
            Arc::new(cache),
            PricingTable::standard(),
        ))
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    pub fn today(&self) -> NaiveDate {
        (self.clock)()
    }

    /// Decide whether `user_id` may start a generation in `mode`
    pub async fn check_limit(&self, user_id: &str, mode: Option<GenerationMode>) -> UsageCheck {
        let plan = match self.plans.resolve(user_id).await {
            Ok(plan) => plan,
            Err(e) => {
                tracing::error!(user_id, error = %e, "plan lookup failed, denying");
                return UsageCheck::unverifiable(None, &e);
            }
        };

        if plan.is_admin {
            return UsageCheck {
                allowed: true,
                plan: Some(plan.tier),
                limit_kind: LimitKind::Unlimited,
                limit: None,
                used: 0.0,
                remaining: None,
                mode_allowed: true,
                reason: None,
            };
        }

        let entitlement = self.catalog.entitlement(plan.tier);
        let (limit_kind, limit) = match entitlement.kind {
            EntitlementKind::SolveCapped { limit } => (LimitKind::Solves, count_as_f64(limit)),
            EntitlementKind::CostCapped { limit_usd } => (LimitKind::Cost, limit_usd),
        };

        if mode == Some(GenerationMode::Expert) && !entitlement.expert_allowed {
            return UsageCheck {
                allowed: false,
                plan: Some(plan.tier),
                limit_kind,
                limit: Some(limit),
                used: 0.0,
                remaining: None,
                mode_allowed: false,
                reason: Some(format!(
                    "Expert mode is not included in the {} plan",
                    plan.tier
                )),
            };
        }

        let monthly = match self.monthly_usage(user_id).await {
            Ok(monthly) => monthly,
            Err(e) => {
                tracing::error!(user_id, error = %e, "usage lookup failed, denying");
                return UsageCheck::unverifiable(Some(plan.tier), &e);
            }
        };

        let used = match limit_kind {
            LimitKind::Solves => count_as_f64(monthly.solves),
            _ => monthly.cost,
        };
        let allowed = used < limit;
        let reason = (!allowed).then(|| match limit_kind {
            LimitKind::Solves => format!("Monthly limit of {limit} solves reached"),
            _ => format!(
                "Monthly usage limit of {} reached",
                crate::pricing::format_cost(limit)
            ),
        });

        UsageCheck {
            allowed,
            plan: Some(plan.tier),
            limit_kind,
            limit: Some(limit),
            used,
            remaining: Some((limit - used).max(0.0)),
            mode_allowed: true,
            reason,
        }
    }

    /// Month-to-date totals, served from the cache when possible
    async fn monthly_usage(&self, user_id: &str) -> Result<MonthlyUsage, UsageError> {
        let (month_start, next_month) = month_bounds(self.today());
        let key = MonthKey::new(user_id, month_start);

        match self.cache.get(&key).await {
            Ok(Some(cached)) => return Ok(cached),
            Ok(None) => {}
            Err(e) => tracing::warn!(user_id, error = %e, "usage cache read failed"),
        }

        // Taken before the store read so a write racing this check keeps the stale total out
        let epoch = match self.cache.epoch(&key).await {
            Ok(epoch) => Some(epoch),
            Err(e) => {
                tracing::warn!(user_id, error = %e, "usage cache epoch unavailable");
                None
            }
        };

        let monthly = self
            .store
            .monthly_totals(user_id, month_start, next_month)
            .await?;
        if let Some(epoch) = epoch {
            match self.cache.put(key, monthly, epoch).await {
                Ok(true) => {}
                Ok(false) => tracing::debug!(user_id, "usage changed during read, not cached"),
                Err(e) => tracing::warn!(user_id, error = %e, "usage cache write failed"),
            }
        }
        Ok(monthly)
    }

    /// Record a finished generation. Failures are logged, never returned.
    pub async fn record_generation(
        &self,
        user_id: &str,
        mode: GenerationMode,
        usage: &[ModelTokenUsage],
    ) {
        let generation_id = Uuid::new_v4();
        if let Err(e) = self
            .record_generation_with_id(generation_id, user_id, mode, usage)
            .await
        {
            tracing::error!(
                user_id,
                %generation_id,
                error = %e,
                "failed to record usage"
            );
        }
    }

    /// Same as [`Self::record_generation`] but surfacing errors
    pub async fn try_record_generation(
        &self,
        user_id: &str,
        mode: GenerationMode,
        usage: &[ModelTokenUsage],
    ) -> Result<bool, UsageError> {
        self.record_generation_with_id(Uuid::new_v4(), user_id, mode, usage)
            .await
    }

    /// Record under a caller-chosen id. Returns `false` if that id was already recorded.
    pub async fn record_generation_with_id(
        &self,
        generation_id: Uuid,
        user_id: &str,
        mode: GenerationMode,
        usage: &[ModelTokenUsage],
    ) -> Result<bool, UsageError> {
        let mut models = Vec::with_capacity(usage.len());
        for entry in usage {
            let cost = self.pricing.cost(&entry.model, &entry.usage)?;
            models.push(ModelCost {
                provider: entry.provider,
                model: entry.model.clone(),
                usage: entry.usage,
                cost,
            });
        }
        let total_cost = models.iter().map(|m| m.cost).sum();
        let date = self.today();

        let delta = UsageDelta {
            generation_id,
            user_id: user_id.to_string(),
            date,
            mode,
            models,
            total_cost,
        };
        let applied = self.store.apply(&delta).await?;
        if !applied {
            tracing::warn!(user_id, %generation_id, "generation already recorded, skipping");
            return Ok(false);
        }

        let (month_start, _) = month_bounds(date);
        if let Err(e) = self
            .cache
            .invalidate(&MonthKey::new(user_id, month_start))
            .await
        {
            tracing::warn!(user_id, error = %e, "usage cache invalidation failed");
        }

        tracing::info!(
            user_id,
            %generation_id,
            %date,
            %mode,
            cost = total_cost,
            "usage recorded"
        );
        Ok(true)
    }

    /// Today's aggregate for `user_id`, if any generation was recorded
    pub async fn today_usage(&self, user_id: &str) -> Result<Option<UsageAggregate>, UsageError> {
        self.store.daily(user_id, self.today()).await
    }
}

#[allow(clippy::cast_precision_loss, clippy::as_conversions)]
const fn count_as_f64(n: u64) -> f64 {
    n as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::UserPlan;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn test_month_bounds() {
        assert_eq!(month_bounds(date(2026, 3, 14)), (date(2026, 3, 1), date(2026, 4, 1)));
        assert_eq!(month_bounds(date(2026, 12, 31)), (date(2026, 12, 1), date(2027, 1, 1)));
        assert_eq!(month_bounds(date(2028, 2, 29)), (date(2028, 2, 1), date(2028, 3, 1)));
    }

    #[tokio::test]
    async fn test_admin_is_unlimited() {
        let resolver = StaticPlanResolver::new(PlanTier::Free).with_user("root", UserPlan::admin());
        let service = EntitlementService::new(
            Arc::new(resolver),
            PlanCatalog::default(),
            Arc::new(SqliteUsageStore::open_in_memory().expect("store")),
            Arc::new(MokaUsageCache::default()),
            PricingTable::standard(),
        );
        let check = service.check_limit("root", Some(GenerationMode::Expert)).await;
        assert!(check.allowed);
        assert!(check.mode_allowed);
        assert_eq!(check.limit_kind, LimitKind::Unlimited);
    }
}
