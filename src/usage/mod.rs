//! Plan entitlements, quota checks and durable usage recording

mod cache;
mod plan;
mod service;
mod store;

pub use cache::{MokaUsageCache, MonthKey, UsageCache};
pub use plan::{
    Entitlement, EntitlementKind, PlanCatalog, PlanResolver, PlanSettings, PlanTier,
    StaticPlanResolver, UserPlan,
};
pub use service::{Clock, EntitlementService, LimitKind, UsageCheck, month_bounds};
pub use store::{
    ModelCost, MonthlyUsage, SqliteUsageStore, UsageAggregate, UsageDelta, UsageStore,
};

use crate::pricing::PricingError;

#[derive(Debug, thiserror::Error)]
pub enum UsageError {
    #[error("Usage storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("Usage storage unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Pricing(#[from] PricingError),
    #[error("Usage cache error: {0}")]
    Cache(String),
    #[error("Plan lookup failed: {0}")]
    Plan(String),
    #[error("Invalid plan configuration: {0}")]
    InvalidPlan(String),
    #[error("Usage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
