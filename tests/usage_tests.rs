#![allow(clippy::float_cmp, clippy::as_conversions, clippy::cast_precision_loss)]

use homework_solver::pricing::{PricingError, PricingTable};
use homework_solver::providers::Provider;
use homework_solver::types::{GenerationMode, ModelTokenUsage, TokenUsage};
use homework_solver::usage::{
    EntitlementService, LimitKind, MokaUsageCache, PlanCatalog, PlanTier, SqliteUsageStore,
    StaticPlanResolver, UsageError, UsageStore, UserPlan,
};
use std::sync::Arc;
use uuid::Uuid;

use test_utils::{CountingStore, GatedStore, UnavailableStore, date, fixed_clock};

fn resolver() -> StaticPlanResolver {
    StaticPlanResolver::new(PlanTier::Free)
        .with_user("plus-user", UserPlan::new(PlanTier::Plus))
        .with_user("pro-user", UserPlan::new(PlanTier::Pro))
        .with_user("admin", UserPlan::admin())
}

fn service_with(store: Arc<dyn UsageStore>, today: chrono::NaiveDate) -> EntitlementService {
    EntitlementService::new(
        Arc::new(resolver()),
        PlanCatalog::default(),
        store,
        Arc::new(MokaUsageCache::default()),
        PricingTable::standard(),
    )
    .with_clock(fixed_clock(today))
}

fn sqlite() -> Arc<CountingStore<SqliteUsageStore>> {
    CountingStore::new(SqliteUsageStore::open_in_memory().expect("in-memory store"))
}

fn gpt4o(input: u64, output: u64) -> Vec<ModelTokenUsage> {
    vec![ModelTokenUsage::new(
        Provider::OpenAI,
        "gpt-4o",
        TokenUsage::new(input, output),
    )]
}

#[tokio::test]
async fn test_solve_cap_blocks_at_limit() {
    let store = sqlite();
    let service = service_with(store.clone(), date(2026, 3, 14));

    for _ in 0..19 {
        service
            .try_record_generation("student", GenerationMode::Fast, &gpt4o(100, 50))
            .await
            .expect("recorded");
    }
    let check = service.check_limit("student", Some(GenerationMode::Fast)).await;
    assert!(check.allowed);
    assert_eq!(check.limit_kind, LimitKind::Solves);
    assert_eq!(check.remaining, Some(1.0));

    service
        .try_record_generation("student", GenerationMode::Regular, &gpt4o(100, 50))
        .await
        .expect("recorded");
    let check = service.check_limit("student", Some(GenerationMode::Fast)).await;
    assert!(!check.allowed);
    assert!(check.mode_allowed);
    assert_eq!(check.limit, Some(20.0));
    assert_eq!(check.used, 20.0);
    assert_eq!(check.remaining, Some(0.0));
    assert!(check.reason.is_some());
}

#[tokio::test]
async fn test_expert_mode_denied_without_quota_lookup() {
    let store = sqlite();
    let service = service_with(store.clone(), date(2026, 3, 14));

    for user in ["student", "plus-user"] {
        let check = service.check_limit(user, Some(GenerationMode::Expert)).await;
        assert!(!check.allowed);
        assert!(!check.mode_allowed);
        assert!(check.reason.as_deref().is_some_and(|r| r.contains("Expert")));
    }
    assert_eq!(store.reads(), 0);

    let pro = service.check_limit("pro-user", Some(GenerationMode::Expert)).await;
    assert!(pro.allowed);
    assert!(pro.mode_allowed);
}

#[tokio::test]
async fn test_admin_override_skips_quota() {
    let store = sqlite();
    let service = service_with(store.clone(), date(2026, 3, 14));
    let check = service.check_limit("admin", Some(GenerationMode::Expert)).await;
    assert!(check.allowed);
    assert_eq!(check.limit_kind, LimitKind::Unlimited);
    assert_eq!(store.reads(), 0);
}

#[tokio::test]
async fn test_cost_cap_end_to_end() {
    let store = sqlite();
    let service = service_with(store.clone(), date(2026, 3, 20));

    // 6.398M gpt-4o input tokens at $2.50/M = $15.995
    service
        .try_record_generation("pro-user", GenerationMode::Expert, &gpt4o(6_398_000, 0))
        .await
        .expect("recorded");

    let before = service.check_limit("pro-user", Some(GenerationMode::Fast)).await;
    assert!(before.allowed);
    assert_eq!(before.limit_kind, LimitKind::Cost);
    let remaining = before.remaining.expect("cost plans report remaining");
    assert!((remaining - 0.005).abs() < 1e-9, "remaining = {remaining}");

    // 4000 gpt-4o input tokens = $0.01
    service
        .try_record_generation("pro-user", GenerationMode::Fast, &gpt4o(4_000, 0))
        .await
        .expect("recorded");

    let after = service.check_limit("pro-user", Some(GenerationMode::Fast)).await;
    assert!(!after.allowed);
    assert_eq!(after.remaining, Some(0.0));
    assert!((after.used - 16.005).abs() < 1e-9);
}

#[tokio::test]
async fn test_recording_is_additive() {
    let store = sqlite();
    let service = service_with(store.clone(), date(2026, 3, 14));
    let a = vec![
        ModelTokenUsage::new(Provider::OpenAI, "gpt-4o", TokenUsage::new(1_000, 200)),
        ModelTokenUsage::new(
            Provider::Google,
            "gemini-2.5-pro",
            TokenUsage::new(900, 100).with_thinking(400),
        ),
    ];
    let b = vec![ModelTokenUsage::new(
        Provider::OpenAI,
        "gpt-4o",
        TokenUsage::new(3_000, 700),
    )];
    let combined = vec![
        ModelTokenUsage::new(Provider::OpenAI, "gpt-4o", TokenUsage::new(4_000, 900)),
        ModelTokenUsage::new(
            Provider::Google,
            "gemini-2.5-pro",
            TokenUsage::new(900, 100).with_thinking(400),
        ),
    ];

    service
        .try_record_generation("split", GenerationMode::Regular, &a)
        .await
        .expect("recorded");
    service
        .try_record_generation("split", GenerationMode::Regular, &b)
        .await
        .expect("recorded");
    service
        .try_record_generation("once", GenerationMode::Regular, &combined)
        .await
        .expect("recorded");

    let split = service.today_usage("split").await.expect("read").expect("row");
    let once = service.today_usage("once").await.expect("read").expect("row");
    assert_eq!(split.solves_regular, 2);
    assert_eq!(once.solves_regular, 1);
    assert!((split.total_cost - once.total_cost).abs() < 1e-12);

    let tokens = |agg: &homework_solver::usage::UsageAggregate| {
        agg.models
            .iter()
            .map(|m| (m.provider, m.model.clone(), m.usage))
            .collect::<Vec<_>>()
    };
    assert_eq!(tokens(&split), tokens(&once));

    // Recorded cost is exactly what the pricing table derives from the tokens
    let expected = PricingTable::standard()
        .total_cost(&combined)
        .expect("known models");
    assert!((once.total_cost - expected).abs() < 1e-12);
    let per_model: f64 = once.models.iter().map(|m| m.cost).sum();
    assert!((per_model - once.total_cost).abs() < 1e-12);
}

#[tokio::test]
async fn test_replayed_generation_id_counts_once() {
    let store = sqlite();
    let service = service_with(store.clone(), date(2026, 3, 14));
    let id = Uuid::new_v4();

    assert!(
        service
            .record_generation_with_id(id, "student", GenerationMode::Fast, &gpt4o(10, 10))
            .await
            .expect("first write")
    );
    assert!(
        !service
            .record_generation_with_id(id, "student", GenerationMode::Fast, &gpt4o(10, 10))
            .await
            .expect("replay")
    );

    let today = service.today_usage("student").await.expect("read").expect("row");
    assert_eq!(today.solves(), 1);
}

#[tokio::test]
async fn test_cache_serves_repeat_checks_and_is_invalidated_by_writes() {
    let store = sqlite();
    let service = service_with(store.clone(), date(2026, 3, 14));

    let first = service.check_limit("student", Some(GenerationMode::Fast)).await;
    let second = service.check_limit("student", Some(GenerationMode::Fast)).await;
    assert_eq!(first, second);
    assert_eq!(store.reads(), 1);

    service
        .record_generation("student", GenerationMode::Fast, &gpt4o(10, 10))
        .await;
    let third = service.check_limit("student", Some(GenerationMode::Fast)).await;
    assert_eq!(third.used, 1.0);
    assert_eq!(store.reads(), 2);
}

#[tokio::test]
async fn test_write_during_quota_read_is_not_masked_by_cache() {
    let store = GatedStore::new(SqliteUsageStore::open_in_memory().expect("in-memory store"));
    let service = service_with(store.clone(), date(2026, 3, 14));

    let check = service.check_limit("student", Some(GenerationMode::Fast));
    let write = async {
        store.wait_for_read().await;
        service
            .try_record_generation("student", GenerationMode::Fast, &gpt4o(10, 10))
            .await
            .expect("recorded");
        store.release();
    };
    let (racing, ()) = tokio::join!(check, write);
    assert_eq!(racing.used, 0.0);

    let next = service.check_limit("student", Some(GenerationMode::Fast)).await;
    assert_eq!(next.used, 1.0);
    assert_eq!(next.remaining, Some(19.0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_recordings_do_not_lose_updates() {
    const CALLS: usize = 24;
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("usage.db");
    // Two connections to one file, so increments contend at the database level
    let services: Vec<_> = (0..2)
        .map(|_| {
            let store = SqliteUsageStore::open(&path).expect("file store");
            Arc::new(service_with(Arc::new(store), date(2026, 3, 14)))
        })
        .collect();

    let handles: Vec<_> = (0..CALLS)
        .map(|i| {
            let service = Arc::clone(&services[i % services.len()]);
            tokio::spawn(async move {
                service
                    .try_record_generation("student", GenerationMode::Regular, &gpt4o(1_000, 100))
                    .await
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.expect("task joins").expect("recorded"));
    }

    let per_call = PricingTable::standard()
        .total_cost(&gpt4o(1_000, 100))
        .expect("known model");
    let today = services[0]
        .today_usage("student")
        .await
        .expect("read")
        .expect("row");
    assert_eq!(today.solves(), CALLS as u64);
    assert_eq!(today.solves_regular, CALLS as u64);
    assert!((today.total_cost - per_call * CALLS as f64).abs() < 1e-9);
    assert_eq!(today.models.len(), 1);
    assert_eq!(today.models[0].usage, TokenUsage::new(1_000 * CALLS as u64, 100 * CALLS as u64));
}

#[tokio::test]
async fn test_usage_resets_at_month_boundary() {
    let store = sqlite();
    let march = service_with(store.clone(), date(2026, 3, 31));
    for _ in 0..20 {
        march
            .try_record_generation("student", GenerationMode::Fast, &gpt4o(1, 1))
            .await
            .expect("recorded");
    }
    assert!(!march.check_limit("student", None).await.allowed);

    let april = service_with(store.clone(), date(2026, 4, 1));
    let check = april.check_limit("student", None).await;
    assert!(check.allowed);
    assert_eq!(check.used, 0.0);
}

#[tokio::test]
async fn test_unavailable_storage_fails_closed_for_checks_only() {
    let service = service_with(Arc::new(UnavailableStore), date(2026, 3, 14));

    let check = service.check_limit("student", Some(GenerationMode::Fast)).await;
    assert!(!check.allowed);
    assert_eq!(check.plan, Some(PlanTier::Free));
    assert!(
        check
            .reason
            .as_deref()
            .is_some_and(|r| r.contains("could not be verified"))
    );

    // Best-effort recording swallows the failure
    service
        .record_generation("student", GenerationMode::Fast, &gpt4o(10, 10))
        .await;
    let err = service
        .try_record_generation("student", GenerationMode::Fast, &gpt4o(10, 10))
        .await
        .expect_err("storage is down");
    assert!(matches!(err, UsageError::Unavailable(_)));
}

#[tokio::test]
async fn test_unknown_model_is_never_priced_at_zero() {
    let store = sqlite();
    let service = service_with(store.clone(), date(2026, 3, 14));
    let usage = vec![ModelTokenUsage::new(
        Provider::OpenAI,
        "gpt-9-ultra",
        TokenUsage::new(10, 10),
    )];

    let err = service
        .try_record_generation("student", GenerationMode::Fast, &usage)
        .await
        .expect_err("unknown model");
    assert!(matches!(
        err,
        UsageError::Pricing(PricingError::UnknownModel(ref m)) if m == "gpt-9-ultra"
    ));
    assert_eq!(store.writes(), 0);
}
