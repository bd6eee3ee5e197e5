//! Durable per-day usage aggregates
//!
//! Every write is one atomic increment-or-create keyed by `(user_id, usage_date)`,
//! together with a record of the generation id so a replayed write is a no-op.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use super::UsageError;
use crate::providers::Provider;
use crate::types::{GenerationMode, TokenUsage};

/// Tokens and cost attributed to one provider model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCost {
    pub provider: Provider,
    pub model: String,
    pub usage: TokenUsage,
    pub cost: f64,
}

/// One generation's contribution to a day's aggregate
#[derive(Debug, Clone, PartialEq)]
pub struct UsageDelta {
    pub generation_id: Uuid,
    pub user_id: String,
    pub date: NaiveDate,
    pub mode: GenerationMode,
    pub models: Vec<ModelCost>,
    /// Sum of `models[*].cost`
    pub total_cost: f64,
}

/// Counters for one user on one calendar day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageAggregate {
    pub user_id: String,
    pub date: NaiveDate,
    pub solves_fast: u64,
    pub solves_regular: u64,
    pub solves_expert: u64,
    pub total_cost: f64,
    /// Sorted by provider, then model
    pub models: Vec<ModelCost>,
}

impl UsageAggregate {
    pub fn solves(&self) -> u64 {
        self.solves_fast + self.solves_regular + self.solves_expert
    }
}

/// Month-to-date totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MonthlyUsage {
    pub solves: u64,
    pub cost: f64,
}

/// Authoritative usage storage
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Apply a delta atomically. Returns `false` when the generation was already recorded.
    async fn apply(&self, delta: &UsageDelta) -> Result<bool, UsageError>;

    async fn daily(&self, user_id: &str, date: NaiveDate)
    -> Result<Option<UsageAggregate>, UsageError>;

    /// Totals over `[from, to)`
    async fn monthly_totals(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<MonthlyUsage, UsageError>;
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS usage_daily (
        user_id TEXT NOT NULL,
        usage_date TEXT NOT NULL,
        solves_fast INTEGER NOT NULL DEFAULT 0,
        solves_regular INTEGER NOT NULL DEFAULT 0,
        solves_expert INTEGER NOT NULL DEFAULT 0,
        total_cost REAL NOT NULL DEFAULT 0,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (user_id, usage_date)
    );

    CREATE TABLE IF NOT EXISTS usage_daily_models (
        user_id TEXT NOT NULL,
        usage_date TEXT NOT NULL,
        provider TEXT NOT NULL,
        model TEXT NOT NULL,
        input_tokens INTEGER NOT NULL DEFAULT 0,
        output_tokens INTEGER NOT NULL DEFAULT 0,
        thinking_tokens INTEGER NOT NULL DEFAULT 0,
        cost REAL NOT NULL DEFAULT 0,
        PRIMARY KEY (user_id, usage_date, provider, model)
    );

    CREATE TABLE IF NOT EXISTS recorded_generations (
        generation_id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        recorded_at TEXT NOT NULL
    );
";

/// SQLite-backed usage store
#[derive(Clone)]
pub struct SqliteUsageStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteUsageStore {
    /// Open (or create) a database file
    pub fn open(path: &Path) -> Result<Self, UsageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| UsageError::Unavailable(format!("{}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path)?;
        // WAL mode for concurrent readers alongside the single writer
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, UsageError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, UsageError> {
        conn.execute_batch(SCHEMA)?;
        tracing::debug!("usage store schema ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, UsageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, UsageError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || f(&mut conn.lock())).await?
    }
}

fn apply_delta(conn: &mut Connection, delta: &UsageDelta) -> Result<bool, UsageError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let now = Utc::now().to_rfc3339();
    let date = delta.date.to_string();

    let inserted = tx.execute(
        "INSERT OR IGNORE INTO recorded_generations (generation_id, user_id, recorded_at)
         VALUES (?1, ?2, ?3)",
        params![delta.generation_id.to_string(), delta.user_id, now],
    )?;
    if inserted == 0 {
        return Ok(false);
    }

    let (fast, regular, expert) = match delta.mode {
        GenerationMode::Fast => (1u64, 0u64, 0u64),
        GenerationMode::Regular => (0, 1, 0),
        GenerationMode::Expert => (0, 0, 1),
    };
    tx.execute(
        "INSERT INTO usage_daily
             (user_id, usage_date, solves_fast, solves_regular, solves_expert, total_cost, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT (user_id, usage_date) DO UPDATE SET
             solves_fast = solves_fast + excluded.solves_fast,
             solves_regular = solves_regular + excluded.solves_regular,
             solves_expert = solves_expert + excluded.solves_expert,
             total_cost = total_cost + excluded.total_cost,
             updated_at = excluded.updated_at",
        params![delta.user_id, date, fast, regular, expert, delta.total_cost, now],
    )?;

    {
        let mut stmt = tx.prepare(
            "INSERT INTO usage_daily_models
                 (user_id, usage_date, provider, model, input_tokens, output_tokens, thinking_tokens, cost)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (user_id, usage_date, provider, model) DO UPDATE SET
                 input_tokens = input_tokens + excluded.input_tokens,
                 output_tokens = output_tokens + excluded.output_tokens,
                 thinking_tokens = thinking_tokens + excluded.thinking_tokens,
                 cost = cost + excluded.cost",
        )?;
        for model in &delta.models {
            stmt.execute(params![
                delta.user_id,
                date,
                model.provider.name(),
                model.model,
                model.usage.input_tokens,
                model.usage.output_tokens,
                model.usage.thinking_tokens.unwrap_or(0),
                model.cost,
            ])?;
        }
    }

    tx.commit()?;
    Ok(true)
}

fn load_daily(
    conn: &Connection,
    user_id: &str,
    date: NaiveDate,
) -> Result<Option<UsageAggregate>, UsageError> {
    let day = date.to_string();
    let row = conn
        .query_row(
            "SELECT solves_fast, solves_regular, solves_expert, total_cost
             FROM usage_daily WHERE user_id = ?1 AND usage_date = ?2",
            params![user_id, day],
            |row| {
                Ok((
                    row.get::<_, u64>(0)?,
                    row.get::<_, u64>(1)?,
                    row.get::<_, u64>(2)?,
                    row.get::<_, f64>(3)?,
                ))
            },
        )
        .optional()?;

    let Some((solves_fast, solves_regular, solves_expert, total_cost)) = row else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT provider, model, input_tokens, output_tokens, thinking_tokens, cost
         FROM usage_daily_models WHERE user_id = ?1 AND usage_date = ?2
         ORDER BY provider, model",
    )?;
    let rows = stmt.query_map(params![user_id, day], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, u64>(2)?,
            row.get::<_, u64>(3)?,
            row.get::<_, u64>(4)?,
            row.get::<_, f64>(5)?,
        ))
    })?;

    let mut models = Vec::new();
    for row in rows {
        let (provider, model, input, output, thinking, cost) = row?;
        let provider = provider.parse::<Provider>().map_err(|e| {
            UsageError::Unavailable(format!("corrupt provider column '{provider}': {e}"))
        })?;
        let mut usage = TokenUsage::new(input, output);
        if thinking > 0 {
            usage = usage.with_thinking(thinking);
        }
        models.push(ModelCost {
            provider,
            model,
            usage,
            cost,
        });
    }

    Ok(Some(UsageAggregate {
        user_id: user_id.to_string(),
        date,
        solves_fast,
        solves_regular,
        solves_expert,
        total_cost,
        models,
    }))
}

#[async_trait]
impl UsageStore for SqliteUsageStore {
    async fn apply(&self, delta: &UsageDelta) -> Result<bool, UsageError> {
        let delta = delta.clone();
        self.with_conn(move |conn| apply_delta(conn, &delta)).await
    }

    async fn daily(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Option<UsageAggregate>, UsageError> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| load_daily(conn, &user_id, date))
            .await
    }

    async fn monthly_totals(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<MonthlyUsage, UsageError> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let (solves, cost) = conn.query_row(
                "SELECT COALESCE(SUM(solves_fast + solves_regular + solves_expert), 0),
                        COALESCE(SUM(total_cost), 0.0)
                 FROM usage_daily
                 WHERE user_id = ?1 AND usage_date >= ?2 AND usage_date < ?3",
                params![user_id, from.to_string(), to.to_string()],
                |row| Ok((row.get::<_, u64>(0)?, row.get::<_, f64>(1)?)),
            )?;
            Ok(MonthlyUsage { solves, cost })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn delta(user: &str, day: NaiveDate, mode: GenerationMode, cost: f64) -> UsageDelta {
        UsageDelta {
            generation_id: Uuid::new_v4(),
            user_id: user.into(),
            date: day,
            mode,
            models: vec![ModelCost {
                provider: Provider::OpenAI,
                model: "gpt-4o".into(),
                usage: TokenUsage::new(100, 50),
                cost,
            }],
            total_cost: cost,
        }
    }

    #[tokio::test]
    async fn test_first_write_creates_then_increments() {
        let store = SqliteUsageStore::open_in_memory().expect("store");
        let day = date(2026, 3, 14);
        assert!(store.daily("u1", day).await.expect("read").is_none());

        assert!(store.apply(&delta("u1", day, GenerationMode::Fast, 0.5)).await.expect("write"));
        assert!(store.apply(&delta("u1", day, GenerationMode::Expert, 0.25)).await.expect("write"));

        let aggregate = store.daily("u1", day).await.expect("read").expect("row");
        assert_eq!(aggregate.solves_fast, 1);
        assert_eq!(aggregate.solves_expert, 1);
        assert_eq!(aggregate.solves(), 2);
        assert!((aggregate.total_cost - 0.75).abs() < 1e-12);
        assert_eq!(aggregate.models.len(), 1);
        assert_eq!(aggregate.models[0].usage, TokenUsage::new(200, 100));
    }

    #[tokio::test]
    async fn test_replayed_generation_is_ignored() {
        let store = SqliteUsageStore::open_in_memory().expect("store");
        let day = date(2026, 3, 14);
        let d = delta("u1", day, GenerationMode::Regular, 1.0);
        assert!(store.apply(&d).await.expect("first write"));
        assert!(!store.apply(&d).await.expect("replay"));

        let aggregate = store.daily("u1", day).await.expect("read").expect("row");
        assert_eq!(aggregate.solves(), 1);
        assert!((aggregate.total_cost - 1.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_monthly_totals_respect_window_and_user() {
        let store = SqliteUsageStore::open_in_memory().expect("store");
        for day in [date(2026, 2, 28), date(2026, 3, 1), date(2026, 3, 31), date(2026, 4, 1)] {
            store
                .apply(&delta("u1", day, GenerationMode::Fast, 1.0))
                .await
                .expect("write");
        }
        store
            .apply(&delta("u2", date(2026, 3, 10), GenerationMode::Fast, 5.0))
            .await
            .expect("write");

        let totals = store
            .monthly_totals("u1", date(2026, 3, 1), date(2026, 4, 1))
            .await
            .expect("totals");
        assert_eq!(totals.solves, 2);
        assert!((totals.cost - 2.0).abs() < 1e-12);

        let empty = store
            .monthly_totals("nobody", date(2026, 3, 1), date(2026, 4, 1))
            .await
            .expect("totals");
        assert_eq!(empty, MonthlyUsage::default());
    }

    #[tokio::test]
    async fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("nested").join("usage.db");
        let day = date(2026, 5, 2);
        {
            let store = SqliteUsageStore::open(&path).expect("open");
            store
                .apply(&delta("u1", day, GenerationMode::Fast, 0.1))
                .await
                .expect("write");
        }
        let reopened = SqliteUsageStore::open(&path).expect("reopen");
        assert!(reopened.daily("u1", day).await.expect("read").is_some());
    }
}
