use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{SqliteConnection, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use super::{
    hash_api_key, Authorization, BillingGate, CallerContext, ChargeOutcome, ChargeRequest,
    INSUFFICIENT_FUNDS, UNKNOWN_ACCOUNT,
};
use crate::config::ApiKeyConfig;
use crate::error::AppError;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS accounts (
        name TEXT PRIMARY KEY,
        key_hash TEXT NOT NULL UNIQUE,
        balance_cents INTEGER NOT NULL DEFAULT 0,
        enabled INTEGER NOT NULL DEFAULT 1,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS charges (
        idempotency_key TEXT PRIMARY KEY,
        account_name TEXT NOT NULL,
        amount_cents INTEGER NOT NULL,
        description TEXT,
        created_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_charges_account ON charges(account_name, created_at)",
];

/// Billing gate backed by a SQLite ledger.
///
/// A charge is one `BEGIN IMMEDIATE` transaction: the `charges` row claims the
/// idempotency key, then a conditional `UPDATE` deducts the amount only if funds
/// allow it.
#[derive(Debug, Clone)]
pub struct SqliteBillingGate {
    pool: SqlitePool,
}

impl SqliteBillingGate {
    /// Open (or create) the ledger at `database_path`; `:memory:` gives a private in-memory ledger
    pub async fn connect(database_path: &str) -> Result<Self, AppError> {
        let pool = if database_path == ":memory:" {
            let options = SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| AppError::Config(format!("Invalid database options: {}", e)))?;
            // Every connection to :memory: is a separate database, so keep exactly one
            SqlitePoolOptions::new()
                .max_connections(1)
                .connect_with(options)
                .await?
        } else {
            if let Some(parent) = std::path::Path::new(database_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        AppError::Config(format!("Failed to create database directory: {}", e))
                    })?;
                }
            }

            let options = SqliteConnectOptions::new()
                .filename(database_path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal)
                .busy_timeout(Duration::from_secs(5));
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        let gate = Self { pool };
        gate.init_schema().await?;
        info!(database = %database_path, "Billing ledger ready");
        Ok(gate)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<(), AppError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Create accounts from `[[api_keys]]` that do not exist yet; existing balances are left alone
    pub async fn seed_from_config(&self, keys: &[ApiKeyConfig]) -> Result<usize, AppError> {
        let mut created = 0;
        for key in keys {
            if self
                .create_account(&key.name, &key.key, key.initial_balance_cents)
                .await?
            {
                created += 1;
            }
            self.set_enabled(&key.name, key.enabled).await?;
        }
        if created > 0 {
            info!(created, "Seeded billing accounts from configuration");
        }
        Ok(created)
    }

    /// Returns false when an account with this name already exists
    pub async fn create_account(
        &self,
        name: &str,
        api_key: &str,
        initial_balance_cents: i64,
    ) -> Result<bool, AppError> {
        let now = chrono::Utc::now().timestamp_millis();
        let result = sqlx::query(
            r#"
            INSERT INTO accounts (name, key_hash, balance_cents, enabled, created_at, updated_at)
            VALUES (?, ?, ?, 1, ?, ?)
            ON CONFLICT(name) DO NOTHING
            "#,
        )
        .bind(name)
        .bind(hash_api_key(api_key))
        .bind(initial_balance_cents)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), AppError> {
        sqlx::query("UPDATE accounts SET enabled = ?, updated_at = ? WHERE name = ?")
            .bind(enabled)
            .bind(chrono::Utc::now().timestamp_millis())
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Add funds; returns the new balance, or `None` for an unknown account
    pub async fn credit(&self, name: &str, amount_cents: i64) -> Result<Option<i64>, AppError> {
        if amount_cents <= 0 {
            return Err(AppError::Validation(
                "Credit amount must be positive".to_string(),
            ));
        }

        sqlx::query("UPDATE accounts SET balance_cents = balance_cents + ?, updated_at = ? WHERE name = ?")
            .bind(amount_cents)
            .bind(chrono::Utc::now().timestamp_millis())
            .bind(name)
            .execute(&self.pool)
            .await?;

        self.balance(name).await
    }

    pub async fn balance(&self, name: &str) -> Result<Option<i64>, AppError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT balance_cents FROM accounts WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(balance,)| balance))
    }

    /// Total cents charged to an account
    pub async fn total_charged(&self, name: &str) -> Result<i64, AppError> {
        let (total,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(amount_cents), 0) FROM charges WHERE account_name = ?",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }
}

#[async_trait]
impl BillingGate for SqliteBillingGate {
    fn backend(&self) -> &str {
        "sqlite"
    }

    async fn authorize(&self, caller: &CallerContext) -> Result<Authorization, AppError> {
        let Some(hash) = caller.key_hash() else {
            return Ok(Authorization::unregistered());
        };

        let row: Option<(String, i64)> = sqlx::query_as(
            "SELECT name, balance_cents FROM accounts WHERE key_hash = ? AND enabled = 1",
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Database error during authorization");
            AppError::Internal("Billing service unavailable".to_string())
        })?;

        Ok(match row {
            Some((name, balance)) => Authorization::registered(name, balance),
            None => Authorization::unregistered(),
        })
    }

    async fn charge(
        &self,
        caller: &CallerContext,
        request: &ChargeRequest,
    ) -> Result<ChargeOutcome, AppError> {
        if request.amount_cents < 0 {
            return Err(AppError::Internal(format!(
                "Refusing negative charge of {} cents",
                request.amount_cents
            )));
        }

        let Some(hash) = caller.key_hash() else {
            return Ok(ChargeOutcome::declined(UNKNOWN_ACCOUNT));
        };

        let mut conn = self.pool.acquire().await?;
        // Take the write lock before the first read; a deferred transaction that has
        // already read cannot be upgraded while another connection writes under WAL
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        match apply_charge(&mut conn, hash, request).await {
            Ok((outcome, commit)) => {
                let end = if commit { "COMMIT" } else { "ROLLBACK" };
                if let Err(e) = sqlx::query(end).execute(&mut *conn).await {
                    conn.close_on_drop();
                    return Err(e.into());
                }
                Ok(outcome)
            }
            Err(e) => {
                if let Err(rollback_err) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                    warn!(error = %rollback_err, "Rollback failed, discarding ledger connection");
                    conn.close_on_drop();
                }
                Err(e)
            }
        }
    }
}

/// Charge body, run inside an open write transaction on `conn`.
///
/// Returns the outcome and whether the transaction should be committed.
async fn apply_charge(
    conn: &mut SqliteConnection,
    key_hash: &str,
    request: &ChargeRequest,
) -> Result<(ChargeOutcome, bool), AppError> {
    let account: Option<(String,)> =
        sqlx::query_as("SELECT name FROM accounts WHERE key_hash = ? AND enabled = 1")
            .bind(key_hash)
            .fetch_optional(&mut *conn)
            .await?;
    let Some((account_name,)) = account else {
        return Ok((ChargeOutcome::declined(UNKNOWN_ACCOUNT), false));
    };

    let now = chrono::Utc::now().timestamp_millis();
    let claimed = sqlx::query(
        r#"
        INSERT INTO charges (idempotency_key, account_name, amount_cents, description, created_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(idempotency_key) DO NOTHING
        "#,
    )
    .bind(&request.idempotency_key)
    .bind(&account_name)
    .bind(request.amount_cents)
    .bind(&request.description)
    .bind(now)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if claimed == 0 {
        // Already applied under this key
        return Ok((ChargeOutcome::charged(), false));
    }

    let deducted = sqlx::query(
        r#"
        UPDATE accounts
        SET balance_cents = balance_cents - ?, updated_at = ?
        WHERE name = ? AND (? OR balance_cents >= ?)
        "#,
    )
    .bind(request.amount_cents)
    .bind(now)
    .bind(&account_name)
    .bind(request.allow_negative)
    .bind(request.amount_cents)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if deducted == 0 {
        return Ok((ChargeOutcome::declined(INSUFFICIENT_FUNDS), false));
    }

    Ok((ChargeOutcome::charged(), true))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn gate_with(name: &str, key: &str, balance: i64) -> SqliteBillingGate {
        let gate = SqliteBillingGate::connect(":memory:").await.unwrap();
        assert!(gate.create_account(name, key, balance).await.unwrap());
        gate
    }

    fn charge(amount_cents: i64, key: &str) -> ChargeRequest {
        ChargeRequest {
            amount_cents,
            allow_negative: false,
            idempotency_key: key.to_string(),
            description: "images/low/1024x1024/1/abc".to_string(),
        }
    }

    #[tokio::test]
    async fn test_authorize() {
        let gate = gate_with("alice", "sk-alice", 250).await;

        let auth = gate
            .authorize(&CallerContext::from_api_key("sk-alice"))
            .await
            .unwrap();
        assert_eq!(auth, Authorization::registered("alice", 250));

        let unknown = gate
            .authorize(&CallerContext::from_api_key("sk-mallory"))
            .await
            .unwrap();
        assert_eq!(unknown, Authorization::unregistered());
    }

    #[tokio::test]
    async fn test_charge_and_idempotent_replay() {
        let gate = gate_with("alice", "sk-alice", 250).await;
        let caller = CallerContext::from_api_key("sk-alice");

        assert!(gate.charge(&caller, &charge(40, "run-1")).await.unwrap().charged);
        assert!(gate.charge(&caller, &charge(40, "run-1")).await.unwrap().charged);

        assert_eq!(gate.balance("alice").await.unwrap(), Some(210));
        assert_eq!(gate.total_charged("alice").await.unwrap(), 40);
    }

    #[tokio::test]
    async fn test_insufficient_funds_leaves_no_trace() {
        let gate = gate_with("bob", "sk-bob", 10).await;
        let caller = CallerContext::from_api_key("sk-bob");

        let outcome = gate.charge(&caller, &charge(11, "run-1")).await.unwrap();
        assert_eq!(outcome, ChargeOutcome::declined(INSUFFICIENT_FUNDS));
        assert_eq!(gate.balance("bob").await.unwrap(), Some(10));
        assert_eq!(gate.total_charged("bob").await.unwrap(), 0);

        // The key was not consumed by the declined attempt
        gate.credit("bob", 5).await.unwrap();
        assert!(gate.charge(&caller, &charge(11, "run-1")).await.unwrap().charged);
        assert_eq!(gate.balance("bob").await.unwrap(), Some(4));
    }

    #[tokio::test]
    async fn test_unknown_caller_declined() {
        let gate = gate_with("bob", "sk-bob", 10).await;
        let outcome = gate
            .charge(&CallerContext::anonymous(), &charge(1, "run-1"))
            .await
            .unwrap();
        assert!(!outcome.charged);
        assert_eq!(outcome.message.as_deref(), Some(UNKNOWN_ACCOUNT));
    }

    #[tokio::test]
    async fn test_seed_from_config_keeps_existing_balance() {
        let gate = gate_with("alice", "sk-alice", 3).await;
        let keys = vec![
            ApiKeyConfig {
                key: "sk-alice".to_string(),
                name: "alice".to_string(),
                enabled: true,
                initial_balance_cents: 1000,
            },
            ApiKeyConfig {
                key: "sk-carol".to_string(),
                name: "carol".to_string(),
                enabled: false,
                initial_balance_cents: 1000,
            },
        ];

        assert_eq!(gate.seed_from_config(&keys).await.unwrap(), 1);
        assert_eq!(gate.balance("alice").await.unwrap(), Some(3));
        assert_eq!(gate.balance("carol").await.unwrap(), Some(1000));

        let carol = gate
            .authorize(&CallerContext::from_api_key("sk-carol"))
            .await
            .unwrap();
        assert!(!carol.registered);
    }

    async fn file_gate(dir: &tempfile::TempDir, balance: i64) -> SqliteBillingGate {
        let path = dir.path().join("billing.db");
        let gate = SqliteBillingGate::connect(path.to_str().unwrap()).await.unwrap();
        assert!(gate.create_account("alice", "sk-alice", balance).await.unwrap());
        gate
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_charges_on_file_ledger() {
        let dir = tempfile::TempDir::new().unwrap();
        let gate = file_gate(&dir, 1_000_000).await;
        let caller = CallerContext::from_api_key("sk-alice");

        let tasks: Vec<_> = (0..64)
            .map(|i| {
                let gate = gate.clone();
                let caller = caller.clone();
                tokio::spawn(async move { gate.charge(&caller, &charge(1, &format!("run-{}", i))).await })
            })
            .collect();

        for task in tasks {
            let outcome = task.await.unwrap().unwrap();
            assert!(outcome.charged);
        }
        assert_eq!(gate.balance("alice").await.unwrap(), Some(1_000_000 - 64));
        assert_eq!(gate.total_charged("alice").await.unwrap(), 64);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_charges_never_overdraw() {
        let dir = tempfile::TempDir::new().unwrap();
        let gate = file_gate(&dir, 10).await;
        let caller = CallerContext::from_api_key("sk-alice");

        let tasks: Vec<_> = (0..25)
            .map(|i| {
                let gate = gate.clone();
                let caller = caller.clone();
                tokio::spawn(async move { gate.charge(&caller, &charge(1, &format!("run-{}", i))).await })
            })
            .collect();

        let mut charged = 0;
        for task in tasks {
            let outcome = task.await.unwrap().unwrap();
            if outcome.charged {
                charged += 1;
            } else {
                assert_eq!(outcome.message.as_deref(), Some(INSUFFICIENT_FUNDS));
            }
        }
        assert_eq!(charged, 10);
        assert_eq!(gate.balance("alice").await.unwrap(), Some(0));
        assert_eq!(gate.total_charged("alice").await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_credit_rejects_non_positive() {
        let gate = gate_with("alice", "sk-alice", 0).await;
        assert!(gate.credit("alice", 0).await.is_err());
        assert_eq!(gate.credit("nobody", 5).await.unwrap(), None);
    }
}
