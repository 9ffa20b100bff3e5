//! Postgres-backed [`RelationalStore`] and [`Ledger`] (§4.2, §6).
//!
//! Grounded on `toka-store-sqlite`'s `SqliteBackend`: a pool wrapped in a
//! single struct, a `migrate()` run once at construction using
//! `CREATE TABLE IF NOT EXISTS`, and hand-written `sqlx::query` (not the
//! `query!` compile-time macro, which needs a live `DATABASE_URL` at build
//! time the sqlite backend also avoids).
//!
//! `claim` implements §4.2's "single serializable transaction": it takes a
//! `SELECT ... FOR UPDATE` row lock on the idempotency row (or inserts a
//! fresh one) before deciding the outcome, so two concurrent claimants for
//! the same `event_id` can never both observe `Fresh` or `Retry`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use fluxa_ledger::{
    truncate_reason, ClaimOutcome, FluxaError, Ledger, LedgerEntry, LedgerStatus,
    DEFAULT_LIVENESS_WINDOW_SECS,
};
use fluxa_types::{CorrelationId, EventId};
use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use tracing::info;

use crate::traits::{PayloadMode, PersistedEvent, RelationalStore};

/// A Postgres-backed event store and idempotency ledger.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    liveness_window: Duration,
}

impl PostgresStore {
    /// Connect to `database_url`, run migrations, and return a ready store.
    ///
    /// Pool size and connection lifetime are bounded per §5's
    /// "Shared-resource policy": at most 10 connections, each recycled after
    /// 5 minutes so the pool survives a transparent failover.
    pub async fn connect(database_url: &str) -> Result<Self, FluxaError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .max_lifetime(std::time::Duration::from_secs(300))
            .connect(database_url)
            .await
            .map_err(|e| FluxaError::PersistTransient(format!("connect failed: {e}")))?;
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, running migrations against it.
    pub async fn from_pool(pool: PgPool) -> Result<Self, FluxaError> {
        let store = Self {
            pool,
            liveness_window: Duration::seconds(DEFAULT_LIVENESS_WINDOW_SECS),
        };
        store.migrate().await?;
        Ok(store)
    }

    /// Override the liveness window (§4.2 step 4); `connect`/`from_pool`
    /// default to [`DEFAULT_LIVENESS_WINDOW_SECS`].
    pub fn with_liveness_window(mut self, window: Duration) -> Self {
        self.liveness_window = window;
        self
    }

    async fn migrate(&self) -> Result<(), FluxaError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                event_id TEXT PRIMARY KEY,
                correlation_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                amount NUMERIC NOT NULL,
                currency TEXT NOT NULL,
                merchant TEXT NOT NULL,
                event_timestamp TIMESTAMPTZ NOT NULL,
                metadata JSONB,
                payload_mode TEXT NOT NULL CHECK (payload_mode IN ('INLINE', 'S3')),
                s3_key TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| FluxaError::PersistTransient(format!("migrate events: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS idempotency_keys (
                event_id TEXT PRIMARY KEY,
                status TEXT NOT NULL CHECK (status IN ('processing', 'success', 'failed')),
                first_seen_at TIMESTAMPTZ NOT NULL,
                last_seen_at TIMESTAMPTZ NOT NULL,
                attempts INTEGER NOT NULL CHECK (attempts >= 1),
                error_reason TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| FluxaError::PersistTransient(format!("migrate idempotency_keys: {e}")))?;

        // §6 "Recommended indexes".
        for stmt in [
            "CREATE INDEX IF NOT EXISTS events_correlation_id_idx ON events (correlation_id)",
            "CREATE INDEX IF NOT EXISTS events_user_id_idx ON events (user_id)",
            "CREATE INDEX IF NOT EXISTS events_event_timestamp_idx ON events (event_timestamp)",
            "CREATE INDEX IF NOT EXISTS idempotency_keys_status_idx ON idempotency_keys (status)",
            "CREATE INDEX IF NOT EXISTS idempotency_keys_last_seen_at_idx ON idempotency_keys (last_seen_at)",
        ] {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| FluxaError::PersistTransient(format!("migrate index: {e}")))?;
        }

        info!("events and idempotency_keys tables ready");
        Ok(())
    }

    /// One attempt at §4.2's claim transaction. Returns `Ok(None)` when the
    /// fresh-row insert loses a race against a concurrent claimant that
    /// inserted first (`ON CONFLICT DO NOTHING` leaves zero rows affected);
    /// callers restart from `SELECT ... FOR UPDATE`, which will now see and
    /// lock the row the winner just created.
    async fn try_claim(&self, event_id: &EventId) -> Result<Option<ClaimOutcome>, FluxaError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| FluxaError::LedgerTransient(format!("begin claim tx: {e}")))?;

        let existing = sqlx::query(
            "SELECT status, last_seen_at, attempts FROM idempotency_keys WHERE event_id = $1 FOR UPDATE",
        )
        .bind(event_id.0.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| FluxaError::LedgerTransient(format!("lock ledger row: {e}")))?;

        let now = Utc::now();

        let outcome = match existing {
            None => {
                let inserted = sqlx::query(
                    r#"
                    INSERT INTO idempotency_keys
                        (event_id, status, first_seen_at, last_seen_at, attempts, error_reason)
                    VALUES ($1, 'processing', $2, $2, 1, NULL)
                    ON CONFLICT (event_id) DO NOTHING
                    "#,
                )
                .bind(event_id.0.as_str())
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(|e| FluxaError::LedgerTransient(format!("insert ledger row: {e}")))?;

                if inserted.rows_affected() == 0 {
                    tx.rollback()
                        .await
                        .map_err(|e| FluxaError::LedgerTransient(format!("rollback claim tx: {e}")))?;
                    return Ok(None);
                }
                ClaimOutcome::Fresh
            }
            Some(row) => {
                let status: String = row.get("status");
                let last_seen_at: DateTime<Utc> = row.get("last_seen_at");
                let attempts: i32 = row.get("attempts");

                if status == "success" {
                    ClaimOutcome::AlreadyDone
                } else if status == "processing" && now - last_seen_at < self.liveness_window {
                    ClaimOutcome::AlreadyDone
                } else {
                    sqlx::query(
                        r#"
                        UPDATE idempotency_keys
                        SET status = 'processing', last_seen_at = $2, attempts = $3
                        WHERE event_id = $1
                        "#,
                    )
                    .bind(event_id.0.as_str())
                    .bind(now)
                    .bind(attempts + 1)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| FluxaError::LedgerTransient(format!("update ledger row: {e}")))?;
                    ClaimOutcome::Retry
                }
            }
        };

        tx.commit()
            .await
            .map_err(|e| FluxaError::LedgerTransient(format!("commit claim tx: {e}")))?;

        Ok(Some(outcome))
    }
}

#[async_trait]
impl RelationalStore for PostgresStore {
    async fn insert_event(&self, event: PersistedEvent) -> Result<bool, FluxaError> {
        let metadata_json = event
            .metadata
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| FluxaError::UnmarshalError(e.to_string()))?;

        let result = sqlx::query(
            r#"
            INSERT INTO events
                (event_id, correlation_id, user_id, amount, currency, merchant,
                 event_timestamp, metadata, payload_mode, s3_key, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event.event_id.0.as_str())
        .bind(event.correlation_id.0.as_str())
        .bind(&event.user_id)
        .bind(event.amount)
        .bind(&event.currency)
        .bind(&event.merchant)
        .bind(event.timestamp)
        .bind(metadata_json)
        .bind(payload_mode_str(event.payload_mode))
        .bind(event.s3_key.as_deref())
        .bind(event.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| FluxaError::PersistTransient(format!("insert event: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_event(&self, event_id: &EventId) -> Result<Option<PersistedEvent>, FluxaError> {
        let row = sqlx::query(
            r#"
            SELECT event_id, correlation_id, user_id, amount, currency, merchant,
                   event_timestamp, metadata, payload_mode, s3_key, created_at
            FROM events WHERE event_id = $1
            "#,
        )
        .bind(event_id.0.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| FluxaError::PersistTransient(format!("get event: {e}")))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let metadata_json: Option<serde_json::Value> = row.get("metadata");
        let metadata: Option<HashMap<String, String>> = metadata_json
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| FluxaError::UnmarshalError(e.to_string()))?;

        let payload_mode_raw: String = row.get("payload_mode");

        Ok(Some(PersistedEvent {
            event_id: EventId(row.get("event_id")),
            correlation_id: CorrelationId(row.get("correlation_id")),
            user_id: row.get("user_id"),
            amount: row.get::<Decimal, _>("amount"),
            currency: row.get("currency"),
            merchant: row.get("merchant"),
            timestamp: row.get("event_timestamp"),
            metadata,
            payload_mode: parse_payload_mode(&payload_mode_raw)?,
            s3_key: row.get("s3_key"),
            created_at: row.get("created_at"),
        }))
    }
}

/// §4.2 step 2: "If insertion collides with a concurrent insert for the
/// same `event_id`, restart step 1 (bounded retry, e.g. 3 attempts)".
/// `SELECT ... FOR UPDATE` only locks rows that already exist, so two
/// claimants that both observe no row can both race the insert; this bounds
/// how many times `claim` retries the whole transaction before giving up.
const MAX_CLAIM_INSERT_ATTEMPTS: u32 = 3;

#[async_trait]
impl Ledger for PostgresStore {
    async fn claim(&self, event_id: &EventId) -> Result<ClaimOutcome, FluxaError> {
        for attempt in 1..=MAX_CLAIM_INSERT_ATTEMPTS {
            match self.try_claim(event_id).await? {
                Some(outcome) => return Ok(outcome),
                None => {
                    // Lost the insert race against a concurrent fresh
                    // claimant; the row now exists, so the next attempt's
                    // `SELECT ... FOR UPDATE` will see and lock it.
                    info!(event_id = %event_id, attempt, "claim insert collided with a concurrent insert, retrying");
                }
            }
        }
        Err(FluxaError::LedgerTransient(format!(
            "claim insert collided with a concurrent insert {MAX_CLAIM_INSERT_ATTEMPTS} times in a row"
        )))
    }

    async fn commit_success(&self, event_id: &EventId) -> Result<(), FluxaError> {
        sqlx::query(
            r#"
            INSERT INTO idempotency_keys
                (event_id, status, first_seen_at, last_seen_at, attempts, error_reason)
            VALUES ($1, 'success', $2, $2, 1, NULL)
            ON CONFLICT (event_id) DO UPDATE
            SET status = 'success', last_seen_at = $2
            "#,
        )
        .bind(event_id.0.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| FluxaError::LedgerTransient(format!("commit_success: {e}")))?;
        Ok(())
    }

    async fn commit_failed(&self, event_id: &EventId, reason: &str) -> Result<(), FluxaError> {
        let reason = truncate_reason(reason);
        sqlx::query(
            r#"
            INSERT INTO idempotency_keys
                (event_id, status, first_seen_at, last_seen_at, attempts, error_reason)
            VALUES ($1, 'failed', $2, $2, 1, $3)
            ON CONFLICT (event_id) DO UPDATE
            SET status = 'failed', last_seen_at = $2, error_reason = $3
            "#,
        )
        .bind(event_id.0.as_str())
        .bind(Utc::now())
        .bind(&reason)
        .execute(&self.pool)
        .await
        .map_err(|e| FluxaError::LedgerTransient(format!("commit_failed: {e}")))?;
        Ok(())
    }

    async fn status(&self, event_id: &EventId) -> Result<Option<LedgerEntry>, FluxaError> {
        let row = sqlx::query(
            "SELECT status, first_seen_at, last_seen_at, attempts, error_reason FROM idempotency_keys WHERE event_id = $1",
        )
        .bind(event_id.0.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| FluxaError::LedgerTransient(format!("status: {e}")))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status: String = row.get("status");
        let attempts: i32 = row.get("attempts");

        Ok(Some(LedgerEntry {
            event_id: event_id.clone(),
            status: parse_ledger_status(&status)?,
            first_seen_at: row.get("first_seen_at"),
            last_seen_at: row.get("last_seen_at"),
            attempts: attempts as u32,
            error_reason: row.get("error_reason"),
        }))
    }
}

fn payload_mode_str(mode: PayloadMode) -> &'static str {
    match mode {
        PayloadMode::Inline => "INLINE",
        PayloadMode::S3 => "S3",
    }
}

fn parse_payload_mode(raw: &str) -> Result<PayloadMode, FluxaError> {
    match raw {
        "INLINE" => Ok(PayloadMode::Inline),
        "S3" => Ok(PayloadMode::S3),
        other => Err(FluxaError::UnmarshalError(format!(
            "unknown payload_mode in storage: {other}"
        ))),
    }
}

fn parse_ledger_status(raw: &str) -> Result<LedgerStatus, FluxaError> {
    match raw {
        "processing" => Ok(LedgerStatus::Processing),
        "success" => Ok(LedgerStatus::Success),
        "failed" => Ok(LedgerStatus::Failed),
        other => Err(FluxaError::UnmarshalError(format!(
            "unknown ledger status in storage: {other}"
        ))),
    }
}
