//! PostgreSQL implementation of StepStore
//!
//! Production persistence for step checkpoints:
//! - One row per (run_id, step_key)
//! - Success is written with a guarded upsert so a succeeded row is never replaced

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};

use super::store::{StepStore, StoreError};
use crate::step::{StepOutcome, StepRecord};

const RETURNING: &str =
    "RETURNING run_id, step_key, attempts, outcome, result, last_error, updated_at";

/// PostgreSQL implementation of StepStore
///
/// Expects the `step_records` table from the workspace migrations.
///
/// # Example
///
/// ```ignore
/// use agentrun_durable::PostgresStepStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/agentrun").await?;
/// let store = PostgresStepStore::new(pool);
/// ```
#[derive(Clone)]
pub struct PostgresStepStore {
    pool: PgPool,
}

impl PostgresStepStore {
    /// Create a new PostgreSQL store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn db_error(context: &'static str) -> impl Fn(sqlx::Error) -> StoreError {
    move |e| {
        error!("{}: {}", context, e);
        StoreError::Database(e.to_string())
    }
}

fn row_to_record(row: &PgRow) -> Result<StepRecord, StoreError> {
    let outcome: String = row.get("outcome");
    let attempts: i32 = row.get("attempts");
    let updated_at: DateTime<Utc> = row.get("updated_at");

    Ok(StepRecord {
        run_id: row.get("run_id"),
        key: row.get("step_key"),
        attempts: attempts.max(0) as u32,
        outcome: outcome
            .parse::<StepOutcome>()
            .map_err(StoreError::Serialization)?,
        result: row.get("result"),
        last_error: row.get("last_error"),
        updated_at,
    })
}

#[async_trait]
impl StepStore for PostgresStepStore {
    #[instrument(skip(self))]
    async fn load_step(&self, run_id: &str, key: &str) -> Result<Option<StepRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT run_id, step_key, attempts, outcome, result, last_error, updated_at
            FROM step_records
            WHERE run_id = $1 AND step_key = $2
            "#,
        )
        .bind(run_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to load step"))?;

        row.as_ref().map(row_to_record).transpose()
    }

    #[instrument(skip(self))]
    async fn begin_attempt(&self, run_id: &str, key: &str) -> Result<StepRecord, StoreError> {
        let query = format!(
            r#"
            INSERT INTO step_records (run_id, step_key, attempts, outcome)
            VALUES ($1, $2, 1, 'pending')
            ON CONFLICT (run_id, step_key) DO UPDATE
            SET attempts = step_records.attempts + 1,
                outcome = 'pending',
                last_error = NULL,
                updated_at = NOW()
            WHERE step_records.outcome <> 'succeeded'
            {}
            "#,
            RETURNING
        );

        let row = sqlx::query(&query)
            .bind(run_id)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to begin step attempt"))?;

        match row {
            Some(row) => row_to_record(&row),
            // Guard rejected the update: the step already succeeded
            None => self
                .load_step(run_id, key)
                .await?
                .ok_or_else(|| StoreError::StepNotFound {
                    run_id: run_id.to_string(),
                    key: key.to_string(),
                }),
        }
    }

    #[instrument(skip(self, result))]
    async fn record_success(
        &self,
        run_id: &str,
        key: &str,
        result: serde_json::Value,
    ) -> Result<StepRecord, StoreError> {
        let query = format!(
            r#"
            INSERT INTO step_records (run_id, step_key, attempts, outcome, result)
            VALUES ($1, $2, 1, 'succeeded', $3)
            ON CONFLICT (run_id, step_key) DO UPDATE
            SET outcome = 'succeeded',
                result = EXCLUDED.result,
                last_error = NULL,
                updated_at = NOW()
            WHERE step_records.outcome <> 'succeeded'
            {}
            "#,
            RETURNING
        );

        let row = sqlx::query(&query)
            .bind(run_id)
            .bind(key)
            .bind(&result)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to record step success"))?;

        match row {
            Some(row) => {
                debug!(%run_id, %key, "recorded step success");
                row_to_record(&row)
            }
            None => self
                .load_step(run_id, key)
                .await?
                .ok_or_else(|| StoreError::StepNotFound {
                    run_id: run_id.to_string(),
                    key: key.to_string(),
                }),
        }
    }

    #[instrument(skip(self))]
    async fn record_failure(
        &self,
        run_id: &str,
        key: &str,
        error: &str,
    ) -> Result<StepRecord, StoreError> {
        let query = format!(
            r#"
            INSERT INTO step_records (run_id, step_key, attempts, outcome, last_error)
            VALUES ($1, $2, 1, 'failed', $3)
            ON CONFLICT (run_id, step_key) DO UPDATE
            SET outcome = 'failed',
                last_error = EXCLUDED.last_error,
                updated_at = NOW()
            WHERE step_records.outcome <> 'succeeded'
            {}
            "#,
            RETURNING
        );

        let row = sqlx::query(&query)
            .bind(run_id)
            .bind(key)
            .bind(error)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to record step failure"))?;

        match row {
            Some(row) => row_to_record(&row),
            None => self
                .load_step(run_id, key)
                .await?
                .ok_or_else(|| StoreError::StepNotFound {
                    run_id: run_id.to_string(),
                    key: key.to_string(),
                }),
        }
    }

    #[instrument(skip(self))]
    async fn list_steps(&self, run_id: &str) -> Result<Vec<StepRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT run_id, step_key, attempts, outcome, result, last_error, updated_at
            FROM step_records
            WHERE run_id = $1
            ORDER BY created_at ASC, step_key ASC
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list steps"))?;

        rows.iter().map(row_to_record).collect()
    }

    #[instrument(skip(self))]
    async fn delete_run_steps(&self, run_id: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM step_records WHERE run_id = $1")
            .bind(run_id)
            .execute(&self.pool)
            .await
            .map_err(db_error("Failed to delete steps"))?;

        Ok(result.rows_affected())
    }
}
