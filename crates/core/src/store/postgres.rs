//! PostgreSQL implementation of RunStore
//!
//! One row per run in the `runs` table; the transcript is stored as JSONB.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};

use super::RunStore;
use crate::error::{AgentRunError, Result};
use crate::message::Message;
use crate::run::{Run, RunStatus};

const RUN_COLUMNS: &str =
    "id, agent_id, task, turn, messages, status, result, error, created_at, updated_at";

/// PostgreSQL implementation of RunStore
///
/// Expects the `runs` table from the workspace migrations.
#[derive(Clone)]
pub struct PostgresRunStore {
    pool: PgPool,
}

impl PostgresRunStore {
    /// Create a new PostgreSQL store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn row_to_run(row: &PgRow) -> Result<Run> {
    let turn: i32 = row.get("turn");
    let status: String = row.get("status");
    let messages: Json<Vec<Message>> = row.get("messages");
    let created_at: DateTime<Utc> = row.get("created_at");
    let updated_at: DateTime<Utc> = row.get("updated_at");

    Ok(Run {
        id: row.get("id"),
        agent_id: row.get("agent_id"),
        task: row.get("task"),
        turn: turn.max(0) as usize,
        messages: messages.0,
        status: status.parse::<RunStatus>()?,
        result: row.get("result"),
        error: row.get("error"),
        created_at,
        updated_at,
    })
}

#[async_trait]
impl RunStore for PostgresRunStore {
    #[instrument(skip(self, run), fields(run_id = %run.id))]
    async fn create_run(&self, run: &Run) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO runs (id, agent_id, task, turn, messages, status, result, error, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&run.id)
        .bind(&run.agent_id)
        .bind(&run.task)
        .bind(run.turn as i32)
        .bind(Json(&run.messages))
        .bind(run.status.as_str())
        .bind(&run.result)
        .bind(&run.error)
        .bind(run.created_at)
        .bind(run.updated_at)
        .execute(&self.pool)
        .await?;

        debug!("created run");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_run(&self, run_id: &str) -> Result<Option<Run>> {
        let query = format!("SELECT {} FROM runs WHERE id = $1", RUN_COLUMNS);
        let row = sqlx::query(&query)
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_run).transpose()
    }

    #[instrument(skip(self, run), fields(run_id = %run.id, status = %run.status))]
    async fn save_run(&self, run: &Run) -> Result<()> {
        // Only running rows may change
        let result = sqlx::query(
            r#"
            UPDATE runs
            SET turn = $2,
                messages = $3,
                status = $4,
                result = $5,
                error = $6,
                updated_at = $7
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(&run.id)
        .bind(run.turn as i32)
        .bind(Json(&run.messages))
        .bind(run.status.as_str())
        .bind(&run.result)
        .bind(&run.error)
        .bind(run.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        match self.get_run(&run.id).await? {
            None => Err(AgentRunError::run_not_found(&run.id)),
            Some(stored) => Err(AgentRunError::RunTerminal {
                run_id: stored.id,
                status: stored.status,
            }),
        }
    }

    #[instrument(skip(self))]
    async fn list_runs(&self, status: Option<RunStatus>) -> Result<Vec<Run>> {
        let rows = match status {
            Some(status) => {
                let query = format!(
                    "SELECT {} FROM runs WHERE status = $1 ORDER BY created_at ASC, id ASC",
                    RUN_COLUMNS
                );
                sqlx::query(&query)
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let query = format!(
                    "SELECT {} FROM runs ORDER BY created_at ASC, id ASC",
                    RUN_COLUMNS
                );
                sqlx::query(&query).fetch_all(&self.pool).await?
            }
        };

        rows.iter().map(row_to_run).collect()
    }
}
