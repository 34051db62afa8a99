//! Durable Postgres-backed job queue.
//!
//! At-least-once delivery: rows are claimed with `FOR UPDATE SKIP LOCKED`,
//! and a `running` row whose claim outlives the visibility timeout is
//! reclaimed by a later worker (the crash-redelivery path). Retryable
//! failures reschedule with exponential backoff; exhausted or fatal
//! failures land in the `dead` state for inspection.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{info, warn};

use miga_core::config::QueueConfig;
use miga_core::types::InboundJob;

use crate::error::{QueueError, Result};

/// One claimed job plus its delivery bookkeeping.
#[derive(Debug)]
pub struct ClaimedJob {
    pub id: i64,
    pub job: InboundJob,
    pub attempts: i32,
}

pub struct PgQueue {
    pool: PgPool,
    cfg: QueueConfig,
}

impl PgQueue {
    pub fn new(pool: PgPool, cfg: QueueConfig) -> Self {
        Self { pool, cfg }
    }

    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS queue_jobs (
                id              BIGSERIAL PRIMARY KEY,
                conversation_id BIGINT NOT NULL,
                payload         JSONB NOT NULL,
                state           TEXT NOT NULL DEFAULT 'ready',
                attempts        INTEGER NOT NULL DEFAULT 0,
                visible_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
                claimed_at      TIMESTAMPTZ,
                last_error      TEXT,
                created_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at      TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_queue_jobs_claim
             ON queue_jobs (state, visible_at) WHERE state IN ('ready', 'running')",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Enqueue a job, enforcing the bounded backlog.
    pub async fn enqueue(&self, job: &InboundJob) -> Result<i64> {
        let backlog: i64 = sqlx::query(
            "SELECT COUNT(*) AS n FROM queue_jobs WHERE state IN ('ready', 'running')",
        )
        .fetch_one(&self.pool)
        .await?
        .try_get("n")?;
        if backlog >= self.cfg.capacity as i64 {
            return Err(QueueError::Overflow);
        }

        let id: i64 = sqlx::query(
            "INSERT INTO queue_jobs (conversation_id, payload)
             VALUES ($1, $2)
             RETURNING id",
        )
        .bind(job.conversation_id)
        .bind(serde_json::to_value(job).map_err(|e| {
            QueueError::Database(sqlx::Error::Decode(Box::new(e)))
        })?)
        .fetch_one(&self.pool)
        .await?
        .try_get("id")?;

        Ok(id)
    }

    /// Claim the next deliverable job: a `ready` row whose visibility time
    /// has arrived, or a `running` row whose claim expired.
    pub async fn claim(&self) -> Result<Option<ClaimedJob>> {
        let row = sqlx::query(
            "WITH next AS (
                SELECT id FROM queue_jobs
                WHERE (state = 'ready' AND visible_at <= now())
                   OR (state = 'running'
                       AND claimed_at < now() - make_interval(secs => $1))
                ORDER BY id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
             )
             UPDATE queue_jobs q
             SET state = 'running', claimed_at = now(),
                 attempts = q.attempts + 1, updated_at = now()
             FROM next
             WHERE q.id = next.id
             RETURNING q.id, q.payload, q.attempts",
        )
        .bind(self.cfg.visibility_timeout_secs as f64)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        let id: i64 = row.try_get("id")?;
        let payload: serde_json::Value = row.try_get("payload")?;
        let attempts: i32 = row.try_get("attempts")?;

        match serde_json::from_value::<InboundJob>(payload) {
            Ok(job) => Ok(Some(ClaimedJob { id, job, attempts })),
            Err(e) => {
                // Unparseable payload can never succeed; dead-letter it.
                warn!(job_id = id, error = %e, "malformed job payload, dead-lettering");
                self.bury(id, &format!("malformed payload: {e}")).await?;
                Ok(None)
            }
        }
    }

    /// Delete a successfully handled job.
    pub async fn complete(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM queue_jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record a failure: reschedule with `2^attempts` seconds of backoff, or
    /// dead-letter when the budget is spent or the failure is fatal.
    pub async fn fail(&self, id: i64, attempts: i32, error: &str, retryable: bool) -> Result<()> {
        if !retryable || attempts >= self.cfg.max_attempts {
            self.bury(id, error).await?;
            return Ok(());
        }
        let backoff_secs = 2i64.pow(attempts.clamp(0, 10) as u32);
        sqlx::query(
            "UPDATE queue_jobs
             SET state = 'ready',
                 visible_at = now() + make_interval(secs => $2),
                 last_error = $3,
                 updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(backoff_secs as f64)
        .bind(error)
        .execute(&self.pool)
        .await?;
        info!(job_id = id, attempts, backoff_secs, "job rescheduled");
        Ok(())
    }

    async fn bury(&self, id: i64, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE queue_jobs
             SET state = 'dead', last_error = $2, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        warn!(job_id = id, error, "job dead-lettered");
        Ok(())
    }

    /// Backlog depth for health output: (ready, running, dead).
    pub async fn depth(&self) -> Result<(i64, i64, i64)> {
        let row = sqlx::query(
            "SELECT
                COUNT(*) FILTER (WHERE state = 'ready')   AS ready,
                COUNT(*) FILTER (WHERE state = 'running') AS running,
                COUNT(*) FILTER (WHERE state = 'dead')    AS dead
             FROM queue_jobs",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok((
            row.try_get("ready")?,
            row.try_get("running")?,
            row.try_get("dead")?,
        ))
    }

    /// Drop dead rows older than the horizon. Periodic hygiene, not part of
    /// the delivery contract.
    pub async fn purge_dead_before(&self, horizon: DateTime<Utc>) -> Result<u64> {
        let res = sqlx::query(
            "DELETE FROM queue_jobs WHERE state = 'dead' AND updated_at < $1",
        )
        .bind(horizon)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }
}
