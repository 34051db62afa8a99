//! The action bus: accepts proposed side effects, gates them by autonomy
//! level, persists the lifecycle, and hands approved actions to the
//! executor. Every state change is guarded by the legal-transition matrix
//! and by an optimistic `WHERE state = $expected` so concurrent operators
//! cannot double-drive a record.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rand::Rng;
use serde_json::{json, Value};
use sqlx::{PgPool, Row};
use tracing::{info, warn};
use uuid::Uuid;

use miga_core::config::ActionsConfig;

use crate::error::{ActionError, Result};
use crate::executor::ActionExecutor;
use crate::registry::{ActionRegistry, ActionType};
use crate::types::{ActionRecord, ActionState, AutonomyLevel, HandlerKind, ProposedAction};

pub struct ActionBus {
    pool: PgPool,
    registry: ActionRegistry,
    executor: Arc<ActionExecutor>,
    cfg: ActionsConfig,
}

impl ActionBus {
    pub fn new(
        pool: PgPool,
        registry: ActionRegistry,
        executor: Arc<ActionExecutor>,
        cfg: ActionsConfig,
    ) -> Self {
        Self {
            pool,
            registry,
            executor,
            cfg,
        }
    }

    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS action_bus (
                action_id      UUID PRIMARY KEY,
                action_type    TEXT NOT NULL,
                payload        JSONB NOT NULL DEFAULT '{}'::jsonb,
                context        JSONB NOT NULL DEFAULT '{}'::jsonb,
                requested_by   TEXT NOT NULL,
                reason         TEXT NOT NULL,
                autonomy_level TEXT NOT NULL,
                handler        TEXT NOT NULL,
                state          TEXT NOT NULL,
                metadata       JSONB NOT NULL DEFAULT '{}'::jsonb,
                created_at     TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at     TIMESTAMPTZ NOT NULL DEFAULT now(),
                expires_at     TIMESTAMPTZ
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_action_bus_state
             ON action_bus (state, expires_at)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ── Lifecycle entry point ────────────────────────────────────────────

    /// Accept a proposed action: resolve level and handler, check dynamic
    /// limits, persist, and route by autonomy level. Returns the record in
    /// its post-routing state (auto actions come back `Executed`/`Failed`;
    /// a limit overrun comes back `Rejected` with `LIMITS_EXCEEDED`).
    pub async fn propose(&self, proposed: ProposedAction) -> Result<ActionRecord> {
        let action_type = ActionType::parse(&proposed.action_type)?;
        let spec = self.registry.spec(action_type);

        let over_limit = self.check_limits(&proposed).await?;

        let action_id = Uuid::new_v4();
        let now = Utc::now();
        let (initial_state, initial_metadata) = match over_limit {
            Some(limit) => (
                ActionState::Rejected,
                json!({"failure_reason": "LIMITS_EXCEEDED", "daily_limit": limit}),
            ),
            None => (ActionState::Proposed, json!({})),
        };
        sqlx::query(
            "INSERT INTO action_bus
                (action_id, action_type, payload, context, requested_by, reason,
                 autonomy_level, handler, state, metadata)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(action_id)
        .bind(&proposed.action_type)
        .bind(&proposed.payload)
        .bind(&proposed.context)
        .bind(&proposed.requested_by)
        .bind(&proposed.reason)
        .bind(spec.autonomy.as_str())
        .bind(spec.handler.as_str())
        .bind(initial_state.as_str())
        .bind(initial_metadata)
        .execute(&self.pool)
        .await?;
        if over_limit.is_some() {
            return self.get(action_id).await;
        }
        info!(
            action_id = %action_id,
            action_type = %proposed.action_type,
            autonomy = spec.autonomy.as_str(),
            "action proposed"
        );

        match spec.autonomy {
            AutonomyLevel::Auto => {
                self.transition(
                    action_id,
                    ActionState::Proposed,
                    ActionState::Approved,
                    json!({"approved_by": "AUTO", "approved_at": now}),
                )
                .await?;
                self.execute(action_id).await
            }
            AutonomyLevel::Draft => {
                let expires = now + Duration::hours(self.cfg.draft_expiry_hours);
                self.transition_with_expiry(
                    action_id,
                    ActionState::Proposed,
                    ActionState::Draft,
                    Value::Null,
                    expires,
                )
                .await?;
                self.get(action_id).await
            }
            AutonomyLevel::Approval => {
                let expires = now + Duration::hours(self.cfg.approval_expiry_hours);
                self.transition_with_expiry(
                    action_id,
                    ActionState::Proposed,
                    ActionState::PendingApproval,
                    Value::Null,
                    expires,
                )
                .await?;
                self.get(action_id).await
            }
            AutonomyLevel::Critical => {
                let expires = now + Duration::hours(self.cfg.approval_expiry_hours);
                self.transition_with_expiry(
                    action_id,
                    ActionState::Proposed,
                    ActionState::PendingApproval,
                    json!({"requires_2fa": true}),
                    expires,
                )
                .await?;
                self.get(action_id).await
            }
        }
    }

    // ── Human transitions ────────────────────────────────────────────────

    /// Approve a pending action. Critical actions move to `PENDING_2FA`
    /// and wait for [`ActionBus::verify_and_approve`]; everything else goes
    /// straight to execution.
    pub async fn approve(&self, action_id: Uuid, approved_by: &str) -> Result<ActionRecord> {
        let record = self.get(action_id).await?;
        let requires_2fa = record
            .metadata
            .get("requires_2fa")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        if requires_2fa {
            // Generate and stage the second-factor challenge.
            let code: String = {
                let mut rng = rand::thread_rng();
                (0..6).map(|_| rng.gen_range(0..10).to_string()).collect()
            };
            self.transition(
                action_id,
                ActionState::PendingApproval,
                ActionState::Pending2fa,
                json!({"approved_by": approved_by, "twofa_code": code}),
            )
            .await?;
            info!(action_id = %action_id, "action awaiting second factor");
            self.get(action_id).await
        } else {
            self.transition(
                action_id,
                record.state,
                ActionState::Approved,
                json!({"approved_by": approved_by, "approved_at": Utc::now()}),
            )
            .await?;
            self.execute(action_id).await
        }
    }

    /// Confirm a draft; drafts execute immediately on confirmation.
    pub async fn confirm(&self, action_id: Uuid, confirmed_by: &str) -> Result<ActionRecord> {
        self.transition(
            action_id,
            ActionState::Draft,
            ActionState::Approved,
            json!({"approved_by": confirmed_by, "approved_at": Utc::now()}),
        )
        .await?;
        self.execute(action_id).await
    }

    /// Present the 6-digit second factor for a critical action.
    pub async fn verify_and_approve(&self, action_id: Uuid, code: &str) -> Result<ActionRecord> {
        if code.len() != 6 || !code.chars().all(|c| c.is_ascii_digit()) {
            return Err(ActionError::InvalidCode);
        }
        let record = self.get(action_id).await?;
        let expected = record
            .metadata
            .get("twofa_code")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        if expected != code {
            warn!(action_id = %action_id, "2FA code mismatch");
            return Err(ActionError::InvalidCode);
        }

        self.transition(
            action_id,
            ActionState::Pending2fa,
            ActionState::Approved,
            json!({"twofa_verified_at": Utc::now(), "twofa_code": Value::Null}),
        )
        .await?;
        self.execute(action_id).await
    }

    pub async fn reject(&self, action_id: Uuid, rejected_by: &str, reason: &str) -> Result<ActionRecord> {
        let record = self.get(action_id).await?;
        self.transition(
            action_id,
            record.state,
            ActionState::Rejected,
            json!({"rejected_by": rejected_by, "failure_reason": reason}),
        )
        .await?;
        self.get(action_id).await
    }

    pub async fn cancel(&self, action_id: Uuid, cancelled_by: &str) -> Result<ActionRecord> {
        let record = self.get(action_id).await?;
        if !record.state.is_cancellable() {
            return Err(ActionError::IllegalTransition {
                action_id: action_id.to_string(),
                from: record.state,
                to: ActionState::Cancelled,
            });
        }
        self.transition(
            action_id,
            record.state,
            ActionState::Cancelled,
            json!({"cancelled_by": cancelled_by}),
        )
        .await?;
        self.get(action_id).await
    }

    // ── Execution ────────────────────────────────────────────────────────

    /// Drive an `Approved` record through the executor.
    async fn execute(&self, action_id: Uuid) -> Result<ActionRecord> {
        let record = self.get(action_id).await?;
        self.transition(
            action_id,
            ActionState::Approved,
            ActionState::Executing,
            Value::Null,
        )
        .await?;

        let action_type = ActionType::parse(&record.action_type)?;
        let outcome = self
            .executor
            .execute(record.handler, action_type, &record.payload, &record.context)
            .await;

        match outcome {
            Ok(result) => {
                self.transition(
                    action_id,
                    ActionState::Executing,
                    ActionState::Executed,
                    json!({"executed_at": Utc::now(), "execution_result": result}),
                )
                .await?;
                info!(action_id = %action_id, "action executed");
            }
            Err(e) => {
                self.transition(
                    action_id,
                    ActionState::Executing,
                    ActionState::Failed,
                    json!({"failure_reason": e.message, "failed_at": Utc::now()}),
                )
                .await?;
                warn!(action_id = %action_id, error = %e, "action failed");
            }
        }
        self.get(action_id).await
    }

    // ── Queries & maintenance ────────────────────────────────────────────

    pub async fn get(&self, action_id: Uuid) -> Result<ActionRecord> {
        let row = sqlx::query(
            "SELECT action_id, action_type, payload, context, requested_by, reason,
                    autonomy_level, handler, state, metadata, created_at, updated_at, expires_at
             FROM action_bus WHERE action_id = $1",
        )
        .bind(action_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ActionError::NotFound(action_id.to_string()))?;
        row_to_record(&row)
    }

    pub async fn list_by_state(&self, state: ActionState, limit: i64) -> Result<Vec<ActionRecord>> {
        let rows = sqlx::query(
            "SELECT action_id, action_type, payload, context, requested_by, reason,
                    autonomy_level, handler, state, metadata, created_at, updated_at, expires_at
             FROM action_bus
             WHERE state = $1
             ORDER BY created_at DESC
             LIMIT $2",
        )
        .bind(state.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_record).collect()
    }

    /// Expire pending records past their deadline. Returns the count.
    pub async fn expire_stale(&self) -> Result<u64> {
        let res = sqlx::query(
            "UPDATE action_bus
             SET state = 'expired', updated_at = now()
             WHERE state IN ('proposed', 'draft', 'pending_approval', 'pending_2fa')
               AND expires_at IS NOT NULL
               AND expires_at < now()",
        )
        .execute(&self.pool)
        .await?;
        if res.rows_affected() > 0 {
            info!(expired = res.rows_affected(), "stale actions expired");
        }
        Ok(res.rows_affected())
    }

    // ── Internals ────────────────────────────────────────────────────────

    /// Guarded state change: legality is checked against the matrix and
    /// the row update is conditional on the expected current state.
    async fn transition(
        &self,
        action_id: Uuid,
        from: ActionState,
        to: ActionState,
        metadata_patch: Value,
    ) -> Result<()> {
        if !from.can_transition_to(to) {
            return Err(ActionError::IllegalTransition {
                action_id: action_id.to_string(),
                from,
                to,
            });
        }
        let res = sqlx::query(
            "UPDATE action_bus
             SET state = $3,
                 metadata = metadata || $4::jsonb,
                 updated_at = now()
             WHERE action_id = $1 AND state = $2",
        )
        .bind(action_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(if metadata_patch.is_null() {
            json!({})
        } else {
            metadata_patch
        })
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            return Err(ActionError::IllegalTransition {
                action_id: action_id.to_string(),
                from,
                to,
            });
        }
        Ok(())
    }

    async fn transition_with_expiry(
        &self,
        action_id: Uuid,
        from: ActionState,
        to: ActionState,
        metadata_patch: Value,
        expires_at: chrono::DateTime<Utc>,
    ) -> Result<()> {
        if !from.can_transition_to(to) {
            return Err(ActionError::IllegalTransition {
                action_id: action_id.to_string(),
                from,
                to,
            });
        }
        let res = sqlx::query(
            "UPDATE action_bus
             SET state = $3,
                 metadata = metadata || $4::jsonb,
                 expires_at = $5,
                 updated_at = now()
             WHERE action_id = $1 AND state = $2",
        )
        .bind(action_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(if metadata_patch.is_null() {
            json!({})
        } else {
            metadata_patch
        })
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            return Err(ActionError::IllegalTransition {
                action_id: action_id.to_string(),
                from,
                to,
            });
        }
        Ok(())
    }

    /// Per-day cap per action type, scoped to the branch when the context
    /// names one. Returns `Some(limit)` when the cap is already spent.
    async fn check_limits(&self, proposed: &ProposedAction) -> Result<Option<i64>> {
        let limit = self
            .cfg
            .daily_limits
            .get(&proposed.action_type)
            .copied()
            .unwrap_or(self.cfg.default_daily_limit);
        let branch = proposed
            .context
            .get("branch_id")
            .and_then(|v| v.as_str())
            .map(String::from);

        let count: i64 = sqlx::query(
            "SELECT COUNT(*) AS n FROM action_bus
             WHERE action_type = $1
               AND created_at >= date_trunc('day', now())
               AND state NOT IN ('rejected', 'cancelled', 'expired')
               AND ($2::text IS NULL OR context->>'branch_id' = $2)",
        )
        .bind(&proposed.action_type)
        .bind(branch)
        .fetch_one(&self.pool)
        .await?
        .try_get("n")?;

        if count >= limit {
            warn!(
                action_type = %proposed.action_type,
                count,
                limit,
                "action rejected: daily limit exceeded"
            );
            return Ok(Some(limit));
        }
        Ok(None)
    }
}

fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<ActionRecord> {
    let autonomy: String = row.try_get("autonomy_level")?;
    let handler: String = row.try_get("handler")?;
    let state: String = row.try_get("state")?;
    Ok(ActionRecord {
        action_id: row.try_get("action_id")?,
        action_type: row.try_get("action_type")?,
        payload: row.try_get("payload")?,
        context: row.try_get("context")?,
        requested_by: row.try_get("requested_by")?,
        reason: row.try_get("reason")?,
        autonomy_level: autonomy
            .parse()
            .map_err(|_| ActionError::UnknownActionType(autonomy.clone()))?,
        handler: handler
            .parse::<HandlerKind>()
            .map_err(ActionError::UnknownActionType)?,
        state: state
            .parse::<ActionState>()
            .map_err(ActionError::UnknownActionType)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        expires_at: row.try_get("expires_at")?,
        metadata: row.try_get("metadata")?,
    })
}
