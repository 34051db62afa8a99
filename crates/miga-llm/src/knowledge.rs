//! Persistence for learned model capabilities (`model_knowledge` table).
//! Loaded on startup so a narrowed parameter set survives restarts.

use sqlx::{PgPool, Row};
use tracing::{info, warn};

use crate::error::Result;
use crate::registry::ModelCapabilities;

pub async fn init_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS model_knowledge (
            model        TEXT PRIMARY KEY,
            capabilities JSONB NOT NULL,
            updated_at   TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
    )
    .execute(pool)
    .await
    .map_err(db_err)?;
    Ok(())
}

pub async fn load_all(pool: &PgPool) -> Result<Vec<(String, ModelCapabilities)>> {
    let rows = sqlx::query("SELECT model, capabilities FROM model_knowledge")
        .fetch_all(pool)
        .await
        .map_err(db_err)?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let model: String = row.try_get("model").map_err(db_err)?;
        let raw: serde_json::Value = row.try_get("capabilities").map_err(db_err)?;
        match serde_json::from_value::<ModelCapabilities>(raw) {
            Ok(caps) => entries.push((model, caps)),
            Err(e) => warn!(model, error = %e, "skipping malformed model_knowledge row"),
        }
    }
    info!(models = entries.len(), "model knowledge loaded");
    Ok(entries)
}

/// Upsert one entry. Best-effort: callers log and continue on failure so
/// capability learning never blocks a reply.
pub async fn persist(pool: &PgPool, model: &str, caps: &ModelCapabilities) -> Result<()> {
    sqlx::query(
        "INSERT INTO model_knowledge (model, capabilities, updated_at)
         VALUES ($1, $2, now())
         ON CONFLICT (model) DO UPDATE SET
            capabilities = EXCLUDED.capabilities,
            updated_at   = now()",
    )
    .bind(model)
    .bind(serde_json::to_value(caps).unwrap_or(serde_json::Value::Null))
    .execute(pool)
    .await
    .map_err(db_err)?;
    Ok(())
}

pub async fn persist_all(pool: &PgPool, entries: &[(String, ModelCapabilities)]) -> Result<usize> {
    let mut written = 0;
    for (model, caps) in entries {
        persist(pool, model, caps).await?;
        written += 1;
    }
    Ok(written)
}

fn db_err(e: sqlx::Error) -> crate::error::LlmError {
    crate::error::LlmError::Store(e.to_string())
}
