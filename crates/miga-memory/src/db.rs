//! Schema bootstrap for conversation memory. Idempotent, called on startup.

use sqlx::PgPool;

use crate::error::Result;

pub async fn init_schema(pool: &PgPool, dimensions: u32) -> Result<()> {
    sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS conversation_messages (
            id                BIGSERIAL PRIMARY KEY,
            conversation_id   BIGINT NOT NULL,
            contact_id        BIGINT,
            role              TEXT NOT NULL,
            content           TEXT NOT NULL,
            metadata          JSONB NOT NULL DEFAULT '{}'::jsonb,
            message_timestamp TIMESTAMPTZ NOT NULL DEFAULT now(),
            summarized        BOOLEAN NOT NULL DEFAULT false,
            summary_id        UUID
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(sqlx::AssertSqlSafe(format!(
        "CREATE TABLE IF NOT EXISTS conversation_summaries (
            id                UUID PRIMARY KEY,
            conversation_id   BIGINT NOT NULL,
            contact_id        BIGINT,
            summary_text      TEXT NOT NULL,
            messages_start_at TIMESTAMPTZ NOT NULL,
            messages_end_at   TIMESTAMPTZ NOT NULL,
            message_count     BIGINT NOT NULL,
            estimated_tokens  BIGINT NOT NULL DEFAULT 0,
            summary_embedding vector({dimensions}),
            metadata          JSONB NOT NULL DEFAULT '{{}}'::jsonb,
            created_at        TIMESTAMPTZ NOT NULL DEFAULT now(),
            expires_at        TIMESTAMPTZ
        )"
    )))
    .execute(pool)
    .await?;

    sqlx::query(sqlx::AssertSqlSafe(format!(
        "CREATE TABLE IF NOT EXISTS conversation_facts (
            id                     BIGSERIAL PRIMARY KEY,
            contact_id             BIGINT NOT NULL,
            source_conversation_id BIGINT,
            fact_type              TEXT NOT NULL,
            fact_key               TEXT NOT NULL,
            fact_value             TEXT NOT NULL,
            fact_embedding         vector({dimensions}),
            confidence             DOUBLE PRECISION NOT NULL DEFAULT 0.8,
            last_confirmed_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
            is_stale               BOOLEAN NOT NULL DEFAULT false,
            expires_at             TIMESTAMPTZ,
            UNIQUE (contact_id, fact_type, fact_key)
        )"
    )))
    .execute(pool)
    .await?;

    for stmt in [
        "CREATE INDEX IF NOT EXISTS idx_conv_messages_conversation
         ON conversation_messages (conversation_id, message_timestamp)",
        "CREATE INDEX IF NOT EXISTS idx_conv_messages_unsummarized
         ON conversation_messages (message_timestamp) WHERE summarized = false",
        "CREATE INDEX IF NOT EXISTS idx_conv_summaries_conversation
         ON conversation_summaries (conversation_id, messages_end_at DESC)",
        "CREATE INDEX IF NOT EXISTS idx_conv_facts_contact
         ON conversation_facts (contact_id)",
    ] {
        sqlx::query(stmt).execute(pool).await?;
    }

    Ok(())
}
