//! Schema bootstrap for the vector store. Safe to call on every startup
//! (idempotent `IF NOT EXISTS` statements throughout).

use sqlx::PgPool;

use crate::error::Result;

/// Create the pgvector extension, both tables, and their indexes.
///
/// `dimensions` fixes the vector column width; `m`/`ef_construction` tune
/// the HNSW graphs. These are DDL parameters and cannot be bound, so they
/// are formatted in as validated integers.
pub async fn init_schema(pool: &PgPool, dimensions: u32, m: u32, ef_construction: u32) -> Result<()> {
    sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
        .execute(pool)
        .await?;

    sqlx::query(sqlx::AssertSqlSafe(format!(
        "CREATE TABLE IF NOT EXISTS vector_embeddings (
            id            BIGSERIAL PRIMARY KEY,
            content_hash  TEXT NOT NULL UNIQUE,
            category      TEXT NOT NULL,
            source        TEXT NOT NULL,
            content_text  TEXT NOT NULL,
            metadata      JSONB NOT NULL DEFAULT '{{}}'::jsonb,
            embedding     vector({dimensions}) NOT NULL,
            created_at    TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at    TIMESTAMPTZ NOT NULL DEFAULT now(),
            expires_at    TIMESTAMPTZ,
            hit_count     BIGINT NOT NULL DEFAULT 0,
            last_hit_at   TIMESTAMPTZ
        )"
    )))
    .execute(pool)
    .await?;

    sqlx::query(sqlx::AssertSqlSafe(format!(
        "CREATE TABLE IF NOT EXISTS vector_response_cache (
            id                BIGSERIAL PRIMARY KEY,
            query_hash        TEXT NOT NULL UNIQUE,
            query_text        TEXT NOT NULL,
            query_embedding   vector({dimensions}) NOT NULL,
            response_text     TEXT NOT NULL,
            response_metadata JSONB NOT NULL DEFAULT '{{}}'::jsonb,
            category          TEXT NOT NULL,
            created_at        TIMESTAMPTZ NOT NULL DEFAULT now(),
            expires_at        TIMESTAMPTZ,
            hit_count         BIGINT NOT NULL DEFAULT 0,
            last_hit_at       TIMESTAMPTZ
        )"
    )))
    .execute(pool)
    .await?;

    for stmt in [
        format!(
            "CREATE INDEX IF NOT EXISTS idx_vector_embeddings_hnsw
             ON vector_embeddings USING hnsw (embedding vector_cosine_ops)
             WITH (m = {m}, ef_construction = {ef_construction})"
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_vector_response_cache_hnsw
             ON vector_response_cache USING hnsw (query_embedding vector_cosine_ops)
             WITH (m = {m}, ef_construction = {ef_construction})"
        ),
        "CREATE INDEX IF NOT EXISTS idx_vector_embeddings_category
         ON vector_embeddings (category)"
            .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_vector_embeddings_source
         ON vector_embeddings (source)"
            .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_vector_embeddings_expires
         ON vector_embeddings (expires_at) WHERE expires_at IS NOT NULL"
            .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_vector_response_cache_expires
         ON vector_response_cache (expires_at) WHERE expires_at IS NOT NULL"
            .to_string(),
    ] {
        sqlx::query(sqlx::AssertSqlSafe(stmt)).execute(pool).await?;
    }

    Ok(())
}
