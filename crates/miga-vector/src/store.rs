//! pgvector-backed store for knowledge documents and the semantic reply
//! cache. Similarity is cosine (`1 - (embedding <=> query)`), thresholds are
//! per-category, and every search result carries its computed similarity.

use std::sync::Arc;

use pgvector::Vector;
use sqlx::{PgPool, Row};
use tracing::{debug, info, warn};

use miga_core::config::VectorConfig;
use miga_embeddings::{content_hash_hex, Embedder};

use crate::db;
use crate::error::{Result, VectorError};
use crate::types::{
    CachedResponse, CategoryCount, Document, SearchHit, SearchOptions, StoreStats,
};

pub struct VectorStore {
    pool: PgPool,
    embedder: Arc<dyn Embedder>,
    cfg: VectorConfig,
}

impl VectorStore {
    pub fn new(pool: PgPool, embedder: Arc<dyn Embedder>, cfg: VectorConfig) -> Self {
        Self { pool, embedder, cfg }
    }

    /// Bootstrap tables and indexes. Call once on startup.
    pub async fn init(&self) -> Result<()> {
        db::init_schema(
            &self.pool,
            self.embedder.dimensions(),
            self.cfg.hnsw_m,
            self.cfg.hnsw_ef_construction,
        )
        .await
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ── Knowledge documents ──────────────────────────────────────────────

    /// Insert or refresh one document. Returns `false` when the embedding
    /// provider is down and the row was skipped.
    pub async fn upsert(&self, doc: &Document) -> Result<bool> {
        let embedding = match self.embedder.embed(&doc.content).await {
            Some(v) => v,
            None => {
                debug!(category = %doc.category, "skipping upsert, embedding unavailable");
                return Ok(false);
            }
        };
        self.upsert_embedded(doc, embedding).await?;
        Ok(true)
    }

    /// Batch variant: one batched embedding call, rows without a vector are
    /// skipped. Returns the number of rows written.
    pub async fn upsert_batch(&self, docs: &[Document]) -> Result<usize> {
        let texts: Vec<String> = docs.iter().map(|d| d.content.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await;

        let mut written = 0usize;
        for (doc, embedding) in docs.iter().zip(embeddings) {
            match embedding {
                Some(v) => {
                    self.upsert_embedded(doc, v).await?;
                    written += 1;
                }
                None => debug!(category = %doc.category, "skipping batch row, no embedding"),
            }
        }
        info!(total = docs.len(), written, "vector batch upsert complete");
        Ok(written)
    }

    async fn upsert_embedded(&self, doc: &Document, embedding: Vec<f32>) -> Result<()> {
        let hash = content_hash_hex(&doc.content);
        sqlx::query(
            "INSERT INTO vector_embeddings
                (content_hash, category, source, content_text, metadata, embedding, expires_at)
             VALUES ($1, $2, $3, $4, $5, $6, now() + make_interval(secs => $7))
             ON CONFLICT (content_hash) DO UPDATE SET
                category     = EXCLUDED.category,
                source       = EXCLUDED.source,
                content_text = EXCLUDED.content_text,
                metadata     = EXCLUDED.metadata,
                embedding    = EXCLUDED.embedding,
                expires_at   = EXCLUDED.expires_at,
                updated_at   = now()",
        )
        .bind(&hash)
        .bind(&doc.category)
        .bind(&doc.source)
        .bind(&doc.content)
        .bind(&doc.metadata)
        .bind(Vector::from(embedding))
        .bind(doc.ttl_secs.map(|s| s as f64))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Cosine search over unexpired documents. A non-empty result bumps
    /// `hit_count` and stamps `last_hit_at` on the returned rows.
    pub async fn search(&self, query: &str, opts: &SearchOptions) -> Result<Vec<SearchHit>> {
        let embedding = match self.embedder.embed(query).await {
            Some(v) => v,
            None => return Err(VectorError::EmbeddingUnavailable(query.to_string())),
        };

        let threshold = opts.threshold.unwrap_or_else(|| {
            opts.category
                .as_deref()
                .map(|c| self.cfg.threshold_for(c))
                .unwrap_or(self.cfg.similarity_threshold)
        });
        let limit = opts.limit.unwrap_or(self.cfg.max_results);
        let vector = Vector::from(embedding);

        let rows = sqlx::query(
            "SELECT id, content_text, category, source, metadata,
                    1 - (embedding <=> $1) AS similarity
             FROM vector_embeddings
             WHERE ($2::text IS NULL OR category = $2)
               AND ($3::text IS NULL OR source = $3)
               AND (expires_at IS NULL OR expires_at > now())
               AND 1 - (embedding <=> $1) >= $4
             ORDER BY embedding <=> $1
             LIMIT $5",
        )
        .bind(&vector)
        .bind(opts.category.as_deref())
        .bind(opts.source.as_deref())
        .bind(threshold as f64)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut ids: Vec<i64> = Vec::with_capacity(rows.len());
        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            ids.push(row.try_get("id")?);
            hits.push(SearchHit {
                content: row.try_get("content_text")?,
                category: row.try_get("category")?,
                source: row.try_get("source")?,
                metadata: row.try_get("metadata")?,
                similarity: row.try_get::<f64, _>("similarity")? as f32,
            });
        }

        if !ids.is_empty() {
            sqlx::query(
                "UPDATE vector_embeddings
                 SET hit_count = hit_count + 1, last_hit_at = now()
                 WHERE id = ANY($1)",
            )
            .bind(&ids)
            .execute(&self.pool)
            .await?;
        }

        Ok(hits)
    }

    pub async fn find_best_match(
        &self,
        query: &str,
        opts: &SearchOptions,
    ) -> Result<Option<SearchHit>> {
        let mut opts = opts.clone();
        opts.limit = Some(1);
        Ok(self.search(query, &opts).await?.into_iter().next())
    }

    // ── Semantic response cache ──────────────────────────────────────────

    /// Look up a semantically equivalent prior reply.
    pub async fn get_cached_response(
        &self,
        query: &str,
        threshold: f32,
    ) -> Result<Option<CachedResponse>> {
        let embedding = match self.embedder.embed(query).await {
            Some(v) => v,
            None => return Err(VectorError::EmbeddingUnavailable(query.to_string())),
        };
        let vector = Vector::from(embedding);

        let row = sqlx::query(
            "SELECT id, response_text, response_metadata,
                    1 - (query_embedding <=> $1) AS similarity
             FROM vector_response_cache
             WHERE (expires_at IS NULL OR expires_at > now())
               AND 1 - (query_embedding <=> $1) >= $2
             ORDER BY query_embedding <=> $1
             LIMIT 1",
        )
        .bind(&vector)
        .bind(threshold as f64)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        let id: i64 = row.try_get("id")?;

        sqlx::query(
            "UPDATE vector_response_cache
             SET hit_count = hit_count + 1, last_hit_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(Some(CachedResponse {
            response: row.try_get("response_text")?,
            metadata: row.try_get("response_metadata")?,
            similarity: row.try_get::<f64, _>("similarity")? as f32,
        }))
    }

    /// Store a reply in the semantic cache. Replies matching an error
    /// pattern (apology/retry text) are rejected so failures never become
    /// sticky. Returns `false` when rejected or skipped.
    pub async fn set_cached_response(
        &self,
        query: &str,
        response: &str,
        category: &str,
        metadata: serde_json::Value,
        ttl_secs: i64,
    ) -> Result<bool> {
        if self.looks_like_error(response) {
            warn!("refusing to cache error-pattern response");
            return Ok(false);
        }
        let embedding = match self.embedder.embed(query).await {
            Some(v) => v,
            None => return Ok(false),
        };

        sqlx::query(
            "INSERT INTO vector_response_cache
                (query_hash, query_text, query_embedding, response_text,
                 response_metadata, category, expires_at)
             VALUES ($1, $2, $3, $4, $5, $6, now() + make_interval(secs => $7))
             ON CONFLICT (query_hash) DO UPDATE SET
                query_text        = EXCLUDED.query_text,
                query_embedding   = EXCLUDED.query_embedding,
                response_text     = EXCLUDED.response_text,
                response_metadata = EXCLUDED.response_metadata,
                category          = EXCLUDED.category,
                expires_at        = EXCLUDED.expires_at",
        )
        .bind(content_hash_hex(query))
        .bind(query)
        .bind(Vector::from(embedding))
        .bind(response)
        .bind(&metadata)
        .bind(category)
        .bind(ttl_secs as f64)
        .execute(&self.pool)
        .await?;
        Ok(true)
    }

    // ── Maintenance ──────────────────────────────────────────────────────

    pub async fn invalidate_by_source(&self, source: &str) -> Result<u64> {
        let res = sqlx::query("DELETE FROM vector_embeddings WHERE source = $1")
            .bind(source)
            .execute(&self.pool)
            .await?;
        info!(source, deleted = res.rows_affected(), "invalidated by source");
        Ok(res.rows_affected())
    }

    pub async fn invalidate_by_category(&self, category: &str) -> Result<u64> {
        let res = sqlx::query("DELETE FROM vector_embeddings WHERE category = $1")
            .bind(category)
            .execute(&self.pool)
            .await?;
        info!(category, deleted = res.rows_affected(), "invalidated by category");
        Ok(res.rows_affected())
    }

    /// Delete expired rows from both tables. Returns total rows removed.
    pub async fn cleanup_expired(&self) -> Result<u64> {
        let docs = sqlx::query(
            "DELETE FROM vector_embeddings WHERE expires_at IS NOT NULL AND expires_at <= now()",
        )
        .execute(&self.pool)
        .await?;
        let cache = sqlx::query(
            "DELETE FROM vector_response_cache WHERE expires_at IS NOT NULL AND expires_at <= now()",
        )
        .execute(&self.pool)
        .await?;
        let total = docs.rows_affected() + cache.rows_affected();
        if total > 0 {
            info!(removed = total, "expired vector rows cleaned up");
        }
        Ok(total)
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let rows = sqlx::query(
            "SELECT category, COUNT(*) AS documents, COALESCE(SUM(hit_count), 0) AS hits
             FROM vector_embeddings
             GROUP BY category
             ORDER BY category",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut categories = Vec::with_capacity(rows.len());
        let mut total_documents = 0i64;
        let mut total_hits = 0i64;
        for row in rows {
            let count = CategoryCount {
                category: row.try_get("category")?,
                documents: row.try_get("documents")?,
                hits: row.try_get("hits")?,
            };
            total_documents += count.documents;
            total_hits += count.hits;
            categories.push(count);
        }

        let cache_entries: i64 = sqlx::query("SELECT COUNT(*) AS n FROM vector_response_cache")
            .fetch_one(&self.pool)
            .await?
            .try_get("n")?;

        Ok(StoreStats {
            categories,
            total_documents,
            total_hits,
            avg_hits: if total_documents > 0 {
                total_hits as f64 / total_documents as f64
            } else {
                0.0
            },
            cache_entries,
        })
    }

    /// True when the text matches any configured error pattern.
    pub fn looks_like_error(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.cfg
            .error_patterns
            .iter()
            .any(|p| lower.contains(&p.to_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct NoEmbedder;

    #[async_trait]
    impl Embedder for NoEmbedder {
        async fn embed(&self, _text: &str) -> Option<Vec<f32>> {
            None
        }
        async fn embed_batch(&self, texts: &[String]) -> Vec<Option<Vec<f32>>> {
            vec![None; texts.len()]
        }
        fn dimensions(&self) -> u32 {
            1536
        }
    }

    fn store() -> VectorStore {
        let pool = PgPool::connect_lazy("postgres://localhost/miga_test").unwrap();
        VectorStore::new(pool, Arc::new(NoEmbedder), VectorConfig::default())
    }

    #[tokio::test]
    async fn error_patterns_match_case_insensitively() {
        let s = store();
        assert!(s.looks_like_error("Disculpa, tuve un problema técnico"));
        assert!(s.looks_like_error("Please TRY AGAIN later"));
        assert!(!s.looks_like_error("Sí, tenemos rosca de temporada a $350"));
    }

    #[tokio::test]
    async fn upsert_without_embedding_is_skipped_not_failed() {
        let s = store();
        let doc = Document::new("rosca de reyes", "product", "test");
        assert!(!s.upsert(&doc).await.unwrap());
    }

    #[tokio::test]
    async fn search_without_embedding_degrades() {
        let s = store();
        let err = s
            .search("rosca", &SearchOptions::category("product"))
            .await
            .unwrap_err();
        assert!(matches!(err, VectorError::EmbeddingUnavailable(_)));
    }
}
