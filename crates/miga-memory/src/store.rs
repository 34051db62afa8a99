//! Persistent per-conversation message log, summaries, and long-term facts.
//!
//! Writes degrade to an in-process tail when the database is unreachable;
//! callers can tell from the `StorageClass` discriminator. Consecutive
//! duplicate messages (same role and content) are elided on append, which
//! is what makes at-least-once webhook delivery safe for the log.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use pgvector::Vector;
use serde_json::Value;
use sqlx::{PgPool, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

use miga_core::config::MemoryConfig;
use miga_core::types::Role;
use miga_embeddings::Embedder;

use crate::db;
use crate::error::Result;
use crate::fallback::MemoryFallback;
use crate::types::{
    AddOutcome, ContextOptions, ContextStats, ConversationSummary, Fact, LlmContext,
    StorageClass, StoredMessage,
};

pub struct ConversationStore {
    pool: PgPool,
    embedder: Arc<dyn Embedder>,
    cfg: MemoryConfig,
    fallback: MemoryFallback,
}

impl ConversationStore {
    pub fn new(pool: PgPool, embedder: Arc<dyn Embedder>, cfg: MemoryConfig) -> Self {
        let fallback = MemoryFallback::new(cfg.max_recent_messages);
        Self {
            pool,
            embedder,
            cfg,
            fallback,
        }
    }

    pub async fn init(&self) -> Result<()> {
        db::init_schema(&self.pool, self.embedder.dimensions()).await
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ── Messages ─────────────────────────────────────────────────────────

    /// Append one utterance. Identical consecutive (role, content) pairs are
    /// dropped so duplicate queue deliveries leave a single row.
    pub async fn add_message(
        &self,
        conversation_id: i64,
        role: Role,
        content: &str,
        contact_id: Option<i64>,
        metadata: Value,
    ) -> AddOutcome {
        match self
            .try_add_db(conversation_id, role, content, contact_id, &metadata)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(conversation_id, error = %e, "memory write degraded to in-process tail");
                if self
                    .fallback
                    .add(conversation_id, role, content, contact_id, metadata)
                {
                    AddOutcome::Stored(StorageClass::Memory)
                } else {
                    AddOutcome::DuplicateElided
                }
            }
        }
    }

    async fn try_add_db(
        &self,
        conversation_id: i64,
        role: Role,
        content: &str,
        contact_id: Option<i64>,
        metadata: &Value,
    ) -> Result<AddOutcome> {
        let last = sqlx::query(
            "SELECT role, content FROM conversation_messages
             WHERE conversation_id = $1
             ORDER BY message_timestamp DESC, id DESC
             LIMIT 1",
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = last {
            let last_role: String = row.try_get("role")?;
            let last_content: String = row.try_get("content")?;
            if last_role == role.as_str() && last_content == content {
                debug!(conversation_id, "consecutive duplicate message elided");
                return Ok(AddOutcome::DuplicateElided);
            }
        }

        sqlx::query(
            "INSERT INTO conversation_messages
                (conversation_id, contact_id, role, content, metadata)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(conversation_id)
        .bind(contact_id)
        .bind(role.as_str())
        .bind(content)
        .bind(metadata)
        .execute(&self.pool)
        .await?;

        Ok(AddOutcome::Stored(StorageClass::Database))
    }

    /// Unsummarized tail of a conversation in chronological order.
    pub async fn get_messages(
        &self,
        conversation_id: i64,
        limit: Option<i64>,
        include_system: bool,
    ) -> (Vec<StoredMessage>, StorageClass) {
        let limit = limit.unwrap_or(self.cfg.max_recent_messages);
        match self
            .fetch_messages(conversation_id, limit, include_system)
            .await
        {
            Ok(messages) => (messages, StorageClass::Database),
            Err(e) => {
                warn!(conversation_id, error = %e, "memory read degraded to in-process tail");
                (
                    self.fallback
                        .tail(conversation_id, limit as usize, include_system),
                    StorageClass::Memory,
                )
            }
        }
    }

    async fn fetch_messages(
        &self,
        conversation_id: i64,
        limit: i64,
        include_system: bool,
    ) -> Result<Vec<StoredMessage>> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, contact_id, role, content, metadata,
                    message_timestamp, summarized, summary_id
             FROM conversation_messages
             WHERE conversation_id = $1
               AND summarized = false
               AND ($2::bool OR role <> 'system')
             ORDER BY message_timestamp DESC, id DESC
             LIMIT $3",
        )
        .bind(conversation_id)
        .bind(include_system)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut messages: Vec<StoredMessage> =
            rows.iter().map(row_to_message).collect::<Result<_>>()?;
        messages.reverse();
        Ok(messages)
    }

    pub async fn clear_messages(&self, conversation_id: i64) -> Result<u64> {
        self.fallback.clear(conversation_id);
        let res = sqlx::query("DELETE FROM conversation_messages WHERE conversation_id = $1")
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }

    // ── Prompt context ───────────────────────────────────────────────────

    /// Compose the LLM context for one turn: recent unsummarized messages,
    /// the most recent unexpired summaries, and relevant contact facts.
    pub async fn get_context_for_llm(
        &self,
        conversation_id: i64,
        opts: &ContextOptions,
    ) -> LlmContext {
        let (messages, storage) = self
            .get_messages(conversation_id, opts.max_messages, false)
            .await;

        let summaries = match storage {
            StorageClass::Database => self
                .recent_summaries(conversation_id, self.cfg.max_summaries_in_context)
                .await
                .unwrap_or_default(),
            StorageClass::Memory => Vec::new(),
        };

        let facts = match (storage, opts.contact_id) {
            (StorageClass::Database, Some(contact_id)) => self
                .get_relevant_facts(
                    contact_id,
                    opts.current_query.as_deref(),
                    self.cfg.fact_limit,
                )
                .await
                .unwrap_or_default(),
            _ => Vec::new(),
        };

        let mut context_text = String::new();
        if !summaries.is_empty() {
            context_text.push_str("Resumen de interacciones previas:\n");
            for s in &summaries {
                context_text.push_str("- ");
                context_text.push_str(&s.summary_text);
                context_text.push('\n');
            }
        }
        if !facts.is_empty() {
            if !context_text.is_empty() {
                context_text.push('\n');
            }
            context_text.push_str("Datos conocidos del cliente:\n");
            for f in &facts {
                context_text.push_str(&format!("- {}: {}\n", f.fact_key, f.fact_value));
            }
        }

        LlmContext {
            stats: ContextStats {
                recent_messages: messages.len(),
                summaries: summaries.len(),
                facts: facts.len(),
            },
            messages,
            context_text,
            storage,
        }
    }

    async fn recent_summaries(
        &self,
        conversation_id: i64,
        limit: i64,
    ) -> Result<Vec<ConversationSummary>> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, contact_id, summary_text, messages_start_at,
                    messages_end_at, message_count, estimated_tokens, metadata, expires_at
             FROM conversation_summaries
             WHERE conversation_id = $1
               AND (expires_at IS NULL OR expires_at > now())
             ORDER BY messages_end_at DESC
             LIMIT $2",
        )
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(ConversationSummary {
                    id: row.try_get("id")?,
                    conversation_id: row.try_get("conversation_id")?,
                    contact_id: row.try_get("contact_id")?,
                    summary_text: row.try_get("summary_text")?,
                    messages_start_at: row.try_get("messages_start_at")?,
                    messages_end_at: row.try_get("messages_end_at")?,
                    message_count: row.try_get("message_count")?,
                    estimated_tokens: row.try_get("estimated_tokens")?,
                    metadata: serde_json::from_value(row.try_get::<Value, _>("metadata")?)
                        .unwrap_or_default(),
                    expires_at: row.try_get("expires_at")?,
                })
            })
            .collect()
    }

    // ── Facts ────────────────────────────────────────────────────────────

    /// Upsert a fact on `(contact_id, fact_type, fact_key)`. On conflict the
    /// value and embedding are replaced, confidence is lifted to the max of
    /// old and new, `last_confirmed_at` refreshes, and staleness clears.
    pub async fn save_fact(&self, fact: &Fact) -> Result<()> {
        let embedding = self
            .embedder
            .embed(&format!("{}: {}", fact.fact_key, fact.fact_value))
            .await
            .map(Vector::from);

        sqlx::query(
            "INSERT INTO conversation_facts
                (contact_id, source_conversation_id, fact_type, fact_key, fact_value,
                 fact_embedding, confidence, last_confirmed_at, is_stale, expires_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, now(), false, $8)
             ON CONFLICT (contact_id, fact_type, fact_key) DO UPDATE SET
                fact_value             = EXCLUDED.fact_value,
                fact_embedding         = EXCLUDED.fact_embedding,
                source_conversation_id = EXCLUDED.source_conversation_id,
                confidence        = GREATEST(conversation_facts.confidence, EXCLUDED.confidence),
                last_confirmed_at = now(),
                is_stale          = false,
                expires_at        = EXCLUDED.expires_at",
        )
        .bind(fact.contact_id)
        .bind(fact.source_conversation_id)
        .bind(&fact.fact_type)
        .bind(&fact.fact_key)
        .bind(&fact.fact_value)
        .bind(embedding)
        .bind(fact.confidence)
        .bind(fact.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Active facts for a contact. With a query, retrieval is by cosine
    /// similarity over the fact embeddings; without one, by confidence and
    /// recency of confirmation.
    pub async fn get_relevant_facts(
        &self,
        contact_id: i64,
        query: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Fact>> {
        let query_embedding = match query {
            Some(q) => self.embedder.embed(q).await.map(Vector::from),
            None => None,
        };

        let rows = match query_embedding {
            Some(vector) => {
                sqlx::query(
                    "SELECT contact_id, source_conversation_id, fact_type, fact_key,
                            fact_value, confidence, last_confirmed_at, is_stale, expires_at
                     FROM conversation_facts
                     WHERE contact_id = $1
                       AND is_stale = false
                       AND (expires_at IS NULL OR expires_at > now())
                       AND fact_embedding IS NOT NULL
                       AND 1 - (fact_embedding <=> $2) >= $3
                     ORDER BY fact_embedding <=> $2
                     LIMIT $4",
                )
                .bind(contact_id)
                .bind(&vector)
                .bind(self.cfg.fact_similarity_threshold as f64)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT contact_id, source_conversation_id, fact_type, fact_key,
                            fact_value, confidence, last_confirmed_at, is_stale, expires_at
                     FROM conversation_facts
                     WHERE contact_id = $1
                       AND is_stale = false
                       AND (expires_at IS NULL OR expires_at > now())
                     ORDER BY confidence DESC, last_confirmed_at DESC
                     LIMIT $2",
                )
                .bind(contact_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter()
            .map(|row| {
                Ok(Fact {
                    contact_id: row.try_get("contact_id")?,
                    source_conversation_id: row.try_get("source_conversation_id")?,
                    fact_type: row.try_get("fact_type")?,
                    fact_key: row.try_get("fact_key")?,
                    fact_value: row.try_get("fact_value")?,
                    confidence: row.try_get("confidence")?,
                    last_confirmed_at: row.try_get("last_confirmed_at")?,
                    is_stale: row.try_get("is_stale")?,
                    expires_at: row.try_get("expires_at")?,
                })
            })
            .collect()
    }

    /// Mark facts stale, either all for the contact or only the given keys.
    pub async fn mark_facts_stale(
        &self,
        contact_id: i64,
        keys: Option<&[String]>,
    ) -> Result<u64> {
        let res = sqlx::query(
            "UPDATE conversation_facts
             SET is_stale = true
             WHERE contact_id = $1
               AND ($2::text[] IS NULL OR fact_key = ANY($2))",
        )
        .bind(contact_id)
        .bind(keys)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }

    // ── Summarizer support ───────────────────────────────────────────────

    /// Conversations with enough aged unsummarized messages, oldest first.
    pub async fn find_conversations_to_summarize(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<i64>> {
        let rows = sqlx::query(
            "SELECT conversation_id
             FROM conversation_messages
             WHERE summarized = false
               AND message_timestamp < $1
               AND ($2::bool OR role <> 'system')
             GROUP BY conversation_id
             HAVING COUNT(*) >= $3
             ORDER BY MIN(message_timestamp) ASC
             LIMIT $4",
        )
        .bind(older_than)
        .bind(self.cfg.summarize_include_system)
        .bind(self.cfg.min_messages_for_summary)
        .bind(self.cfg.max_conversations_per_cycle)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Ok(row.try_get("conversation_id")?))
            .collect()
    }

    /// Aged unsummarized messages of one conversation, chronological, capped.
    pub async fn fetch_unsummarized(
        &self,
        conversation_id: i64,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<StoredMessage>> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, contact_id, role, content, metadata,
                    message_timestamp, summarized, summary_id
             FROM conversation_messages
             WHERE conversation_id = $1
               AND summarized = false
               AND message_timestamp < $2
               AND ($3::bool OR role <> 'system')
             ORDER BY message_timestamp ASC, id ASC
             LIMIT $4",
        )
        .bind(conversation_id)
        .bind(older_than)
        .bind(self.cfg.summarize_include_system)
        .bind(self.cfg.max_messages_per_summary)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_message).collect()
    }

    /// Persist a summary and flip its source rows to `summarized = true` in
    /// the same transaction, so each message is summarized at most once.
    pub async fn insert_summary_and_mark(
        &self,
        summary: &ConversationSummary,
        embedding: Option<Vec<f32>>,
        message_ids: &[i64],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO conversation_summaries
                (id, conversation_id, contact_id, summary_text, messages_start_at,
                 messages_end_at, message_count, estimated_tokens, summary_embedding,
                 metadata, expires_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(summary.id)
        .bind(summary.conversation_id)
        .bind(summary.contact_id)
        .bind(&summary.summary_text)
        .bind(summary.messages_start_at)
        .bind(summary.messages_end_at)
        .bind(summary.message_count)
        .bind(summary.estimated_tokens)
        .bind(embedding.map(Vector::from))
        .bind(serde_json::to_value(&summary.metadata).unwrap_or(Value::Null))
        .bind(summary.expires_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE conversation_messages
             SET summarized = true, summary_id = $1
             WHERE id = ANY($2) AND summarized = false",
        )
        .bind(summary.id)
        .bind(message_ids)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(
            conversation_id = summary.conversation_id,
            summary_id = %summary.id,
            messages = message_ids.len(),
            "summary persisted"
        );
        Ok(())
    }

    /// Delete summarized rows past the retention horizon.
    pub async fn cleanup_summarized(&self) -> Result<u64> {
        let horizon = Utc::now() - Duration::days(self.cfg.retention_days);
        let res = sqlx::query(
            "DELETE FROM conversation_messages
             WHERE summarized = true AND message_timestamp < $1",
        )
        .bind(horizon)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }
}

fn row_to_message(row: &sqlx::postgres::PgRow) -> Result<StoredMessage> {
    let role: String = row.try_get("role")?;
    Ok(StoredMessage {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        contact_id: row.try_get("contact_id")?,
        role: role.parse().unwrap_or(Role::User),
        content: row.try_get("content")?,
        metadata: row.try_get("metadata")?,
        message_timestamp: row.try_get("message_timestamp")?,
        summarized: row.try_get("summarized")?,
        summary_id: row.try_get("summary_id")?,
    })
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

    fn store() -> ConversationStore {
        // connect_lazy never dials; the short acquire timeout makes every
        // query fail fast, exercising the in-process fallback paths.
        let pool = sqlx::postgres::PgPoolOptions::new()
            .acquire_timeout(std::time::Duration::from_millis(50))
            .connect_lazy("postgres://localhost:1/miga_down")
            .unwrap();
        ConversationStore::new(pool, Arc::new(NoEmbedder), MemoryConfig::default())
    }

    #[tokio::test]
    async fn writes_degrade_to_memory_storage() {
        let s = store();
        let outcome = s
            .add_message(7, Role::User, "hola", Some(1), Value::Null)
            .await;
        assert_eq!(outcome, AddOutcome::Stored(StorageClass::Memory));

        // Idempotent append: the duplicate is elided even in fallback mode.
        let outcome = s
            .add_message(7, Role::User, "hola", Some(1), Value::Null)
            .await;
        assert_eq!(outcome, AddOutcome::DuplicateElided);

        let (messages, storage) = s.get_messages(7, None, false).await;
        assert_eq!(storage, StorageClass::Memory);
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn context_reports_memory_storage_when_db_is_down() {
        let s = store();
        s.add_message(9, Role::User, "quiero pan", None, Value::Null)
            .await;
        let ctx = s.get_context_for_llm(9, &ContextOptions::default()).await;
        assert_eq!(ctx.storage, StorageClass::Memory);
        assert_eq!(ctx.stats.recent_messages, 1);
        assert!(ctx.context_text.is_empty());
    }
}
