//! Periodic compression of aged conversation spans into summaries and
//! long-term facts.
//!
//! Each cycle scans for conversations with enough unsummarized messages
//! older than the configured horizon, asks the LLM for a structured digest,
//! and persists the summary while flipping the source rows inside one
//! transaction. A failed conversation stays unsummarized and is retried on
//! a later cycle.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use miga_core::config::MemoryConfig;
use miga_embeddings::Embedder;
use miga_llm::{ChatMessage, ConversationDigest, LanguageModel, SchemaKey};
use miga_memory::{ConversationStore, ConversationSummary, Fact, StoredMessage, SummaryMetadata};
use miga_queue::LocalQueue;

use crate::error::{Result, SummarizerError};

const SYSTEM_PROMPT: &str = "Eres el archivista de una cadena de cafeterías y panaderías. \
Resume la conversación conservando la intención principal, el estado de resolución, \
el sentimiento del cliente y los productos mencionados. Extrae hechos durables sobre \
el cliente (preferencias, alergias, sucursal habitual) con su confianza.";

#[derive(Debug, Default, Clone)]
pub struct CycleReport {
    pub conversations_seen: usize,
    pub summaries_written: usize,
    pub facts_saved: usize,
    pub failures: usize,
}

pub struct Summarizer {
    store: Arc<ConversationStore>,
    llm: Arc<dyn LanguageModel>,
    embedder: Arc<dyn Embedder>,
    cfg: MemoryConfig,
    /// Bounds how many conversations compress concurrently per cycle.
    local: LocalQueue,
}

impl Summarizer {
    pub fn new(
        store: Arc<ConversationStore>,
        llm: Arc<dyn LanguageModel>,
        embedder: Arc<dyn Embedder>,
        cfg: MemoryConfig,
        local: LocalQueue,
    ) -> Self {
        Self {
            store,
            llm,
            embedder,
            cfg,
            local,
        }
    }

    /// Main loop. Ticks every `cycle_interval_ms` until shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.cfg.cycle_interval_ms,
            "summarizer started"
        );
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.cfg.cycle_interval_ms.max(1000)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.run_cycle().await;
                    if report.conversations_seen > 0 {
                        info!(
                            conversations = report.conversations_seen,
                            summaries = report.summaries_written,
                            facts = report.facts_saved,
                            failures = report.failures,
                            "summarizer cycle complete"
                        );
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("summarizer shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One scan-and-compress pass.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();
        let cutoff = Utc::now()
            - ChronoDuration::milliseconds(self.cfg.summarize_after_ms as i64);

        let conversations = match self.store.find_conversations_to_summarize(cutoff).await {
            Ok(list) => list,
            Err(e) => {
                warn!(error = %e, "summarizer scan failed, skipping cycle");
                return report;
            }
        };

        // Conversations compress concurrently, bounded by the local queue so
        // a big backlog cannot stampede the LLM provider.
        let runs = conversations.into_iter().map(|conversation_id| {
            let local = self.local.clone();
            async move {
                (
                    conversation_id,
                    local
                        .run(self.summarize_conversation(conversation_id, cutoff))
                        .await,
                )
            }
        });
        for (conversation_id, result) in futures_util::future::join_all(runs).await {
            report.conversations_seen += 1;
            match result {
                Ok(facts) => {
                    report.summaries_written += 1;
                    report.facts_saved += facts;
                }
                Err(SummarizerError::TooFewMessages(_)) => {}
                Err(e) => {
                    report.failures += 1;
                    error!(conversation_id, error = %e, "conversation summarization failed");
                }
            }
        }
        report
    }

    /// Summarize one conversation's aged span. Returns the number of facts
    /// saved. Messages remain unsummarized if anything fails before the
    /// transactional flag flip.
    async fn summarize_conversation(
        &self,
        conversation_id: i64,
        cutoff: chrono::DateTime<Utc>,
    ) -> Result<usize> {
        let messages = self
            .store
            .fetch_unsummarized(conversation_id, cutoff)
            .await?;
        if (messages.len() as i64) < self.cfg.min_messages_for_summary {
            return Err(SummarizerError::TooFewMessages(conversation_id));
        }

        let transcript = render_transcript(&messages);
        let value = self
            .llm
            .structured(
                "summarizer",
                SchemaKey::ConversationSummary,
                SYSTEM_PROMPT,
                &[ChatMessage::user(transcript.clone())],
            )
            .await?;
        let digest = ConversationDigest::from_value(value)?;

        let contact_id = messages.iter().find_map(|m| m.contact_id);
        let summary = digest_to_summary(conversation_id, contact_id, &digest, &messages, &transcript);
        let embedding = self.embedder.embed(&digest.summary).await;
        let message_ids: Vec<i64> = messages.iter().map(|m| m.id).collect();

        self.store
            .insert_summary_and_mark(&summary, embedding, &message_ids)
            .await?;

        let mut facts_saved = 0;
        if self.cfg.extract_facts {
            if let Some(contact_id) = contact_id {
                for fact in &digest.extracted_facts {
                    let result = self
                        .store
                        .save_fact(&Fact {
                            contact_id,
                            source_conversation_id: Some(conversation_id),
                            fact_type: fact.fact_type.clone(),
                            fact_key: fact.fact_key.clone(),
                            fact_value: fact.fact_value.clone(),
                            confidence: fact.confidence.clamp(0.0, 1.0),
                            is_stale: false,
                            last_confirmed_at: None,
                            expires_at: None,
                        })
                        .await;
                    match result {
                        Ok(()) => facts_saved += 1,
                        Err(e) => warn!(contact_id, error = %e, "fact upsert failed"),
                    }
                }
            }
        }

        Ok(facts_saved)
    }
}

/// Render messages as a compact transcript for the LLM.
fn render_transcript(messages: &[StoredMessage]) -> String {
    let mut out = String::new();
    for m in messages {
        out.push_str(&format!(
            "[{}] {}: {}\n",
            m.message_timestamp.format("%Y-%m-%d %H:%M"),
            m.role,
            m.content
        ));
    }
    out
}

fn digest_to_summary(
    conversation_id: i64,
    contact_id: Option<i64>,
    digest: &ConversationDigest,
    messages: &[StoredMessage],
    transcript: &str,
) -> ConversationSummary {
    ConversationSummary {
        id: Uuid::new_v4(),
        conversation_id,
        contact_id,
        summary_text: digest.summary.clone(),
        messages_start_at: messages
            .first()
            .map(|m| m.message_timestamp)
            .unwrap_or_else(Utc::now),
        messages_end_at: messages
            .last()
            .map(|m| m.message_timestamp)
            .unwrap_or_else(Utc::now),
        message_count: messages.len() as i64,
        // Rough ~4 chars/token heuristic over the source span.
        estimated_tokens: (transcript.len() / 4) as i64,
        metadata: SummaryMetadata {
            primary_intent: digest.primary_intent.clone(),
            resolution_status: Some(digest.resolution_status.clone()),
            sentiment: Some(digest.sentiment.clone()),
            products_mentioned: digest.products_mentioned.clone(),
        },
        expires_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use miga_core::types::Role;
    use serde_json::{json, Value};

    fn msg(id: i64, role: Role, content: &str) -> StoredMessage {
        StoredMessage {
            id,
            conversation_id: 1,
            contact_id: Some(55),
            role,
            content: content.to_string(),
            metadata: Value::Null,
            message_timestamp: Utc::now(),
            summarized: false,
            summary_id: None,
        }
    }

    #[test]
    fn transcript_contains_roles_and_content() {
        let t = render_transcript(&[
            msg(1, Role::User, "¿tienen rosca?"),
            msg(2, Role::Assistant, "Sí, a $350"),
        ]);
        assert!(t.contains("user: ¿tienen rosca?"));
        assert!(t.contains("assistant: Sí, a $350"));
    }

    #[test]
    fn digest_maps_onto_summary_metadata() {
        let digest = ConversationDigest::from_value(json!({
            "summary": "Cliente preguntó por rosca, se le cotizó.",
            "primary_intent": "product_inquiry",
            "resolution_status": "resolved",
            "sentiment": "positive",
            "products_mentioned": ["rosca"],
            "extracted_facts": []
        }))
        .unwrap();
        let messages = vec![msg(1, Role::User, "a"), msg(2, Role::Assistant, "b")];
        let summary = digest_to_summary(1, Some(55), &digest, &messages, "transcript");

        assert_eq!(summary.message_count, 2);
        assert_eq!(summary.contact_id, Some(55));
        assert_eq!(summary.metadata.primary_intent.as_deref(), Some("product_inquiry"));
        assert_eq!(summary.metadata.products_mentioned, vec!["rosca"]);
        assert!(summary.messages_start_at <= summary.messages_end_at);
    }

    struct PanicLlm;

    #[async_trait]
    impl LanguageModel for PanicLlm {
        async fn structured(
            &self,
            _task: &str,
            _schema: SchemaKey,
            _system: &str,
            _messages: &[ChatMessage],
        ) -> miga_llm::Result<Value> {
            panic!("LLM must not be called when the store scan fails");
        }
    }

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

    #[tokio::test]
    async fn cycle_survives_an_unreachable_store() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(50))
            .connect_lazy("postgres://localhost:1/miga_down")
            .unwrap();
        let store = Arc::new(ConversationStore::new(
            pool,
            Arc::new(NoEmbedder),
            MemoryConfig::default(),
        ));
        let summarizer = Summarizer::new(
            store,
            Arc::new(PanicLlm),
            Arc::new(NoEmbedder),
            MemoryConfig::default(),
            LocalQueue::new(3),
        );
        let report = summarizer.run_cycle().await;
        assert_eq!(report.conversations_seen, 0);
        assert_eq!(report.failures, 0);
    }
}
