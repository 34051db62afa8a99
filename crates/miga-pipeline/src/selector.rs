//! Per-request choice between the optimized and legacy flows.
//!
//! Precedence: `mode = legacy` always runs the legacy flow; with
//! `mode = optimized` the A/B ratio decides (`rand() < ratio` → optimized).
//! An optimized-flow error falls back to the legacy flow, which never
//! errors outward.

use std::sync::Arc;

use tracing::{info, warn};

use miga_chat::ReplySender;
use miga_confighub::ConfigHub;
use miga_core::config::{FlowMode, PipelineConfig};
use miga_core::types::ReplyOutcome;
use miga_llm::LanguageModel;
use miga_memory::ConversationStore;
use miga_vector::VectorStore;

use crate::{legacy, optimized};

/// One inbound message to answer. Carries only serializable identifiers;
/// the outbound send is reconstructed from `(account_id, conversation_id)`
/// on this side of the queue.
#[derive(Debug, Clone)]
pub struct ReplyRequest {
    pub conversation_id: i64,
    pub account_id: i64,
    pub contact_id: Option<i64>,
    pub message_text: String,
}

/// Everything the flows need, shared across requests.
pub struct PipelineDeps {
    pub memory: Arc<ConversationStore>,
    pub vector: Arc<VectorStore>,
    pub hub: Arc<ConfigHub>,
    pub llm: Arc<dyn LanguageModel>,
    pub sender: Arc<dyn ReplySender>,
    pub cfg: PipelineConfig,
}

pub struct PipelineSelector {
    deps: PipelineDeps,
}

impl PipelineSelector {
    pub fn new(deps: PipelineDeps) -> Self {
        Self { deps }
    }

    pub async fn handle(&self, req: &ReplyRequest) -> ReplyOutcome {
        let use_optimized = match self.deps.cfg.mode {
            FlowMode::Legacy => false,
            FlowMode::Optimized => rand::random::<f64>() < self.deps.cfg.optimized_ratio,
        };

        if use_optimized {
            match optimized::run(&self.deps, req).await {
                Ok(outcome) => {
                    info!(
                        conversation_id = req.conversation_id,
                        source = outcome.source.as_str(),
                        ai_calls = outcome.ai_calls,
                        duration_ms = outcome.duration_ms,
                        "reply produced"
                    );
                    return outcome;
                }
                Err(e) => {
                    warn!(
                        conversation_id = req.conversation_id,
                        error = %e,
                        "optimized flow failed, falling back to legacy"
                    );
                }
            }
        }

        let outcome = legacy::run(&self.deps, req).await;
        info!(
            conversation_id = req.conversation_id,
            source = outcome.source.as_str(),
            ai_calls = outcome.ai_calls,
            duration_ms = outcome.duration_ms,
            flow = outcome.flow_type.as_str(),
            "reply produced"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::APOLOGY_REPLY;
    use async_trait::async_trait;
    use miga_chat::ChatError;
    use miga_core::config::{MemoryConfig, VectorConfig};
    use miga_core::types::{FlowType, ReplySource};
    use miga_embeddings::Embedder;
    use miga_llm::{ChatMessage, LlmError, SchemaKey};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::Mutex;

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

    /// Scripted LLM: a task with no script fails like an outage.
    struct ScriptedLlm {
        scripts: HashMap<&'static str, Value>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn new(scripts: HashMap<&'static str, Value>) -> Self {
            Self {
                scripts,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedLlm {
        async fn structured(
            &self,
            task: &str,
            _schema: SchemaKey,
            _system: &str,
            _messages: &[ChatMessage],
        ) -> miga_llm::Result<Value> {
            self.calls.lock().unwrap().push(task.to_string());
            self.scripts
                .get(task)
                .cloned()
                .ok_or_else(|| LlmError::Timeout { ms: 30_000 })
        }
    }

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<(i64, i64, String)>>,
    }

    #[async_trait]
    impl ReplySender for RecordingSender {
        async fn send_reply(
            &self,
            account_id: i64,
            conversation_id: i64,
            text: &str,
        ) -> Result<(), ChatError> {
            self.sent
                .lock()
                .unwrap()
                .push((account_id, conversation_id, text.to_string()));
            Ok(())
        }
    }

    fn lazy_pool() -> sqlx::PgPool {
        sqlx::postgres::PgPoolOptions::new()
            .acquire_timeout(std::time::Duration::from_millis(50))
            .connect_lazy("postgres://localhost:1/miga_down")
            .unwrap()
    }

    fn deps(
        scripts: HashMap<&'static str, Value>,
        cfg: PipelineConfig,
    ) -> (PipelineSelector, Arc<RecordingSender>, Arc<ScriptedLlm>) {
        let sender = Arc::new(RecordingSender::default());
        let llm = Arc::new(ScriptedLlm::new(scripts));
        let selector = PipelineSelector::new(PipelineDeps {
            memory: Arc::new(ConversationStore::new(
                lazy_pool(),
                Arc::new(NoEmbedder),
                MemoryConfig::default(),
            )),
            vector: Arc::new(VectorStore::new(
                lazy_pool(),
                Arc::new(NoEmbedder),
                VectorConfig::default(),
            )),
            hub: Arc::new(ConfigHub::new(&Default::default())),
            llm: llm.clone(),
            sender: sender.clone(),
            cfg,
        });
        (selector, sender, llm)
    }

    fn req() -> ReplyRequest {
        ReplyRequest {
            conversation_id: 42,
            account_id: 3,
            contact_id: Some(7),
            message_text: "¿tienen rosca?".to_string(),
        }
    }

    #[tokio::test]
    async fn optimized_flow_answers_with_one_ai_call() {
        let scripts = HashMap::from([(
            "reply",
            json!({"reply": "Sí, tenemos rosca a $350", "confidence": 0.9, "needs_handoff": false}),
        )]);
        let (selector, sender, _llm) = deps(scripts, PipelineConfig::default());

        let outcome = selector.handle(&req()).await;
        assert_eq!(outcome.source, ReplySource::Ai);
        assert_eq!(outcome.flow_type, FlowType::Optimized);
        assert_eq!(outcome.ai_calls, 1);
        assert_eq!(outcome.response, "Sí, tenemos rosca a $350");

        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 3);
        assert_eq!(sent[0].1, 42);
    }

    #[tokio::test]
    async fn legacy_mode_runs_the_full_reasoning_path() {
        let scripts = HashMap::from([
            (
                "analyzer",
                json!({"intent": "product_inquiry", "frustration_level": 0,
                       "loop_detected": false, "strategy": "direct",
                       "data_needs": ["product_info"]}),
            ),
            (
                "generator",
                json!({"reply": "Claro, la rosca cuesta $350", "confidence": 0.8,
                       "needs_handoff": false}),
            ),
        ]);
        let cfg = PipelineConfig {
            mode: FlowMode::Legacy,
            ..Default::default()
        };
        let (selector, sender, llm) = deps(scripts, cfg);

        let outcome = selector.handle(&req()).await;
        assert_eq!(outcome.flow_type, FlowType::Legacy);
        assert_eq!(outcome.ai_calls, 2);
        assert_eq!(sender.sent.lock().unwrap().len(), 1);
        let calls = llm.calls.lock().unwrap().clone();
        assert_eq!(calls, vec!["analyzer", "generator"]);
    }

    #[tokio::test]
    async fn optimized_failure_falls_back_to_legacy() {
        // Only the legacy tasks are scripted: the optimized "reply" task
        // errors, and the selector must fall back.
        let scripts = HashMap::from([
            (
                "analyzer",
                json!({"intent": "unknown", "frustration_level": 1, "loop_detected": false,
                       "strategy": "direct", "data_needs": []}),
            ),
            (
                "generator",
                json!({"reply": "Te ayudo con gusto", "confidence": 0.7, "needs_handoff": false}),
            ),
        ]);
        let (selector, sender, _llm) = deps(scripts, PipelineConfig::default());

        let outcome = selector.handle(&req()).await;
        assert_eq!(outcome.flow_type, FlowType::Legacy);
        assert_eq!(outcome.response, "Te ayudo con gusto");
        // One visible reply despite the internal failover.
        assert_eq!(sender.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn total_llm_outage_yields_the_fixed_apology() {
        let (selector, sender, _llm) = deps(HashMap::new(), PipelineConfig::default());

        let outcome = selector.handle(&req()).await;
        assert_eq!(outcome.response, APOLOGY_REPLY);
        assert!(outcome.confidence < 0.4);
        assert_eq!(sender.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn validator_reject_drops_the_candidate() {
        let scripts = HashMap::from([
            (
                "analyzer",
                json!({"intent": "unknown", "frustration_level": 0, "loop_detected": false,
                       "strategy": "direct", "data_needs": []}),
            ),
            (
                "generator",
                json!({"reply": "La rosca cuesta $99999", "confidence": 0.9,
                       "needs_handoff": false}),
            ),
            (
                "validator",
                json!({"verdict": "reject", "reasons": ["precio inventado"]}),
            ),
        ]);
        let cfg = PipelineConfig {
            mode: FlowMode::Legacy,
            skip_validator: false,
            ..Default::default()
        };
        let (selector, _sender, _llm) = deps(scripts, cfg);

        let outcome = selector.handle(&req()).await;
        assert_eq!(outcome.response, APOLOGY_REPLY);
    }

    #[tokio::test]
    async fn ratio_zero_always_picks_legacy() {
        let scripts = HashMap::from([
            (
                "analyzer",
                json!({"intent": "greeting", "frustration_level": 0, "loop_detected": false,
                       "strategy": "direct", "data_needs": []}),
            ),
            (
                "generator",
                json!({"reply": "¡Hola!", "confidence": 0.9, "needs_handoff": false}),
            ),
        ]);
        let cfg = PipelineConfig {
            optimized_ratio: 0.0,
            ..Default::default()
        };
        let (selector, _sender, llm) = deps(scripts, cfg);

        for _ in 0..5 {
            let outcome = selector.handle(&req()).await;
            assert_eq!(outcome.flow_type, FlowType::Legacy);
        }
        // The optimized "reply" task never ran.
        assert!(!llm.calls.lock().unwrap().iter().any(|t| t == "reply"));
    }
}
