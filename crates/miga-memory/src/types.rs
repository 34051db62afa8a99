use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use miga_core::types::Role;

/// One stored utterance. Immutable once written except for the
/// `summarized`/`summary_id` transition.
#[derive(Debug, Clone, Serialize)]
pub struct StoredMessage {
    pub id: i64,
    pub conversation_id: i64,
    pub contact_id: Option<i64>,
    pub role: Role,
    pub content: String,
    pub metadata: Value,
    pub message_timestamp: DateTime<Utc>,
    pub summarized: bool,
    pub summary_id: Option<Uuid>,
}

/// Summary metadata extracted by the LLM alongside the compressed text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryMetadata {
    #[serde(default)]
    pub primary_intent: Option<String>,
    #[serde(default)]
    pub resolution_status: Option<String>,
    #[serde(default)]
    pub sentiment: Option<String>,
    #[serde(default)]
    pub products_mentioned: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub conversation_id: i64,
    pub contact_id: Option<i64>,
    pub summary_text: String,
    pub messages_start_at: DateTime<Utc>,
    pub messages_end_at: DateTime<Utc>,
    pub message_count: i64,
    pub estimated_tokens: i64,
    pub metadata: SummaryMetadata,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A durable, key-addressed claim about a contact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub contact_id: i64,
    pub source_conversation_id: Option<i64>,
    pub fact_type: String,
    pub fact_key: String,
    pub fact_value: String,
    pub confidence: f64,
    #[serde(default)]
    pub is_stale: bool,
    pub last_confirmed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Durability class of a memory write or read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageClass {
    Database,
    Memory,
}

impl StorageClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageClass::Database => "database",
            StorageClass::Memory => "memory",
        }
    }
}

/// Result of an `add_message` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Stored(StorageClass),
    /// The message equalled the previous (role, content) pair and was dropped.
    DuplicateElided,
}

#[derive(Debug, Clone, Default)]
pub struct ContextOptions {
    pub max_messages: Option<i64>,
    pub contact_id: Option<i64>,
    pub current_query: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ContextStats {
    pub recent_messages: usize,
    pub summaries: usize,
    pub facts: usize,
}

/// Everything the reply pipeline injects into the prompt for one turn.
#[derive(Debug, Clone)]
pub struct LlmContext {
    pub messages: Vec<StoredMessage>,
    pub context_text: String,
    pub storage: StorageClass,
    pub stats: ContextStats,
}
