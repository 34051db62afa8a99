use serde::{Deserialize, Serialize};
use serde_json::Value;

use miga_core::types::Role;

use crate::error::LlmError;
use crate::schema::SchemaKey;

/// One message sent to the chat-completions API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

fn parse_structured<T: serde::de::DeserializeOwned>(
    value: Value,
    schema: SchemaKey,
) -> Result<T, LlmError> {
    serde_json::from_value(value).map_err(|e| LlmError::SchemaMismatch {
        schema: schema.name().to_string(),
        detail: e.to_string(),
    })
}

/// Customer-facing reply (schema `miga_reply`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentReply {
    pub reply: String,
    pub confidence: f64,
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default)]
    pub needs_handoff: bool,
}

impl AgentReply {
    pub fn from_value(value: Value) -> Result<Self, LlmError> {
        parse_structured(value, SchemaKey::MigaReply)
    }
}

/// One fact the summarizer extracted for long-term memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedFact {
    pub fact_type: String,
    pub fact_key: String,
    pub fact_value: String,
    pub confidence: f64,
}

/// Summarizer output (schema `conversation_summary`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationDigest {
    pub summary: String,
    #[serde(default)]
    pub primary_intent: Option<String>,
    pub resolution_status: String,
    pub sentiment: String,
    #[serde(default)]
    pub products_mentioned: Vec<String>,
    #[serde(default)]
    pub extracted_facts: Vec<ExtractedFact>,
}

impl ConversationDigest {
    pub fn from_value(value: Value) -> Result<Self, LlmError> {
        parse_structured(value, SchemaKey::ConversationSummary)
    }
}

/// Legacy-pipeline analyzer output (schema `message_analysis`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageAnalysis {
    pub intent: String,
    pub frustration_level: u8,
    pub loop_detected: bool,
    pub strategy: String,
    #[serde(default)]
    pub data_needs: Vec<String>,
}

impl MessageAnalysis {
    pub fn from_value(value: Value) -> Result<Self, LlmError> {
        parse_structured(value, SchemaKey::MessageAnalysis)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approve,
    Reject,
    NeedsRevision,
}

/// Legacy-pipeline validator output (schema `response_validation`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub verdict: Verdict,
    #[serde(default)]
    pub revision_instructions: Option<String>,
    #[serde(default)]
    pub reasons: Vec<String>,
}

impl ValidationVerdict {
    pub fn from_value(value: Value) -> Result<Self, LlmError> {
        parse_structured(value, SchemaKey::ResponseValidation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reply_parses_and_defaults() {
        let reply = AgentReply::from_value(json!({
            "reply": "Sí, tenemos rosca a $350",
            "confidence": 0.92,
            "needs_handoff": false
        }))
        .unwrap();
        assert_eq!(reply.intent, None);
        assert!(reply.confidence > 0.9);
    }

    #[test]
    fn malformed_reply_is_a_schema_mismatch() {
        let err = AgentReply::from_value(json!({"reply": 42})).unwrap_err();
        assert!(matches!(err, LlmError::SchemaMismatch { .. }));
    }

    #[test]
    fn verdict_uses_snake_case() {
        let v: ValidationVerdict = serde_json::from_value(json!({
            "verdict": "needs_revision",
            "revision_instructions": "shorter",
            "reasons": ["too long"]
        }))
        .unwrap();
        assert_eq!(v.verdict, Verdict::NeedsRevision);
    }
}
