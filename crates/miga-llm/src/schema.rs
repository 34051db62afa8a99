//! Closed set of structured-output schemas. Every LLM call that expects
//! machine-readable output names one of these keys; the set is exhaustive on
//! purpose so unknown keys fail at the boundary instead of deep in a prompt.

use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaKey {
    /// The customer-facing reply produced by either pipeline.
    MigaReply,
    /// Compression of an aged message span plus extracted facts.
    ConversationSummary,
    /// Legacy-pipeline analyzer output (intent, frustration, data needs).
    MessageAnalysis,
    /// Legacy-pipeline validator verdict.
    ResponseValidation,
    /// Config-hub auto-discovery tab classification.
    SheetSchemaAnalysis,
}

impl SchemaKey {
    pub fn name(&self) -> &'static str {
        match self {
            SchemaKey::MigaReply => "miga_reply",
            SchemaKey::ConversationSummary => "conversation_summary",
            SchemaKey::MessageAnalysis => "message_analysis",
            SchemaKey::ResponseValidation => "response_validation",
            SchemaKey::SheetSchemaAnalysis => "sheet_schema_analysis",
        }
    }

    /// `response_format` payload for providers with JSON-schema mode.
    pub fn response_format(&self) -> Value {
        json!({
            "type": "json_schema",
            "json_schema": {
                "name": self.name(),
                "strict": true,
                "schema": self.json_schema(),
            }
        })
    }

    /// Plain-text fallback instruction for models without JSON mode.
    pub fn instruction(&self) -> String {
        format!(
            "Responde únicamente con un objeto JSON válido que cumpla este esquema, sin texto adicional:\n{}",
            self.json_schema()
        )
    }

    pub fn json_schema(&self) -> Value {
        match self {
            SchemaKey::MigaReply => json!({
                "type": "object",
                "properties": {
                    "reply": { "type": "string" },
                    "confidence": { "type": "number", "minimum": 0.0, "maximum": 1.0 },
                    "intent": { "type": ["string", "null"] },
                    "needs_handoff": { "type": "boolean" }
                },
                "required": ["reply", "confidence", "needs_handoff"],
                "additionalProperties": false
            }),
            SchemaKey::ConversationSummary => json!({
                "type": "object",
                "properties": {
                    "summary": { "type": "string" },
                    "primary_intent": { "type": ["string", "null"] },
                    "resolution_status": {
                        "type": "string",
                        "enum": ["resolved", "pending", "escalated", "abandoned", "unknown"]
                    },
                    "sentiment": {
                        "type": "string",
                        "enum": ["positive", "neutral", "negative"]
                    },
                    "products_mentioned": { "type": "array", "items": { "type": "string" } },
                    "extracted_facts": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "fact_type": { "type": "string" },
                                "fact_key": { "type": "string" },
                                "fact_value": { "type": "string" },
                                "confidence": { "type": "number", "minimum": 0.0, "maximum": 1.0 }
                            },
                            "required": ["fact_type", "fact_key", "fact_value", "confidence"],
                            "additionalProperties": false
                        }
                    }
                },
                "required": ["summary", "resolution_status", "sentiment",
                             "products_mentioned", "extracted_facts"],
                "additionalProperties": false
            }),
            SchemaKey::MessageAnalysis => json!({
                "type": "object",
                "properties": {
                    "intent": { "type": "string" },
                    "frustration_level": { "type": "integer", "minimum": 0, "maximum": 5 },
                    "loop_detected": { "type": "boolean" },
                    "strategy": { "type": "string" },
                    "data_needs": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["intent", "frustration_level", "loop_detected",
                             "strategy", "data_needs"],
                "additionalProperties": false
            }),
            SchemaKey::ResponseValidation => json!({
                "type": "object",
                "properties": {
                    "verdict": {
                        "type": "string",
                        "enum": ["approve", "reject", "needs_revision"]
                    },
                    "revision_instructions": { "type": ["string", "null"] },
                    "reasons": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["verdict", "reasons"],
                "additionalProperties": false
            }),
            SchemaKey::SheetSchemaAnalysis => json!({
                "type": "object",
                "properties": {
                    "tabs": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "tab": { "type": "string" },
                                "category": {
                                    "type": "string",
                                    "enum": ["branch", "product", "faq", "canned",
                                             "knowledge", "other"]
                                },
                                "documents": { "type": "array", "items": { "type": "string" } }
                            },
                            "required": ["tab", "category", "documents"],
                            "additionalProperties": false
                        }
                    }
                },
                "required": ["tabs"],
                "additionalProperties": false
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique_and_stable() {
        let keys = [
            SchemaKey::MigaReply,
            SchemaKey::ConversationSummary,
            SchemaKey::MessageAnalysis,
            SchemaKey::ResponseValidation,
            SchemaKey::SheetSchemaAnalysis,
        ];
        let names: std::collections::HashSet<_> = keys.iter().map(|k| k.name()).collect();
        assert_eq!(names.len(), keys.len());
        assert_eq!(SchemaKey::MigaReply.name(), "miga_reply");
    }

    #[test]
    fn response_format_embeds_schema_name() {
        let fmt = SchemaKey::ConversationSummary.response_format();
        assert_eq!(fmt["json_schema"]["name"], "conversation_summary");
        assert_eq!(fmt["type"], "json_schema");
    }
}
