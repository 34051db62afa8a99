//! Concrete action handlers: chat provider, outbound webhook, sheet-append
//! endpoint, and internal acknowledgement. External systems (ERP, payroll)
//! receive dispatches; they are never implemented here.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use miga_chat::{ChatClient, ChatError};

use crate::executor::{ActionHandler, ExecError, ValidationReport};
use crate::registry::ActionType;

fn require_i64(payload: &Value, field: &str) -> Result<i64, ExecError> {
    payload
        .get(field)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| ExecError::fatal(format!("Invalid payload: missing '{field}'")))
}

fn require_str<'a>(payload: &'a Value, field: &str) -> Result<&'a str, ExecError> {
    payload
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ExecError::fatal(format!("Invalid payload: missing '{field}'")))
}

fn chat_err(e: ChatError) -> ExecError {
    if e.retryable() {
        ExecError::retryable(e.to_string())
    } else {
        ExecError::fatal(e.to_string())
    }
}

// ── Chat provider ─────────────────────────────────────────────────────────

/// Drives conversation-management calls on the chat provider. Tagging,
/// assignment, and resolution are reversible when the payload carries the
/// previous value.
pub struct ChatProviderHandler {
    client: std::sync::Arc<ChatClient>,
}

impl ChatProviderHandler {
    pub fn new(client: std::sync::Arc<ChatClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ActionHandler for ChatProviderHandler {
    async fn execute(
        &self,
        action_type: ActionType,
        payload: &Value,
        _context: &Value,
    ) -> Result<Value, ExecError> {
        let account_id = require_i64(payload, "account_id")?;
        let conversation_id = require_i64(payload, "conversation_id")?;

        match action_type {
            ActionType::SendMessage => {
                let content = require_str(payload, "content")?;
                self.client
                    .send_message(account_id, conversation_id, content)
                    .await
                    .map_err(chat_err)?;
            }
            ActionType::SendNote => {
                let content = require_str(payload, "content")?;
                self.client
                    .send_note(account_id, conversation_id, content)
                    .await
                    .map_err(chat_err)?;
            }
            ActionType::TagConversation => {
                let labels: Vec<String> = payload
                    .get("labels")
                    .and_then(|v| serde_json::from_value(v.clone()).ok())
                    .ok_or_else(|| ExecError::fatal("Invalid payload: missing 'labels'"))?;
                self.client
                    .set_labels(account_id, conversation_id, &labels)
                    .await
                    .map_err(chat_err)?;
            }
            ActionType::AssignConversation => {
                let assignee = payload.get("assignee_id").and_then(|v| v.as_i64());
                self.client
                    .assign(account_id, conversation_id, assignee)
                    .await
                    .map_err(chat_err)?;
            }
            ActionType::ResolveConversation => {
                self.client
                    .set_status(account_id, conversation_id, "resolved")
                    .await
                    .map_err(chat_err)?;
            }
            other => {
                return Err(ExecError::fatal(format!(
                    "Invalid action type for chat handler: {}",
                    other.as_str()
                )))
            }
        }

        Ok(json!({"delivered": true, "conversation_id": conversation_id}))
    }

    async fn validate(
        &self,
        action_type: ActionType,
        payload: &Value,
        _context: &Value,
    ) -> ValidationReport {
        let mut errors = Vec::new();
        if payload.get("account_id").and_then(|v| v.as_i64()).is_none() {
            errors.push("missing account_id".to_string());
        }
        if payload
            .get("conversation_id")
            .and_then(|v| v.as_i64())
            .is_none()
        {
            errors.push("missing conversation_id".to_string());
        }
        ValidationReport {
            valid: errors.is_empty(),
            preview: Some(format!("{} on the chat provider", action_type.as_str())),
            errors,
        }
    }

    /// Reversible transitions: re-tag/reassign with the previous value,
    /// reopen a resolved conversation.
    async fn rollback(
        &self,
        action_type: ActionType,
        payload: &Value,
        _context: &Value,
        _execution_result: &Value,
    ) -> Result<(), ExecError> {
        let account_id = require_i64(payload, "account_id")?;
        let conversation_id = require_i64(payload, "conversation_id")?;

        match action_type {
            ActionType::TagConversation => {
                let previous: Vec<String> = payload
                    .get("previous_labels")
                    .and_then(|v| serde_json::from_value(v.clone()).ok())
                    .unwrap_or_default();
                self.client
                    .set_labels(account_id, conversation_id, &previous)
                    .await
                    .map_err(chat_err)
            }
            ActionType::AssignConversation => {
                let previous = payload.get("previous_assignee_id").and_then(|v| v.as_i64());
                self.client
                    .assign(account_id, conversation_id, previous)
                    .await
                    .map_err(chat_err)
            }
            ActionType::ResolveConversation => self
                .client
                .set_status(account_id, conversation_id, "open")
                .await
                .map_err(chat_err),
            other => Err(ExecError::fatal(format!(
                "rollback not supported for {}",
                other.as_str()
            ))),
        }
    }
}

// ── Outbound webhook ──────────────────────────────────────────────────────

/// POSTs the payload body to the URL named in the payload. 4xx responses
/// are fatal; transport errors and 5xx retry.
pub struct WebhookHandler {
    client: reqwest::Client,
}

impl Default for WebhookHandler {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ActionHandler for WebhookHandler {
    async fn execute(
        &self,
        _action_type: ActionType,
        payload: &Value,
        _context: &Value,
    ) -> Result<Value, ExecError> {
        let url = require_str(payload, "url")?;
        let body = payload.get("body").cloned().unwrap_or(json!({}));

        let resp = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ExecError::retryable(e.to_string()))?;

        let status = resp.status().as_u16();
        if resp.status().is_success() {
            Ok(json!({"status": status}))
        } else if status >= 500 || status == 429 {
            Err(ExecError::retryable(format!("webhook answered {status}")))
        } else {
            Err(ExecError::fatal(format!("webhook answered {status}")))
        }
    }
}

// ── Sheet append ──────────────────────────────────────────────────────────

/// Appends rows through a write endpoint (Apps-Script style web app); the
/// Sheets values API itself is read-only in this deployment.
pub struct SheetsHandler {
    client: reqwest::Client,
    write_url: Option<String>,
}

impl SheetsHandler {
    pub fn new(write_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            write_url,
        }
    }
}

#[async_trait]
impl ActionHandler for SheetsHandler {
    async fn execute(
        &self,
        action_type: ActionType,
        payload: &Value,
        _context: &Value,
    ) -> Result<Value, ExecError> {
        let url = self
            .write_url
            .as_deref()
            .ok_or_else(|| ExecError::fatal("sheet write endpoint not configured"))?;
        let tab = require_str(payload, "tab")?;
        let values = payload
            .get("values")
            .ok_or_else(|| ExecError::fatal("Invalid payload: missing 'values'"))?;

        let resp = self
            .client
            .post(url)
            .json(&json!({
                "action": action_type.as_str(),
                "tab": tab,
                "values": values,
            }))
            .send()
            .await
            .map_err(|e| ExecError::retryable(e.to_string()))?;

        let status = resp.status().as_u16();
        if resp.status().is_success() {
            Ok(json!({"status": status, "tab": tab}))
        } else if status >= 500 {
            Err(ExecError::retryable(format!("sheet endpoint answered {status}")))
        } else {
            Err(ExecError::fatal(format!("sheet endpoint answered {status}")))
        }
    }
}

// ── Internal ──────────────────────────────────────────────────────────────

/// Terminal sink for actions whose real effect lives in an external system
/// (ERP, payroll). The dispatch is recorded and acknowledged; the external
/// integration consumes the record out of band.
#[derive(Default)]
pub struct InternalHandler;

#[async_trait]
impl ActionHandler for InternalHandler {
    async fn execute(
        &self,
        action_type: ActionType,
        payload: &Value,
        context: &Value,
    ) -> Result<Value, ExecError> {
        info!(
            action_type = action_type.as_str(),
            payload = %payload,
            "internal action dispatched"
        );
        if payload.as_object().map(|o| o.is_empty()).unwrap_or(true) {
            warn!(action_type = action_type.as_str(), "internal action with empty payload");
        }
        Ok(json!({
            "dispatched": true,
            "action": action_type.as_str(),
            "context": context,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use miga_core::config::ChatConfig;
    use std::sync::Arc;

    fn chat_handler() -> ChatProviderHandler {
        ChatProviderHandler::new(Arc::new(ChatClient::new(&ChatConfig::default())))
    }

    #[tokio::test]
    async fn missing_ids_fail_validation() {
        let report = chat_handler()
            .validate(ActionType::SendMessage, &json!({"content": "hola"}), &json!({}))
            .await;
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 2);
    }

    #[tokio::test]
    async fn invalid_payload_is_fatal() {
        let err = chat_handler()
            .execute(ActionType::SendMessage, &json!({}), &json!({}))
            .await
            .unwrap_err();
        assert!(!err.retryable);
        assert!(err.message.contains("Invalid payload"));
    }

    #[tokio::test]
    async fn internal_handler_acknowledges() {
        let result = InternalHandler
            .execute(
                ActionType::SuspendEmployeeAccess,
                &json!({"employee_id": "e-77"}),
                &json!({"branch_id": "centro"}),
            )
            .await
            .unwrap();
        assert_eq!(result["dispatched"], true);
        assert_eq!(result["context"]["branch_id"], "centro");
    }

    #[tokio::test]
    async fn unconfigured_sheet_endpoint_is_fatal() {
        let err = SheetsHandler::new(None)
            .execute(
                ActionType::UpdateSheetRow,
                &json!({"tab": "inventory", "values": ["rosca", 12]}),
                &json!({}),
            )
            .await
            .unwrap_err();
        assert!(!err.retryable);
    }
}
