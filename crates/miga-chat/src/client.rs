//! REST client for the chat provider (Chatwoot-compatible API).
//!
//! Posts outbound replies and private notes by `(account_id,
//! conversation_id)`, and drives the conversation-management calls the
//! action handlers need (labels, assignment, status).

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use miga_core::config::ChatConfig;

use crate::error::{ChatError, Result};

/// Seam used by the reply pipeline so tests can observe sends without HTTP.
#[async_trait]
pub trait ReplySender: Send + Sync {
    async fn send_reply(&self, account_id: i64, conversation_id: i64, text: &str) -> Result<()>;
}

pub struct ChatClient {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl ChatClient {
    pub fn new(cfg: &ChatConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_token: cfg.api_token.clone(),
        }
    }

    fn token(&self) -> Result<&str> {
        self.api_token
            .as_deref()
            .ok_or_else(|| ChatError::NotConfigured("chat.api_token is not set".to_string()))
    }

    fn conversation_url(&self, account_id: i64, conversation_id: i64, tail: &str) -> String {
        format!(
            "{}/api/v1/accounts/{}/conversations/{}{}",
            self.base_url, account_id, conversation_id, tail
        )
    }

    async fn post(&self, url: &str, body: Value) -> Result<Value> {
        let resp = self
            .client
            .post(url)
            .header("api_access_token", self.token()?)
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let message = resp.text().await.unwrap_or_default();
            warn!(status, url = %url, "chat provider API error");
            return Err(ChatError::Api { status, message });
        }
        Ok(resp.json().await.unwrap_or(Value::Null))
    }

    /// Post an outgoing message visible to the customer.
    pub async fn send_message(
        &self,
        account_id: i64,
        conversation_id: i64,
        content: &str,
    ) -> Result<()> {
        debug!(account_id, conversation_id, "sending outbound message");
        self.post(
            &self.conversation_url(account_id, conversation_id, "/messages"),
            json!({"content": content, "message_type": "outgoing"}),
        )
        .await?;
        Ok(())
    }

    /// Post a private note visible only to agents.
    pub async fn send_note(
        &self,
        account_id: i64,
        conversation_id: i64,
        content: &str,
    ) -> Result<()> {
        self.post(
            &self.conversation_url(account_id, conversation_id, "/messages"),
            json!({"content": content, "message_type": "outgoing", "private": true}),
        )
        .await?;
        Ok(())
    }

    /// Replace the conversation's label set.
    pub async fn set_labels(
        &self,
        account_id: i64,
        conversation_id: i64,
        labels: &[String],
    ) -> Result<()> {
        self.post(
            &self.conversation_url(account_id, conversation_id, "/labels"),
            json!({ "labels": labels }),
        )
        .await?;
        Ok(())
    }

    /// Assign the conversation to an agent (None unassigns).
    pub async fn assign(
        &self,
        account_id: i64,
        conversation_id: i64,
        assignee_id: Option<i64>,
    ) -> Result<()> {
        self.post(
            &self.conversation_url(account_id, conversation_id, "/assignments"),
            json!({ "assignee_id": assignee_id }),
        )
        .await?;
        Ok(())
    }

    /// Toggle conversation status ("open", "resolved", "pending").
    pub async fn set_status(
        &self,
        account_id: i64,
        conversation_id: i64,
        status: &str,
    ) -> Result<()> {
        self.post(
            &self.conversation_url(account_id, conversation_id, "/toggle_status"),
            json!({ "status": status }),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ReplySender for ChatClient {
    async fn send_reply(&self, account_id: i64, conversation_id: i64, text: &str) -> Result<()> {
        self.send_message(account_id, conversation_id, text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_urls_are_shaped_correctly() {
        let client = ChatClient::new(&ChatConfig {
            base_url: "https://chat.example.com/".to_string(),
            api_token: Some("t".to_string()),
            timeout_secs: 5,
        });
        assert_eq!(
            client.conversation_url(3, 42, "/messages"),
            "https://chat.example.com/api/v1/accounts/3/conversations/42/messages"
        );
    }

    #[tokio::test]
    async fn missing_token_is_not_configured() {
        let client = ChatClient::new(&ChatConfig {
            base_url: "https://chat.example.com".to_string(),
            api_token: None,
            timeout_secs: 5,
        });
        let err = client.send_message(1, 2, "hola").await.unwrap_err();
        assert!(matches!(err, ChatError::NotConfigured(_)));
        assert!(!err.retryable());
    }
}
