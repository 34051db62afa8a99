//! Dispatch of approved actions to their handlers, with an overall timeout,
//! bounded retries, and optional dry-run validation and rollback.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use miga_core::config::ActionsConfig;

use crate::registry::ActionType;
use crate::types::HandlerKind;

#[derive(Debug, Error)]
#[error("{message}")]
pub struct ExecError {
    pub message: String,
    pub retryable: bool,
}

impl ExecError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// Invalid payload, unauthorized, not found, invalid action type: the
    /// request itself is wrong and retrying cannot help.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub preview: Option<String>,
}

#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn execute(
        &self,
        action_type: ActionType,
        payload: &Value,
        context: &Value,
    ) -> Result<Value, ExecError>;

    /// Dry-run check. Default accepts everything.
    async fn validate(
        &self,
        _action_type: ActionType,
        _payload: &Value,
        _context: &Value,
    ) -> ValidationReport {
        ValidationReport {
            valid: true,
            ..Default::default()
        }
    }

    /// Reverse a prior execution. Default: unsupported.
    async fn rollback(
        &self,
        action_type: ActionType,
        _payload: &Value,
        _context: &Value,
        _execution_result: &Value,
    ) -> Result<(), ExecError> {
        Err(ExecError::fatal(format!(
            "rollback not supported for {}",
            action_type.as_str()
        )))
    }
}

pub struct ActionExecutor {
    handlers: HashMap<HandlerKind, Arc<dyn ActionHandler>>,
    cfg: ActionsConfig,
}

impl ActionExecutor {
    pub fn new(cfg: ActionsConfig) -> Self {
        Self {
            handlers: HashMap::new(),
            cfg,
        }
    }

    pub fn register(&mut self, kind: HandlerKind, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(kind, handler);
    }

    fn handler(&self, kind: HandlerKind) -> Result<&Arc<dyn ActionHandler>, ExecError> {
        self.handlers
            .get(&kind)
            .ok_or_else(|| ExecError::fatal(format!("no handler registered for {}", kind.as_str())))
    }

    /// Run the handler under the overall timeout with up to `max_retries`
    /// attempts and `2^attempt` seconds of backoff between retryable
    /// failures.
    pub async fn execute(
        &self,
        kind: HandlerKind,
        action_type: ActionType,
        payload: &Value,
        context: &Value,
    ) -> Result<Value, ExecError> {
        let handler = Arc::clone(self.handler(kind)?);
        let max_retries = self.cfg.max_retries;
        let budget = Duration::from_secs(self.cfg.execute_timeout_secs);

        let attempt_loop = async {
            let mut last: Option<ExecError> = None;
            for attempt in 0..=max_retries {
                match handler.execute(action_type, payload, context).await {
                    Ok(result) => {
                        if attempt > 0 {
                            info!(
                                action_type = action_type.as_str(),
                                attempt, "action succeeded after retry"
                            );
                        }
                        return Ok(result);
                    }
                    Err(e) if e.retryable && attempt < max_retries => {
                        warn!(
                            action_type = action_type.as_str(),
                            attempt,
                            error = %e,
                            "action attempt failed, backing off"
                        );
                        tokio::time::sleep(Duration::from_secs(2u64.pow(attempt + 1))).await;
                        last = Some(e);
                    }
                    Err(e) => return Err(e),
                }
            }
            Err(last.unwrap_or_else(|| ExecError::fatal("retry budget exhausted")))
        };

        match tokio::time::timeout(budget, attempt_loop).await {
            Ok(result) => result,
            Err(_) => Err(ExecError::retryable(format!(
                "execution timed out after {}s",
                budget.as_secs()
            ))),
        }
    }

    pub async fn validate(
        &self,
        kind: HandlerKind,
        action_type: ActionType,
        payload: &Value,
        context: &Value,
    ) -> ValidationReport {
        match self.handler(kind) {
            Ok(handler) => handler.validate(action_type, payload, context).await,
            Err(e) => ValidationReport {
                valid: false,
                errors: vec![e.message],
                preview: None,
            },
        }
    }

    pub async fn rollback(
        &self,
        kind: HandlerKind,
        action_type: ActionType,
        payload: &Value,
        context: &Value,
        execution_result: &Value,
    ) -> Result<(), ExecError> {
        let handler = Arc::clone(self.handler(kind)?);
        handler
            .rollback(action_type, payload, context, execution_result)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyHandler {
        failures_before_success: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ActionHandler for FlakyHandler {
        async fn execute(
            &self,
            _action_type: ActionType,
            _payload: &Value,
            _context: &Value,
        ) -> Result<Value, ExecError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                Err(ExecError::retryable("transient"))
            } else {
                Ok(json!({"ok": true}))
            }
        }
    }

    struct UnauthorizedHandler {
        calls: AtomicU32,
    }

    #[async_trait]
    impl ActionHandler for UnauthorizedHandler {
        async fn execute(
            &self,
            _action_type: ActionType,
            _payload: &Value,
            _context: &Value,
        ) -> Result<Value, ExecError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ExecError::fatal("Unauthorized"))
        }
    }

    fn executor_with(kind: HandlerKind, handler: Arc<dyn ActionHandler>) -> ActionExecutor {
        let mut exec = ActionExecutor::new(ActionsConfig::default());
        exec.register(kind, handler);
        exec
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_failures_are_retried_to_success() {
        let handler = Arc::new(FlakyHandler {
            failures_before_success: 2,
            calls: AtomicU32::new(0),
        });
        let exec = executor_with(HandlerKind::Webhook, handler.clone());

        let result = exec
            .execute(
                HandlerKind::Webhook,
                ActionType::NotifyWebhook,
                &json!({}),
                &json!({}),
            )
            .await
            .unwrap();
        assert_eq!(result["ok"], true);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_failures_bypass_retry() {
        let handler = Arc::new(UnauthorizedHandler {
            calls: AtomicU32::new(0),
        });
        let exec = executor_with(HandlerKind::Internal, handler.clone());

        let err = exec
            .execute(
                HandlerKind::Internal,
                ActionType::IssueRefund,
                &json!({}),
                &json!({}),
            )
            .await
            .unwrap_err();
        assert!(!err.retryable);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_handler_is_fatal() {
        let exec = ActionExecutor::new(ActionsConfig::default());
        let err = exec
            .execute(
                HandlerKind::Sheets,
                ActionType::UpdateSheetRow,
                &json!({}),
                &json!({}),
            )
            .await
            .unwrap_err();
        assert!(!err.retryable);
    }

    #[tokio::test]
    async fn default_rollback_is_unsupported() {
        let handler = Arc::new(FlakyHandler {
            failures_before_success: 0,
            calls: AtomicU32::new(0),
        });
        let exec = executor_with(HandlerKind::Webhook, handler);
        let err = exec
            .rollback(
                HandlerKind::Webhook,
                ActionType::NotifyWebhook,
                &json!({}),
                &json!({}),
                &json!({}),
            )
            .await
            .unwrap_err();
        assert!(err.message.contains("rollback not supported"));
    }
}
