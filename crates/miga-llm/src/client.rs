//! Structured-output chat-completions client with adaptive capability
//! learning. When the provider rejects a parameter, the registry narrows
//! that model's capability set and the call is rebuilt and retried within
//! the same request.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::PgPool;
use tracing::{debug, info, warn};

use miga_core::config::LlmConfig;

use crate::error::{LlmError, Result};
use crate::knowledge;
use crate::registry::{ModelCapabilities, ModelParams, ModelRegistry, ParamKind};
use crate::schema::SchemaKey;
use crate::types::ChatMessage;

/// Seam for every component that talks to the LLM, mockable in tests.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// One structured-output call for `task`, returning the parsed JSON
    /// object that matched `schema`.
    async fn structured(
        &self,
        task: &str,
        schema: SchemaKey,
        system: &str,
        messages: &[ChatMessage],
    ) -> Result<Value>;
}

pub struct LlmClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeout_ms: u64,
    max_retries: u32,
    registry: Arc<ModelRegistry>,
    /// Capability learning persists here when available (best-effort).
    knowledge_pool: Option<PgPool>,
}

impl LlmClient {
    pub fn new(cfg: &LlmConfig, registry: Arc<ModelRegistry>, knowledge_pool: Option<PgPool>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            timeout_ms: cfg.timeout_secs * 1000,
            max_retries: cfg.max_retries,
            registry,
            knowledge_pool,
        }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Build the request body under the model's current capability set.
    fn build_body(
        params: &ModelParams,
        caps: &ModelCapabilities,
        schema: SchemaKey,
        system: &str,
        messages: &[ChatMessage],
    ) -> Value {
        let mut system_content = system.to_string();
        if !caps.supports_json_mode {
            // No JSON mode: fold the schema into the instructions instead.
            system_content.push_str("\n\n");
            system_content.push_str(&schema.instruction());
        }

        let mut all_messages = vec![json!({"role": "system", "content": system_content})];
        for m in messages {
            all_messages.push(json!({"role": m.role.as_str(), "content": m.content}));
        }

        let mut body = json!({
            "model": params.model,
            "messages": all_messages,
        });

        if caps.supports_custom_temperature {
            if let Some(t) = params.temperature {
                body["temperature"] = json!(t);
            }
        }
        if let Some(max) = params.max_tokens {
            if caps.requires_max_completion_tokens {
                body["max_completion_tokens"] = json!(max);
            } else {
                body["max_tokens"] = json!(max);
            }
        }
        if caps.supports_json_mode {
            body["response_format"] = schema.response_format();
        }
        body
    }

    async fn post_completion(&self, body: &Value) -> Result<reqwest::Response> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| LlmError::NotConfigured("llm.api_key is not set".to_string()))?;

        self.client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .timeout(Duration::from_millis(self.timeout_ms))
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout { ms: self.timeout_ms }
                } else {
                    LlmError::Http(e)
                }
            })
    }

    /// Narrow the capability set and best-effort persist the finding.
    async fn learn(&self, model: &str, kind: ParamKind, raw: &str) {
        self.registry.record_unsupported(model, kind, raw);
        if let Some(pool) = &self.knowledge_pool {
            let caps = self.registry.capabilities(model);
            if let Err(e) = knowledge::persist(pool, model, &caps).await {
                warn!(model, error = %e, "failed to persist model knowledge");
            }
        }
    }

    /// Eagerly discover a model's capabilities with small cost-bearing
    /// calls. Best-effort: transport failures leave knowledge unchanged.
    pub async fn probe(&self, model: &str) -> Result<ModelCapabilities> {
        let mut caps = ModelCapabilities::default();
        let probe_messages = [ChatMessage::user("ping")];

        // Temperature probe.
        let params = ModelParams {
            model: model.to_string(),
            temperature: Some(0.7),
            max_tokens: Some(16),
            source: "probe",
        };
        let body = Self::build_body(
            &params,
            &ModelCapabilities::default(),
            SchemaKey::MigaReply,
            "Responde brevemente.",
            &probe_messages,
        );
        let resp = self.post_completion(&body).await?;
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            apply_finding(&mut caps, &text);
        }

        // Retry the narrowed shape once so compound narrowings surface
        // (e.g. both temperature and max_tokens rejected).
        let body = Self::build_body(
            &params,
            &caps,
            SchemaKey::MigaReply,
            "Responde brevemente.",
            &probe_messages,
        );
        let resp = self.post_completion(&body).await?;
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            apply_finding(&mut caps, &text);
        }

        caps.updated_at = chrono::Utc::now();
        self.registry.record_probe(model, caps.clone());
        if let Some(pool) = &self.knowledge_pool {
            if let Err(e) = knowledge::persist(pool, model, &caps).await {
                warn!(model, error = %e, "failed to persist probe result");
            }
        }
        info!(model, "model probe complete");
        Ok(caps)
    }
}

#[async_trait]
impl LanguageModel for LlmClient {
    async fn structured(
        &self,
        task: &str,
        schema: SchemaKey,
        system: &str,
        messages: &[ChatMessage],
    ) -> Result<Value> {
        let params = self.registry.params_for(task);
        let mut last_err: Option<LlmError> = None;

        for attempt in 0..=self.max_retries {
            let caps = self.registry.capabilities(&params.model);
            let body = Self::build_body(&params, &caps, schema, system, messages);

            debug!(task, model = %params.model, attempt, "llm call");
            let resp = match self.post_completion(&body).await {
                Ok(r) => r,
                Err(e) => return Err(e),
            };

            let status = resp.status().as_u16();
            if status == 429 {
                let retry_after_ms = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(|s| s * 1000)
                    .unwrap_or(5000);
                return Err(LlmError::RateLimited { retry_after_ms });
            }

            if !resp.status().is_success() {
                let text = resp.text().await.unwrap_or_default();
                if let Some(kind) = ModelRegistry::classify_unsupported(&text) {
                    // Narrow, rebuild, retry inside the same request.
                    self.learn(&params.model, kind, &text).await;
                    last_err = Some(LlmError::Api { status, message: text });
                    continue;
                }
                warn!(status, task, body = %text, "llm API error");
                return Err(LlmError::Api { status, message: text });
            }

            let parsed: ApiResponse = resp
                .json()
                .await
                .map_err(|e| LlmError::SchemaMismatch {
                    schema: schema.name().to_string(),
                    detail: format!("response body: {e}"),
                })?;

            let choice = parsed
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| LlmError::SchemaMismatch {
                    schema: schema.name().to_string(),
                    detail: "no choices in response".to_string(),
                })?;

            if let Some(refusal) = choice.message.refusal.filter(|r| !r.is_empty()) {
                return Err(LlmError::Refusal(refusal));
            }

            let content = choice.message.content.unwrap_or_default();
            return extract_json(&content).ok_or_else(|| LlmError::SchemaMismatch {
                schema: schema.name().to_string(),
                detail: format!("unparseable content: {}", content.chars().take(200).collect::<String>()),
            });
        }

        Err(last_err.unwrap_or_else(|| LlmError::Api {
            status: 0,
            message: "retry budget exhausted".to_string(),
        }))
    }
}

/// Fold one provider error into a probe's capability picture.
fn apply_finding(caps: &mut ModelCapabilities, error_text: &str) {
    match ModelRegistry::classify_unsupported(error_text) {
        Some(ParamKind::Temperature) => caps.supports_custom_temperature = false,
        Some(ParamKind::MaxTokens) => caps.requires_max_completion_tokens = true,
        Some(ParamKind::ResponseFormat) => caps.supports_json_mode = false,
        None => {}
    }
    caps.last_observed_error = Some(error_text.chars().take(500).collect());
}

/// Parse the model's content as JSON, tolerating markdown code fences.
fn extract_json(content: &str) -> Option<Value> {
    let trimmed = content.trim();
    if let Ok(v) = serde_json::from_str(trimmed) {
        return Some(v);
    }
    let inner = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))?
        .trim_start();
    let inner = inner.strip_suffix("```").unwrap_or(inner);
    serde_json::from_str(inner.trim()).ok()
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_extraction_tolerates_fences() {
        let plain = r#"{"reply": "hola", "confidence": 0.9, "needs_handoff": false}"#;
        assert!(extract_json(plain).is_some());

        let fenced = format!("```json\n{plain}\n```");
        assert_eq!(extract_json(&fenced), extract_json(plain));

        assert!(extract_json("no json here").is_none());
    }

    #[test]
    fn body_respects_narrowed_capabilities() {
        let params = ModelParams {
            model: "m".to_string(),
            temperature: Some(0.3),
            max_tokens: Some(400),
            source: "default",
        };
        let narrowed = ModelCapabilities {
            supports_custom_temperature: false,
            requires_max_completion_tokens: true,
            supports_json_mode: false,
            last_observed_error: None,
            updated_at: chrono::Utc::now(),
        };
        let body = LlmClient::build_body(
            &params,
            &narrowed,
            SchemaKey::MigaReply,
            "sys",
            &[ChatMessage::user("hola")],
        );

        assert!(body.get("temperature").is_none());
        assert!(body.get("max_tokens").is_none());
        assert_eq!(body["max_completion_tokens"], 400);
        assert!(body.get("response_format").is_none());
        // Schema folded into the system message instead.
        let system = body["messages"][0]["content"].as_str().unwrap();
        assert!(system.contains("JSON"));
    }

    #[test]
    fn body_uses_full_parameters_when_supported() {
        let params = ModelParams {
            model: "m".to_string(),
            temperature: Some(0.3),
            max_tokens: Some(400),
            source: "default",
        };
        let body = LlmClient::build_body(
            &params,
            &ModelCapabilities::default(),
            SchemaKey::MigaReply,
            "sys",
            &[ChatMessage::user("hola")],
        );
        assert_eq!(body["temperature"], 0.3);
        assert_eq!(body["max_tokens"], 400);
        assert_eq!(body["response_format"]["json_schema"]["name"], "miga_reply");
    }
}
