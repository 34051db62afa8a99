//! Model routing and learned capabilities.
//!
//! The registry is the only place that branches on model family. Routing
//! maps a task name to model parameters (snapshot override first, built-in
//! defaults otherwise). Capabilities start from a static known-model table
//! and narrow at runtime when a provider rejects a parameter; once observed
//! `false`, a capability is never promoted back except by an explicit probe.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Routing override for one task, typically sourced from the config hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteOverride {
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

/// task name → override.
pub type RoutingTable = HashMap<String, RouteOverride>;

/// Fully resolved parameters for one LLM call.
#[derive(Debug, Clone)]
pub struct ModelParams {
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// "routing" when a snapshot override applied, "default" otherwise.
    pub source: &'static str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCapabilities {
    pub supports_custom_temperature: bool,
    pub requires_max_completion_tokens: bool,
    pub supports_json_mode: bool,
    #[serde(default)]
    pub last_observed_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Default for ModelCapabilities {
    fn default() -> Self {
        Self {
            supports_custom_temperature: true,
            requires_max_completion_tokens: false,
            supports_json_mode: true,
            last_observed_error: None,
            updated_at: Utc::now(),
        }
    }
}

/// Parameter families the learning loop can narrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Temperature,
    MaxTokens,
    ResponseFormat,
}

pub struct ModelRegistry {
    capabilities: DashMap<String, ModelCapabilities>,
    routing: RwLock<RoutingTable>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRegistry {
    pub fn new() -> Self {
        let registry = Self {
            capabilities: DashMap::new(),
            routing: RwLock::new(HashMap::new()),
        };
        registry.seed_known_models();
        registry
    }

    /// Reasoning-model families ship with narrowed parameter sets; seeding
    /// them avoids burning a failed call to learn what is already known.
    fn seed_known_models(&self) {
        for model in ["o1", "o1-mini", "o3", "o3-mini", "o4-mini"] {
            self.capabilities.insert(
                model.to_string(),
                ModelCapabilities {
                    supports_custom_temperature: false,
                    requires_max_completion_tokens: true,
                    supports_json_mode: true,
                    last_observed_error: None,
                    updated_at: Utc::now(),
                },
            );
        }
    }

    // ── Routing ──────────────────────────────────────────────────────────

    /// Swap in a fresh routing table (called after each config refresh).
    pub fn update_routing(&self, table: RoutingTable) {
        *self.routing.write().unwrap() = table;
    }

    /// Resolve parameters for a task: snapshot override wins, then defaults.
    pub fn params_for(&self, task: &str) -> ModelParams {
        if let Some(route) = self.routing.read().unwrap().get(task) {
            return ModelParams {
                model: route.model.clone(),
                temperature: route.temperature,
                max_tokens: route.max_tokens,
                source: "routing",
            };
        }
        let (model, temperature, max_tokens) = default_route(task);
        ModelParams {
            model: model.to_string(),
            temperature: Some(temperature),
            max_tokens: Some(max_tokens),
            source: "default",
        }
    }

    // ── Capability predicates ────────────────────────────────────────────

    pub fn capabilities(&self, model: &str) -> ModelCapabilities {
        self.capabilities
            .get(model)
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    pub fn supports_custom_temperature(&self, model: &str) -> bool {
        self.capabilities(model).supports_custom_temperature
    }

    pub fn requires_max_completion_tokens(&self, model: &str) -> bool {
        self.capabilities(model).requires_max_completion_tokens
    }

    pub fn supports_json_mode(&self, model: &str) -> bool {
        self.capabilities(model).supports_json_mode
    }

    // ── Learning ─────────────────────────────────────────────────────────

    /// Record that the provider rejected a parameter for this model. Only
    /// narrows; re-widening requires [`ModelRegistry::record_probe`].
    pub fn record_unsupported(&self, model: &str, kind: ParamKind, raw_error: &str) {
        let mut entry = self.capabilities.entry(model.to_string()).or_default();
        match kind {
            ParamKind::Temperature => entry.supports_custom_temperature = false,
            ParamKind::MaxTokens => entry.requires_max_completion_tokens = true,
            ParamKind::ResponseFormat => entry.supports_json_mode = false,
        }
        entry.last_observed_error = Some(raw_error.chars().take(500).collect());
        entry.updated_at = Utc::now();
        info!(model, ?kind, "model capability narrowed");
    }

    /// Explicit probe result; the only path that may widen a capability.
    pub fn record_probe(&self, model: &str, caps: ModelCapabilities) {
        self.capabilities.insert(model.to_string(), caps);
    }

    /// Snapshot of every learned entry, for persistence and health output.
    pub fn all(&self) -> Vec<(String, ModelCapabilities)> {
        self.capabilities
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Merge persisted knowledge loaded on startup. Narrowed capabilities in
    /// storage win over the optimistic defaults.
    pub fn absorb(&self, entries: Vec<(String, ModelCapabilities)>) {
        for (model, caps) in entries {
            self.capabilities.insert(model, caps);
        }
    }

    /// Classify a provider error message into a narrowable parameter.
    pub fn classify_unsupported(message: &str) -> Option<ParamKind> {
        let lower = message.to_lowercase();
        if !(lower.contains("unsupported parameter")
            || lower.contains("unsupported value")
            || lower.contains("is not supported")
            || lower.contains("does not support"))
        {
            return None;
        }
        if lower.contains("temperature") {
            Some(ParamKind::Temperature)
        } else if lower.contains("max_tokens") || lower.contains("max_completion_tokens") {
            Some(ParamKind::MaxTokens)
        } else if lower.contains("response_format") || lower.contains("json_schema") {
            Some(ParamKind::ResponseFormat)
        } else {
            warn!(message = %message, "unclassifiable unsupported-parameter error");
            None
        }
    }
}

/// Built-in routing defaults: (model, temperature, max_tokens) per task.
fn default_route(task: &str) -> (&'static str, f32, u32) {
    match task {
        "reply" => ("gpt-4o-mini", 0.3, 400),
        "analyzer" => ("gpt-4o-mini", 0.0, 300),
        "generator" => ("gpt-4o", 0.4, 500),
        "validator" => ("gpt-4o-mini", 0.0, 200),
        "summarizer" => ("gpt-4o-mini", 0.2, 600),
        "schema_analyzer" => ("gpt-4o", 0.0, 800),
        _ => ("gpt-4o-mini", 0.3, 400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_override_beats_default() {
        let registry = ModelRegistry::new();
        assert_eq!(registry.params_for("reply").source, "default");

        let mut table = RoutingTable::new();
        table.insert(
            "reply".to_string(),
            RouteOverride {
                model: "gpt-4o".to_string(),
                temperature: Some(0.1),
                max_tokens: None,
            },
        );
        registry.update_routing(table);

        let params = registry.params_for("reply");
        assert_eq!(params.model, "gpt-4o");
        assert_eq!(params.source, "routing");
        assert_eq!(params.max_tokens, None);
    }

    #[test]
    fn narrowing_is_one_way() {
        let registry = ModelRegistry::new();
        assert!(registry.supports_custom_temperature("gpt-4o-mini"));

        registry.record_unsupported(
            "gpt-4o-mini",
            ParamKind::Temperature,
            "Unsupported parameter: temperature",
        );
        assert!(!registry.supports_custom_temperature("gpt-4o-mini"));

        // A second unrelated narrowing keeps the first.
        registry.record_unsupported("gpt-4o-mini", ParamKind::MaxTokens, "use max_completion_tokens");
        assert!(!registry.supports_custom_temperature("gpt-4o-mini"));
        assert!(registry.requires_max_completion_tokens("gpt-4o-mini"));
    }

    #[test]
    fn probe_may_widen() {
        let registry = ModelRegistry::new();
        registry.record_unsupported("m", ParamKind::ResponseFormat, "no json_schema");
        assert!(!registry.supports_json_mode("m"));

        registry.record_probe("m", ModelCapabilities::default());
        assert!(registry.supports_json_mode("m"));
    }

    #[test]
    fn seeded_reasoning_models_are_narrowed() {
        let registry = ModelRegistry::new();
        assert!(!registry.supports_custom_temperature("o3-mini"));
        assert!(registry.requires_max_completion_tokens("o1"));
    }

    #[test]
    fn error_classification() {
        assert_eq!(
            ModelRegistry::classify_unsupported("Unsupported parameter: 'temperature'"),
            Some(ParamKind::Temperature)
        );
        assert_eq!(
            ModelRegistry::classify_unsupported(
                "Unsupported parameter: 'max_tokens'. Use 'max_completion_tokens' instead."
            ),
            Some(ParamKind::MaxTokens)
        );
        assert_eq!(
            ModelRegistry::classify_unsupported("response_format is not supported"),
            Some(ParamKind::ResponseFormat)
        );
        assert_eq!(ModelRegistry::classify_unsupported("quota exceeded"), None);
    }
}
