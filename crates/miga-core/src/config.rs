use std::collections::HashMap;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Top-level config (miga.toml + MIGA_* env overrides + documented flat vars).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MigaConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embeddings: EmbeddingsConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub confighub: ConfigHubConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub actions: ActionsConfig,
}

/// Which subsystems this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// HTTP surface only; jobs are enqueued for a separate worker.
    Web,
    /// Queue consumers and background schedulers only.
    Worker,
    /// Everything in one process.
    Both,
}

impl Default for RunMode {
    fn default() -> Self {
        RunMode::Both
    }
}

impl std::str::FromStr for RunMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "web" => Ok(RunMode::Web),
            "worker" => Ok(RunMode::Worker),
            "both" => Ok(RunMode::Both),
            other => Err(format!("unknown run mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// HMAC shared secret for the chat webhook. Unset = verification bypassed
    /// (development mode).
    pub shared_secret: Option<String>,
    /// Bearer token guarding /internal and /admin routes.
    pub admin_token: Option<String>,
    #[serde(default)]
    pub run_mode: RunMode,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            shared_secret: None,
            admin_token: None,
            run_mode: RunMode::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_url")]
    pub url: String,
    /// Per-component pool caps. The sum must stay under the provider's
    /// connection ceiling.
    #[serde(default = "default_pool_max")]
    pub vector_pool_max: u32,
    #[serde(default = "default_pool_max")]
    pub memory_pool_max: u32,
    #[serde(default = "default_small_pool_max")]
    pub queue_pool_max: u32,
    #[serde(default = "default_small_pool_max")]
    pub actions_pool_max: u32,
    #[serde(default = "default_small_pool_max")]
    pub knowledge_pool_max: u32,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_db_url(),
            vector_pool_max: default_pool_max(),
            memory_pool_max: default_pool_max(),
            queue_pool_max: default_small_pool_max(),
            actions_pool_max: default_small_pool_max(),
            knowledge_pool_max: default_small_pool_max(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    /// Retries per call when the provider rejects a parameter the routing
    /// registry believed was supported.
    #[serde(default = "default_llm_max_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_llm_base_url(),
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_llm_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: u32,
    /// Falls back to `llm.api_key` when unset.
    pub api_key: Option<String>,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dimensions: default_embedding_dimensions(),
            api_key: None,
            base_url: default_llm_base_url(),
            timeout_secs: default_embedding_timeout_secs(),
            cache_max_entries: default_cache_max_entries(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    /// Default cosine-similarity floor when no per-category value applies.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_max_results")]
    pub max_results: i64,
    #[serde(default = "default_hnsw_m")]
    pub hnsw_m: u32,
    #[serde(default = "default_hnsw_ef_construction")]
    pub hnsw_ef_construction: u32,
    /// Per-category similarity floors (branch and product are stricter/looser
    /// than the default on purpose).
    #[serde(default = "default_category_thresholds")]
    pub category_thresholds: HashMap<String, f32>,
    /// A response containing any of these substrings is never cached.
    #[serde(default = "default_error_patterns")]
    pub error_patterns: Vec<String>,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            max_results: default_max_results(),
            hnsw_m: default_hnsw_m(),
            hnsw_ef_construction: default_hnsw_ef_construction(),
            category_thresholds: default_category_thresholds(),
            error_patterns: default_error_patterns(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl VectorConfig {
    /// Similarity floor for a category, falling back to the global default.
    pub fn threshold_for(&self, category: &str) -> f32 {
        self.category_thresholds
            .get(category)
            .copied()
            .unwrap_or(self.similarity_threshold)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_max_recent_messages")]
    pub max_recent_messages: i64,
    /// Messages older than this are eligible for summarization.
    #[serde(default = "default_summarize_after_ms")]
    pub summarize_after_ms: u64,
    #[serde(default = "default_cycle_interval_ms")]
    pub cycle_interval_ms: u64,
    #[serde(default = "default_min_messages_for_summary")]
    pub min_messages_for_summary: i64,
    #[serde(default = "default_max_conversations_per_cycle")]
    pub max_conversations_per_cycle: i64,
    #[serde(default = "default_max_messages_per_summary")]
    pub max_messages_per_summary: i64,
    #[serde(default = "default_max_summaries_in_context")]
    pub max_summaries_in_context: i64,
    #[serde(default = "default_fact_similarity_threshold")]
    pub fact_similarity_threshold: f32,
    #[serde(default = "default_fact_limit")]
    pub fact_limit: i64,
    #[serde(default = "default_true")]
    pub extract_facts: bool,
    /// Whether system messages are visible to the summarizer.
    #[serde(default)]
    pub summarize_include_system: bool,
    /// Summarized rows older than this many days may be deleted.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_recent_messages: default_max_recent_messages(),
            summarize_after_ms: default_summarize_after_ms(),
            cycle_interval_ms: default_cycle_interval_ms(),
            min_messages_for_summary: default_min_messages_for_summary(),
            max_conversations_per_cycle: default_max_conversations_per_cycle(),
            max_messages_per_summary: default_max_messages_per_summary(),
            max_summaries_in_context: default_max_summaries_in_context(),
            fact_similarity_threshold: default_fact_similarity_threshold(),
            fact_limit: default_fact_limit(),
            extract_facts: true,
            summarize_include_system: false,
            retention_days: default_retention_days(),
        }
    }
}

/// Which reply flow handles a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowMode {
    Optimized,
    Legacy,
}

impl Default for FlowMode {
    fn default() -> Self {
        FlowMode::Optimized
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub mode: FlowMode,
    /// Fraction of requests routed to the optimized flow when mode=optimized.
    #[serde(default = "default_optimized_ratio")]
    pub optimized_ratio: f64,
    #[serde(default = "default_cache_similarity_threshold")]
    pub cache_similarity_threshold: f32,
    #[serde(default = "default_canned_similarity_threshold")]
    pub canned_similarity_threshold: f32,
    #[serde(default = "default_max_history")]
    pub max_history: i64,
    #[serde(default = "default_true")]
    pub skip_validator: bool,
    #[serde(default)]
    pub max_revisions: u32,
    #[serde(default = "default_context_max_chars")]
    pub context_max_chars: usize,
    #[serde(default = "default_history_max_chars")]
    pub history_max_chars: usize,
    /// Replies may not volunteer a switch to these channels unless the user
    /// mentioned them first or a human handoff was signalled.
    #[serde(default = "default_blocked_channel_hints")]
    pub blocked_channel_hints: Vec<String>,
    /// Minimum confidence before an AI reply is written to the semantic cache.
    #[serde(default = "default_cache_min_confidence")]
    pub cache_min_confidence: f64,
    #[serde(default = "default_cache_ttl_secs_pipeline")]
    pub cache_entry_ttl_secs: i64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: FlowMode::default(),
            optimized_ratio: default_optimized_ratio(),
            cache_similarity_threshold: default_cache_similarity_threshold(),
            canned_similarity_threshold: default_canned_similarity_threshold(),
            max_history: default_max_history(),
            skip_validator: true,
            max_revisions: 0,
            context_max_chars: default_context_max_chars(),
            history_max_chars: default_history_max_chars(),
            blocked_channel_hints: default_blocked_channel_hints(),
            cache_min_confidence: default_cache_min_confidence(),
            cache_entry_ttl_secs: default_cache_ttl_secs_pipeline(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
    #[serde(default = "default_queue_max_attempts")]
    pub max_attempts: i32,
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: i64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Bounded-concurrency cap for cooperative local work (outbound fan-out).
    #[serde(default = "default_local_concurrency")]
    pub local_concurrency: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: default_queue_workers(),
            capacity: default_queue_capacity(),
            max_attempts: default_queue_max_attempts(),
            visibility_timeout_secs: default_visibility_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            local_concurrency: default_local_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigHubConfig {
    pub spreadsheet_id: Option<String>,
    pub api_key: Option<String>,
    #[serde(default = "default_sheets_base_url")]
    pub base_url: String,
    #[serde(default = "default_sync_interval_minutes")]
    pub sync_interval_minutes: u64,
    /// When true, an LLM schema analyzer classifies raw tabs instead of the
    /// hardcoded projection.
    #[serde(default)]
    pub auto_discover: bool,
    #[serde(default = "default_projection_ttl_secs")]
    pub projection_ttl_secs: i64,
    #[serde(default = "default_canned_ttl_secs")]
    pub canned_ttl_secs: i64,
}

impl Default for ConfigHubConfig {
    fn default() -> Self {
        Self {
            spreadsheet_id: None,
            api_key: None,
            base_url: default_sheets_base_url(),
            sync_interval_minutes: default_sync_interval_minutes(),
            auto_discover: false,
            projection_ttl_secs: default_projection_ttl_secs(),
            canned_ttl_secs: default_canned_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_chat_base_url")]
    pub base_url: String,
    pub api_token: Option<String>,
    #[serde(default = "default_chat_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: default_chat_base_url(),
            api_token: None,
            timeout_secs: default_chat_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionsConfig {
    #[serde(default = "default_execute_timeout_secs")]
    pub execute_timeout_secs: u64,
    #[serde(default = "default_action_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_draft_expiry_hours")]
    pub draft_expiry_hours: i64,
    #[serde(default = "default_approval_expiry_hours")]
    pub approval_expiry_hours: i64,
    /// Per-action-type daily caps; `default_daily_limit` applies otherwise.
    #[serde(default)]
    pub daily_limits: HashMap<String, i64>,
    #[serde(default = "default_daily_limit")]
    pub default_daily_limit: i64,
    #[serde(default = "default_expiry_sweep_interval_secs")]
    pub expiry_sweep_interval_secs: u64,
    /// Write endpoint for sheet-append actions (the values API is read-only).
    pub sheet_write_url: Option<String>,
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            execute_timeout_secs: default_execute_timeout_secs(),
            max_retries: default_action_max_retries(),
            draft_expiry_hours: default_draft_expiry_hours(),
            approval_expiry_hours: default_approval_expiry_hours(),
            daily_limits: HashMap::new(),
            default_daily_limit: default_daily_limit(),
            expiry_sweep_interval_secs: default_expiry_sweep_interval_secs(),
            sheet_write_url: None,
        }
    }
}

impl MigaConfig {
    /// Load config from a TOML file with MIGA_* env overrides, then apply the
    /// documented flat environment variables (DATABASE_URL, SHARED_SECRET, …)
    /// which take precedence over both.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let mut config: MigaConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("MIGA_").split("__"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        config.apply_flat_env();
        Ok(config)
    }

    /// Overrides from the flat, documented environment names.
    fn apply_flat_env(&mut self) {
        fn var(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.is_empty())
        }
        fn parse<T: std::str::FromStr>(name: &str) -> Option<T> {
            var(name).and_then(|v| v.parse().ok())
        }

        if let Some(v) = var("DATABASE_URL") {
            self.database.url = v;
        }
        if let Some(v) = var("LLM_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = var("EMBEDDING_MODEL") {
            self.embeddings.model = v;
        }
        if let Some(v) = parse("EMBEDDING_DIMENSIONS") {
            self.embeddings.dimensions = v;
        }
        if let Some(v) = parse("VECTOR_SIMILARITY_THRESHOLD") {
            self.vector.similarity_threshold = v;
        }
        if let Some(v) = parse("VECTOR_MAX_RESULTS") {
            self.vector.max_results = v;
        }
        if let Some(v) = parse("HNSW_M") {
            self.vector.hnsw_m = v;
        }
        if let Some(v) = parse("HNSW_EF_CONSTRUCTION") {
            self.vector.hnsw_ef_construction = v;
        }
        if let Some(v) = parse("MEMORY_MAX_RECENT_MESSAGES") {
            self.memory.max_recent_messages = v;
        }
        if let Some(v) = parse("MEMORY_SUMMARIZE_AFTER_MS") {
            self.memory.summarize_after_ms = v;
        }
        if let Some(v) = parse("MEMORY_CYCLE_INTERVAL_MS") {
            self.memory.cycle_interval_ms = v;
        }
        if let Some(v) = var("OPTIMIZED_AGENTIC_FLOW") {
            self.pipeline.mode = if v == "true" || v == "1" {
                FlowMode::Optimized
            } else {
                FlowMode::Legacy
            };
        }
        if let Some(v) = parse("AB_OPTIMIZED_RATIO") {
            self.pipeline.optimized_ratio = v;
        }
        if let Some(v) = parse("CACHE_SIMILARITY_THRESHOLD") {
            self.pipeline.cache_similarity_threshold = v;
        }
        if let Some(v) = parse("CANNED_SIMILARITY_THRESHOLD") {
            self.pipeline.canned_similarity_threshold = v;
        }
        if let Some(v) = parse("MAX_CONVERSATION_HISTORY") {
            self.pipeline.max_history = v;
        }
        if let Some(v) = var("SKIP_RESPONSE_VALIDATOR") {
            self.pipeline.skip_validator = v == "true" || v == "1";
        }
        if let Some(v) = parse("MAX_RESPONSE_REVISIONS") {
            self.pipeline.max_revisions = v;
        }
        if let Some(v) = parse::<RunMode>("RUN_MODE") {
            self.gateway.run_mode = v;
        }
        if let Some(v) = parse("LOCAL_QUEUE_CONCURRENCY") {
            self.queue.local_concurrency = v;
        }
        if let Some(v) = var("SHARED_SECRET") {
            self.gateway.shared_secret = Some(v);
        }
        if let Some(v) = var("ADMIN_TOKEN") {
            self.gateway.admin_token = Some(v);
        }
    }
}

fn default_port() -> u16 {
    8787
}
fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_db_url() -> String {
    "postgres://localhost/miga".to_string()
}
fn default_pool_max() -> u32 {
    8
}
fn default_small_pool_max() -> u32 {
    5
}
fn default_connect_timeout_secs() -> u64 {
    5
}
fn default_llm_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    30
}
fn default_llm_max_retries() -> u32 {
    2
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_embedding_dimensions() -> u32 {
    1536
}
fn default_embedding_timeout_secs() -> u64 {
    10
}
fn default_cache_max_entries() -> usize {
    2048
}
fn default_cache_ttl_secs() -> u64 {
    3600
}
fn default_similarity_threshold() -> f32 {
    0.75
}
fn default_max_results() -> i64 {
    5
}
fn default_hnsw_m() -> u32 {
    16
}
fn default_hnsw_ef_construction() -> u32 {
    64
}
fn default_category_thresholds() -> HashMap<String, f32> {
    HashMap::from([("branch".to_string(), 0.80), ("product".to_string(), 0.75)])
}
fn default_error_patterns() -> Vec<String> {
    [
        "disculpa, tuve un problema",
        "intenta de nuevo",
        "lo siento, no pude",
        "sorry, something went wrong",
        "please try again",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn default_cleanup_interval_secs() -> u64 {
    3600
}
fn default_max_recent_messages() -> i64 {
    10
}
fn default_summarize_after_ms() -> u64 {
    3_600_000
}
fn default_cycle_interval_ms() -> u64 {
    1_800_000
}
fn default_min_messages_for_summary() -> i64 {
    6
}
fn default_max_conversations_per_cycle() -> i64 {
    10
}
fn default_max_messages_per_summary() -> i64 {
    50
}
fn default_max_summaries_in_context() -> i64 {
    3
}
fn default_fact_similarity_threshold() -> f32 {
    0.70
}
fn default_fact_limit() -> i64 {
    5
}
fn default_retention_days() -> i64 {
    90
}
fn default_optimized_ratio() -> f64 {
    1.0
}
fn default_cache_similarity_threshold() -> f32 {
    0.85
}
fn default_canned_similarity_threshold() -> f32 {
    0.90
}
fn default_max_history() -> i64 {
    6
}
fn default_context_max_chars() -> usize {
    4000
}
fn default_history_max_chars() -> usize {
    2000
}
fn default_blocked_channel_hints() -> Vec<String> {
    vec!["whatsapp".to_string()]
}
fn default_cache_min_confidence() -> f64 {
    0.5
}
fn default_cache_ttl_secs_pipeline() -> i64 {
    86_400
}
fn default_queue_workers() -> usize {
    4
}
fn default_queue_capacity() -> usize {
    256
}
fn default_queue_max_attempts() -> i32 {
    3
}
fn default_visibility_timeout_secs() -> i64 {
    120
}
fn default_poll_interval_ms() -> u64 {
    500
}
fn default_local_concurrency() -> usize {
    3
}
fn default_sheets_base_url() -> String {
    "https://sheets.googleapis.com".to_string()
}
fn default_sync_interval_minutes() -> u64 {
    5
}
fn default_projection_ttl_secs() -> i64 {
    86_400
}
fn default_canned_ttl_secs() -> i64 {
    604_800
}
fn default_chat_base_url() -> String {
    "https://app.chatwoot.com".to_string()
}
fn default_chat_timeout_secs() -> u64 {
    10
}
fn default_execute_timeout_secs() -> u64 {
    30
}
fn default_action_max_retries() -> u32 {
    3
}
fn default_draft_expiry_hours() -> i64 {
    24
}
fn default_approval_expiry_hours() -> i64 {
    48
}
fn default_daily_limit() -> i64 {
    50
}
fn default_expiry_sweep_interval_secs() -> u64 {
    300
}
fn default_true() -> bool {
    true
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.miga/miga.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = MigaConfig::default();
        assert_eq!(cfg.pipeline.mode, FlowMode::Optimized);
        assert!(cfg.pipeline.cache_similarity_threshold < cfg.pipeline.canned_similarity_threshold);
        assert_eq!(cfg.vector.threshold_for("branch"), 0.80);
        assert_eq!(cfg.vector.threshold_for("faq"), cfg.vector.similarity_threshold);
        assert_eq!(cfg.queue.max_attempts, 3);
        assert_eq!(cfg.gateway.run_mode, RunMode::Both);
    }

    #[test]
    fn run_mode_parses() {
        assert_eq!("web".parse::<RunMode>().unwrap(), RunMode::Web);
        assert_eq!("WORKER".parse::<RunMode>().unwrap(), RunMode::Worker);
        assert!("other".parse::<RunMode>().is_err());
    }
}
