use std::sync::Arc;
use std::time::Instant;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use miga_actions::ActionBus;
use miga_confighub::ConfigHub;
use miga_core::config::MigaConfig;
use miga_llm::{LlmClient, ModelRegistry};
use miga_memory::ConversationStore;
use miga_queue::WorkQueue;
use miga_vector::VectorStore;

/// Shared state handed to every Axum handler as Arc<AppState>.
pub struct AppState {
    pub config: MigaConfig,
    pub hub: Arc<ConfigHub>,
    pub vector: Arc<VectorStore>,
    pub memory: Arc<ConversationStore>,
    pub queue: Arc<WorkQueue>,
    pub llm: Arc<LlmClient>,
    pub registry: Arc<ModelRegistry>,
    pub actions: Arc<ActionBus>,
    pub knowledge_pool: Option<sqlx::PgPool>,
    pub started_at: Instant,
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/chat/webhook", post(crate::http::webhook::webhook_handler))
        .route("/health", get(crate::http::health::health_handler))
        .route("/health/vector", get(crate::http::health::vector_health_handler))
        .route("/health/models", get(crate::http::health::models_health_handler))
        .route(
            "/internal/config/refresh",
            post(crate::http::admin::config_refresh_handler),
        )
        .route(
            "/admin/models/probe/{model}",
            post(crate::http::admin::probe_model_handler),
        )
        .route("/admin/models/sync", post(crate::http::admin::sync_models_handler))
        .route(
            "/admin/actions/{id}/approve",
            post(crate::http::admin::approve_action_handler),
        )
        .route(
            "/admin/actions/{id}/confirm",
            post(crate::http::admin::confirm_action_handler),
        )
        .route(
            "/admin/actions/{id}/reject",
            post(crate::http::admin::reject_action_handler),
        )
        .route(
            "/admin/actions/{id}/cancel",
            post(crate::http::admin::cancel_action_handler),
        )
        .route(
            "/admin/actions/{id}/2fa",
            post(crate::http::admin::verify_action_handler),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
