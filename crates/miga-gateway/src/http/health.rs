use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health: liveness plus a summary of the moving parts.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let snapshot = state.hub.current();
    let queue_depth = state.queue.depth().await;

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "run_mode": format!("{:?}", state.config.gateway.run_mode).to_lowercase(),
        "config": {
            "snapshot_version": snapshot.version,
            "is_fallback": snapshot.is_fallback,
            "branches": snapshot.branches.len(),
            "products": snapshot.products.len(),
        },
        "queue": {
            "durable": state.queue.is_durable(),
            "depth": queue_depth.map(|(ready, running, dead)| json!({
                "ready": ready, "running": running, "dead": dead,
            })),
        },
    }))
}

/// GET /health/vector: store reachability and per-category counts.
pub async fn vector_health_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match state.vector.stats().await {
        Ok(stats) => Ok(Json(json!({
            "status": "ok",
            "documents": stats.total_documents,
            "total_hits": stats.total_hits,
            "avg_hits": stats.avg_hits,
            "cache_entries": stats.cache_entries,
            "categories": stats.categories,
        }))),
        Err(e) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "unavailable", "error": e.to_string()})),
        )),
    }
}

/// GET /health/models: routing resolution plus learned capabilities.
pub async fn models_health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let tasks = ["reply", "analyzer", "generator", "validator", "summarizer"];
    let routing: Vec<Value> = tasks
        .iter()
        .map(|task| {
            let params = state.registry.params_for(task);
            json!({
                "task": task,
                "model": params.model,
                "temperature": params.temperature,
                "max_tokens": params.max_tokens,
                "source": params.source,
            })
        })
        .collect();

    let capabilities: Vec<Value> = state
        .registry
        .all()
        .into_iter()
        .map(|(model, caps)| {
            json!({
                "model": model,
                "supports_custom_temperature": caps.supports_custom_temperature,
                "requires_max_completion_tokens": caps.requires_max_completion_tokens,
                "supports_json_mode": caps.supports_json_mode,
                "updated_at": caps.updated_at,
            })
        })
        .collect();

    Json(json!({
        "status": "ok",
        "routing": routing,
        "capabilities": capabilities,
    }))
}
