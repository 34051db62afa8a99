//! Admin surface: config refresh, model probing/sync, and the action-bus
//! approval endpoints. Everything here requires the admin bearer token.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use miga_actions::ActionError;
use miga_confighub::projection;
use miga_llm::knowledge;

use crate::app::AppState;

type ApiError = (StatusCode, Json<Value>);

fn check_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = state.config.gateway.admin_token.as_deref() else {
        return Err((
            StatusCode::FORBIDDEN,
            Json(json!({"error": "admin token not configured"})),
        ));
    };
    let presented = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if presented == Some(expected) {
        Ok(())
    } else {
        warn!("admin request with missing or wrong bearer token");
        Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "unauthorized"})),
        ))
    }
}

/// POST /internal/config/refresh: force a sheet refresh and reprojection.
pub async fn config_refresh_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    check_admin(&state, &headers)?;

    let snapshot = state.hub.refresh().await;
    state.registry.update_routing(snapshot.model_routing.clone());

    let projected = if state.config.confighub.auto_discover {
        projection::project_auto(
            &snapshot,
            state.hub.last_raw(),
            state.llm.as_ref(),
            &state.vector,
            &state.config.confighub,
        )
        .await
    } else {
        projection::project(&snapshot, &state.vector, &state.config.confighub).await
    };

    match projected {
        Ok(written) => Ok(Json(json!({
            "ok": true,
            "snapshot_version": snapshot.version,
            "is_fallback": snapshot.is_fallback,
            "projected_documents": written,
        }))),
        Err(e) => {
            warn!(error = %e, "projection failed after manual refresh");
            Ok(Json(json!({
                "ok": true,
                "snapshot_version": snapshot.version,
                "is_fallback": snapshot.is_fallback,
                "projection_error": e.to_string(),
            })))
        }
    }
}

/// POST /admin/models/probe/{model}: eager capability discovery.
pub async fn probe_model_handler(
    State(state): State<Arc<AppState>>,
    Path(model): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    check_admin(&state, &headers)?;

    match state.llm.probe(&model).await {
        Ok(caps) => {
            info!(model = %model, "manual model probe complete");
            Ok(Json(json!({
                "model": model,
                "supports_custom_temperature": caps.supports_custom_temperature,
                "requires_max_completion_tokens": caps.requires_max_completion_tokens,
                "supports_json_mode": caps.supports_json_mode,
            })))
        }
        Err(e) => Err((
            StatusCode::BAD_GATEWAY,
            Json(json!({"error": e.to_string()})),
        )),
    }
}

/// POST /admin/models/sync: persist in-memory capability knowledge.
pub async fn sync_models_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    check_admin(&state, &headers)?;

    let Some(pool) = &state.knowledge_pool else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "model knowledge store unavailable"})),
        ));
    };
    let entries = state.registry.all();
    match knowledge::persist_all(pool, &entries).await {
        Ok(written) => Ok(Json(json!({"ok": true, "models_synced": written}))),
        Err(e) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": e.to_string()})),
        )),
    }
}

// ── Action-bus lifecycle ──────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ActorBody {
    pub user: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct CodeBody {
    pub code: String,
}

fn parse_action_id(id: &str) -> Result<Uuid, ApiError> {
    id.parse().map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid action id"})),
        )
    })
}

fn action_error(e: ActionError) -> ApiError {
    let status = match &e {
        ActionError::NotFound(_) | ActionError::UnknownActionType(_) => StatusCode::NOT_FOUND,
        ActionError::IllegalTransition { .. } => StatusCode::CONFLICT,
        ActionError::InvalidCode => StatusCode::UNAUTHORIZED,
        ActionError::LimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
        ActionError::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(json!({"error": e.to_string()})))
}

pub async fn approve_action_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ActorBody>,
) -> Result<Json<Value>, ApiError> {
    check_admin(&state, &headers)?;
    let action_id = parse_action_id(&id)?;
    let record = state
        .actions
        .approve(action_id, &body.user)
        .await
        .map_err(action_error)?;
    Ok(Json(json!({"action_id": record.action_id, "state": record.state})))
}

pub async fn confirm_action_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ActorBody>,
) -> Result<Json<Value>, ApiError> {
    check_admin(&state, &headers)?;
    let action_id = parse_action_id(&id)?;
    let record = state
        .actions
        .confirm(action_id, &body.user)
        .await
        .map_err(action_error)?;
    Ok(Json(json!({"action_id": record.action_id, "state": record.state})))
}

pub async fn reject_action_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ActorBody>,
) -> Result<Json<Value>, ApiError> {
    check_admin(&state, &headers)?;
    let action_id = parse_action_id(&id)?;
    let reason = body.reason.unwrap_or_else(|| "rejected by operator".to_string());
    let record = state
        .actions
        .reject(action_id, &body.user, &reason)
        .await
        .map_err(action_error)?;
    Ok(Json(json!({"action_id": record.action_id, "state": record.state})))
}

pub async fn cancel_action_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ActorBody>,
) -> Result<Json<Value>, ApiError> {
    check_admin(&state, &headers)?;
    let action_id = parse_action_id(&id)?;
    let record = state
        .actions
        .cancel(action_id, &body.user)
        .await
        .map_err(action_error)?;
    Ok(Json(json!({"action_id": record.action_id, "state": record.state})))
}

pub async fn verify_action_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<CodeBody>,
) -> Result<Json<Value>, ApiError> {
    check_admin(&state, &headers)?;
    let action_id = parse_action_id(&id)?;
    let record = state
        .actions
        .verify_and_approve(action_id, &body.code)
        .await
        .map_err(action_error)?;
    Ok(Json(json!({"action_id": record.action_id, "state": record.state})))
}
