//! HTTP route handlers for the control API.
//!
//! The backend dispatches tasks to this agent by POSTing them here; the same
//! surface exposes uniqueness application, proxy installation and stats.

use std::sync::Arc;

use axum::{
    extract::{Extension, Json},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use tracing::info;

use crate::task::Task;
use crate::uniqueness::UniquenessConfig;
use crate::AgentConfig;
use crate::AppState;

/// JSON error response helper
fn err_response(status: StatusCode, msg: &str) -> impl IntoResponse {
    (status, Json(serde_json::json!({ "error": msg })))
}

/// Build the API router with all endpoints.
pub fn api_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Config
        .route("/config", get(get_config).post(configure))
        // Tasks
        .route("/task", post(execute_task))
        .route("/task/cancel", post(cancel_task))
        .route("/task/status", get(get_task_status))
        // Stats
        .route("/stats", get(get_stats))
        // Uniqueness
        .route("/uniqueness", post(apply_uniqueness))
        // Proxy
        .route("/proxy/apply", post(apply_proxy))
        .route("/proxy/clear", post(clear_proxy))
        .route("/proxy/active", get(get_active_proxy))
        // Logs
        .route("/logs/dir", get(get_log_dir))
        // Auth middleware (only if DROID_AGENT_WEB_PASS is set)
        .layer(middleware::from_fn(super::auth::basic_auth_middleware))
        .layer(Extension(state))
}

// ========== Config Handlers ==========

async fn get_config(
    Extension(state): Extension<Arc<AppState>>,
) -> impl IntoResponse {
    let config = state.config.read().await.clone();
    Json(config)
}

async fn configure(
    Extension(state): Extension<Arc<AppState>>,
    Json(config): Json<AgentConfig>,
) -> impl IntoResponse {
    info!("Configuring agent via web API");
    state.configure(config).await;
    StatusCode::OK
}

// ========== Task Handlers ==========

async fn execute_task(
    Extension(state): Extension<Arc<AppState>>,
    Json(task): Json<Task>,
) -> impl IntoResponse {
    if state.orchestrator.is_executing() {
        return err_response(StatusCode::CONFLICT, "a task is already executing").into_response();
    }

    info!("Task {} dispatched via web API", task.id);
    let result = state.orchestrator.execute(task).await;

    // The atomic check inside execute is authoritative; a racing dispatch
    // still comes back as a rejection
    let status = if result.error.as_deref() == Some("a task is already executing") {
        StatusCode::CONFLICT
    } else {
        StatusCode::OK
    };

    (status, Json(result)).into_response()
}

async fn cancel_task(
    Extension(state): Extension<Arc<AppState>>,
) -> impl IntoResponse {
    info!("Task cancellation requested via web API");
    state.orchestrator.cancel().await;
    StatusCode::OK
}

async fn get_task_status(
    Extension(state): Extension<Arc<AppState>>,
) -> impl IntoResponse {
    Json(serde_json::json!({
        "executing": state.orchestrator.is_executing(),
        "stats": state.stats.snapshot(),
    }))
}

// ========== Stats Handlers ==========

async fn get_stats(
    Extension(state): Extension<Arc<AppState>>,
) -> impl IntoResponse {
    Json(state.stats.snapshot())
}

// ========== Uniqueness Handlers ==========

async fn apply_uniqueness(
    Extension(state): Extension<Arc<AppState>>,
    Json(config): Json<UniquenessConfig>,
) -> impl IntoResponse {
    info!("Uniqueness application requested via web API");
    state.stats.record_uniqueness_run();
    let result = state.uniqueness.apply(&config).await;
    Json(result)
}

// ========== Proxy Handlers ==========

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApplyProxyRequest {
    proxy: String,
}

async fn apply_proxy(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<ApplyProxyRequest>,
) -> impl IntoResponse {
    info!("Proxy installation requested via web API");
    match state.correlator.apply_from_proxy(&req.proxy).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => err_response(StatusCode::BAD_REQUEST, &e.to_string()).into_response(),
    }
}

async fn clear_proxy(
    Extension(state): Extension<Arc<AppState>>,
) -> impl IntoResponse {
    info!("Proxy removal requested via web API");
    state.correlator.clear_proxy().await;
    StatusCode::OK
}

async fn get_active_proxy(
    Extension(state): Extension<Arc<AppState>>,
) -> impl IntoResponse {
    // Credentials stay on the device
    Json(state.proxies.active().map(|spec| {
        serde_json::json!({
            "scheme": spec.scheme,
            "address": spec.address(),
            "authenticated": spec.has_auth(),
        })
    }))
}

// ========== Log Handlers ==========

async fn get_log_dir() -> impl IntoResponse {
    match crate::log_dir() {
        Some(p) => Json(serde_json::json!({ "path": p.to_string_lossy() })).into_response(),
        None => err_response(StatusCode::INTERNAL_SERVER_ERROR, "Could not determine log directory").into_response(),
    }
}
