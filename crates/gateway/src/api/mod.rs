pub mod middleware;
pub mod permissions;
pub mod rate_limits;
pub mod ws;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};

use crate::state::AppState;

/// Build the full API router. The rate-limit middleware wraps every
/// route; only the `RATE_LIMITED_PREFIXES` actually consume quota.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        // Chat/query intake — the rate-limited surface. Execution is
        // handed to agent workers; this endpoint only admits.
        .route("/api/v1/query", post(accept_query))
        .route("/api/v1/conversation/:conversation_id", post(accept_query))
        // Rate-limit introspection
        .route("/api/v1/rate-limits/status", get(rate_limits::status))
        .route("/api/v1/rate-limits/cache/clear", post(rate_limits::clear_cache))
        .route("/api/v1/queue/status", get(rate_limits::queue_status))
        // Permission broker
        .route(
            "/api/v1/permissions/:session_id/request",
            post(permissions::request),
        )
        .route(
            "/api/v1/permissions/:session_id/respond",
            post(permissions::respond),
        )
        .route(
            "/api/v1/permissions/:session_id/pending",
            get(permissions::pending),
        )
        .route(
            "/api/v1/permissions/:session_id/rules",
            get(permissions::rules).delete(permissions::clear_rules),
        )
        .route(
            "/api/v1/permissions/:session_id/requests/:request_id",
            delete(permissions::cancel),
        )
        .route(
            "/api/v1/permissions/:session_id/requests",
            delete(permissions::cancel_session),
        )
        // Event fan-out
        .route("/ws/events", get(ws::events_ws))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit,
        ))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Accept an admitted chat/query request.
///
/// The middleware has already consumed quota by the time this runs; the
/// body is passed through to whatever worker pool the deployment wires
/// up, so here it is just acknowledged.
async fn accept_query(
    State(_state): State<AppState>,
    body: Option<Json<serde_json::Value>>,
) -> impl IntoResponse {
    let payload = body.map(|Json(value)| value).unwrap_or_default();
    Json(serde_json::json!({
        "status": "accepted",
        "request": payload,
    }))
}
