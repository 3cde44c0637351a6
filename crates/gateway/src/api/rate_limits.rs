//! Rate-limit status endpoints.
//!
//! - `GET  /api/v1/rate-limits/status` — caller's counters + queue rank
//! - `POST /api/v1/rate-limits/cache/clear` — invalidate the config cache
//! - `GET  /api/v1/queue/status` — queue size + caller's position

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;

use crate::identity::extract_identity;
use crate::state::AppState;

pub async fn status(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let identity = extract_identity(state.store.as_ref(), &headers, None);
    let snapshot = state
        .admission
        .snapshot(&identity.principal, identity.is_admin);
    let position = state.queue().position(&identity.principal);

    Json(serde_json::json!({
        "principal": identity.principal.key(),
        "is_admin": identity.is_admin,
        "limits": snapshot,
        "queue": position,
    }))
}

/// Invalidate every cached per-principal limit config. Called after
/// limit rows change in the store.
pub async fn clear_cache(State(state): State<AppState>) -> impl IntoResponse {
    state.limiter().clear_cache();
    tracing::info!("rate-limit config cache cleared");
    Json(serde_json::json!({ "cleared": true }))
}

pub async fn queue_status(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let identity = extract_identity(state.store.as_ref(), &headers, None);
    let position = state.queue().position(&identity.principal);

    Json(serde_json::json!({
        "size": state.queue().size(),
        "position": position,
    }))
}
