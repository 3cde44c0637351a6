//! Permission broker endpoints.
//!
//! Agent workers block on `POST .../request` while the frontend answers
//! through `POST .../respond`; the pending/rules routes feed the
//! permission UI and the DELETE routes cancel requests or drop
//! session rules.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use ah_broker::RememberScope;
use ah_domain::store::RuleDecision;

use crate::state::AppState;

fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/v1/permissions/:session_id/request
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct PermissionRequestBody {
    /// Caller-supplied id; generated when absent.
    #[serde(default)]
    pub request_id: Option<String>,
    pub profile_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: serde_json::Value,
}

/// Blocks until the tool use is decided (rule, human, cancel or timeout).
pub async fn request(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<PermissionRequestBody>,
) -> impl IntoResponse {
    let request_id = body
        .request_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let outcome = state
        .broker
        .request(
            &request_id,
            &session_id,
            &body.profile_id,
            &body.tool_name,
            body.tool_input,
            state.events.as_ref(),
        )
        .await;

    Json(serde_json::json!({
        "request_id": request_id,
        "outcome": outcome,
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/v1/permissions/:session_id/respond
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct RespondBody {
    pub request_id: String,
    pub decision: RuleDecision,
    #[serde(default = "remember_none")]
    pub remember: RememberScope,
    #[serde(default)]
    pub pattern: Option<String>,
}

fn remember_none() -> RememberScope {
    RememberScope::None
}

pub async fn respond(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<RespondBody>,
) -> Response {
    match state.broker.respond(
        &body.request_id,
        &session_id,
        body.decision,
        body.remember,
        body.pattern,
        state.events.as_ref(),
    ) {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => api_error(StatusCode::NOT_FOUND, e.to_string()),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Introspection & cancellation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn pending(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    Json(state.broker.pending(&session_id))
}

pub async fn rules(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    Json(state.broker.rules(&session_id))
}

pub async fn clear_rules(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    state.broker.clear_session_rules(&session_id);
    StatusCode::NO_CONTENT
}

pub async fn cancel(
    State(state): State<AppState>,
    Path((session_id, request_id)): Path<(String, String)>,
) -> Response {
    if state.broker.cancel(&request_id, &session_id) {
        Json(serde_json::json!({ "cancelled": true })).into_response()
    } else {
        api_error(StatusCode::NOT_FOUND, "permission request not found")
    }
}

pub async fn cancel_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let cancelled = state.broker.cancel_session(&session_id);
    Json(serde_json::json!({ "cancelled": cancelled }))
}
