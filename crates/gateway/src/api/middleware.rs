//! Rate-limit middleware.
//!
//! Classifies each path: skip paths pass straight through, limited
//! paths are admitted through the admission gateway, and everything
//! else gets informational `X-RateLimit-*` headers without
//! enforcement. The concurrency slot taken by an admitted request is
//! released by a drop guard, so `complete` runs on every exit path —
//! including panics unwinding out of the handler.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::header::{HeaderValue, RETRY_AFTER};
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use ah_admission::{Admission, AdmissionGateway, LimitSnapshot, QueuePosition};
use ah_domain::Principal;

use crate::identity::extract_identity;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Endpoint classification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Paths that never consume quota (health, docs, static assets).
const SKIP_PATHS: &[&str] = &[
    "/health",
    "/api/v1/health",
    "/docs",
    "/redoc",
    "/openapi.json",
    "/favicon.ico",
    "/favicon.svg",
];

const SKIP_PREFIXES: &[&str] = &["/_app/", "/static/"];

/// Expensive endpoints that must pass admission.
const RATE_LIMITED_PREFIXES: &[&str] = &["/api/v1/query", "/api/v1/conversation", "/ws/chat"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointClass {
    /// Passed straight through: no identity lookup, no headers.
    Skip,
    /// Admitted through the gateway.
    Limited,
    /// Headers only, no enforcement.
    Unlimited,
}

pub fn classify(path: &str) -> EndpointClass {
    if SKIP_PATHS.contains(&path) || SKIP_PREFIXES.iter().any(|prefix| path.starts_with(prefix)) {
        return EndpointClass::Skip;
    }
    if RATE_LIMITED_PREFIXES
        .iter()
        .any(|prefix| path.starts_with(prefix))
    {
        return EndpointClass::Limited;
    }
    EndpointClass::Unlimited
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Middleware
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Axum middleware enforcing admission on limited endpoints.
/// Attach via `axum::middleware::from_fn_with_state`.
pub async fn rate_limit(
    axum::extract::State(state): axum::extract::State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let path = req.uri().path().to_owned();

    match classify(&path) {
        // Skip paths pay nothing: no identity lookup, no headers.
        EndpointClass::Skip => return next.run(req).await,
        EndpointClass::Unlimited => {
            let query = req.uri().query().map(str::to_owned);
            let identity = extract_identity(state.store.as_ref(), req.headers(), query.as_deref());
            let mut response = next.run(req).await;
            let snapshot = state
                .admission
                .snapshot(&identity.principal, identity.is_admin);
            add_rate_limit_headers(&mut response, &snapshot);
            return response;
        }
        EndpointClass::Limited => {}
    }

    let query = req.uri().query().map(str::to_owned);
    let identity = extract_identity(state.store.as_ref(), req.headers(), query.as_deref());
    state.activity.record();

    match state
        .admission
        .admit(&identity.principal, &path, identity.is_admin)
    {
        Admission::Allowed { request_id, .. } => {
            let guard = CompletionGuard::new(
                state.admission.clone(),
                identity.principal.clone(),
                request_id,
            );
            let mut response = next.run(req).await;
            drop(guard);

            let snapshot = state
                .admission
                .snapshot(&identity.principal, identity.is_admin);
            add_rate_limit_headers(&mut response, &snapshot);
            response
        }
        Admission::Queued {
            position, snapshot, ..
        } => {
            tracing::info!(
                principal = %identity.principal,
                path,
                rank = position.rank,
                "rate limited request queued"
            );
            queued_response(&position, &snapshot)
        }
        Admission::Throttled {
            retry_after_secs,
            snapshot,
        } => {
            tracing::warn!(
                principal = %identity.principal,
                path,
                retry_after_secs,
                minute = snapshot.minute_count,
                hour = snapshot.hour_count,
                day = snapshot.day_count,
                "rate limit exceeded"
            );
            throttled_response(retry_after_secs, &snapshot)
        }
    }
}

/// Releases the admitted request's concurrency slot on drop, so the
/// in-flight count can't leak when a handler errors or panics.
struct CompletionGuard {
    admission: Arc<AdmissionGateway>,
    principal: Principal,
    request_id: Uuid,
    started: Instant,
}

impl CompletionGuard {
    fn new(admission: Arc<AdmissionGateway>, principal: Principal, request_id: Uuid) -> Self {
        Self {
            admission,
            principal,
            request_id,
            started: Instant::now(),
        }
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        let duration_ms = self.started.elapsed().as_millis() as u64;
        self.admission
            .complete(&self.principal, &self.request_id, Some(duration_ms));
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Headers & denial bodies
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn add_rate_limit_headers(response: &mut Response, snapshot: &LimitSnapshot) {
    let headers = response.headers_mut();
    set_header(headers, "X-RateLimit-Limit", snapshot.minute_limit);
    set_header(headers, "X-RateLimit-Remaining", snapshot.minute_remaining);
    set_header(
        headers,
        "X-RateLimit-Reset",
        snapshot.minute_reset.timestamp(),
    );
    set_header(headers, "X-RateLimit-Limit-Hour", snapshot.hour_limit);
    set_header(
        headers,
        "X-RateLimit-Remaining-Hour",
        snapshot.hour_remaining,
    );
    set_header(headers, "X-RateLimit-Limit-Day", snapshot.day_limit);
    set_header(headers, "X-RateLimit-Remaining-Day", snapshot.day_remaining);
}

fn set_header<V: ToString>(headers: &mut axum::http::HeaderMap, name: &'static str, value: V) {
    if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
        headers.insert(name, value);
    }
}

fn limits_body(snapshot: &LimitSnapshot) -> serde_json::Value {
    serde_json::json!({
        "minute": {
            "remaining": snapshot.minute_remaining,
            "reset": snapshot.minute_reset.to_rfc3339(),
        },
        "hour": {
            "remaining": snapshot.hour_remaining,
            "reset": snapshot.hour_reset.to_rfc3339(),
        },
        "day": {
            "remaining": snapshot.day_remaining,
            "reset": snapshot.day_reset.to_rfc3339(),
        },
    })
}

fn throttled_response(retry_after_secs: u64, snapshot: &LimitSnapshot) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(serde_json::json!({
            "detail": "Rate limit exceeded",
            "retry_after": retry_after_secs,
            "limits": limits_body(snapshot),
        })),
    )
        .into_response();

    add_rate_limit_headers(&mut response, snapshot);
    if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
        response.headers_mut().insert(RETRY_AFTER, value);
    }
    response
}

/// The request holds a queue slot; the retry hint is its ETA.
fn queued_response(position: &QueuePosition, snapshot: &LimitSnapshot) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(serde_json::json!({
            "detail": "Rate limit exceeded; request queued",
            "retry_after": position.eta_seconds,
            "queue": {
                "position": position.rank,
                "total": position.total,
                "eta_seconds": position.eta_seconds,
            },
            "limits": limits_body(snapshot),
        })),
    )
        .into_response();

    add_rate_limit_headers(&mut response, snapshot);
    if let Ok(value) = HeaderValue::from_str(&position.eta_seconds.to_string()) {
        response.headers_mut().insert(RETRY_AFTER, value);
    }
    response
}
