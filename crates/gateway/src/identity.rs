//! Principal extraction from incoming requests.
//!
//! Auth material is checked in priority order: trusted session cookie,
//! bearer API credential (`aih_` prefix, looked up by SHA-256 digest),
//! bearer session token, then the `?token=` query parameter used by
//! WebSocket clients. Anything else is anonymous. Store failures fall
//! through to the next source — identity extraction never errors.

use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::HeaderMap;
use sha2::{Digest, Sha256};

use ah_domain::store::Store;
use ah_domain::Principal;

/// Who is making this request, and whether they hold an admin session.
#[derive(Debug, Clone)]
pub struct Identity {
    pub principal: Principal,
    pub is_admin: bool,
}

impl Identity {
    fn anonymous() -> Self {
        Self {
            principal: Principal::from_parts(None, None),
            is_admin: false,
        }
    }

    fn admin_session(user_id: &str) -> Self {
        Self {
            principal: Principal::from_parts(Some(user_id), None),
            is_admin: true,
        }
    }

    fn api_client(credential_id: &str) -> Self {
        Self {
            principal: Principal::ApiClient(credential_id.to_owned()),
            is_admin: false,
        }
    }
}

/// Extract the request identity. `query` is the raw query string (used
/// by the WebSocket path, where headers can't carry a bearer token).
pub fn extract_identity(store: &dyn Store, headers: &HeaderMap, query: Option<&str>) -> Identity {
    // 1. Trusted session cookie.
    if let Some(token) = cookie_value(headers, "session") {
        if let Some(identity) = auth_session_identity(store, &token) {
            return identity;
        }
    }

    // 2/3. Bearer token: API credential first, session token second.
    if let Some(token) = bearer_token(headers) {
        if let Some(identity) = token_identity(store, token) {
            return identity;
        }
    }

    // 4. Query-parameter token (WebSocket connections).
    if let Some(token) = query.and_then(query_token) {
        if let Some(identity) = token_identity(store, token) {
            return identity;
        }
    }

    Identity::anonymous()
}

/// Resolve a raw token: `aih_`-prefixed tokens are API credentials,
/// anything else is tried as a session token.
fn token_identity(store: &dyn Store, token: &str) -> Option<Identity> {
    if token.starts_with("aih_") {
        return api_credential_identity(store, token);
    }
    auth_session_identity(store, token)
}

fn auth_session_identity(store: &dyn Store, token: &str) -> Option<Identity> {
    match store.get_auth_session(token) {
        Ok(Some(session)) => Some(Identity::admin_session(&session.user_id)),
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(error = %e, "auth session lookup failed");
            None
        }
    }
}

fn api_credential_identity(store: &dyn Store, token: &str) -> Option<Identity> {
    let digest = hex::encode(Sha256::digest(token.as_bytes()));
    match store.get_api_credential_by_hash(&digest) {
        Ok(Some(credential)) => Some(Identity::api_client(&credential.id)),
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(error = %e, "api credential lookup failed");
            None
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookies = headers.get(COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| value.to_owned())
    })
}

fn query_token(query: &str) -> Option<&str> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == "token" && !value.is_empty()).then_some(value)
    })
}
