//! Canonical identity for rate-limit and queue bookkeeping.
//!
//! Every admitted request is tracked against exactly one [`Principal`].
//! The canonical string key is what the limiter and queue index on, so
//! two requests with the same key share a quota window.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The identity a quota belongs to.
///
/// Priority when deriving from auth material: API credential > user >
/// admin sentinel > anonymous nonce. Admin is a bypass sentinel — but an
/// admin presenting an API credential is limited as that credential.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Principal {
    Admin,
    ApiClient(String),
    User(String),
    Anonymous(Uuid),
}

impl Principal {
    /// Derive a principal from extracted auth parts.
    ///
    /// `None, None` yields a fresh [`Principal::Anonymous`] nonce, so
    /// unauthenticated requests never share a window.
    pub fn from_parts(user_id: Option<&str>, api_key_id: Option<&str>) -> Self {
        match (api_key_id, user_id) {
            (Some(api), _) => Principal::ApiClient(api.to_owned()),
            (None, Some("admin")) => Principal::Admin,
            (None, Some(user)) => Principal::User(user.to_owned()),
            (None, None) => Principal::Anonymous(Uuid::new_v4()),
        }
    }

    /// Canonical string key used by the limiter, queue and config cache.
    pub fn key(&self) -> String {
        match self {
            Principal::Admin => "admin:default".to_owned(),
            Principal::ApiClient(id) => format!("api:{id}"),
            Principal::User(id) => format!("user:{id}"),
            Principal::Anonymous(nonce) => format!("anon:{nonce}"),
        }
    }

    /// True when the principal is backed by an API credential.
    ///
    /// Admin bypass does not apply to API clients.
    pub fn is_api_client(&self) -> bool {
        matches!(self, Principal::ApiClient(_))
    }

    /// The user id to record in the request log, if any.
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Principal::Admin => Some("admin"),
            Principal::User(id) => Some(id),
            _ => None,
        }
    }

    /// The API credential id to record in the request log, if any.
    pub fn api_key_id(&self) -> Option<&str> {
        match self {
            Principal::ApiClient(id) => Some(id),
            _ => None,
        }
    }
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_credential_wins_over_user() {
        let p = Principal::from_parts(Some("alice"), Some("key-1"));
        assert_eq!(p, Principal::ApiClient("key-1".into()));
        assert_eq!(p.key(), "api:key-1");
        assert!(p.is_api_client());
    }

    #[test]
    fn user_key() {
        let p = Principal::from_parts(Some("alice"), None);
        assert_eq!(p.key(), "user:alice");
        assert!(!p.is_api_client());
    }

    #[test]
    fn admin_sentinel() {
        let p = Principal::from_parts(Some("admin"), None);
        assert_eq!(p, Principal::Admin);
        assert_eq!(p.key(), "admin:default");
    }

    #[test]
    fn anonymous_nonces_are_distinct() {
        let a = Principal::from_parts(None, None);
        let b = Principal::from_parts(None, None);
        assert_ne!(a.key(), b.key());
        assert!(a.key().starts_with("anon:"));
    }

    #[test]
    fn log_fields() {
        let p = Principal::ApiClient("key-9".into());
        assert_eq!(p.api_key_id(), Some("key-9"));
        assert_eq!(p.user_id(), None);

        let u = Principal::User("bob".into());
        assert_eq!(u.user_id(), Some("bob"));
        assert_eq!(u.api_key_id(), None);
    }
}
