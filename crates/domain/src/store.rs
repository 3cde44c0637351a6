//! Abstract persistence collaborator.
//!
//! The admission layer treats storage as an opaque row collaborator:
//! read-only for limit configs and permission rules, append-only for the
//! request log. Every write is best-effort — callers log failures and
//! carry on, a request is never failed on store trouble alone.
//!
//! [`MemoryStore`] is the default implementation used by the composition
//! root and by tests.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::LimitConfig;
use crate::error::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Row types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One admitted request, recorded for audit.
#[derive(Debug, Clone, Serialize)]
pub struct RequestLogEntry {
    pub id: Uuid,
    pub user_id: Option<String>,
    pub api_key_id: Option<String>,
    pub endpoint: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// A persisted permission rule (profile-scoped or global).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRule {
    pub id: String,
    /// `None` = global rule.
    pub profile_id: Option<String>,
    pub tool_name: String,
    pub tool_pattern: Option<String>,
    pub decision: RuleDecision,
    pub created_at: DateTime<Utc>,
}

/// Terminal decision carried by a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleDecision {
    Allow,
    Deny,
}

/// Rule fields supplied on insert; the store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewRule {
    pub profile_id: Option<String>,
    pub tool_name: String,
    pub tool_pattern: Option<String>,
    pub decision: RuleDecision,
}

/// An authenticated browser session (trusted cookie).
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub user_id: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// An API credential row, looked up by SHA-256 digest of the bearer token.
#[derive(Debug, Clone)]
pub struct ApiCredential {
    pub id: String,
    pub name: String,
    pub username: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Synchronous row persistence used by the limiter, broker and identity
/// extraction. Implementations must be cheap enough to call under load.
pub trait Store: Send + Sync {
    /// Per-principal limit override; `None` means "use defaults".
    /// API-credential config wins over user config.
    fn get_rate_limit(
        &self,
        user_id: Option<&str>,
        api_key_id: Option<&str>,
    ) -> Result<Option<LimitConfig>>;

    /// Append to the request log.
    fn log_request(&self, entry: &RequestLogEntry) -> Result<()>;

    /// Delete request-log rows older than `cutoff`; returns rows removed.
    fn prune_request_log(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Permission rules scoped to one profile.
    fn get_profile_rules(&self, profile_id: &str) -> Result<Vec<StoredRule>>;

    /// Permission rules that apply to every profile.
    fn get_global_rules(&self) -> Result<Vec<StoredRule>>;

    /// Persist a profile or global rule; returns the assigned id.
    fn add_rule(&self, rule: &NewRule) -> Result<String>;

    /// Trusted browser session lookup for principal extraction.
    fn get_auth_session(&self, token: &str) -> Result<Option<AuthSession>>;

    /// API credential lookup by hex-encoded SHA-256 of the raw token.
    fn get_api_credential_by_hash(&self, sha256_hex: &str) -> Result<Option<ApiCredential>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MemoryStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// In-memory [`Store`] backed by `parking_lot::RwLock` maps.
#[derive(Default)]
pub struct MemoryStore {
    rate_limits: RwLock<HashMap<String, LimitConfig>>,
    request_log: RwLock<Vec<RequestLogEntry>>,
    rules: RwLock<Vec<StoredRule>>,
    auth_sessions: RwLock<HashMap<String, AuthSession>>,
    api_credentials: RwLock<HashMap<String, ApiCredential>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn limit_key(user_id: Option<&str>, api_key_id: Option<&str>) -> Option<String> {
        match (api_key_id, user_id) {
            (Some(api), _) => Some(format!("api:{api}")),
            (None, Some(user)) => Some(format!("user:{user}")),
            (None, None) => None,
        }
    }

    /// Install a per-principal limit override (admin/config surface).
    pub fn set_rate_limit(
        &self,
        user_id: Option<&str>,
        api_key_id: Option<&str>,
        config: LimitConfig,
    ) {
        if let Some(key) = Self::limit_key(user_id, api_key_id) {
            self.rate_limits.write().insert(key, config);
        }
    }

    /// Register a trusted browser session (token -> session).
    pub fn insert_auth_session(&self, token: &str, session: AuthSession) {
        self.auth_sessions.write().insert(token.to_owned(), session);
    }

    /// Register an API credential under its token digest.
    pub fn insert_api_credential(&self, sha256_hex: &str, credential: ApiCredential) {
        self.api_credentials
            .write()
            .insert(sha256_hex.to_owned(), credential);
    }

    /// Number of request-log rows currently retained.
    pub fn request_log_len(&self) -> usize {
        self.request_log.read().len()
    }
}

impl Store for MemoryStore {
    fn get_rate_limit(
        &self,
        user_id: Option<&str>,
        api_key_id: Option<&str>,
    ) -> Result<Option<LimitConfig>> {
        let limits = self.rate_limits.read();
        // API-credential config wins; fall back to the user's row.
        if let Some(api) = api_key_id {
            if let Some(config) = limits.get(&format!("api:{api}")) {
                return Ok(Some(config.clone()));
            }
        }
        if let Some(user) = user_id {
            if let Some(config) = limits.get(&format!("user:{user}")) {
                return Ok(Some(config.clone()));
            }
        }
        Ok(None)
    }

    fn log_request(&self, entry: &RequestLogEntry) -> Result<()> {
        self.request_log.write().push(entry.clone());
        Ok(())
    }

    fn prune_request_log(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut log = self.request_log.write();
        let before = log.len();
        log.retain(|entry| entry.created_at >= cutoff);
        Ok((before - log.len()) as u64)
    }

    fn get_profile_rules(&self, profile_id: &str) -> Result<Vec<StoredRule>> {
        Ok(self
            .rules
            .read()
            .iter()
            .filter(|rule| rule.profile_id.as_deref() == Some(profile_id))
            .cloned()
            .collect())
    }

    fn get_global_rules(&self) -> Result<Vec<StoredRule>> {
        Ok(self
            .rules
            .read()
            .iter()
            .filter(|rule| rule.profile_id.is_none())
            .cloned()
            .collect())
    }

    fn add_rule(&self, rule: &NewRule) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.rules.write().push(StoredRule {
            id: id.clone(),
            profile_id: rule.profile_id.clone(),
            tool_name: rule.tool_name.clone(),
            tool_pattern: rule.tool_pattern.clone(),
            decision: rule.decision,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    fn get_auth_session(&self, token: &str) -> Result<Option<AuthSession>> {
        let sessions = self.auth_sessions.read();
        Ok(sessions.get(token).and_then(|session| {
            match session.expires_at {
                Some(expires) if expires <= Utc::now() => None,
                _ => Some(session.clone()),
            }
        }))
    }

    fn get_api_credential_by_hash(&self, sha256_hex: &str) -> Result<Option<ApiCredential>> {
        Ok(self.api_credentials.read().get(sha256_hex).cloned())
    }
}
