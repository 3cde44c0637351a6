//! AppState construction and background-task spawning.
//!
//! One shared "boot" path so `serve` and tests wire the exact same
//! object graph — constructed once, passed explicitly, no globals.

use std::sync::Arc;

use axum::http::Method;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use ah_admission::{AdmissionGateway, RateLimiter, RequestQueue};
use ah_broker::PermissionBroker;
use ah_domain::config::{Config, ConfigSeverity, CorsConfig};
use ah_domain::store::{MemoryStore, Store};

use crate::events::EventBus;
use crate::runtime::cleanup::ActivityTracker;
use crate::state::AppState;

/// Validate config and wire every subsystem into an [`AppState`].
pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());

    let limiter = Arc::new(RateLimiter::new(store.clone(), config.limits.clone()));
    let queue = Arc::new(RequestQueue::new(config.queue.clone()));
    let admission = Arc::new(AdmissionGateway::new(limiter, queue));
    tracing::info!(
        per_minute = config.limits.default.per_minute,
        per_hour = config.limits.default.per_hour,
        per_day = config.limits.default.per_day,
        concurrent = config.limits.default.concurrent,
        queue_max = config.queue.max_size,
        "admission gateway ready"
    );

    let broker = Arc::new(PermissionBroker::new(store.clone(), &config.broker));
    tracing::info!(
        decision_timeout_secs = config.broker.decision_timeout_secs,
        "permission broker ready"
    );

    Ok(AppState {
        config,
        store,
        admission,
        broker,
        events: Arc::new(EventBus::default()),
        activity: Arc::new(ActivityTracker::new()),
    })
}

/// Spawn the background cleanup job.
pub fn spawn_background(state: &AppState) -> tokio::task::JoinHandle<()> {
    crate::runtime::cleanup::spawn_cleanup(state.clone())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CORS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build the CORS layer from config. Origin patterns may end with `:*`
/// to allow any port on a host.
pub fn build_cors(cors: &CorsConfig) -> CorsLayer {
    if cors.allowed_origins.iter().any(|origin| origin == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let patterns = cors.allowed_origins.clone();
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin, _| {
            origin
                .to_str()
                .map(|origin| origin_allowed(origin, &patterns))
                .unwrap_or(false)
        }))
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any)
}

fn origin_allowed(origin: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| {
        match pattern.strip_suffix(":*") {
            Some(host) => origin.strip_prefix(host).is_some_and(|rest| {
                rest.is_empty()
                    || (rest.starts_with(':')
                        && rest.len() > 1
                        && rest[1..].chars().all(|c| c.is_ascii_digit()))
            }),
            None => origin == pattern,
        }
    })
}
