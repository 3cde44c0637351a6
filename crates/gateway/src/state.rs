use std::sync::Arc;

use ah_admission::{AdmissionGateway, RateLimiter, RequestQueue};
use ah_broker::PermissionBroker;
use ah_domain::config::Config;
use ah_domain::store::Store;

use crate::events::EventBus;
use crate::runtime::cleanup::ActivityTracker;

/// Shared application state passed to all API handlers.
///
/// Everything is constructed once in [`crate::bootstrap::build_app_state`]
/// and passed explicitly — no module-level singletons, so tests can wire
/// their own instances.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Opaque persistence collaborator (limits, rules, request log).
    pub store: Arc<dyn Store>,

    // ── Admission ─────────────────────────────────────────────────────
    pub admission: Arc<AdmissionGateway>,

    // ── Permission broker ─────────────────────────────────────────────
    pub broker: Arc<PermissionBroker>,
    /// Broadcast channel feeding `/ws/events` subscribers.
    pub events: Arc<EventBus>,

    // ── Background ────────────────────────────────────────────────────
    /// Last-activity marker driving the cleanup job's sleep mode.
    pub activity: Arc<ActivityTracker>,
}

impl AppState {
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        self.admission.limiter()
    }

    pub fn queue(&self) -> &Arc<RequestQueue> {
        self.admission.queue()
    }
}
