//! Broker → frontend notifications.
//!
//! Delivery is best-effort: the broker logs publish failures and keeps
//! going. No correctness property depends on an event arriving.

use serde::Serialize;

use ah_domain::Result;

/// One broker notification, serialized as-is onto whatever channel the
/// transport provides (WebSocket in the stock gateway).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrokerEvent {
    /// A new tool-use request is waiting for a decision.
    PermissionRequest {
        request_id: String,
        session_id: String,
        tool_name: String,
        tool_input: serde_json::Value,
        queue_position: usize,
        queue_total: usize,
    },
    /// A rule install auto-resolved queued requests.
    PermissionQueueUpdate {
        session_id: String,
        resolved_ids: Vec<String>,
        remaining_count: usize,
    },
}

/// Pluggable broadcast channel the caller provides per request.
pub trait BrokerEvents: Send + Sync {
    fn publish(&self, event: BrokerEvent) -> Result<()>;
}

/// Discards every event. Useful for tests and headless callers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEvents;

impl BrokerEvents for NoopEvents {
    fn publish(&self, _event: BrokerEvent) -> Result<()> {
        Ok(())
    }
}
