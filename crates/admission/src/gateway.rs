//! Single admission entry point combining the rate limiter and the
//! request queue.
//!
//! A denied request is offered a queue slot instead of a flat rejection;
//! only when the queue is also full (or the principal cannot be queued)
//! does the caller see a throttle. Callers MUST call
//! [`AdmissionGateway::complete`] on every exit path of an allowed
//! request, or the principal's concurrency quota leaks.

use std::sync::Arc;

use uuid::Uuid;

use ah_domain::Principal;

use crate::limiter::{LimitSnapshot, RateLimiter, Verdict};
use crate::queue::{QueuePosition, RequestQueue};

/// Outcome of admitting one request.
#[derive(Debug)]
pub enum Admission {
    /// Proceed. Quota was consumed; `request_id` must be completed.
    Allowed {
        request_id: Uuid,
        snapshot: LimitSnapshot,
    },
    /// Rate-limited but holding a queue slot.
    Queued {
        entry_id: Uuid,
        position: QueuePosition,
        snapshot: LimitSnapshot,
    },
    /// Rate-limited and the queue could not hold the request.
    Throttled {
        retry_after_secs: u64,
        snapshot: LimitSnapshot,
    },
}

pub struct AdmissionGateway {
    limiter: Arc<RateLimiter>,
    queue: Arc<RequestQueue>,
}

impl AdmissionGateway {
    pub fn new(limiter: Arc<RateLimiter>, queue: Arc<RequestQueue>) -> Self {
        Self { limiter, queue }
    }

    /// Admit, queue or throttle one request.
    pub fn admit(&self, principal: &Principal, endpoint: &str, is_admin: bool) -> Admission {
        let (verdict, snapshot) = self.limiter.check(principal, is_admin);

        match verdict {
            Verdict::Allowed => {
                let request_id = self.limiter.record(principal, endpoint);
                Admission::Allowed {
                    request_id,
                    snapshot,
                }
            }
            Verdict::Denied { retry_after_secs } => {
                let priority = self.limiter.limits_for(principal).priority;
                let payload = serde_json::json!({ "endpoint": endpoint });

                match self.queue.enqueue(principal, priority, payload, None) {
                    Ok(entry_id) => Admission::Queued {
                        entry_id,
                        position: self.queue.position(principal),
                        snapshot,
                    },
                    Err(_) => Admission::Throttled {
                        retry_after_secs,
                        snapshot,
                    },
                }
            }
        }
    }

    /// Release the concurrency slot of an allowed request.
    /// Mandatory on all exit paths, including errors.
    pub fn complete(&self, principal: &Principal, request_id: &Uuid, duration_ms: Option<u64>) {
        self.limiter.complete(principal, request_id, duration_ms);
    }

    /// Read-only counters for header emission.
    pub fn snapshot(&self, principal: &Principal, is_admin: bool) -> LimitSnapshot {
        self.limiter.snapshot(principal, is_admin)
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn queue(&self) -> &Arc<RequestQueue> {
        &self.queue
    }
}
