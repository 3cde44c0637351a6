//! Priority queue for requests displaced by rate limits.
//!
//! Ordering is `(-priority, enqueued_at)` — higher priority first, FIFO
//! within a priority level — with the entry id as a deterministic final
//! tiebreak. A side index enforces at most one live entry per principal
//! so a single caller cannot saturate the queue.
//!
//! The queue is a capacity device: it never waits and never drains
//! itself. Consumers call `dequeue` at their own pace.

use std::collections::{BinaryHeap, HashMap};
use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use ah_domain::config::QueueConfig;
use ah_domain::{Error, Principal, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A queued request, immutable after enqueue.
#[derive(Debug, Clone, Serialize)]
pub struct QueuedRequest {
    pub id: Uuid,
    pub principal_key: String,
    pub priority: i32,
    pub enqueued_at: DateTime<Utc>,
    /// Opaque to the queue; the admission gateway stores the endpoint.
    pub payload: serde_json::Value,
}

/// Fired by `dequeue` after the entry leaves the queue.
pub type OnDequeue = Box<dyn FnOnce(&QueuedRequest) + Send>;

/// A principal's standing in the queue.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct QueuePosition {
    pub queued: bool,
    /// 1 = next to be dequeued. 0 when not queued.
    pub rank: usize,
    pub total: usize,
    pub eta_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SortKey {
    priority: i32,
    enqueued_at: DateTime<Utc>,
    id: Uuid,
}

impl Ord for SortKey {
    // Max-heap: the greatest key dequeues first, so higher priority is
    // greater and, within a priority, earlier enqueue times are greater.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.enqueued_at.cmp(&self.enqueued_at))
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct HeapEntry {
    key: SortKey,
    request: QueuedRequest,
    on_dequeue: Option<OnDequeue>,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}
impl Eq for HeapEntry {}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RequestQueue
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct QueueState {
    heap: BinaryHeap<HeapEntry>,
    /// principal key -> live entry id (at-most-one-per-principal).
    by_principal: HashMap<String, Uuid>,
    /// entry id -> (sort key, principal key), for position and removal.
    index: HashMap<Uuid, (SortKey, String)>,
    max_size: usize,
    process_time_estimate_secs: u64,
}

/// Bounded priority queue, one mutex, no partial states observable.
pub struct RequestQueue {
    state: Mutex<QueueState>,
}

impl RequestQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                by_principal: HashMap::new(),
                index: HashMap::new(),
                max_size: config.max_size,
                process_time_estimate_secs: config.process_time_estimate_secs,
            }),
        }
    }

    /// Add a request to the queue.
    ///
    /// If the principal already has a live entry its id is returned and
    /// nothing changes — position and priority included. A full queue
    /// yields [`Error::QueueFull`].
    pub fn enqueue(
        &self,
        principal: &Principal,
        priority: i32,
        payload: serde_json::Value,
        on_dequeue: Option<OnDequeue>,
    ) -> Result<Uuid> {
        let principal_key = principal.key();
        let mut state = self.state.lock();

        if let Some(existing) = state.by_principal.get(&principal_key) {
            tracing::debug!(principal = %principal_key, id = %existing, "principal already queued");
            return Ok(*existing);
        }

        if state.heap.len() >= state.max_size {
            tracing::warn!(max_size = state.max_size, "queue full, rejecting request");
            return Err(Error::QueueFull);
        }

        let id = Uuid::new_v4();
        let key = SortKey {
            priority,
            enqueued_at: Utc::now(),
            id,
        };
        let request = QueuedRequest {
            id,
            principal_key: principal_key.clone(),
            priority,
            enqueued_at: key.enqueued_at,
            payload,
        };

        state.index.insert(id, (key, principal_key.clone()));
        state.by_principal.insert(principal_key.clone(), id);
        state.heap.push(HeapEntry {
            key,
            request,
            on_dequeue,
        });

        tracing::info!(id = %id, principal = %principal_key, priority, "queued request");
        Ok(id)
    }

    /// Remove and return the highest-priority, earliest-enqueued entry.
    pub fn dequeue(&self) -> Option<QueuedRequest> {
        let (request, on_dequeue) = {
            let mut state = self.state.lock();
            let entry = state.heap.pop()?;
            state.by_principal.remove(&entry.request.principal_key);
            state.index.remove(&entry.request.id);
            (entry.request, entry.on_dequeue)
        };

        tracing::info!(id = %request.id, principal = %request.principal_key, "dequeued request");
        if let Some(callback) = on_dequeue {
            callback(&request);
        }
        Some(request)
    }

    /// Best-effort cancellation by entry id. The heap is rebuilt to
    /// restore ordering. Unknown ids return false.
    pub fn remove(&self, id: Uuid) -> bool {
        let mut state = self.state.lock();
        let Some((_, principal_key)) = state.index.remove(&id) else {
            return false;
        };
        state.by_principal.remove(&principal_key);
        let heap = std::mem::take(&mut state.heap);
        state.heap = heap
            .into_iter()
            .filter(|entry| entry.request.id != id)
            .collect();

        tracing::info!(id = %id, "removed request from queue");
        true
    }

    /// A principal's rank (1 = next) and estimated wait.
    pub fn position(&self, principal: &Principal) -> QueuePosition {
        let state = self.state.lock();
        let total = state.heap.len();

        let Some(id) = state.by_principal.get(&principal.key()) else {
            return QueuePosition {
                queued: false,
                rank: 0,
                total,
                eta_seconds: 0,
            };
        };
        let my_key = state.index[id].0;

        // Entries with a greater key dequeue before this one.
        let rank = 1 + state
            .heap
            .iter()
            .filter(|entry| entry.key > my_key)
            .count();

        QueuePosition {
            queued: true,
            rank,
            total,
            eta_seconds: rank as u64 * state.process_time_estimate_secs,
        }
    }

    pub fn size(&self) -> usize {
        self.state.lock().heap.len()
    }

    pub fn contains(&self, principal: &Principal) -> bool {
        self.state.lock().by_principal.contains_key(&principal.key())
    }

    /// Drop every entry. Returns how many were cleared.
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let count = state.heap.len();
        state.heap.clear();
        state.by_principal.clear();
        state.index.clear();
        if count > 0 {
            tracing::info!(count, "cleared request queue");
        }
        count
    }

    pub fn set_max_size(&self, max_size: usize) {
        self.state.lock().max_size = max_size;
    }

    pub fn set_process_time_estimate(&self, seconds: u64) {
        self.state.lock().process_time_estimate_secs = seconds;
    }
}
