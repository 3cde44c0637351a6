use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request queue
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum queued requests. 0 rejects every enqueue.
    #[serde(default = "d_max_size")]
    pub max_size: usize,
    /// Seconds a queued request is assumed to take once dequeued;
    /// multiplied by queue rank to estimate wait time.
    #[serde(default = "d_process_time")]
    pub process_time_estimate_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: 100,
            process_time_estimate_secs: 30,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_max_size() -> usize {
    100
}
fn d_process_time() -> u64 {
    30
}
