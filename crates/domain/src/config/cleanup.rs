use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Background cleanup
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Normal cleanup cadence.
    #[serde(default = "d_interval")]
    pub interval_secs: u64,
    /// Switch to the slow cadence after this much inactivity.
    #[serde(default = "d_sleep_enabled")]
    pub sleep_enabled: bool,
    #[serde(default = "d_sleep_timeout")]
    pub sleep_timeout_minutes: u64,
    /// Cadence while sleeping.
    #[serde(default = "d_sleep_interval")]
    pub sleep_interval_secs: u64,
    /// Request-log rows older than this are pruned from the store.
    #[serde(default = "d_log_retention")]
    pub request_log_retention_hours: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            sleep_enabled: true,
            sleep_timeout_minutes: 10,
            sleep_interval_secs: 1800,
            request_log_retention_hours: 24,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_interval() -> u64 {
    300
}
fn d_sleep_enabled() -> bool {
    true
}
fn d_sleep_timeout() -> u64 {
    10
}
fn d_sleep_interval() -> u64 {
    1800
}
fn d_log_retention() -> u64 {
    24
}
