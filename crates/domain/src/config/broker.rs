use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Permission broker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// How long a tool-use request may wait for a human decision before
    /// it is denied with a timeout.
    #[serde(default = "d_decision_timeout")]
    pub decision_timeout_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            decision_timeout_secs: 300,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_decision_timeout() -> u64 {
    300
}
