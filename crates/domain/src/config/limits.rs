use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rate limits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Quotas applied to one principal.
///
/// Stored per principal in the store; principals without a row get the
/// server-wide default from [`LimitsConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitConfig {
    #[serde(default = "d_per_minute")]
    pub per_minute: u32,
    #[serde(default = "d_per_hour")]
    pub per_hour: u32,
    #[serde(default = "d_per_day")]
    pub per_day: u32,
    /// Maximum in-flight requests.
    #[serde(default = "d_concurrent")]
    pub concurrent: u32,
    /// Queue priority — higher is served earlier.
    #[serde(default)]
    pub priority: i32,
    /// Short-circuits every check to allowed.
    #[serde(default)]
    pub unlimited: bool,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            per_minute: 20,
            per_hour: 200,
            per_day: 1000,
            concurrent: 3,
            priority: 0,
            unlimited: false,
        }
    }
}

/// Server-wide rate-limit settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Defaults for principals without a store entry.
    #[serde(default)]
    pub default: LimitConfig,
    /// How long resolved per-principal configs stay cached.
    #[serde(default = "d_config_ttl")]
    pub config_ttl_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            default: LimitConfig::default(),
            config_ttl_secs: 300,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_per_minute() -> u32 {
    20
}
fn d_per_hour() -> u32 {
    200
}
fn d_per_day() -> u32 {
    1000
}
fn d_concurrent() -> u32 {
    3
}
fn d_config_ttl() -> u64 {
    300
}
