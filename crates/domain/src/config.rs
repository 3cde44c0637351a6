use serde::{Deserialize, Serialize};

pub mod broker;
pub mod cleanup;
pub mod limits;
pub mod queue;
pub mod server;

pub use broker::BrokerConfig;
pub use cleanup::CleanupConfig;
pub use limits::{LimitConfig, LimitsConfig};
pub use queue::QueueConfig;
pub use server::{CorsConfig, ServerConfig};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

/// A single validation finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl Config {
    /// Sanity-check the loaded configuration.
    ///
    /// Zero limits are legal (they mean "always deny") so they only
    /// warn; structurally broken values are errors.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.limits.default.per_minute == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: "limits.default.per_minute is 0 — every limited request will be denied"
                    .into(),
            });
        }
        if self.limits.default.concurrent == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: "limits.default.concurrent is 0 — every limited request will be denied"
                    .into(),
            });
        }
        if self.queue.max_size == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: "queue.max_size is 0 — displaced requests are rejected, never queued"
                    .into(),
            });
        }
        if self.broker.decision_timeout_secs == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "broker.decision_timeout_secs must be > 0".into(),
            });
        }
        if self.cleanup.interval_secs == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "cleanup.interval_secs must be > 0".into(),
            });
        }

        issues
    }
}
