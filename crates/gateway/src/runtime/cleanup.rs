//! Background cleanup with sleep mode.
//!
//! Every `cleanup.interval_secs` the job evicts rate-limiter windows
//! older than 24 h and prunes the store's request log. After
//! `sleep_timeout_minutes` without admitted requests the job drops to
//! the slow cadence; the next admitted request wakes it. Errors inside
//! a cycle are logged and swallowed, and a panicking cycle must not
//! kill the job.

use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::state::AppState;

/// Records the moment of the last admitted request.
pub struct ActivityTracker {
    last: Mutex<Instant>,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(Instant::now()),
        }
    }

    /// Mark activity now (called by the admission middleware).
    pub fn record(&self) {
        *self.last.lock() = Instant::now();
    }

    /// Time since the last recorded activity.
    pub fn idle(&self) -> Duration {
        self.last.lock().elapsed()
    }
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the periodic cleanup task. Runs for the process lifetime.
pub fn spawn_cleanup(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let config = state.config.cleanup.clone();
        let normal = Duration::from_secs(config.interval_secs.max(1));
        let slow = Duration::from_secs(config.sleep_interval_secs.max(config.interval_secs));
        let sleep_after = Duration::from_secs(config.sleep_timeout_minutes * 60);
        let mut sleeping = false;

        loop {
            let idle = state.activity.idle();
            let now_sleeping = config.sleep_enabled && idle >= sleep_after;
            if now_sleeping != sleeping {
                sleeping = now_sleeping;
                if sleeping {
                    tracing::info!(
                        idle_secs = idle.as_secs(),
                        "no recent activity, cleanup entering sleep mode"
                    );
                } else {
                    tracing::info!("activity resumed, cleanup leaving sleep mode");
                }
            }

            tokio::time::sleep(if sleeping { slow } else { normal }).await;
            run_cycle(&state, config.request_log_retention_hours);
        }
    })
}

/// One cleanup pass. Isolated so a panic inside cannot take the loop
/// down (the limiter's parking_lot locks do not poison).
fn run_cycle(state: &AppState, log_retention_hours: u64) {
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
        let removed = state
            .limiter()
            .cleanup(chrono::Duration::hours(log_retention_hours as i64));
        tracing::debug!(log_rows_removed = removed, "cleanup cycle finished");
    }));
    if result.is_err() {
        tracing::error!("cleanup cycle panicked");
    }
}
