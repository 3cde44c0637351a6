//! Sliding-window rate limiter with three horizons.
//!
//! Every principal gets a [`SlidingWindow`] tracking request start times
//! over the last 24 h plus an in-flight count. `check` evaluates the
//! minute/hour/day caps and the concurrency cap in that order; the first
//! violated cap decides the retry-after. Admin sessions bypass limits
//! unless they present an API credential, and `unlimited` principals
//! bypass everything.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use ah_domain::config::{LimitConfig, LimitsConfig};
use ah_domain::store::{RequestLogEntry, Store};
use ah_domain::Principal;

use crate::resolver::ConfigResolver;
use crate::window::SlidingWindow;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Denied { retry_after_secs: u64 },
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allowed)
    }

    /// Convert a denial into the error callers propagate with `?`.
    pub fn into_result(self) -> ah_domain::Result<()> {
        match self {
            Verdict::Allowed => Ok(()),
            Verdict::Denied { retry_after_secs } => {
                Err(ah_domain::Error::QuotaExceeded { retry_after_secs })
            }
        }
    }
}

/// Read-only counters for header emission and status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct LimitSnapshot {
    pub minute_count: u32,
    pub hour_count: u32,
    pub day_count: u32,
    pub concurrent_count: u32,
    pub minute_limit: u32,
    pub hour_limit: u32,
    pub day_limit: u32,
    pub concurrent_limit: u32,
    pub minute_remaining: u32,
    pub hour_remaining: u32,
    pub day_remaining: u32,
    pub concurrent_remaining: u32,
    pub minute_reset: DateTime<Utc>,
    pub hour_reset: DateTime<Utc>,
    pub day_reset: DateTime<Utc>,
    pub is_limited: bool,
    pub retry_after_secs: u64,
}

impl LimitSnapshot {
    /// Snapshot for a principal that bypasses limits entirely
    /// (admin session or `unlimited` config): full quota remaining.
    fn bypass(config: &LimitConfig, now: DateTime<Utc>) -> Self {
        Self {
            minute_count: 0,
            hour_count: 0,
            day_count: 0,
            concurrent_count: 0,
            minute_limit: config.per_minute,
            hour_limit: config.per_hour,
            day_limit: config.per_day,
            concurrent_limit: config.concurrent,
            minute_remaining: config.per_minute,
            hour_remaining: config.per_hour,
            day_remaining: config.per_day,
            concurrent_remaining: config.concurrent,
            minute_reset: now + Duration::minutes(1),
            hour_reset: now + Duration::hours(1),
            day_reset: now + Duration::hours(24),
            is_limited: false,
            retry_after_secs: 0,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RateLimiter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// In-memory sliding-window limiter.
///
/// Windows are tracked per canonical principal key behind one mutex, so
/// state for a given principal is linearizable. Configuration comes from
/// the store via [`ConfigResolver`] with built-in defaults as fallback.
pub struct RateLimiter {
    windows: Mutex<HashMap<String, SlidingWindow>>,
    resolver: ConfigResolver,
    store: Arc<dyn Store>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn Store>, limits: LimitsConfig) -> Self {
        let resolver = ConfigResolver::new(
            store.clone(),
            limits.default,
            std::time::Duration::from_secs(limits.config_ttl_secs),
        );
        Self {
            windows: Mutex::new(HashMap::new()),
            resolver,
            store,
        }
    }

    /// The resolved limit config for a principal (used by the gateway
    /// for queue priority and by the transport for headers).
    pub fn limits_for(&self, principal: &Principal) -> LimitConfig {
        self.resolver.resolve(principal)
    }

    /// Check whether a request from `principal` may proceed right now.
    ///
    /// Never mutates the counters beyond 24-h eviction; a passing check
    /// must be followed by [`record`](Self::record) to consume quota.
    pub fn check(&self, principal: &Principal, is_admin: bool) -> (Verdict, LimitSnapshot) {
        let now = Utc::now();
        let config = self.resolver.resolve(principal);

        // Admin bypass — unless the admin is acting through an API
        // credential, which is limited as that credential.
        if is_admin && !principal.is_api_client() {
            return (Verdict::Allowed, LimitSnapshot::bypass(&config, now));
        }
        if config.unlimited {
            return (Verdict::Allowed, LimitSnapshot::bypass(&config, now));
        }

        let mut windows = self.windows.lock();
        let window = windows.entry(principal.key()).or_default();
        window.evict_before(now - Duration::hours(24));

        let snapshot = build_snapshot(window, &config, now);
        if snapshot.is_limited {
            (
                Verdict::Denied {
                    retry_after_secs: snapshot.retry_after_secs,
                },
                snapshot,
            )
        } else {
            (Verdict::Allowed, snapshot)
        }
    }

    /// Consume quota for an admitted request: stamp the window, bump the
    /// in-flight count and best-effort append to the request log.
    pub fn record(&self, principal: &Principal, endpoint: &str) -> Uuid {
        let request_id = Uuid::new_v4();
        let now = Utc::now();

        {
            let mut windows = self.windows.lock();
            windows
                .entry(principal.key())
                .or_default()
                .add(now, request_id);
        }

        let entry = RequestLogEntry {
            id: request_id,
            user_id: principal.user_id().map(str::to_owned),
            api_key_id: principal.api_key_id().map(str::to_owned),
            endpoint: endpoint.to_owned(),
            status: "success".into(),
            created_at: now,
        };
        if let Err(e) = self.store.log_request(&entry) {
            tracing::warn!(error = %e, "failed to log request to store");
        }

        request_id
    }

    /// Release the in-flight slot taken by `record`. Unknown request ids
    /// are tolerated silently; the in-flight count never goes negative.
    pub fn complete(&self, principal: &Principal, request_id: &Uuid, duration_ms: Option<u64>) {
        let mut windows = self.windows.lock();
        if let Some(window) = windows.get_mut(&principal.key()) {
            if window.complete(request_id) {
                if let Some(ms) = duration_ms {
                    tracing::debug!(principal = %principal, request_id = %request_id, duration_ms = ms, "request completed");
                }
            }
        }
    }

    /// Read-only counters for response headers. Never mutates.
    pub fn snapshot(&self, principal: &Principal, is_admin: bool) -> LimitSnapshot {
        let now = Utc::now();
        let config = self.resolver.resolve(principal);

        if (is_admin && !principal.is_api_client()) || config.unlimited {
            return LimitSnapshot::bypass(&config, now);
        }

        let windows = self.windows.lock();
        match windows.get(&principal.key()) {
            Some(window) => {
                let mut snapshot = build_snapshot(window, &config, now);
                // Headers report standing, not a verdict.
                snapshot.is_limited = false;
                snapshot.retry_after_secs = 0;
                snapshot
            }
            None => LimitSnapshot::bypass(&config, now),
        }
    }

    /// Evict window entries older than 24 h everywhere and prune the
    /// store's request log. Returns rows pruned from the store.
    pub fn cleanup(&self, log_retention: Duration) -> u64 {
        let cutoff = Utc::now() - Duration::hours(24);
        {
            let mut windows = self.windows.lock();
            for window in windows.values_mut() {
                window.evict_before(cutoff);
            }
        }

        match self.store.prune_request_log(Utc::now() - log_retention) {
            Ok(removed) => {
                if removed > 0 {
                    tracing::info!(removed, "pruned old request-log rows");
                }
                removed
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to prune request log");
                0
            }
        }
    }

    /// Invalidate the config cache (called on limit configuration change).
    pub fn clear_cache(&self) {
        self.resolver.clear_cache();
    }
}

/// Evaluate all four caps against a window. Denial precedence:
/// minute, then hour, then day, then concurrent (retry 60/3600/86400/5).
fn build_snapshot(window: &SlidingWindow, config: &LimitConfig, now: DateTime<Utc>) -> LimitSnapshot {
    let minute_count = window.count_since(now - Duration::seconds(60));
    let hour_count = window.count_since(now - Duration::hours(1));
    let day_count = window.count_since(now - Duration::hours(24));
    let concurrent_count = window.in_flight();

    let minute_exceeded = minute_count >= config.per_minute;
    let hour_exceeded = hour_count >= config.per_hour;
    let day_exceeded = day_count >= config.per_day;
    let concurrent_exceeded = concurrent_count >= config.concurrent;

    let retry_after_secs = if minute_exceeded {
        60
    } else if hour_exceeded {
        3600
    } else if day_exceeded {
        86_400
    } else if concurrent_exceeded {
        5
    } else {
        0
    };

    LimitSnapshot {
        minute_count,
        hour_count,
        day_count,
        concurrent_count,
        minute_limit: config.per_minute,
        hour_limit: config.per_hour,
        day_limit: config.per_day,
        concurrent_limit: config.concurrent,
        minute_remaining: config.per_minute.saturating_sub(minute_count),
        hour_remaining: config.per_hour.saturating_sub(hour_count),
        day_remaining: config.per_day.saturating_sub(day_count),
        concurrent_remaining: config.concurrent.saturating_sub(concurrent_count),
        minute_reset: now + Duration::minutes(1),
        hour_reset: now + Duration::hours(1),
        day_reset: now + Duration::hours(24),
        is_limited: minute_exceeded || hour_exceeded || day_exceeded || concurrent_exceeded,
        retry_after_secs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ah_domain::store::MemoryStore;

    fn limiter_with(config: LimitConfig) -> RateLimiter {
        RateLimiter::new(
            Arc::new(MemoryStore::new()),
            LimitsConfig {
                default: config,
                config_ttl_secs: 300,
            },
        )
    }

    fn user(name: &str) -> Principal {
        Principal::User(name.into())
    }

    #[test]
    fn per_minute_cap_denies_with_retry_60() {
        let limiter = limiter_with(LimitConfig {
            per_minute: 3,
            per_hour: 100,
            per_day: 1000,
            concurrent: 10,
            ..Default::default()
        });
        let p = user("alice");

        for _ in 0..3 {
            let (verdict, _) = limiter.check(&p, false);
            assert_eq!(verdict, Verdict::Allowed);
            limiter.record(&p, "/api/v1/query");
        }

        let (verdict, snapshot) = limiter.check(&p, false);
        assert_eq!(
            verdict,
            Verdict::Denied {
                retry_after_secs: 60
            }
        );
        assert!(snapshot.is_limited);
        assert_eq!(snapshot.minute_remaining, 0);
    }

    #[test]
    fn hour_cap_after_minute_cap() {
        // With the minute cap satisfied, the hour cap decides.
        let limiter = limiter_with(LimitConfig {
            per_minute: 100,
            per_hour: 2,
            per_day: 1000,
            concurrent: 10,
            ..Default::default()
        });
        let p = user("bob");
        limiter.record(&p, "/api/v1/query");
        limiter.record(&p, "/api/v1/query");

        let (verdict, _) = limiter.check(&p, false);
        assert_eq!(
            verdict,
            Verdict::Denied {
                retry_after_secs: 3600
            }
        );
    }

    #[test]
    fn concurrent_cap_denies_with_retry_5() {
        let limiter = limiter_with(LimitConfig {
            per_minute: 100,
            per_hour: 1000,
            per_day: 10_000,
            concurrent: 2,
            ..Default::default()
        });
        let p = user("carol");

        let id1 = limiter.record(&p, "/api/v1/query");
        let _id2 = limiter.record(&p, "/api/v1/query");

        let (verdict, _) = limiter.check(&p, false);
        assert_eq!(
            verdict,
            Verdict::Denied {
                retry_after_secs: 5
            }
        );

        // Completing one in-flight request frees a slot.
        limiter.complete(&p, &id1, Some(12));
        let (verdict, _) = limiter.check(&p, false);
        assert_eq!(verdict, Verdict::Allowed);
    }

    #[test]
    fn complete_unknown_id_is_silent() {
        let limiter = limiter_with(LimitConfig::default());
        let p = user("dave");
        limiter.complete(&p, &Uuid::new_v4(), None);

        let id = limiter.record(&p, "/x");
        limiter.complete(&p, &id, None);
        limiter.complete(&p, &id, None); // double complete

        let (_, snapshot) = limiter.check(&p, false);
        assert_eq!(snapshot.concurrent_count, 0);
    }

    #[test]
    fn admin_bypasses_unless_api_client() {
        let limiter = limiter_with(LimitConfig {
            per_minute: 0,
            ..Default::default()
        });

        let (verdict, snapshot) = limiter.check(&Principal::Admin, true);
        assert_eq!(verdict, Verdict::Allowed);
        assert!(!snapshot.is_limited);

        // Admin acting through an API credential is limited as the credential.
        let api = Principal::ApiClient("key-1".into());
        let (verdict, _) = limiter.check(&api, true);
        assert_eq!(
            verdict,
            Verdict::Denied {
                retry_after_secs: 60
            }
        );
    }

    #[test]
    fn unlimited_config_short_circuits() {
        let limiter = limiter_with(LimitConfig {
            per_minute: 0,
            per_hour: 0,
            per_day: 0,
            concurrent: 0,
            unlimited: true,
            ..Default::default()
        });
        let (verdict, _) = limiter.check(&user("eve"), false);
        assert_eq!(verdict, Verdict::Allowed);
    }

    #[test]
    fn zero_per_minute_always_denies() {
        let limiter = limiter_with(LimitConfig {
            per_minute: 0,
            ..Default::default()
        });
        let (verdict, _) = limiter.check(&user("frank"), false);
        assert_eq!(
            verdict,
            Verdict::Denied {
                retry_after_secs: 60
            }
        );
    }

    #[test]
    fn zero_concurrent_always_denies() {
        let limiter = limiter_with(LimitConfig {
            concurrent: 0,
            ..Default::default()
        });
        let (verdict, _) = limiter.check(&user("grace"), false);
        assert_eq!(
            verdict,
            Verdict::Denied {
                retry_after_secs: 5
            }
        );
    }

    #[test]
    fn snapshot_never_mutates() {
        let limiter = limiter_with(LimitConfig::default());
        let p = user("heidi");
        limiter.record(&p, "/x");

        let before = limiter.snapshot(&p, false);
        let after = limiter.snapshot(&p, false);
        assert_eq!(before.minute_count, after.minute_count);
        assert_eq!(before.concurrent_count, 1);
        assert!(!after.is_limited);
    }

    #[test]
    fn record_logs_to_store_best_effort() {
        let store = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::new(store.clone(), LimitsConfig::default());
        limiter.record(&user("ivan"), "/api/v1/query");
        assert_eq!(store.request_log_len(), 1);
    }

    #[test]
    fn cleanup_prunes_store_log() {
        let store = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::new(store.clone(), LimitsConfig::default());
        limiter.record(&user("judy"), "/x");

        // Nothing is old enough yet.
        assert_eq!(limiter.cleanup(Duration::hours(24)), 0);
        // With a zero retention everything goes.
        assert_eq!(limiter.cleanup(Duration::hours(0)), 1);
        assert_eq!(store.request_log_len(), 0);
    }

    #[test]
    fn denied_verdict_converts_to_quota_error() {
        let limiter = limiter_with(LimitConfig {
            per_minute: 0,
            ..Default::default()
        });
        let (verdict, _) = limiter.check(&user("leo"), false);
        match verdict.into_result() {
            Err(ah_domain::Error::QuotaExceeded { retry_after_secs }) => {
                assert_eq!(retry_after_secs, 60);
            }
            other => panic!("expected QuotaExceeded, got {other:?}"),
        }
    }

    #[test]
    fn store_override_changes_limits() {
        let store = Arc::new(MemoryStore::new());
        store.set_rate_limit(
            Some("kate"),
            None,
            LimitConfig {
                per_minute: 1,
                ..Default::default()
            },
        );
        let limiter = RateLimiter::new(store, LimitsConfig::default());
        let p = user("kate");

        let (verdict, _) = limiter.check(&p, false);
        assert_eq!(verdict, Verdict::Allowed);
        limiter.record(&p, "/x");

        let (verdict, _) = limiter.check(&p, false);
        assert_eq!(
            verdict,
            Verdict::Denied {
                retry_after_secs: 60
            }
        );
    }
}
