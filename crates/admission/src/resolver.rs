//! Per-principal limit configuration with a TTL cache.
//!
//! Resolved configs are cached for `limits.config_ttl_secs` (default
//! 5 min) so the store is not consulted on every admission check. Store
//! read failures are logged and served as the built-in defaults — a
//! broken store must never fail a request on its own.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use ah_domain::config::LimitConfig;
use ah_domain::store::Store;
use ah_domain::Principal;

struct CachedConfig {
    config: LimitConfig,
    cached_at: Instant,
}

pub struct ConfigResolver {
    store: Arc<dyn Store>,
    defaults: LimitConfig,
    ttl: Duration,
    cache: Mutex<HashMap<String, CachedConfig>>,
}

impl ConfigResolver {
    pub fn new(store: Arc<dyn Store>, defaults: LimitConfig, ttl: Duration) -> Self {
        Self {
            store,
            defaults,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve the limit config for a principal: cache → store → defaults.
    pub fn resolve(&self, principal: &Principal) -> LimitConfig {
        let key = principal.key();

        {
            let cache = self.cache.lock();
            if let Some(entry) = cache.get(&key) {
                if entry.cached_at.elapsed() < self.ttl {
                    return entry.config.clone();
                }
            }
        }

        let config = match self
            .store
            .get_rate_limit(principal.user_id(), principal.api_key_id())
        {
            Ok(Some(config)) => config,
            Ok(None) => self.defaults.clone(),
            Err(e) => {
                tracing::warn!(principal = %key, error = %e, "rate-limit config read failed, serving defaults");
                self.defaults.clone()
            }
        };

        self.cache.lock().insert(
            key,
            CachedConfig {
                config: config.clone(),
                cached_at: Instant::now(),
            },
        );
        config
    }

    /// Drop every cached entry. Called when limit configuration changes.
    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    pub fn defaults(&self) -> &LimitConfig {
        &self.defaults
    }
}
