// =============================================================================
// Limiter Registry
// =============================================================================
//
// Mapping from "{provider}|{api_key}" to a RateLimiter. Concurrent creation
// is race-free via a double-checked lock around the registry map itself —
// the registry mutex protects only registry mutation, never the limiters.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::RateLimiter;

/// Default `(rate, period_secs)` per provider. Unknown providers fall back
/// to the `kis` default, matching the original's "safe fallback" behaviour.
const DEFAULT_RATE_LIMITS: &[(&str, u32, f64)] = &[("kis", 19, 1.0), ("upbit", 10, 1.0)];

fn default_for(provider: &str) -> (u32, f64) {
    DEFAULT_RATE_LIMITS
        .iter()
        .find(|(p, _, _)| *p == provider)
        .map(|(_, r, p)| (*r, *p))
        .unwrap_or((19, 1.0))
}

/// Process-wide registry of per-endpoint rate limiters.
pub struct LimiterRegistry {
    limiters: Mutex<HashMap<String, Arc<RateLimiter>>>,
}

impl LimiterRegistry {
    pub fn new() -> Self {
        Self {
            limiters: Mutex::new(HashMap::new()),
        }
    }

    /// Return the existing limiter for `"{provider}|{key}"`, creating one
    /// under the registry mutex (double-checked) if it does not exist yet.
    pub fn get_limiter(
        &self,
        provider: &str,
        key: &str,
        rate: Option<u32>,
        period: Option<Duration>,
    ) -> Arc<RateLimiter> {
        let registry_key = format!("{provider}|{key}");

        if let Some(existing) = self.limiters.lock().get(&registry_key) {
            return existing.clone();
        }

        let mut limiters = self.limiters.lock();
        if let Some(existing) = limiters.get(&registry_key) {
            return existing.clone();
        }

        let (default_rate, default_period) = default_for(provider);
        let rate = rate.unwrap_or(default_rate);
        let period = period.unwrap_or(Duration::from_secs_f64(default_period));

        let limiter = Arc::new(RateLimiter::new(rate, period, registry_key.clone()));
        limiters.insert(registry_key, limiter.clone());
        limiter
    }

    /// Clear the registry. Test-only — deterministic test suites need a
    /// way to reset global limiter state between cases.
    pub fn reset(&self) {
        self.limiters.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.limiters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LimiterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_limiter_is_idempotent() {
        let registry = LimiterRegistry::new();
        let a = registry.get_limiter("kis", "FOO", None, None);
        let b = registry.get_limiter("kis", "FOO", None, None);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn distinct_keys_produce_distinct_instances() {
        let registry = LimiterRegistry::new();
        let a = registry.get_limiter("kis", "FOO", None, None);
        let b = registry.get_limiter("kis", "BAR", None, None);
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn unknown_provider_uses_default_19_1s() {
        let registry = LimiterRegistry::new();
        let l = registry.get_limiter("mystery", "X", None, None);
        assert_eq!(l.rate, 19);
        assert_eq!(l.period, Duration::from_secs(1));
    }

    #[test]
    fn upbit_default_is_10_per_second() {
        let registry = LimiterRegistry::new();
        let l = registry.get_limiter("upbit", "GET /v1/ticker", None, None);
        assert_eq!(l.rate, 10);
        assert_eq!(l.period, Duration::from_secs(1));
    }

    #[test]
    fn explicit_rate_overrides_default() {
        let registry = LimiterRegistry::new();
        let l = registry.get_limiter("kis", "CUSTOM", Some(5), Some(Duration::from_millis(500)));
        assert_eq!(l.rate, 5);
        assert_eq!(l.period, Duration::from_millis(500));
    }

    #[test]
    fn reset_clears_the_registry() {
        let registry = LimiterRegistry::new();
        registry.get_limiter("kis", "FOO", None, None);
        assert_eq!(registry.len(), 1);
        registry.reset();
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn concurrent_get_limiter_for_distinct_keys_never_collides() {
        let registry = Arc::new(LimiterRegistry::new());
        let mut handles = Vec::new();
        for i in 0..32 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.get_limiter("kis", &format!("key-{i}"), None, None)
            }));
        }
        let mut seen = std::collections::HashSet::new();
        for h in handles {
            let limiter = h.await.unwrap();
            seen.insert(Arc::as_ptr(&limiter) as usize);
        }
        assert_eq!(seen.len(), 32);
    }
}
