// =============================================================================
// Shared Cache Adapter — two-tier (remote KV + local TTL map)
// =============================================================================
//
// `get` reads the remote tier first, then falls back to the local tier.
// `set` writes both tiers; a remote failure is tolerated and the local tier
// is still populated. Remote errors are logged and swallowed — they never
// propagate to callers, matching the "cache degraded" error kind, which is
// internal-only.
// =============================================================================

pub mod keys;
pub mod local;

use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use local::LocalTier;

/// Two-tier cache adapter. Cheap to clone (the remote tier is a
/// `ConnectionManager`, which is itself cheaply cloneable and internally
/// reconnects).
#[derive(Clone)]
pub struct SharedCache {
    remote: Option<ConnectionManager>,
    local: std::sync::Arc<LocalTier>,
}

impl SharedCache {
    /// Connect to the remote store at `redis_url`. If the connection cannot
    /// be established at construction time, the cache degrades to
    /// local-only operation for its entire lifetime (matching the
    /// lazy-reconnect posture the original's Redis client takes, just
    /// resolved once at startup rather than per-call).
    pub async fn connect(redis_url: &str) -> Self {
        let remote = match redis::Client::open(redis_url) {
            Ok(client) => match ConnectionManager::new(client).await {
                Ok(conn) => Some(conn),
                Err(e) => {
                    warn!(error = %e, "shared cache: remote connection failed, degrading to local-only");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "shared cache: invalid remote URL, degrading to local-only");
                None
            }
        };

        Self {
            remote,
            local: std::sync::Arc::new(LocalTier::new()),
        }
    }

    /// Construct a cache with no remote tier at all (used in tests and for
    /// deployments that intentionally run single-process).
    pub fn local_only() -> Self {
        Self {
            remote: None,
            local: std::sync::Arc::new(LocalTier::new()),
        }
    }

    /// Read the remote tier, then the local tier. Returns the first
    /// non-expired raw string value found, or `None`.
    async fn get_raw(&self, key: &str) -> Option<String> {
        if let Some(remote) = &self.remote {
            let mut remote = remote.clone();
            match remote.get::<_, Option<String>>(key).await {
                Ok(Some(v)) => return Some(v),
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, key, "shared cache: remote get failed, falling back to local tier");
                }
            }
        }
        self.local.get(key)
    }

    /// Write both tiers. Remote failure is tolerated; local write always
    /// succeeds.
    async fn set_raw(&self, key: &str, value: String, ttl: Duration) {
        if let Some(remote) = &self.remote {
            let mut remote = remote.clone();
            let secs = ttl.as_secs().max(1);
            if let Err(e) = remote
                .set_ex::<_, _, ()>(key, value.clone(), secs)
                .await
            {
                warn!(error = %e, key, "shared cache: remote set failed, local tier still populated");
            }
        }
        self.local.set(key.to_string(), value, ttl);
    }

    async fn delete_raw(&self, key: &str) {
        if let Some(remote) = &self.remote {
            let mut remote = remote.clone();
            if let Err(e) = remote.del::<_, ()>(key).await {
                warn!(error = %e, key, "shared cache: remote delete failed");
            }
        }
        self.local.delete(key);
    }

    /// Typed `get`: deserialises the stored JSON envelope. A deserialization
    /// failure (schema mismatch) is logged and treated as a miss rather than
    /// propagated.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get_raw(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(error = %e, key, "shared cache: schema mismatch, discarding entry");
                None
            }
        }
    }

    /// Same as `get`, but also reports how long ago the value was stored.
    /// The remote tier doesn't keep an insertion timestamp, so age there is
    /// derived from the key's remaining TTL against the `original_ttl` it
    /// was written with; the local tier tracks insertion time directly.
    pub async fn get_with_age<T: DeserializeOwned>(
        &self,
        key: &str,
        original_ttl: Duration,
    ) -> Option<(T, Duration)> {
        let (raw, age) = self.get_raw_with_age(key, original_ttl).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some((value, age)),
            Err(e) => {
                warn!(error = %e, key, "shared cache: schema mismatch, discarding entry");
                None
            }
        }
    }

    async fn get_raw_with_age(&self, key: &str, original_ttl: Duration) -> Option<(String, Duration)> {
        if let Some(remote) = &self.remote {
            let mut remote = remote.clone();
            match remote.get::<_, Option<String>>(key).await {
                Ok(Some(v)) => {
                    let age = match remote.ttl::<_, i64>(key).await {
                        Ok(remaining) if remaining >= 0 => {
                            original_ttl.saturating_sub(Duration::from_secs(remaining as u64))
                        }
                        _ => Duration::ZERO,
                    };
                    return Some((v, age));
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, key, "shared cache: remote get failed, falling back to local tier");
                }
            }
        }
        self.local.get_with_age(key)
    }

    /// Typed `set`: serialises `value` as a JSON envelope.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        match serde_json::to_string(value) {
            Ok(raw) => self.set_raw(key, raw, ttl).await,
            Err(e) => warn!(error = %e, key, "shared cache: failed to serialise value"),
        }
    }

    pub async fn delete(&self, key: &str) {
        self.delete_raw(key).await;
    }

    /// Raw string get/set, used by the token manager's distributed mutex
    /// which stores a plain `"<ts>:<instance>:<pid>"` string rather than a
    /// JSON envelope.
    pub async fn get_string(&self, key: &str) -> Option<String> {
        self.get_raw(key).await
    }

    /// `SET key value NX EX ttl` — set-if-absent, atomic at the remote tier.
    /// Returns `true` if this call created the key. When there is no remote
    /// tier, falls back to a local-tier check-then-set (acceptable: a
    /// single-process deployment has no distributed mutex to coordinate).
    pub async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> bool {
        if let Some(remote) = &self.remote {
            let mut remote = remote.clone();
            let opts = redis::SetOptions::default()
                .conditional_set(redis::ExistenceCheck::NX)
                .with_expiration(redis::SetExpiry::EX(ttl.as_secs().max(1)));
            match remote
                .set_options::<_, _, Option<String>>(key, value, opts)
                .await
            {
                Ok(Some(_)) => return true,
                Ok(None) => return false,
                Err(e) => {
                    warn!(error = %e, key, "shared cache: remote SET NX failed");
                    return false;
                }
            }
        }

        if self.local.get(key).is_some() {
            false
        } else {
            self.local.set(key.to_string(), value.to_string(), ttl);
            true
        }
    }

    /// Compare-and-delete: remove `key` only if its current value equals
    /// `expected`. Implemented via a Lua script at the remote tier so the
    /// check-and-delete is atomic; failures are logged but never fatal since
    /// the lock's own TTL guarantees eventual release.
    pub async fn compare_and_delete(&self, key: &str, expected: &str) {
        if let Some(remote) = &self.remote {
            let mut remote = remote.clone();
            let script = redis::Script::new(
                r"
                if redis.call('GET', KEYS[1]) == ARGV[1] then
                    return redis.call('DEL', KEYS[1])
                else
                    return 0
                end
                ",
            );
            if let Err(e) = script
                .key(key)
                .arg(expected)
                .invoke_async::<i64>(&mut remote)
                .await
            {
                warn!(error = %e, key, "shared cache: compare-and-delete failed (ignored, TTL will expire it)");
            }
            return;
        }

        if self.local.get(key).as_deref() == Some(expected) {
            self.local.delete(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
    struct Payload {
        n: i64,
    }

    #[tokio::test]
    async fn local_only_round_trip() {
        let cache = SharedCache::local_only();
        cache.set("k", &Payload { n: 42 }, Duration::from_secs(5)).await;
        let got: Option<Payload> = cache.get("k").await;
        assert_eq!(got, Some(Payload { n: 42 }));
    }

    #[tokio::test]
    async fn local_only_miss_returns_none() {
        let cache = SharedCache::local_only();
        let got: Option<Payload> = cache.get("missing").await;
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn set_nx_only_succeeds_once() {
        let cache = SharedCache::local_only();
        assert!(cache.set_nx("lock", "v1", Duration::from_secs(5)).await);
        assert!(!cache.set_nx("lock", "v2", Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn compare_and_delete_only_removes_matching_value() {
        let cache = SharedCache::local_only();
        cache.set_nx("lock", "mine", Duration::from_secs(5)).await;
        cache.compare_and_delete("lock", "not-mine").await;
        assert!(cache.get_string("lock").await.is_some());
        cache.compare_and_delete("lock", "mine").await;
        assert!(cache.get_string("lock").await.is_none());
    }

    #[tokio::test]
    async fn delete_removes_value() {
        let cache = SharedCache::local_only();
        cache.set("k", &Payload { n: 1 }, Duration::from_secs(5)).await;
        cache.delete("k").await;
        let got: Option<Payload> = cache.get("k").await;
        assert_eq!(got, None);
    }
}
