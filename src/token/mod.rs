// =============================================================================
// Shared Token Manager — cluster-wide OAuth bearer refresh
// =============================================================================
//
// States: absent -> present(valid) -> present(expired) -> absent.
//
// `refresh` first re-reads the cached token a few times (cheap, no lock) so
// that under a stampede most callers return an existing fresh token without
// ever touching the distributed mutex. Only the caller that actually wins
// the mutex performs the OAuth exchange; everyone else either observes the
// winner's token while polling, or times out.
// =============================================================================

use std::process;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::cache::{keys, SharedCache};
use crate::errors::{CoreError, CoreResult};

/// Minimum buffer subtracted from `expires_at` before a token is considered
/// invalid. Never go below this even if a caller requests a smaller buffer.
const MIN_EXPIRY_BUFFER: Duration = Duration::from_secs(60);

/// TTL of the distributed refresh lock.
const LOCK_TTL: Duration = Duration::from_secs(30);

/// Record stored in the shared cache under [`keys::TOKEN_KEY`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,
    pub expires_at: f64,
    pub created_at: f64,
}

impl TokenRecord {
    fn is_valid(&self, buffer: Duration) -> bool {
        let now = now_secs();
        now < self.expires_at - buffer.as_secs_f64()
    }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Abstract OAuth exchange. Implementors perform the actual HTTP call to the
/// broker's token endpoint; the token manager only orchestrates refresh
/// coordination around it.
#[async_trait]
pub trait TokenFetcher: Send + Sync {
    /// Returns `(access_token, expires_in_seconds)`.
    async fn fetch(&self) -> CoreResult<(String, u64)>;
}

pub struct TokenManager {
    cache: SharedCache,
    expiry_buffer: Duration,
    instance_id: String,
}

impl TokenManager {
    pub fn new(cache: SharedCache) -> Self {
        Self::with_buffer(cache, MIN_EXPIRY_BUFFER)
    }

    pub fn with_buffer(cache: SharedCache, expiry_buffer: Duration) -> Self {
        let expiry_buffer = expiry_buffer.max(MIN_EXPIRY_BUFFER);
        Self {
            cache,
            expiry_buffer,
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    async fn read_valid_token(&self) -> Option<String> {
        let record: TokenRecord = self.cache.get(keys::TOKEN_KEY).await?;
        if record.is_valid(self.expiry_buffer) {
            Some(record.access_token)
        } else {
            None
        }
    }

    fn lock_value(&self) -> String {
        format!("{}:{}:{}", now_secs(), self.instance_id, process::id())
    }

    async fn acquire_lock(&self) -> Option<String> {
        let value = self.lock_value();
        if self.cache.set_nx(keys::TOKEN_LOCK_KEY, &value, LOCK_TTL).await {
            Some(value)
        } else {
            None
        }
    }

    async fn release_lock(&self, value: &str) {
        self.cache.compare_and_delete(keys::TOKEN_LOCK_KEY, value).await;
    }

    /// Refresh the cached token, coordinating across all process replicas
    /// via the distributed mutex. Returns the (possibly freshly-minted)
    /// access token.
    pub async fn refresh(&self, fetcher: &dyn TokenFetcher) -> CoreResult<String> {
        // Step 1: a few cheap pre-checks before touching the lock.
        for attempt in 0..3 {
            if let Some(token) = self.read_valid_token().await {
                return Ok(token);
            }
            if attempt < 2 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }

        // Step 2: try to acquire the refresh mutex; on failure, poll for up
        // to 3s (30 x 100ms) for a peer to finish.
        let lock_value = match self.acquire_lock().await {
            Some(v) => v,
            None => {
                for _ in 0..30 {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    if let Some(token) = self.read_valid_token().await {
                        return Ok(token);
                    }
                }
                return Err(CoreError::UpstreamAuth {
                    provider: "kis".to_string(),
                    detail: "refresh lock acquisition failed".to_string(),
                });
            }
        };

        // Step 3: under the mutex, re-read once more — a peer may have
        // refreshed while we waited for the lock.
        if let Some(token) = self.read_valid_token().await {
            self.release_lock(&lock_value).await;
            return Ok(token);
        }

        // Step 4: perform the actual OAuth exchange.
        let fetch_result = fetcher.fetch().await;
        let result = match fetch_result {
            Ok((access_token, expires_in)) => {
                let created_at = now_secs();
                let record = TokenRecord {
                    access_token: access_token.clone(),
                    expires_at: created_at + expires_in as f64,
                    created_at,
                };
                let ttl = Duration::from_secs(expires_in) + self.expiry_buffer;
                self.cache.set(keys::TOKEN_KEY, &record, ttl).await;
                info!("token refreshed under distributed lock");
                Ok(access_token)
            }
            Err(e) => Err(e),
        };

        // Step 5: release, regardless of outcome.
        self.release_lock(&lock_value).await;
        result
    }

    /// Explicitly invalidate the cached token (e.g. after a broker's
    /// token-expired error code).
    pub async fn clear(&self) {
        self.cache.delete(keys::TOKEN_KEY).await;
    }

    /// Read the current token without triggering a refresh.
    pub async fn current(&self) -> Option<String> {
        self.read_valid_token().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingFetcher {
        calls: Arc<AtomicUsize>,
        delay: Duration,
    }

    #[async_trait]
    impl TokenFetcher for CountingFetcher {
        async fn fetch(&self) -> CoreResult<(String, u64)> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(("T".to_string(), 3600))
        }
    }

    struct FailingFetcher;

    #[async_trait]
    impl TokenFetcher for FailingFetcher {
        async fn fetch(&self) -> CoreResult<(String, u64)> {
            Err(CoreError::UpstreamUnavailable {
                provider: "kis".into(),
                detail: "boom".into(),
            })
        }
    }

    #[tokio::test]
    async fn stampede_triggers_exactly_one_fetch() {
        let cache = SharedCache::local_only();
        let manager = Arc::new(TokenManager::new(cache));
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = Arc::new(CountingFetcher {
            calls: calls.clone(),
            delay: Duration::from_millis(100),
        });

        let mut handles = Vec::new();
        for _ in 0..50 {
            let manager = manager.clone();
            let fetcher = fetcher.clone();
            handles.push(tokio::spawn(async move {
                manager.refresh(fetcher.as_ref()).await.unwrap()
            }));
        }

        let mut tokens = Vec::new();
        for h in handles {
            tokens.push(h.await.unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(tokens.iter().all(|t| t == "T"));
    }

    #[tokio::test]
    async fn subsequent_reads_do_not_refetch() {
        let cache = SharedCache::local_only();
        let manager = TokenManager::new(cache);
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = CountingFetcher {
            calls: calls.clone(),
            delay: Duration::ZERO,
        };

        manager.refresh(&fetcher).await.unwrap();
        manager.refresh(&fetcher).await.unwrap();
        manager.refresh(&fetcher).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_token_is_considered_invalid() {
        let cache = SharedCache::local_only();
        let record = TokenRecord {
            access_token: "stale".into(),
            expires_at: now_secs() + 30.0, // within the 60s buffer
            created_at: now_secs(),
        };
        cache
            .set(keys::TOKEN_KEY, &record, Duration::from_secs(120))
            .await;

        let manager = TokenManager::new(cache);
        assert_eq!(manager.current().await, None);
    }

    #[tokio::test]
    async fn fetcher_error_propagates_and_releases_lock() {
        let cache = SharedCache::local_only();
        let manager = TokenManager::new(cache);
        let err = manager.refresh(&FailingFetcher).await;
        assert!(err.is_err());

        // A subsequent caller must be able to acquire the lock — proving it
        // was released even though the fetch failed.
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = CountingFetcher {
            calls: calls.clone(),
            delay: Duration::ZERO,
        };
        let token = manager.refresh(&fetcher).await.unwrap();
        assert_eq!(token, "T");
    }

    #[tokio::test]
    async fn clear_removes_cached_token() {
        let cache = SharedCache::local_only();
        let manager = TokenManager::new(cache);
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = CountingFetcher {
            calls: calls.clone(),
            delay: Duration::ZERO,
        };
        manager.refresh(&fetcher).await.unwrap();
        manager.clear().await;
        assert_eq!(manager.current().await, None);
    }
}
