// =============================================================================
// Async Sliding-Window Rate Limiter
// =============================================================================
//
// Implements a true sliding-window rate limiter using a deque of monotonic
// timestamps. Unlike fixed-window limiters, this gives an exact window with
// no boundary bursts.
//
// Usage:
//   let limiter = RateLimiter::new(19, Duration::from_secs(1), "kis");
//   limiter.acquire(|wait| async move { info!(?wait, "throttled") }).await;
//
// `acquire` never refuses admission — it only delays. Callers that need a
// bounded retry budget must track their own attempts and raise
// `CoreError::RateLimitExhausted` themselves; the limiter never raises.
// =============================================================================

pub mod registry;

use std::collections::VecDeque;
use std::future::Future;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::warn;

/// Fixed slack added to every computed wait to absorb clock/scheduler skew
/// between sleep scheduling and window expiry.
const WAIT_SLACK: Duration = Duration::from_millis(50);

/// Point-in-time statistics snapshot. Returned by value so readers never
/// hold a lock on the limiter's internal state.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStats {
    pub name: String,
    pub rate: u32,
    pub period_secs: f64,
    pub total_requests: u64,
    pub throttled_requests: u64,
    pub total_wait_time_secs: f64,
    pub current_window_count: usize,
}

struct LimiterState {
    timestamps: VecDeque<Instant>,
    total_requests: u64,
    throttled_requests: u64,
    total_wait_time: Duration,
}

/// A single per-key sliding-window rate limiter.
///
/// `rate` and `period` are immutable for the lifetime of the limiter;
/// mutable state (the timestamp deque and statistics) lives behind a
/// `tokio::sync::Mutex` so `acquire` can release it across the sleep.
pub struct RateLimiter {
    pub rate: u32,
    pub period: Duration,
    pub name: String,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(rate: u32, period: Duration, name: impl Into<String>) -> Self {
        assert!(rate > 0, "rate must be positive");
        assert!(period > Duration::ZERO, "period must be positive");

        Self {
            rate,
            period,
            name: name.into(),
            state: Mutex::new(LimiterState {
                timestamps: VecDeque::with_capacity(rate as usize + 10),
                total_requests: 0,
                throttled_requests: 0,
                total_wait_time: Duration::ZERO,
            }),
        }
    }

    /// Block until the caller may proceed, honouring the sliding window.
    ///
    /// `on_block` is invoked — with the mutex released — each time admission
    /// is deferred, receiving the computed wait duration. Its own errors (it
    /// may be async) are logged and otherwise ignored; they never abort
    /// admission.
    pub async fn acquire<F, Fut>(&self, mut on_block: F)
    where
        F: FnMut(Duration) -> Fut,
        Fut: Future<Output = ()>,
    {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let window_start = now.checked_sub(self.period).unwrap_or(now);

                while let Some(&front) = state.timestamps.front() {
                    if front < window_start {
                        state.timestamps.pop_front();
                    } else {
                        break;
                    }
                }

                if (state.timestamps.len() as u32) < self.rate {
                    state.timestamps.push_back(now);
                    state.total_requests += 1;
                    return;
                }

                let oldest = *state.timestamps.front().expect("at rate limit implies non-empty");
                let wait = (oldest + self.period)
                    .saturating_duration_since(now)
                    + WAIT_SLACK;

                state.throttled_requests += 1;
                state.total_wait_time += wait;

                warn!(
                    limiter = %self.name,
                    rate = self.rate,
                    period_secs = self.period.as_secs_f64(),
                    wait_secs = wait.as_secs_f64(),
                    "rate limit reached, waiting"
                );

                wait
                // mutex guard dropped here, released before the sleep below
            };

            on_block(wait).await;
            tokio::time::sleep(wait).await;
            // loop back and re-check the window after sleeping
        }
    }

    /// Convenience wrapper for callers with no throttle callback.
    pub async fn acquire_silent(&self) {
        self.acquire(|_wait| async {}).await;
    }

    pub async fn stats(&self) -> RateLimiterStats {
        let state = self.state.lock().await;
        RateLimiterStats {
            name: self.name.clone(),
            rate: self.rate,
            period_secs: self.period.as_secs_f64(),
            total_requests: state.total_requests,
            throttled_requests: state.throttled_requests,
            total_wait_time_secs: state.total_wait_time.as_secs_f64(),
            current_window_count: state.timestamps.len(),
        }
    }

    pub async fn reset_stats(&self) {
        let mut state = self.state.lock().await;
        state.total_requests = 0;
        state.throttled_requests = 0;
        state.total_wait_time = Duration::ZERO;
    }
}
