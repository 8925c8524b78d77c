//! Sliding-window counting with an explicit fail-open policy
//!
//! Every store round-trip is bounded by a timeout. A timeout or store error
//! is converted here into a permissive, `degraded` sample — the rest of the
//! pipeline never sees a raised store error. A cache outage must not become
//! a full site outage, and the conversion is logged loudly rather than
//! swallowed.

use std::sync::Arc;
use std::time::Duration;

use crate::store::{now_ms, CounterStore, WindowRaw};

/// One observation of a window, possibly degraded by a store failure.
#[derive(Debug, Clone, Copy)]
pub struct WindowSample {
    pub count: u64,
    pub oldest_ms: Option<i64>,
    /// True when the store was unreachable and the sample is a permissive
    /// placeholder rather than a real count.
    pub degraded: bool,
}

impl WindowSample {
    fn degraded() -> Self {
        Self {
            count: 0,
            oldest_ms: None,
            degraded: true,
        }
    }

    fn from_raw(raw: WindowRaw) -> Self {
        Self {
            count: raw.count,
            oldest_ms: raw.oldest_ms,
            degraded: false,
        }
    }

    /// Seconds until the oldest marker leaves a window of `window` length.
    pub fn retry_after_secs(&self, window: Duration, at_ms: i64) -> u64 {
        match self.oldest_ms {
            Some(oldest) => {
                let remaining_ms = oldest + window.as_millis() as i64 - at_ms;
                (remaining_ms.max(0) as u64).div_ceil(1000).max(1)
            }
            None => 1,
        }
    }
}

/// Sliding-window counter over a shared store.
#[derive(Clone)]
pub struct SlidingWindow {
    store: Arc<dyn CounterStore>,
    timeout: Duration,
    grace: Duration,
}

impl SlidingWindow {
    pub fn new(store: Arc<dyn CounterStore>, timeout: Duration, grace: Duration) -> Self {
        Self {
            store,
            timeout,
            grace,
        }
    }

    /// Record one request and observe the window. Infallible: store trouble
    /// yields a degraded (permissive) sample.
    pub async fn increment(&self, key: &str, window: Duration) -> WindowSample {
        let now = now_ms();
        let window_ms = window.as_millis() as i64;
        let ttl_ms = window_ms + self.grace.as_millis() as i64;
        let op = self.store.window_increment(key, window_ms, now, ttl_ms);

        match tokio::time::timeout(self.timeout, op).await {
            Ok(Ok(raw)) => WindowSample::from_raw(raw),
            Ok(Err(e)) => {
                tracing::error!(key = %key, error = %e, "counter store error; failing open");
                WindowSample::degraded()
            }
            Err(_) => {
                tracing::error!(
                    key = %key,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "counter store timed out; failing open"
                );
                WindowSample::degraded()
            }
        }
    }

    /// Observe the window without consuming quota. Same fail-open policy.
    pub async fn peek(&self, key: &str, window: Duration) -> WindowSample {
        let now = now_ms();
        let op = self.store.window_peek(key, window.as_millis() as i64, now);

        match tokio::time::timeout(self.timeout, op).await {
            Ok(Ok(raw)) => WindowSample::from_raw(raw),
            Ok(Err(e)) => {
                tracing::error!(key = %key, error = %e, "counter store error; failing open");
                WindowSample::degraded()
            }
            Err(_) => {
                tracing::error!(
                    key = %key,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "counter store timed out; failing open"
                );
                WindowSample::degraded()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCounterStore;
    use async_trait::async_trait;
    use prahari_common::{Error, Result};

    struct UnreachableStore;

    #[async_trait]
    impl CounterStore for UnreachableStore {
        async fn window_increment(
            &self,
            _key: &str,
            _window_ms: i64,
            _now_ms: i64,
            _ttl_ms: i64,
        ) -> Result<WindowRaw> {
            Err(Error::StoreUnavailable("connection refused".to_string()))
        }

        async fn window_peek(&self, _key: &str, _window_ms: i64, _now_ms: i64) -> Result<WindowRaw> {
            Err(Error::StoreUnavailable("connection refused".to_string()))
        }

        async fn remove(&self, _key: &str) -> Result<()> {
            Err(Error::StoreUnavailable("connection refused".to_string()))
        }

        async fn ping(&self) -> Result<()> {
            Err(Error::StoreUnavailable("connection refused".to_string()))
        }
    }

    struct HangingStore;

    #[async_trait]
    impl CounterStore for HangingStore {
        async fn window_increment(
            &self,
            _key: &str,
            _window_ms: i64,
            _now_ms: i64,
            _ttl_ms: i64,
        ) -> Result<WindowRaw> {
            std::future::pending().await
        }

        async fn window_peek(&self, _key: &str, _window_ms: i64, _now_ms: i64) -> Result<WindowRaw> {
            std::future::pending().await
        }

        async fn remove(&self, _key: &str) -> Result<()> {
            std::future::pending().await
        }

        async fn ping(&self) -> Result<()> {
            std::future::pending().await
        }
    }

    fn window(store: Arc<dyn CounterStore>) -> SlidingWindow {
        SlidingWindow::new(store, Duration::from_millis(50), Duration::from_secs(10))
    }

    #[tokio::test]
    async fn healthy_store_counts_normally() {
        let w = window(Arc::new(MemoryCounterStore::new()));
        let first = w.increment("k", Duration::from_secs(60)).await;
        let second = w.increment("k", Duration::from_secs(60)).await;
        assert!(!first.degraded);
        assert_eq!(first.count, 1);
        assert_eq!(second.count, 2);
    }

    #[tokio::test]
    async fn store_error_fails_open() {
        let w = window(Arc::new(UnreachableStore));
        let sample = w.increment("k", Duration::from_secs(60)).await;
        assert!(sample.degraded);
        assert_eq!(sample.count, 0);
    }

    #[tokio::test]
    async fn store_timeout_fails_open() {
        let w = window(Arc::new(HangingStore));
        let sample = w.increment("k", Duration::from_secs(60)).await;
        assert!(sample.degraded);
        assert_eq!(sample.count, 0);

        let peeked = w.peek("k", Duration::from_secs(60)).await;
        assert!(peeked.degraded);
    }

    #[test]
    fn retry_after_counts_down_to_window_edge() {
        let sample = WindowSample {
            count: 5,
            oldest_ms: Some(10_000),
            degraded: false,
        };
        // Oldest at t=10s, 60s window, now t=30s: 40s left
        assert_eq!(sample.retry_after_secs(Duration::from_secs(60), 30_000), 40);
        // Past the edge it clamps to the 1s floor
        assert_eq!(sample.retry_after_secs(Duration::from_secs(60), 80_000), 1);
    }
}
