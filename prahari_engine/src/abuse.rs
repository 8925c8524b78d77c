//! Violation tracking and temporary block state
//!
//! Denied decisions accumulate into a per-identity violation counter with
//! its own decaying window, much longer than the request-rate windows.
//! Crossing the threshold promotes the identity into a temporary block
//! whose duration doubles on repeat offenses, up to a cap.
//!
//! The tracker writes block state and is read by the trust scorer
//! (violation count) and by the limiter (block short-circuit). The reverse
//! direction never happens.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use fred::clients::Client;
use fred::interfaces::*;
use fred::types::Expiration;
use std::sync::Arc;
use std::time::Duration;

use prahari_common::{Error, Identity, Result};

use crate::config::AbuseConfig;
use crate::store::now_ms;

const VIOLATION_PREFIX: &str = "abuse:v:";
const BLOCK_PREFIX: &str = "abuse:b:";

/// Persistence for violation counters and block state.
#[async_trait]
pub trait AbuseStore: Send + Sync {
    /// Bump the violation counter and refresh its decay window.
    /// Returns the post-increment count.
    async fn increment_violation(&self, key: &str, window: Duration) -> Result<u64>;

    /// Current violation count without incrementing.
    async fn violation_count(&self, key: &str) -> Result<u64>;

    /// Record a block that expires at `until`.
    async fn set_block(&self, key: &str, until: DateTime<Utc>, ttl: Duration) -> Result<()>;

    /// The active block expiry, if one exists.
    async fn block_state(&self, key: &str) -> Result<Option<DateTime<Utc>>>;
}

/// Redis-backed abuse persistence.
#[derive(Clone)]
pub struct RedisAbuseStore {
    client: Client,
}

impl RedisAbuseStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AbuseStore for RedisAbuseStore {
    async fn increment_violation(&self, key: &str, window: Duration) -> Result<u64> {
        let key = format!("{}{}", VIOLATION_PREFIX, key);
        let count: i64 = self
            .client
            .incr(&key)
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
        // Refresh on every hit: the window decays from the latest violation
        let _: bool = self
            .client
            .expire(&key, window.as_secs() as i64, None)
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
        Ok(count.max(0) as u64)
    }

    async fn violation_count(&self, key: &str) -> Result<u64> {
        let key = format!("{}{}", VIOLATION_PREFIX, key);
        let count: Option<i64> = self
            .client
            .get(&key)
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
        Ok(count.unwrap_or(0).max(0) as u64)
    }

    async fn set_block(&self, key: &str, until: DateTime<Utc>, ttl: Duration) -> Result<()> {
        let key = format!("{}{}", BLOCK_PREFIX, key);
        self.client
            .set::<(), _, _>(
                &key,
                until.timestamp_millis(),
                Some(Expiration::PX(ttl.as_millis() as i64)),
                None,
                false,
            )
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn block_state(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        let key = format!("{}{}", BLOCK_PREFIX, key);
        let until_ms: Option<i64> = self
            .client
            .get(&key)
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
        Ok(until_ms
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .filter(|until| *until > Utc::now()))
    }
}

/// In-memory abuse persistence for tests and single-node deployments.
#[derive(Default)]
pub struct MemoryAbuseStore {
    violations: DashMap<String, (u64, i64)>,
    blocks: DashMap<String, i64>,
}

impl MemoryAbuseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AbuseStore for MemoryAbuseStore {
    async fn increment_violation(&self, key: &str, window: Duration) -> Result<u64> {
        let now = now_ms();
        let expires = now + window.as_millis() as i64;
        let mut entry = self.violations.entry(key.to_string()).or_insert((0, expires));
        if entry.1 <= now {
            *entry = (0, expires);
        }
        entry.0 += 1;
        entry.1 = expires;
        Ok(entry.0)
    }

    async fn violation_count(&self, key: &str) -> Result<u64> {
        Ok(self
            .violations
            .get(key)
            .filter(|entry| entry.1 > now_ms())
            .map(|entry| entry.0)
            .unwrap_or(0))
    }

    async fn set_block(&self, key: &str, until: DateTime<Utc>, _ttl: Duration) -> Result<()> {
        self.blocks
            .insert(key.to_string(), until.timestamp_millis());
        Ok(())
    }

    async fn block_state(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .blocks
            .get(key)
            .and_then(|ms| Utc.timestamp_millis_opt(*ms).single())
            .filter(|until| *until > Utc::now()))
    }
}

/// Tracks violations per identity and manages temporary blocks.
#[derive(Clone)]
pub struct AbuseTracker {
    store: Arc<dyn AbuseStore>,
    config: AbuseConfig,
}

impl AbuseTracker {
    pub fn new(store: Arc<dyn AbuseStore>, config: AbuseConfig) -> Self {
        Self { store, config }
    }

    /// Record one denied decision. Crossing the threshold sets (or extends)
    /// a temporary block with exponential duration. Store trouble degrades
    /// to a no-op; violation tracking is not worth failing a request over.
    pub async fn record_violation(&self, identity: &Identity) -> u64 {
        let key = identity.key();
        let count = match self
            .store
            .increment_violation(&key, self.config.violation_window)
            .await
        {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(identity = %identity, error = %e, "violation record failed");
                return 0;
            }
        };

        if count >= self.config.block_threshold {
            let strikes = (count - self.config.block_threshold).min(16) as u32;
            let duration = self
                .config
                .base_block
                .saturating_mul(1u32 << strikes)
                .min(self.config.max_block);
            let until = Utc::now()
                + chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero());
            if let Err(e) = self.store.set_block(&key, until, duration).await {
                tracing::error!(identity = %identity, error = %e, "block write failed");
            } else {
                tracing::warn!(
                    identity = %identity,
                    violations = count,
                    block_secs = duration.as_secs(),
                    "identity temporarily blocked"
                );
            }
        }
        count
    }

    /// Whether the identity is currently under a temporary block.
    pub async fn is_blocked(&self, identity: &Identity) -> bool {
        self.blocked_until(identity).await.is_some()
    }

    /// Expiry of the active block, if any. Store trouble reads as unblocked.
    pub async fn blocked_until(&self, identity: &Identity) -> Option<DateTime<Utc>> {
        match self.store.block_state(&identity.key()).await {
            Ok(state) => state,
            Err(e) => {
                tracing::error!(identity = %identity, error = %e, "block lookup failed; failing open");
                None
            }
        }
    }

    /// Current violation count (a trust-score input). Store trouble reads
    /// as a clean history.
    pub async fn violation_count(&self, identity: &Identity) -> u64 {
        match self.store.violation_count(&identity.key()).await {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(identity = %identity, error = %e, "violation lookup failed");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn tracker() -> AbuseTracker {
        AbuseTracker::new(Arc::new(MemoryAbuseStore::new()), AbuseConfig::default())
    }

    fn short_config() -> AbuseConfig {
        AbuseConfig {
            violation_window: Duration::from_millis(50),
            block_threshold: 3,
            base_block: Duration::from_secs(60),
            max_block: Duration::from_secs(600),
        }
    }

    #[tokio::test]
    async fn below_threshold_no_block() {
        let tracker = tracker();
        let identity = Identity::User(Uuid::new_v4());

        for _ in 0..5 {
            tracker.record_violation(&identity).await;
        }
        assert!(!tracker.is_blocked(&identity).await);
        assert_eq!(tracker.violation_count(&identity).await, 5);
    }

    #[tokio::test]
    async fn crossing_threshold_blocks() {
        let tracker = AbuseTracker::new(Arc::new(MemoryAbuseStore::new()), short_config());
        let identity = Identity::Ip("203.0.113.9".to_string());

        tracker.record_violation(&identity).await;
        tracker.record_violation(&identity).await;
        assert!(!tracker.is_blocked(&identity).await);

        tracker.record_violation(&identity).await;
        let until = tracker.blocked_until(&identity).await.unwrap();
        assert!(until > Utc::now());
    }

    #[tokio::test]
    async fn repeat_offenses_extend_the_block() {
        let tracker = AbuseTracker::new(Arc::new(MemoryAbuseStore::new()), short_config());
        let identity = Identity::Ip("203.0.113.10".to_string());

        for _ in 0..3 {
            tracker.record_violation(&identity).await;
        }
        let first = tracker.blocked_until(&identity).await.unwrap();

        for _ in 0..3 {
            tracker.record_violation(&identity).await;
        }
        let extended = tracker.blocked_until(&identity).await.unwrap();
        assert!(extended > first, "block duration must grow with offenses");
    }

    #[tokio::test]
    async fn block_duration_is_capped() {
        let config = AbuseConfig {
            violation_window: Duration::from_secs(60),
            block_threshold: 1,
            base_block: Duration::from_secs(60),
            max_block: Duration::from_secs(120),
        };
        let tracker = AbuseTracker::new(Arc::new(MemoryAbuseStore::new()), config);
        let identity = Identity::Ip("203.0.113.11".to_string());

        for _ in 0..20 {
            tracker.record_violation(&identity).await;
        }
        let until = tracker.blocked_until(&identity).await.unwrap();
        let remaining = until - Utc::now();
        assert!(remaining.num_seconds() <= 121);
    }

    #[tokio::test]
    async fn violations_decay_after_the_window() {
        let tracker = AbuseTracker::new(Arc::new(MemoryAbuseStore::new()), short_config());
        let identity = Identity::User(Uuid::new_v4());

        tracker.record_violation(&identity).await;
        assert_eq!(tracker.violation_count(&identity).await, 1);

        tokio::time::sleep(Duration::from_millis(70)).await;
        assert_eq!(tracker.violation_count(&identity).await, 0);
    }
}
