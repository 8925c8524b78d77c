//! Counter store backends for sliding-window counting
//!
//! The engine coordinates across processes exclusively through this store.
//! Correctness relies on the backend's atomicity guarantee: prune + add +
//! count + expiry-refresh happen in one round-trip, never as a multi-step
//! client-side transaction.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use fred::clients::Client;
use fred::interfaces::*;
use fred::types::config::Config as RedisConfig;
use std::sync::atomic::{AtomicU64, Ordering};

use prahari_common::{Error, Result};

/// Current wall-clock time in milliseconds since the epoch.
pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Raw result of a window operation against the store.
#[derive(Debug, Clone, Copy)]
pub struct WindowRaw {
    /// Markers inside the window, including the one just added (if any)
    pub count: u64,
    /// Timestamp of the oldest marker still in the window
    pub oldest_ms: Option<i64>,
}

/// Atomic sliding-window operations.
///
/// `window_increment` must execute remove-stale, add-marker, read-count and
/// refresh-expiry as a single atomic unit against the backend; two concurrent
/// calls for the same key must never both observe a pre-increment count.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Add a marker at `now_ms` and return the resulting window state.
    /// The key's expiry is refreshed to `ttl_ms` so abandoned keys self-clean.
    async fn window_increment(
        &self,
        key: &str,
        window_ms: i64,
        now_ms: i64,
        ttl_ms: i64,
    ) -> Result<WindowRaw>;

    /// Read the window state without adding a marker.
    async fn window_peek(&self, key: &str, window_ms: i64, now_ms: i64) -> Result<WindowRaw>;

    /// Drop all markers for a key (admin reset).
    async fn remove(&self, key: &str) -> Result<()>;

    /// Check the store connection.
    async fn ping(&self) -> Result<()>;
}

/// Initialize a Redis client for the counter store
pub async fn init_client(redis_url: &str) -> Result<Client> {
    let config =
        RedisConfig::from_url(redis_url).map_err(|e| Error::Configuration(e.to_string()))?;
    let client = Client::new(config, None, None, None);
    client
        .init()
        .await
        .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
    Ok(client)
}

/// Atomic prune + add + count + expire. One EVAL, one round-trip.
const WINDOW_INCREMENT_SCRIPT: &str = r#"
local window_ms = tonumber(ARGV[1])
local now_ms = tonumber(ARGV[2])
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', now_ms - window_ms)
redis.call('ZADD', KEYS[1], now_ms, ARGV[3])
local count = redis.call('ZCARD', KEYS[1])
local oldest = redis.call('ZRANGE', KEYS[1], 0, 0, 'WITHSCORES')
redis.call('PEXPIRE', KEYS[1], tonumber(ARGV[4]))
local oldest_ms = now_ms
if oldest[2] then oldest_ms = math.floor(tonumber(oldest[2])) end
return {count, oldest_ms}
"#;

/// Read-only window view. ZCOUNT over the live range, no pruning.
const WINDOW_PEEK_SCRIPT: &str = r#"
local floor_ms = tonumber(ARGV[2]) - tonumber(ARGV[1])
local count = redis.call('ZCOUNT', KEYS[1], '(' .. floor_ms, '+inf')
local oldest = redis.call('ZRANGEBYSCORE', KEYS[1], '(' .. floor_ms, '+inf', 'WITHSCORES', 'LIMIT', 0, 1)
local oldest_ms = 0
if oldest[2] then oldest_ms = math.floor(tonumber(oldest[2])) end
return {count, oldest_ms}
"#;

/// Distributed counter store backed by Redis sorted sets.
#[derive(Clone)]
pub struct RedisCounterStore {
    client: Client,
}

impl RedisCounterStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Marker member: timestamp plus a random suffix, since the timestamp
    /// alone is not unique under concurrency.
    fn marker(now_ms: i64) -> String {
        format!("{}-{:08x}", now_ms, rand::random::<u32>())
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn window_increment(
        &self,
        key: &str,
        window_ms: i64,
        now_ms: i64,
        ttl_ms: i64,
    ) -> Result<WindowRaw> {
        let reply: Vec<i64> = self
            .client
            .eval(
                WINDOW_INCREMENT_SCRIPT,
                vec![key.to_string()],
                vec![
                    window_ms.to_string(),
                    now_ms.to_string(),
                    Self::marker(now_ms),
                    ttl_ms.to_string(),
                ],
            )
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;

        parse_window_reply(&reply)
    }

    async fn window_peek(&self, key: &str, window_ms: i64, now_ms: i64) -> Result<WindowRaw> {
        let reply: Vec<i64> = self
            .client
            .eval(
                WINDOW_PEEK_SCRIPT,
                vec![key.to_string()],
                vec![window_ms.to_string(), now_ms.to_string()],
            )
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;

        parse_window_reply(&reply)
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.client
            .del::<i64, _>(key)
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.client
            .ping::<()>(None)
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
        Ok(())
    }
}

fn parse_window_reply(reply: &[i64]) -> Result<WindowRaw> {
    match reply {
        [count, oldest_ms] => Ok(WindowRaw {
            count: (*count).max(0) as u64,
            oldest_ms: if *oldest_ms > 0 { Some(*oldest_ms) } else { None },
        }),
        other => Err(Error::StoreUnavailable(format!(
            "unexpected window reply shape: {} elements",
            other.len()
        ))),
    }
}

/// In-memory counter store for tests and single-node deployments.
///
/// Per-key atomicity comes from the `DashMap` entry lock; the window
/// algorithm is the same prune-add-count sequence the Redis script runs.
#[derive(Default)]
pub struct MemoryCounterStore {
    entries: DashMap<String, Vec<(i64, u64)>>,
    seq: AtomicU64,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys (primarily useful for tests).
    pub fn key_count(&self) -> usize {
        self.entries.len()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn window_increment(
        &self,
        key: &str,
        window_ms: i64,
        now_ms: i64,
        _ttl_ms: i64,
    ) -> Result<WindowRaw> {
        let mut entry = self.entries.entry(key.to_string()).or_default();
        entry.retain(|(ts, _)| *ts > now_ms - window_ms);
        entry.push((now_ms, self.seq.fetch_add(1, Ordering::Relaxed)));
        let count = entry.len() as u64;
        let oldest_ms = entry.iter().map(|(ts, _)| *ts).min();
        Ok(WindowRaw { count, oldest_ms })
    }

    async fn window_peek(&self, key: &str, window_ms: i64, now_ms: i64) -> Result<WindowRaw> {
        let raw = match self.entries.get(key) {
            Some(entry) => {
                let live = entry
                    .iter()
                    .filter(|(ts, _)| *ts > now_ms - window_ms)
                    .map(|(ts, _)| *ts);
                WindowRaw {
                    count: live.clone().count() as u64,
                    oldest_ms: live.min(),
                }
            }
            None => WindowRaw {
                count: 0,
                oldest_ms: None,
            },
        };
        Ok(raw)
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
