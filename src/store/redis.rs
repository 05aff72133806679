// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Redis-backed shared store.
//!
//! One [`ConnectionManager`] is created at start-up and cloned into every
//! call; clones share the same multiplexed connection and reconnect on
//! their own.

use super::{SharedStore, WindowOutcome};
use crate::error::StoreError;
use ::redis::aio::ConnectionManager;
use ::redis::{Client, Script};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Sliding-window admission, evaluated entirely inside Redis.
///
/// KEYS[1] window key
/// ARGV[1] limit
/// ARGV[2] window length in milliseconds
/// ARGV[3] unique member suffix
///
/// Returns `{admitted, count}`.
const SLIDING_WINDOW_SCRIPT: &str = r"
local key = KEYS[1]
local limit = tonumber(ARGV[1])
local window_ms = tonumber(ARGV[2])

local time = redis.call('TIME')
local now_ms = tonumber(time[1]) * 1000 + math.floor(tonumber(time[2]) / 1000)
local window_start = now_ms - window_ms

redis.call('ZREMRANGEBYSCORE', key, '-inf', window_start)
local count = redis.call('ZCARD', key)

if count < limit then
    redis.call('ZADD', key, now_ms, now_ms .. '-' .. ARGV[3])
    redis.call('PEXPIRE', key, window_ms)
    return {1, count + 1}
end
return {0, count}
";

/// Delete KEYS[1] only if it holds ARGV[1]. Returns 1 if deleted.
const COMPARE_AND_DELETE_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
";

#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    sliding_window: Arc<Script>,
    compare_and_delete: Arc<Script>,
}

impl RedisStore {
    /// Open the long-lived connection to `url`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        info!("Connected to Redis");
        Ok(Self {
            connection,
            sliding_window: Arc::new(Script::new(SLIDING_WINDOW_SCRIPT)),
            compare_and_delete: Arc::new(Script::new(COMPARE_AND_DELETE_SCRIPT)),
        })
    }
}

impl SharedStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut connection = self.connection.clone();
        let value: Option<String> = ::redis::cmd("GET")
            .arg(key)
            .query_async(&mut connection)
            .await?;
        Ok(value)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        let ttl_ms = (ttl.as_millis() as u64).max(1);
        let _: () = ::redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut connection)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut connection = self.connection.clone();
        let removed: i64 = ::redis::cmd("DEL")
            .arg(key)
            .query_async(&mut connection)
            .await?;
        Ok(removed > 0)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let mut connection = self.connection.clone();
        let removed: i64 = self
            .compare_and_delete
            .key(key)
            .arg(expected)
            .invoke_async(&mut connection)
            .await?;
        Ok(removed > 0)
    }

    async fn admit_sliding_window(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<WindowOutcome, StoreError> {
        let mut connection = self.connection.clone();
        let member = uuid::Uuid::new_v4().simple().to_string();
        let reply: Vec<i64> = self
            .sliding_window
            .key(key)
            .arg(limit)
            .arg(window.as_millis() as u64)
            .arg(member)
            .invoke_async(&mut connection)
            .await?;

        match reply.as_slice() {
            [admitted, count] => Ok(WindowOutcome {
                admitted: *admitted == 1,
                count: u32::try_from(*count)
                    .map_err(|_| StoreError::UnexpectedReply(format!("count {count}")))?,
            }),
            other => Err(StoreError::UnexpectedReply(format!(
                "sliding window script returned {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Requires a running Redis; set `REDIS_URL` and run with `--ignored`.
    #[tokio::test]
    #[ignore]
    async fn test_live_sliding_window() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let store = RedisStore::connect(&url).await.unwrap();
        let key = format!("ratelimit:test:{}", uuid::Uuid::new_v4());
        let window = Duration::from_secs(5);

        for expected in 1..=3 {
            let outcome = store.admit_sliding_window(&key, 3, window).await.unwrap();
            assert!(outcome.admitted);
            assert_eq!(outcome.count, expected);
        }
        let outcome = store.admit_sliding_window(&key, 3, window).await.unwrap();
        assert!(!outcome.admitted);
        assert_eq!(outcome.count, 3);

        store.delete(&key).await.unwrap();
    }

    /// 50 simultaneous admissions against one key must take exactly `limit` slots.
    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    #[ignore]
    async fn test_live_concurrent_admissions_never_exceed_limit() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let store = RedisStore::connect(&url).await.unwrap();
        let key = format!("ratelimit:test:{}", uuid::Uuid::new_v4());
        let barrier = Arc::new(tokio::sync::Barrier::new(50));

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let store = store.clone();
                let key = key.clone();
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    store
                        .admit_sliding_window(&key, 5, Duration::from_secs(30))
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut admitted_counts = Vec::new();
        for handle in handles {
            let outcome = handle.await.unwrap();
            if outcome.admitted {
                admitted_counts.push(outcome.count);
            } else {
                assert_eq!(outcome.count, 5);
            }
        }
        admitted_counts.sort_unstable();
        assert_eq!(admitted_counts, vec![1, 2, 3, 4, 5]);

        store.delete(&key).await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn test_live_compare_and_delete() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let store = RedisStore::connect(&url).await.unwrap();
        let key = format!("session:{}", uuid::Uuid::new_v4());

        store
            .set_with_ttl(&key, "current", Duration::from_secs(30))
            .await
            .unwrap();
        assert!(!store.delete_if_equals(&key, "stale").await.unwrap());
        assert!(store.delete_if_equals(&key, "current").await.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), None);
    }
}
