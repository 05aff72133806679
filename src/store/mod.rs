// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Shared store contract.
//!
//! The store is the only place cross-process coordination state lives.
//! Every operation here touches exactly one key, and every mutating
//! decision is a single atomic request.

mod memory;
mod redis;

pub use self::memory::{Clock, ManualClock, MemoryStore, SystemClock};
pub use self::redis::RedisStore;

use crate::error::StoreError;
use crate::metrics::GatewayMetrics;
use std::future::Future;
use std::time::{Duration, Instant};

/// Result of one atomic sliding-window admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowOutcome {
    /// Whether a slot was taken
    pub admitted: bool,
    /// Entries in the window after the decision
    pub count: u32,
}

/// Primitives the gateway needs from the shared key-value store.
pub trait SharedStore: Send + Sync + 'static {
    /// Read a string value.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;

    /// Write a string value that expires after `ttl`, replacing any previous value.
    fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Delete a key. Returns whether it existed.
    fn delete(&self, key: &str) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Delete `key` only if it currently holds `expected`, atomically.
    fn delete_if_equals(
        &self,
        key: &str,
        expected: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Prune, count and conditionally record one request as a single atomic
    /// operation, using the store's own clock.
    ///
    /// Entries scored at or before `now - window` are removed. If fewer than
    /// `limit` remain, a new entry scored at `now` is added and the key's
    /// expiry is reset to `window`.
    fn admit_sliding_window(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> impl Future<Output = Result<WindowOutcome, StoreError>> + Send;
}

/// Run one store round trip under `timeout`, recording its latency.
pub(crate) async fn round_trip<T>(
    metrics: &GatewayMetrics,
    operation: &'static str,
    timeout: Duration,
    call: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    let started = Instant::now();
    let result = match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(timeout)),
    };
    metrics.observe_round_trip(operation, started.elapsed());
    result
}

/// Store backend selected from configuration.
#[derive(Clone)]
pub enum Store {
    Redis(RedisStore),
    Memory(MemoryStore),
}

impl Store {
    /// Connect to the store named by `url` (`memory` selects the in-process store).
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        if url == "memory" {
            return Ok(Self::Memory(MemoryStore::new()));
        }
        Ok(Self::Redis(RedisStore::connect(url).await?))
    }

    pub fn backend(&self) -> &'static str {
        match self {
            Self::Redis(_) => "redis",
            Self::Memory(_) => "memory",
        }
    }
}

impl SharedStore for Store {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self {
            Self::Redis(store) => store.get(key).await,
            Self::Memory(store) => store.get(key).await,
        }
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        match self {
            Self::Redis(store) => store.set_with_ttl(key, value, ttl).await,
            Self::Memory(store) => store.set_with_ttl(key, value, ttl).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        match self {
            Self::Redis(store) => store.delete(key).await,
            Self::Memory(store) => store.delete(key).await,
        }
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        match self {
            Self::Redis(store) => store.delete_if_equals(key, expected).await,
            Self::Memory(store) => store.delete_if_equals(key, expected).await,
        }
    }

    async fn admit_sliding_window(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<WindowOutcome, StoreError> {
        match self {
            Self::Redis(store) => store.admit_sliding_window(key, limit, window).await,
            Self::Memory(store) => store.admit_sliding_window(key, limit, window).await,
        }
    }
}
