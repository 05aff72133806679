// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Stores that fail in the ways a real shared store does.

use admission_gateway::{
    error::StoreError,
    store::{SharedStore, WindowOutcome},
};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn refused() -> StoreError {
    StoreError::Redis(redis::RedisError::from(io::Error::new(
        io::ErrorKind::ConnectionRefused,
        "connection refused",
    )))
}

/// Every round trip fails immediately.
#[derive(Debug, Default, Clone)]
pub struct UnreachableStore {
    calls: Arc<AtomicUsize>,
}

impl UnreachableStore {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail<T>(&self) -> Result<T, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(refused())
    }
}

impl SharedStore for UnreachableStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        self.fail()
    }

    async fn set_with_ttl(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), StoreError> {
        self.fail()
    }

    async fn delete(&self, _key: &str) -> Result<bool, StoreError> {
        self.fail()
    }

    async fn delete_if_equals(&self, _key: &str, _expected: &str) -> Result<bool, StoreError> {
        self.fail()
    }

    async fn admit_sliding_window(
        &self,
        _key: &str,
        _limit: u32,
        _window: Duration,
    ) -> Result<WindowOutcome, StoreError> {
        self.fail()
    }
}

/// Every round trip hangs until the caller gives up.
#[derive(Debug, Default, Clone, Copy)]
pub struct StallingStore;

impl SharedStore for StallingStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        std::future::pending().await
    }

    async fn set_with_ttl(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), StoreError> {
        std::future::pending().await
    }

    async fn delete(&self, _key: &str) -> Result<bool, StoreError> {
        std::future::pending().await
    }

    async fn delete_if_equals(&self, _key: &str, _expected: &str) -> Result<bool, StoreError> {
        std::future::pending().await
    }

    async fn admit_sliding_window(
        &self,
        _key: &str,
        _limit: u32,
        _window: Duration,
    ) -> Result<WindowOutcome, StoreError> {
        std::future::pending().await
    }
}
