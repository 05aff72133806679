// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Single-process store.
//!
//! Every operation takes the one lock for its whole duration, which gives
//! the same per-key atomicity the Redis scripts provide. Time comes from the
//! store's own [`Clock`], never from the caller.

use super::{SharedStore, WindowOutcome};
use crate::error::StoreError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

/// Millisecond time source for the store.
pub trait Clock: Send + Sync + 'static {
    fn now_ms(&self) -> u64;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
enum Value {
    Text(String),
    /// (score, member) pairs
    Window(Vec<(u64, u64)>),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at_ms: Option<u64>,
}

impl Entry {
    fn is_live(&self, now_ms: u64) -> bool {
        self.expires_at_ms.map_or(true, |at| now_ms < at)
    }
}

/// Operations between opportunistic sweeps of expired keys.
const SWEEP_EVERY: u32 = 1024;

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, Entry>,
    next_member: u64,
    ops_since_sweep: u32,
}

impl State {
    /// Drop every expired key. Returns how many were removed.
    fn sweep(&mut self, now_ms: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.is_live(now_ms));
        self.ops_since_sweep = 0;
        before - self.entries.len()
    }

    /// Count one operation, sweeping once every `SWEEP_EVERY`.
    fn tick(&mut self, now_ms: u64) {
        self.ops_since_sweep += 1;
        if self.ops_since_sweep >= SWEEP_EVERY {
            self.sweep(now_ms);
        }
    }

    fn evict_expired(&mut self, key: &str, now_ms: u64) {
        if self.entries.get(key).is_some_and(|e| !e.is_live(now_ms)) {
            self.entries.remove(key);
        }
    }

    /// Drop `key` if its TTL has passed, then return it.
    fn live(&mut self, key: &str, now_ms: u64) -> Option<&mut Entry> {
        self.evict_expired(key, now_ms);
        self.entries.get_mut(key)
    }
}

/// In-process implementation of [`SharedStore`].
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            clock,
        }
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let now = self.clock.now_ms();
        let state = self.state.lock().await;
        state.entries.values().filter(|e| e.is_live(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remove expired keys (should be called periodically).
    ///
    /// Keys are also swept every few thousand operations, so a store that
    /// is never cleaned explicitly still stays bounded.
    pub async fn cleanup(&self) -> usize {
        let now = self.clock.now_ms();
        self.state.lock().await.sweep(now)
    }
}

impl SharedStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now_ms();
        let mut state = self.state.lock().await;
        state.tick(now);
        match state.live(key, now) {
            None => Ok(None),
            Some(Entry {
                value: Value::Text(text),
                ..
            }) => Ok(Some(text.clone())),
            Some(_) => Err(StoreError::UnexpectedReply(format!(
                "{key} does not hold a string"
            ))),
        }
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let now = self.clock.now_ms();
        let mut state = self.state.lock().await;
        state.tick(now);
        state.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at_ms: Some(now + ttl.as_millis() as u64),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let now = self.clock.now_ms();
        let mut state = self.state.lock().await;
        state.tick(now);
        let existed = state.live(key, now).is_some();
        state.entries.remove(key);
        Ok(existed)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let now = self.clock.now_ms();
        let mut state = self.state.lock().await;
        state.tick(now);
        let matches = matches!(
            state.live(key, now),
            Some(Entry { value: Value::Text(text), .. }) if text.as_str() == expected
        );
        if matches {
            state.entries.remove(key);
        }
        Ok(matches)
    }

    async fn admit_sliding_window(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<WindowOutcome, StoreError> {
        let now = self.clock.now_ms();
        let window_ms = window.as_millis() as u64;
        let window_start = now.saturating_sub(window_ms);

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.tick(now);
        let member = state.next_member;
        state.next_member += 1;

        state.evict_expired(key, now);
        let entry = state
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry {
                value: Value::Window(Vec::new()),
                expires_at_ms: None,
            });
        let Value::Window(timestamps) = &mut entry.value else {
            return Err(StoreError::UnexpectedReply(format!(
                "{key} does not hold a window"
            )));
        };

        timestamps.retain(|(score, _)| *score > window_start);
        let count = timestamps.len() as u32;

        if count < limit {
            timestamps.push((now, member));
            entry.expires_at_ms = Some(now + window_ms);
            Ok(WindowOutcome {
                admitted: true,
                count: count + 1,
            })
        } else {
            if timestamps.is_empty() {
                // limit == 0 on a fresh key; nothing to keep
                state.entries.remove(key);
            }
            Ok(WindowOutcome {
                admitted: false,
                count,
            })
        }
    }
}
