// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Distributed sliding-window admission limiter.
//!
//! Each (requester, route) pair owns one window record in the shared store.
//! Pruning, counting and recording happen in a single atomic store
//! operation, so concurrent requests for the same key can never both take
//! the last slot. No state is kept in process.

use crate::config::{FailMode, RouteLimit};
use crate::error::GatewayError;
use crate::metrics::GatewayMetrics;
use crate::store::{round_trip, SharedStore};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Who a request is throttled as, resolved once per request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Requester {
    /// Authenticated subject
    Identity(String),
    /// Anonymous caller, by client address
    NetworkAddress(IpAddr),
}

impl Requester {
    /// Prefer the authenticated subject, falling back to the client address.
    pub fn resolve(subject: Option<&str>, client_addr: IpAddr) -> Self {
        match subject {
            Some(subject) => Self::Identity(subject.to_string()),
            None => Self::NetworkAddress(client_addr),
        }
    }
}

impl fmt::Display for Requester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identity(subject) => write!(f, "user:{subject}"),
            Self::NetworkAddress(addr) => write!(f, "ip:{addr}"),
        }
    }
}

/// Store key of one window record: `ratelimit:{requester}:{route}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AdmissionKey(String);

impl AdmissionKey {
    pub fn new(requester: &Requester, route: &str) -> Self {
        Self(format!("ratelimit:{requester}:{route}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AdmissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A request that was let through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// Entries in the window including this request; 0 when admitted
    /// without consulting the store
    pub observed_count: u32,
    pub limit: u32,
    pub window_secs: u64,
}

impl Admission {
    /// Requests still available in the current window.
    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.observed_count)
    }
}

/// Sliding-window limiter over a shared store.
pub struct AdmissionLimiter<S> {
    store: Arc<S>,
    timeout: Duration,
    on_store_failure: FailMode,
    metrics: Arc<GatewayMetrics>,
}

impl<S: SharedStore> AdmissionLimiter<S> {
    pub fn new(
        store: Arc<S>,
        timeout: Duration,
        on_store_failure: FailMode,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            store,
            timeout,
            on_store_failure,
            metrics,
        }
    }

    /// Take one slot in `requester`'s window for `route`, or refuse.
    ///
    /// Denials return [`GatewayError::AdmissionDenied`] with the count the
    /// store observed. A failed or timed out round trip follows the
    /// configured [`FailMode`].
    pub async fn check(
        &self,
        requester: &Requester,
        route: &str,
        quota: RouteLimit,
    ) -> Result<Admission, GatewayError> {
        let key = AdmissionKey::new(requester, route);
        let outcome = round_trip(
            &self.metrics,
            "admission_script",
            self.timeout,
            self.store
                .admit_sliding_window(key.as_str(), quota.limit, quota.window()),
        )
        .await;

        match outcome {
            Ok(outcome) if outcome.admitted => {
                debug!(%key, count = outcome.count, limit = quota.limit, "Request admitted");
                Ok(Admission {
                    observed_count: outcome.count,
                    limit: quota.limit,
                    window_secs: quota.window_secs,
                })
            }
            Ok(outcome) => {
                info!(
                    %key,
                    count = outcome.count,
                    limit = quota.limit,
                    window_secs = quota.window_secs,
                    "Rate limit exceeded"
                );
                Err(GatewayError::AdmissionDenied {
                    limit: quota.limit,
                    window_secs: quota.window_secs,
                    observed_count: outcome.count,
                })
            }
            Err(err) => {
                self.metrics.record_store_failure("admission");
                match self.on_store_failure {
                    FailMode::Closed => {
                        warn!(%key, error = %err, "Admission check failed, denying");
                        Err(GatewayError::StoreUnavailable(err))
                    }
                    FailMode::Open => {
                        warn!(%key, error = %err, "Admission check failed, admitting unchecked");
                        Ok(Admission {
                            observed_count: 0,
                            limit: quota.limit,
                            window_secs: quota.window_secs,
                        })
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ManualClock, MemoryStore};
    use std::net::Ipv4Addr;

    fn limiter_at(start_ms: u64) -> (AdmissionLimiter<MemoryStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start_ms));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let limiter = AdmissionLimiter::new(
            store,
            Duration::from_millis(100),
            FailMode::Closed,
            Arc::new(GatewayMetrics::new().unwrap()),
        );
        (limiter, clock)
    }

    const QUOTA: RouteLimit = RouteLimit {
        limit: 5,
        window_secs: 60,
    };

    #[test]
    fn test_key_prefers_identity() {
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7));
        let user = Requester::resolve(Some("alice@example.com"), ip);
        let anon = Requester::resolve(None, ip);

        assert_eq!(
            AdmissionKey::new(&user, "/v1/boards").as_str(),
            "ratelimit:user:alice@example.com:/v1/boards"
        );
        assert_eq!(
            AdmissionKey::new(&anon, "/v1/boards").as_str(),
            "ratelimit:ip:10.0.0.7:/v1/boards"
        );
    }

    #[tokio::test]
    async fn test_sliding_window_scenario() {
        let (limiter, clock) = limiter_at(1_000_000);
        let who = Requester::Identity("alice@example.com".into());

        // t = 0..4: all admitted, counts 1..5
        for expected in 1..=5 {
            let admission = limiter.check(&who, "/v1/boards", QUOTA).await.unwrap();
            assert_eq!(admission.observed_count, expected);
            clock.advance(Duration::from_secs(1));
        }

        // t = 5: denied with the full window observed
        match limiter.check(&who, "/v1/boards", QUOTA).await {
            Err(GatewayError::AdmissionDenied {
                limit,
                window_secs,
                observed_count,
            }) => {
                assert_eq!((limit, window_secs, observed_count), (5, 60, 5));
            }
            other => panic!("expected denial, got {other:?}"),
        }

        // t = 61: entries at t = 0 and t = 1 have aged out
        clock.advance(Duration::from_secs(56));
        let admission = limiter.check(&who, "/v1/boards", QUOTA).await.unwrap();
        assert_eq!(admission.observed_count, 4);
        assert_eq!(admission.remaining(), 1);
    }

    #[tokio::test]
    async fn test_window_fully_resets_after_idle_period() {
        let (limiter, clock) = limiter_at(0);
        let who = Requester::NetworkAddress(IpAddr::V4(Ipv4Addr::LOCALHOST));

        for _ in 0..5 {
            limiter.check(&who, "/v1/boards", QUOTA).await.unwrap();
        }
        assert!(limiter.check(&who, "/v1/boards", QUOTA).await.is_err());

        clock.advance(Duration::from_secs(61));
        let admission = limiter.check(&who, "/v1/boards", QUOTA).await.unwrap();
        assert_eq!(admission.observed_count, 1);
    }

    #[tokio::test]
    async fn test_routes_are_independent() {
        let (limiter, _) = limiter_at(0);
        let who = Requester::Identity("alice@example.com".into());

        for _ in 0..5 {
            limiter.check(&who, "/v1/boards", QUOTA).await.unwrap();
        }
        assert!(limiter.check(&who, "/v1/boards", QUOTA).await.is_err());

        let other = limiter
            .check(&who, "/v1/boards/1/comments", QUOTA)
            .await
            .unwrap();
        assert_eq!(other.observed_count, 1);
    }

    #[tokio::test]
    async fn test_requesters_are_independent() {
        let (limiter, _) = limiter_at(0);
        let alice = Requester::Identity("alice@example.com".into());
        let bob = Requester::Identity("bob@example.com".into());

        for _ in 0..5 {
            limiter.check(&alice, "/v1/boards", QUOTA).await.unwrap();
        }
        assert!(limiter.check(&alice, "/v1/boards", QUOTA).await.is_err());
        assert!(limiter.check(&bob, "/v1/boards", QUOTA).await.is_ok());
    }
}
