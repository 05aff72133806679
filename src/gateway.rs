// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Request admission pipeline.
//!
//! Resolves the route policy, validates the credential, picks the
//! requester, then consults the limiter. Any rejection short-circuits.

use crate::config::{Config, RouteLimit, RoutePolicy};
use crate::credential::{CredentialVerifier, Identity};
use crate::error::{ConfigError, GatewayError};
use crate::limiter::{Admission, AdmissionLimiter, Requester};
use crate::metrics::GatewayMetrics;
use crate::session::{SessionRegistry, SessionValidator};
use crate::store::SharedStore;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param,
}

#[derive(Debug, Clone)]
struct CompiledRoute {
    method: String,
    segments: Vec<Segment>,
    policy: RoutePolicy,
}

/// Non-empty segments of `path`, ignoring any query string or fragment.
fn split_path(path: &str) -> impl Iterator<Item = &str> {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    path.split('/').filter(|s| !s.is_empty())
}

/// The path as route matching sees it: repeated and trailing slashes
/// collapsed, query string dropped.
///
/// Every spelling that resolves to the same route shares one canonical
/// form, so it also shares one admission window.
pub fn canonical_path(path: &str) -> String {
    let mut canonical = String::with_capacity(path.len());
    for segment in split_path(path) {
        canonical.push('/');
        canonical.push_str(segment);
    }
    if canonical.is_empty() {
        canonical.push('/');
    }
    canonical
}

impl CompiledRoute {
    fn new(policy: &RoutePolicy) -> Self {
        let segments = split_path(&policy.path)
            .map(|s| {
                if s.starts_with('{') && s.ends_with('}') {
                    Segment::Param
                } else {
                    Segment::Literal(s.to_string())
                }
            })
            .collect();
        Self {
            method: policy.method.to_ascii_uppercase(),
            segments,
            policy: policy.clone(),
        }
    }

    fn matches(&self, method: &str, path: &str) -> bool {
        if !self.method.eq_ignore_ascii_case(method) {
            return false;
        }
        let mut parts = split_path(path);
        for segment in &self.segments {
            match (segment, parts.next()) {
                (Segment::Literal(expected), Some(actual)) if expected == actual => {}
                (Segment::Param, Some(_)) => {}
                _ => return false,
            }
        }
        parts.next().is_none()
    }
}

/// Protected operations, matched by method and path.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<CompiledRoute>,
}

impl RouteTable {
    pub fn new(policies: &[RoutePolicy]) -> Self {
        Self {
            routes: policies.iter().map(CompiledRoute::new).collect(),
        }
    }

    /// First policy matching `method` and `path`.
    pub fn resolve(&self, method: &str, path: &str) -> Option<&RoutePolicy> {
        self.routes
            .iter()
            .find(|route| route.matches(method, path))
            .map(|route| &route.policy)
    }
}

/// Extract the token from an `Authorization` header value.
///
/// Returns `None` unless the scheme is `Bearer` and a token follows.
pub fn parse_bearer(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// What the gate sees of an inbound request.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    /// Raw `Authorization` header value, if any
    pub authorization: Option<&'a str>,
    pub client_addr: IpAddr,
}

/// A request allowed past the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Subject of a live session, if a credential was presented
    pub identity: Option<Identity>,
    /// Window usage, if the route carries a quota
    pub admission: Option<Admission>,
}

impl Decision {
    fn unprotected() -> Self {
        Self {
            identity: None,
            admission: None,
        }
    }
}

/// Why a request was stopped, as reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// No live session. Covers invalid, revoked and unverifiable credentials.
    Unauthenticated,
    /// Quota exhausted, or the limiter could not reach the store.
    Throttled {
        limit: u32,
        window_secs: u64,
        /// `None` when the store was unavailable
        observed_count: Option<u32>,
    },
}

impl Rejection {
    fn throttled(quota: RouteLimit, err: &GatewayError) -> Self {
        let observed_count = match err {
            GatewayError::AdmissionDenied { observed_count, .. } => Some(*observed_count),
            _ => None,
        };
        Self::Throttled {
            limit: quota.limit,
            window_secs: quota.window_secs,
            observed_count,
        }
    }
}

/// Session validator and admission limiter behind one entry point.
pub struct Gateway<S> {
    routes: RouteTable,
    validator: SessionValidator<S>,
    limiter: AdmissionLimiter<S>,
    sessions: SessionRegistry<S>,
    metrics: Arc<GatewayMetrics>,
}

impl<S: SharedStore> Gateway<S> {
    /// Build the gateway around one shared store client.
    pub fn new(config: &Config, store: Arc<S>) -> Result<Self, ConfigError> {
        config.validate()?;
        let verifier = CredentialVerifier::new(&config.credential)?;
        let metrics = Arc::new(GatewayMetrics::new()?);
        let timeout = config.store.timeout();

        Ok(Self {
            routes: RouteTable::new(&config.routes),
            validator: SessionValidator::new(
                verifier.clone(),
                store.clone(),
                timeout,
                config.failure_policy.session,
                metrics.clone(),
            ),
            limiter: AdmissionLimiter::new(
                store.clone(),
                timeout,
                config.failure_policy.admission,
                metrics.clone(),
            ),
            sessions: SessionRegistry::new(verifier, store, timeout, metrics.clone()),
            metrics,
        })
    }

    pub fn metrics(&self) -> &GatewayMetrics {
        &self.metrics
    }

    pub fn sessions(&self) -> &SessionRegistry<S> {
        &self.sessions
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Resolve a credential to a live session without touching any quota.
    pub async fn authenticate(&self, authorization: Option<&str>) -> Result<Identity, Rejection> {
        let token = authorization
            .and_then(parse_bearer)
            .ok_or(Rejection::Unauthenticated)?;
        self.validator.validate(token).await.map_err(|err| {
            info!(reason = err.kind(), error = %err, "Credential rejected");
            Rejection::Unauthenticated
        })
    }

    /// Decide whether `request` may proceed.
    pub async fn admit(&self, request: &AdmissionRequest<'_>) -> Result<Decision, Rejection> {
        let result = self.evaluate(request).await;
        let outcome = match &result {
            Ok(Decision {
                admission: None,
                identity: None,
            }) => "unprotected",
            Ok(_) => "admitted",
            Err(Rejection::Unauthenticated) => "unauthenticated",
            Err(Rejection::Throttled { .. }) => "throttled",
        };
        self.metrics.record_decision(outcome);
        result
    }

    async fn evaluate(&self, request: &AdmissionRequest<'_>) -> Result<Decision, Rejection> {
        let Some(policy) = self.routes.resolve(request.method, request.path) else {
            debug!(method = request.method, path = request.path, "Route not protected");
            return Ok(Decision::unprotected());
        };

        let identity = match request.authorization {
            Some(header) => Some(self.authenticate(Some(header)).await?),
            None if policy.require_auth => {
                info!(path = request.path, "Missing credential");
                return Err(Rejection::Unauthenticated);
            }
            None => None,
        };

        let Some(quota) = policy.rate_limit else {
            return Ok(Decision {
                identity,
                admission: None,
            });
        };

        let requester = Requester::resolve(
            identity.as_ref().map(|i| i.subject.as_str()),
            request.client_addr,
        );
        let route = canonical_path(request.path);
        match self.limiter.check(&requester, &route, quota).await {
            Ok(admission) => Ok(Decision {
                identity,
                admission: Some(admission),
            }),
            Err(err) => Err(Rejection::throttled(quota, &err)),
        }
    }
}
