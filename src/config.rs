// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Configuration for the admission gateway.
//!
//! Loaded from an optional TOML file named by `GATEWAY_CONFIG`, then
//! overridden by `GATEWAY__*` environment variables (`__` separates nested
//! keys, e.g. `GATEWAY__STORE__URL`).

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the admission gateway service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server bind address (default: 0.0.0.0:8080)
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Use the first `X-Forwarded-For` hop as the client address (default: false)
    #[serde(default)]
    pub trust_forwarded_for: bool,

    /// Shared store connection
    #[serde(default)]
    pub store: StoreConfig,

    /// Credential verification
    #[serde(default)]
    pub credential: CredentialConfig,

    /// Behaviour when the shared store cannot be reached
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Protected operations
    #[serde(default = "default_routes")]
    pub routes: Vec<RoutePolicy>,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Shared store connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// `redis://` / `rediss://` URL, or `memory` for a single-process store
    #[serde(default = "default_store_url")]
    pub url: String,

    /// Upper bound on every store round trip in milliseconds (default: 250)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Credential verification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    /// Signature algorithm (default: HS256)
    #[serde(default = "default_algorithm")]
    pub algorithm: String,

    /// HMAC secret, or PEM-encoded public key for asymmetric algorithms
    #[serde(default)]
    pub key: String,

    /// Clock leeway applied to `exp` in seconds (default: 0)
    #[serde(default)]
    pub leeway_secs: u64,
}

/// What a component does when its store round trip fails or times out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailMode {
    /// Reject the request
    #[default]
    Closed,
    /// Let the request through and log a warning
    Open,
}

/// Per-component store failure policy. Both default to fail-closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailurePolicy {
    #[serde(default)]
    pub session: FailMode,

    #[serde(default)]
    pub admission: FailMode,
}

/// Sliding-window quota for one protected operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteLimit {
    /// Maximum admitted requests inside the window
    pub limit: u32,
    /// Rolling window length in seconds
    pub window_secs: u64,
}

/// Gate applied to requests matching `method` and `path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutePolicy {
    /// HTTP method, matched case-insensitively
    pub method: String,

    /// Path pattern; `{name}` matches exactly one segment
    pub path: String,

    /// Reject callers without a live session (default: true)
    #[serde(default = "default_true")]
    pub require_auth: bool,

    /// Quota, if the operation is throttled
    #[serde(default)]
    pub rate_limit: Option<RouteLimit>,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics endpoint (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics endpoint path (default: /metrics)
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

// Default value functions
/// Paths the gateway serves itself, besides the metrics endpoint.
pub const GATEWAY_PATHS: &[&str] = &["/health", "/healthz", "/check", "/session/logout"];

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_store_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_timeout_ms() -> u64 {
    250
}

fn default_algorithm() -> String {
    "HS256".to_string()
}

fn default_true() -> bool {
    true
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn limited(method: &str, path: &str, limit: u32, window_secs: u64) -> RoutePolicy {
    RoutePolicy {
        method: method.to_string(),
        path: path.to_string(),
        require_auth: true,
        rate_limit: Some(RouteLimit { limit, window_secs }),
    }
}

fn authenticated(method: &str, path: &str) -> RoutePolicy {
    RoutePolicy {
        method: method.to_string(),
        path: path.to_string(),
        require_auth: true,
        rate_limit: None,
    }
}

fn default_routes() -> Vec<RoutePolicy> {
    vec![
        limited("POST", "/v1/boards", 5, 60),
        limited("PUT", "/v1/boards/{board_id}", 10, 60),
        limited("DELETE", "/v1/boards/{board_id}", 5, 60),
        limited("POST", "/v1/boards/{board_id}/comments", 10, 60),
        limited("PUT", "/v1/comments/{comment_id}", 10, 60),
        limited("DELETE", "/v1/comments/{comment_id}", 10, 60),
        authenticated("PUT", "/v1/users/{email}"),
        authenticated("DELETE", "/v1/users/{email}"),
        authenticated("POST", "/v1/users/{email}/profile-image"),
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            trust_forwarded_for: false,
            store: StoreConfig::default(),
            credential: CredentialConfig::default(),
            failure_policy: FailurePolicy::default(),
            routes: default_routes(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
            key: String::new(),
            leeway_secs: 0,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            path: default_metrics_path(),
        }
    }
}

impl StoreConfig {
    /// Get the round-trip timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl RouteLimit {
    /// Get the rolling window duration
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Config {
    /// Load configuration from `GATEWAY_CONFIG` (if set) and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Ok(path) = std::env::var("GATEWAY_CONFIG") {
            builder = builder.add_source(config::File::with_name(&path));
        }
        let config: Config = builder
            .add_source(
                config::Environment::with_prefix("GATEWAY")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the gateway cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.credential.key.trim().is_empty() {
            return Err(ConfigError::MissingCredentialKey);
        }
        if self.store.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.metrics.enabled {
            let path = &self.metrics.path;
            let invalid = |reason| ConfigError::InvalidMetricsPath {
                path: path.clone(),
                reason,
            };
            if !path.starts_with('/') {
                return Err(invalid("path must start with '/'"));
            }
            if path.contains([':', '*', '{', '}']) {
                return Err(invalid("path must not contain parameters"));
            }
            if GATEWAY_PATHS.contains(&path.as_str()) {
                return Err(invalid("path is already served by the gateway"));
            }
        }
        for route in &self.routes {
            let invalid = |reason| ConfigError::InvalidRoute {
                method: route.method.clone(),
                path: route.path.clone(),
                reason,
            };
            if route.method.trim().is_empty() {
                return Err(invalid("method is empty"));
            }
            if !route.path.starts_with('/') {
                return Err(invalid("path must start with '/'"));
            }
            let malformed_param = route.path.split('/').any(|segment| {
                let opens = segment.contains('{');
                let closes = segment.contains('}');
                (opens || closes)
                    && !(segment.len() > 2 && segment.starts_with('{') && segment.ends_with('}'))
            });
            if malformed_param {
                return Err(invalid("parameters must span a whole segment"));
            }
            if let Some(limit) = route.rate_limit {
                if limit.limit == 0 {
                    return Err(invalid("limit must be greater than zero"));
                }
                if limit.window_secs == 0 {
                    return Err(invalid("window must be greater than zero"));
                }
            }
        }
        Ok(())
    }
}
