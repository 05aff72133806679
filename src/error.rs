// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Error types for the admission gateway.

use std::time::Duration;
use thiserror::Error;

/// Failure of a single round trip to the shared store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Store round trip timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unexpected store reply: {0}")]
    UnexpectedReply(String),
}

/// Outcome of a gating check that did not let the request through.
///
/// `InvalidCredential` and `SessionRevoked` stay distinct here for
/// diagnostics only; the edge reports both as unauthenticated.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Session expired or logged out")]
    SessionRevoked,

    #[error("Shared store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("Rate limit exceeded: {observed_count}/{limit} requests in {window_secs}s")]
    AdmissionDenied {
        limit: u32,
        window_secs: u64,
        observed_count: u32,
    },
}

impl GatewayError {
    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidCredential(_) => "invalid_credential",
            Self::SessionRevoked => "session_revoked",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::AdmissionDenied { .. } => "admission_denied",
        }
    }
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Credential key must not be empty")]
    MissingCredentialKey,

    #[error("Unsupported credential algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Invalid credential key: {0}")]
    InvalidKey(String),

    #[error("Store round-trip timeout must be greater than zero")]
    ZeroTimeout,

    #[error("Failed to register metrics: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Invalid route {method} {path}: {reason}")]
    InvalidRoute {
        method: String,
        path: String,
        reason: &'static str,
    },

    #[error("Invalid metrics path {path}: {reason}")]
    InvalidMetricsPath { path: String, reason: &'static str },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, GatewayError>;
