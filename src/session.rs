// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Session-bound credential validation.
//!
//! A signed, unexpired credential is only accepted while it is the value of
//! `session:{subject}` in the shared store. Logging out deletes that record
//! and logging in again overwrites it, so older copies of a credential stop
//! working as soon as the store reflects the change.

use crate::config::FailMode;
use crate::credential::{CredentialVerifier, Identity};
use crate::error::GatewayError;
use crate::metrics::GatewayMetrics;
use crate::store::{round_trip, SharedStore};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Store key holding the live credential for `subject`.
pub fn session_key(subject: &str) -> String {
    format!("session:{subject}")
}

/// Resolves a presented credential to an identity, or rejects it.
pub struct SessionValidator<S> {
    verifier: CredentialVerifier,
    store: Arc<S>,
    timeout: Duration,
    on_store_failure: FailMode,
    metrics: Arc<GatewayMetrics>,
}

impl<S: SharedStore> SessionValidator<S> {
    pub fn new(
        verifier: CredentialVerifier,
        store: Arc<S>,
        timeout: Duration,
        on_store_failure: FailMode,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            verifier,
            store,
            timeout,
            on_store_failure,
            metrics,
        }
    }

    /// Verify `raw` and check it is still the subject's live session.
    pub async fn validate(&self, raw: &str) -> Result<Identity, GatewayError> {
        let identity = self.verifier.verify(raw)?;
        let key = session_key(&identity.subject);

        let live = round_trip(&self.metrics, "session_get", self.timeout, self.store.get(&key)).await;
        match live {
            Ok(Some(current)) if current == raw => {
                debug!(subject = %identity.subject, "Session valid");
                Ok(identity)
            }
            Ok(Some(_)) => {
                info!(subject = %identity.subject, "Credential superseded by a newer session");
                Err(GatewayError::SessionRevoked)
            }
            Ok(None) => {
                info!(subject = %identity.subject, "No live session for credential");
                Err(GatewayError::SessionRevoked)
            }
            Err(err) => {
                self.metrics.record_store_failure("session");
                match self.on_store_failure {
                    FailMode::Closed => {
                        warn!(subject = %identity.subject, error = %err, "Session check failed, rejecting");
                        Err(GatewayError::StoreUnavailable(err))
                    }
                    FailMode::Open => {
                        warn!(
                            subject = %identity.subject,
                            error = %err,
                            "Session check failed, accepting on signature alone"
                        );
                        Ok(identity)
                    }
                }
            }
        }
    }
}

/// Writes and removes session records on behalf of the login/logout flow.
pub struct SessionRegistry<S> {
    verifier: CredentialVerifier,
    store: Arc<S>,
    timeout: Duration,
    metrics: Arc<GatewayMetrics>,
}

impl<S: SharedStore> SessionRegistry<S> {
    pub fn new(
        verifier: CredentialVerifier,
        store: Arc<S>,
        timeout: Duration,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            verifier,
            store,
            timeout,
            metrics,
        }
    }

    /// Make `credential` the only live session for its subject.
    ///
    /// The record lives for the credential's remaining validity and replaces
    /// whatever session the subject had before.
    pub async fn establish(&self, credential: &str) -> Result<Identity, GatewayError> {
        let identity = self.verifier.verify(credential)?;
        let ttl = identity.remaining_validity(Utc::now());
        if ttl.is_zero() {
            return Err(GatewayError::InvalidCredential("already expired".to_string()));
        }

        let key = session_key(&identity.subject);
        round_trip(
            &self.metrics,
            "session_set",
            self.timeout,
            self.store.set_with_ttl(&key, credential, ttl),
        )
        .await?;
        info!(subject = %identity.subject, ttl_secs = ttl.as_secs(), "Session established");
        Ok(identity)
    }

    /// End the session held by `credential`.
    ///
    /// A newer session for the same subject is left untouched. Returns
    /// whether a session was removed.
    pub async fn revoke(&self, credential: &str) -> Result<bool, GatewayError> {
        let identity = self.verifier.verify(credential)?;
        let key = session_key(&identity.subject);
        let removed = round_trip(
            &self.metrics,
            "session_revoke",
            self.timeout,
            self.store.delete_if_equals(&key, credential),
        )
        .await?;
        info!(subject = %identity.subject, removed, "Session revoked");
        Ok(removed)
    }

    /// End whatever session `subject` has.
    pub async fn revoke_all(&self, subject: &str) -> Result<bool, GatewayError> {
        let key = session_key(subject);
        let removed = round_trip(
            &self.metrics,
            "session_revoke",
            self.timeout,
            self.store.delete(&key),
        )
        .await?;
        info!(%subject, removed, "All sessions revoked");
        Ok(removed)
    }
}
