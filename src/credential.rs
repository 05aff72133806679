// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Bearer credential verification.
//!
//! Checks signature, structure and expiry only. Whether the credential is
//! still the live session for its subject is decided in [`crate::session`].

use crate::config::CredentialConfig;
use crate::error::{ConfigError, GatewayError};
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Claims the gateway reads from a credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub iat: Option<i64>,
    pub exp: i64,
}

/// Subject resolved from a verified credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub subject: String,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

impl Identity {
    /// Validity left at `now`, zero once expired.
    pub fn remaining_validity(&self, now: DateTime<Utc>) -> std::time::Duration {
        (self.expires_at - now).to_std().unwrap_or_default()
    }
}

/// Verifies credentials against the configured key and algorithm.
#[derive(Clone)]
pub struct CredentialVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for CredentialVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVerifier")
            .field("algorithms", &self.validation.algorithms)
            .finish_non_exhaustive()
    }
}

impl CredentialVerifier {
    pub fn new(config: &CredentialConfig) -> Result<Self, ConfigError> {
        if config.key.trim().is_empty() {
            return Err(ConfigError::MissingCredentialKey);
        }
        let algorithm = Algorithm::from_str(&config.algorithm)
            .map_err(|_| ConfigError::UnsupportedAlgorithm(config.algorithm.clone()))?;

        let pem = config.key.as_bytes();
        let key = match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => DecodingKey::from_secret(pem),
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => DecodingKey::from_rsa_pem(pem)
                .map_err(|e| ConfigError::InvalidKey(e.to_string()))?,
            Algorithm::ES256 | Algorithm::ES384 => {
                DecodingKey::from_ec_pem(pem).map_err(|e| ConfigError::InvalidKey(e.to_string()))?
            }
            Algorithm::EdDSA => {
                DecodingKey::from_ed_pem(pem).map_err(|e| ConfigError::InvalidKey(e.to_string()))?
            }
        };

        let mut validation = Validation::new(algorithm);
        validation.leeway = config.leeway_secs;
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp"]);

        Ok(Self { key, validation })
    }

    /// Verify `raw` and resolve its subject.
    pub fn verify(&self, raw: &str) -> Result<Identity, GatewayError> {
        let data = decode::<Claims>(raw, &self.key, &self.validation)
            .map_err(|e| GatewayError::InvalidCredential(e.to_string()))?;
        let claims = data.claims;

        let subject = claims
            .sub
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| GatewayError::InvalidCredential("missing subject".to_string()))?;
        let expires_at = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .ok_or_else(|| GatewayError::InvalidCredential("expiry out of range".to_string()))?;
        let issued_at = claims.iat.and_then(|iat| Utc.timestamp_opt(iat, 0).single());

        Ok(Identity {
            subject,
            issued_at,
            expires_at,
        })
    }
}
