// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Credentials, configuration and gateways for tests.

use admission_gateway::{
    config::{Config, CredentialConfig, FailMode, FailurePolicy, RouteLimit, RoutePolicy, StoreConfig},
    gateway::{AdmissionRequest, Gateway},
    store::{ManualClock, MemoryStore, SharedStore},
};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const SECRET: &str = "integration-test-secret";

static NONCE: AtomicU64 = AtomicU64::new(0);

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// A fresh credential for `subject`, valid for an hour.
///
/// Every call yields a distinct token, as two logins would.
pub fn mint(subject: &str) -> String {
    mint_with(subject, SECRET, now() + 3600)
}

pub fn mint_with(subject: &str, secret: &str, exp: i64) -> String {
    let nonce = NONCE.fetch_add(1, Ordering::SeqCst);
    encode(
        &Header::new(Algorithm::HS256),
        &serde_json::json!({ "sub": subject, "iat": now(), "exp": exp, "jti": nonce }),
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

/// Create board: 5 per minute, login required.
pub const CREATE_BOARD: &str = "/v1/boards";
/// Create comment: 10 per minute, login required.
pub const CREATE_COMMENT: &str = "/v1/boards/7/comments";
/// Sign up: 3 per minute, anonymous allowed.
pub const SIGN_UP: &str = "/v1/users";

pub fn config() -> Config {
    let mut routes = Config::default().routes;
    routes.push(RoutePolicy {
        method: "POST".to_string(),
        path: SIGN_UP.to_string(),
        require_auth: false,
        rate_limit: Some(RouteLimit {
            limit: 3,
            window_secs: 60,
        }),
    });
    Config {
        store: StoreConfig {
            url: "memory".to_string(),
            timeout_ms: 100,
        },
        credential: CredentialConfig {
            key: SECRET.to_string(),
            ..Default::default()
        },
        routes,
        ..Default::default()
    }
}

pub fn config_with_policy(session: FailMode, admission: FailMode) -> Config {
    Config {
        failure_policy: FailurePolicy { session, admission },
        ..config()
    }
}

pub fn gateway<S: SharedStore>(store: S) -> Gateway<S> {
    Gateway::new(&config(), Arc::new(store)).unwrap()
}

/// Gateway over a memory store whose clock the test controls.
pub fn clocked_gateway() -> (Gateway<MemoryStore>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let store = MemoryStore::with_clock(clock.clone());
    (gateway(store), clock)
}

pub fn request<'a>(
    method: &'a str,
    path: &'a str,
    authorization: Option<&'a str>,
    client_addr: IpAddr,
) -> AdmissionRequest<'a> {
    AdmissionRequest {
        method,
        path,
        authorization,
        client_addr,
    }
}

pub fn ip(last: u8) -> IpAddr {
    IpAddr::from([192, 0, 2, last])
}
