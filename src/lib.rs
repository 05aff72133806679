// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Admission Gateway
//!
//! Pre-conditions every mutating request passes before reaching business
//! logic, coordinated entirely through a shared key-value store:
//!
//! - Session-bound credential validation (logout and re-login revoke older
//!   copies of a credential immediately)
//! - Distributed sliding-window rate limiting per identity (or client
//!   address) and route, decided in one atomic store operation
//! - Explicit fail-closed/fail-open policy when the store is unreachable

pub mod config;
pub mod credential;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod limiter;
pub mod metrics;
pub mod session;
pub mod store;

pub use config::Config;
pub use error::{GatewayError, StoreError};
pub use gateway::{AdmissionRequest, Decision, Gateway, Rejection};
pub use limiter::{Admission, AdmissionLimiter, Requester};
pub use session::{SessionRegistry, SessionValidator};
pub use store::{SharedStore, Store};
