// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Test harness for the admission gateway.
//!
//! Credential minting, gateway construction and misbehaving stores shared
//! by the integration and security tests.

#![allow(dead_code)]

pub mod fixtures;
pub mod metrics;
pub mod stores;
