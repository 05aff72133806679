// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Admission Gateway Service
//!
//! Runs the session validator and sliding-window limiter as an external
//! authorization service in front of an application's mutating routes.
//!
//! ## Configuration
//!
//! Configuration is loaded from an optional TOML file and the environment
//! (a `.env` file is read first if present):
//!
//! - `GATEWAY_CONFIG`: Path to a TOML config file
//! - `GATEWAY__BIND_ADDR`: Server bind address (default: 0.0.0.0:8080)
//! - `GATEWAY__STORE__URL`: Redis URL, or `memory` (default: redis://127.0.0.1:6379)
//! - `GATEWAY__STORE__TIMEOUT_MS`: Store round-trip timeout (default: 250)
//! - `GATEWAY__CREDENTIAL__ALGORITHM`: Credential algorithm (default: HS256)
//! - `GATEWAY__CREDENTIAL__KEY`: Credential secret or PEM public key (required)
//! - `GATEWAY__FAILURE_POLICY__SESSION` / `GATEWAY__FAILURE_POLICY__ADMISSION`:
//!   `closed` (default) or `open`

use admission_gateway::{
    config::Config,
    gateway::Gateway,
    handlers::{router, AppState},
    store::Store,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env first so RUST_LOG set there reaches the filter
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let config = Config::load()?;

    // One store client for the whole process
    let store = Arc::new(Store::connect(&config.store.url).await?);
    let gateway = Gateway::new(&config, store.clone())?;

    info!(
        bind_addr = %config.bind_addr,
        store = store.backend(),
        timeout_ms = config.store.timeout_ms,
        session_on_failure = ?config.failure_policy.session,
        admission_on_failure = ?config.failure_policy.admission,
        routes = config.routes.len(),
        "Starting admission gateway"
    );

    // Redis expires keys itself; the in-process store needs sweeping
    if let Store::Memory(memory) = store.as_ref() {
        let memory = memory.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                let removed = memory.cleanup().await;
                debug!(removed, "Swept expired keys");
            }
        });
    }

    let state = Arc::new(AppState {
        gateway,
        config: config.clone(),
    });
    let app = router(state);

    // Start server
    let addr: SocketAddr = config.bind_addr.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
