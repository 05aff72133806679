// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! HTTP handlers for the admission gateway.
//!
//! The gate can be used two ways: as an external authorization service
//! (`POST /check`, called by Envoy or another proxy before forwarding), or
//! embedded in front of application routes with [`protect`].

use crate::config::Config;
use crate::gateway::{parse_bearer, AdmissionRequest, Decision, Gateway, Rejection};
use crate::store::Store;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

/// Shared application state.
pub struct AppState {
    pub gateway: Gateway<Store>,
    pub config: Config,
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_count: Option<u32>,
}

impl ErrorResponse {
    fn plain(error: impl Into<String>, code: &'static str) -> Self {
        Self {
            error: error.into(),
            code,
            limit: None,
            window_secs: None,
            observed_count: None,
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// Admission check request (for external authorization).
#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub ip: String,
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub authorization: Option<String>,
}

/// Admission check response.
#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u32>,
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        match self {
            Rejection::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, "Bearer")],
                Json(ErrorResponse::plain(
                    "Could not validate credentials",
                    "UNAUTHENTICATED",
                )),
            )
                .into_response(),
            Rejection::Throttled {
                limit,
                window_secs,
                observed_count,
            } => (
                StatusCode::TOO_MANY_REQUESTS,
                [
                    (header::RETRY_AFTER, window_secs.to_string()),
                    (
                        header::HeaderName::from_static("x-ratelimit-limit"),
                        limit.to_string(),
                    ),
                ],
                Json(ErrorResponse {
                    error: format!(
                        "Rate limit exceeded. Maximum {limit} requests per {window_secs} seconds."
                    ),
                    code: "RATE_LIMITED",
                    limit: Some(limit),
                    window_secs: Some(window_secs),
                    observed_count,
                }),
            )
                .into_response(),
        }
    }
}

/// Set `X-RateLimit-*` headers for an admitted request with a quota.
fn add_rate_limit_headers(headers: &mut HeaderMap, decision: &Decision) {
    if let Some(admission) = decision.admission {
        headers.insert("x-ratelimit-limit", HeaderValue::from(admission.limit));
        headers.insert("x-ratelimit-remaining", HeaderValue::from(admission.remaining()));
    }
}

/// Client address: the first `X-Forwarded-For` hop when trusted, else the peer.
pub fn client_addr(headers: &HeaderMap, peer: Option<IpAddr>, trust_forwarded_for: bool) -> IpAddr {
    let forwarded = trust_forwarded_for
        .then(|| headers.get("x-forwarded-for"))
        .flatten()
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|hop| hop.trim().parse::<IpAddr>().ok());

    forwarded.or(peer).unwrap_or_else(|| {
        warn!("Client address unknown, throttling as unspecified");
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    })
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "admission-gateway",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Prometheus scrape endpoint.
pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.gateway.metrics().render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Decide admission for a request described by a proxy.
pub async fn check(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CheckRequest>,
) -> Response {
    debug!(
        ip = %req.ip,
        method = %req.method,
        path = %req.path,
        "Processing admission check"
    );

    let client_addr: IpAddr = match req.ip.parse() {
        Ok(ip) => ip,
        Err(_) => {
            warn!(ip = %req.ip, "Invalid IP address format");
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::plain("Invalid IP address format", "INVALID_IP")),
            )
                .into_response();
        }
    };

    let request = AdmissionRequest {
        method: &req.method,
        path: &req.path,
        authorization: req.authorization.as_deref(),
        client_addr,
    };

    match state.gateway.admit(&request).await {
        Ok(decision) => {
            let mut response = Json(CheckResponse {
                allowed: true,
                subject: decision.identity.as_ref().map(|i| i.subject.clone()),
                limit: decision.admission.map(|a| a.limit),
                remaining: decision.admission.map(|a| a.remaining()),
            })
            .into_response();
            add_rate_limit_headers(response.headers_mut(), &decision);
            response
        }
        Err(rejection) => rejection.into_response(),
    }
}

/// End the session of the presented credential.
pub async fn logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let identity = match state.gateway.authenticate(authorization).await {
        Ok(identity) => identity,
        Err(rejection) => return rejection.into_response(),
    };
    let Some(token) = authorization.and_then(parse_bearer) else {
        return Rejection::Unauthenticated.into_response();
    };

    match state.gateway.sessions().revoke(token).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            warn!(subject = %identity.subject, error = %err, "Logout failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse::plain(
                    "Session store unavailable",
                    "STORE_UNAVAILABLE",
                )),
            )
                .into_response()
        }
    }
}

/// Gate every request before it reaches the wrapped routes.
///
/// On admission the [`Decision`] is available to handlers as a request
/// extension.
pub async fn admission_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let addr = client_addr(request.headers(), peer, state.config.trust_forwarded_for);
    let method = request.method().as_str().to_string();
    let path = request.uri().path().to_string();
    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .map(|v| v.to_str().unwrap_or_default().to_string());

    let admission = AdmissionRequest {
        method: &method,
        path: &path,
        authorization: authorization.as_deref(),
        client_addr: addr,
    };

    let decision = match state.gateway.admit(&admission).await {
        Ok(decision) => decision,
        Err(rejection) => return rejection.into_response(),
    };

    request.extensions_mut().insert(decision.clone());
    let mut response = next.run(request).await;
    add_rate_limit_headers(response.headers_mut(), &decision);
    response
}

/// Put the admission gate in front of `app`.
pub fn protect(app: Router, state: Arc<AppState>) -> Router {
    app.layer(middleware::from_fn_with_state(state, admission_middleware))
}

/// Routes served by the gateway itself.
pub fn router(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/check", post(check))
        .route("/session/logout", post(logout));

    if state.config.metrics.enabled {
        app = app.route(&state.config.metrics.path, get(metrics));
    }

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_addr_ignores_forwarded_for_by_default() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9"));
        let peer: IpAddr = "10.0.0.1".parse().unwrap();

        assert_eq!(client_addr(&headers, Some(peer), false), peer);
    }

    #[test]
    fn test_client_addr_uses_first_forwarded_hop_when_trusted() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.2"),
        );
        let peer: IpAddr = "10.0.0.1".parse().unwrap();

        assert_eq!(
            client_addr(&headers, Some(peer), true),
            "203.0.113.9".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn test_client_addr_falls_back_to_peer_on_garbage() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("not-an-ip"));
        let peer: IpAddr = "10.0.0.1".parse().unwrap();

        assert_eq!(client_addr(&headers, Some(peer), true), peer);
    }

    #[test]
    fn test_throttled_response_carries_backoff_detail() {
        let response = Rejection::Throttled {
            limit: 5,
            window_secs: 60,
            observed_count: Some(5),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "60");
        assert_eq!(response.headers()["x-ratelimit-limit"], "5");
    }

    #[test]
    fn test_unauthenticated_response_asks_for_bearer() {
        let response = Rejection::Unauthenticated.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");
    }
}
