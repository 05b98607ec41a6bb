//! Security Middleware Module
//!
//! Axum middleware that runs every request through the
//! [`Gate`](crate::security::gate::Gate) and writes
//! rate-limit and security headers on the way out.

use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, Request, State, connect_info::MockConnectInfo},
    http::{HeaderMap, HeaderValue, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;

use crate::api::app_state::AppState;
use crate::error::AppError;
use crate::security::auth::{AuthContext, Credentials, SignedCredentials};
use crate::security::gate::{GateRejection, RequestMeta};
use crate::security::rate_limit::RateLimitDecision;

pub const HEADER_API_KEY: &str = "x-api-key";
pub const HEADER_TIMESTAMP: &str = "x-timestamp";
pub const HEADER_NONCE: &str = "x-nonce";
pub const HEADER_SIGNATURE: &str = "x-signature";

/// Resolved client address, inserted into request extensions
#[derive(Debug, Clone, PartialEq)]
pub struct ClientIp(pub String);

/// Extension trait for reading gate results from request extensions
pub trait RequestAuthExt {
    fn auth_context(&self) -> Option<&AuthContext>;
    fn client_ip(&self) -> Option<&str>;
}

impl RequestAuthExt for Request<Body> {
    fn auth_context(&self) -> Option<&AuthContext> {
        self.extensions().get::<AuthContext>()
    }

    fn client_ip(&self) -> Option<&str> {
        self.extensions().get::<ClientIp>().map(|ip| ip.0.as_str())
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Extract bearer and signed-request credentials from request headers
pub fn extract_credentials(headers: &HeaderMap) -> Credentials {
    let signed = header_str(headers, HEADER_API_KEY).map(|api_key| SignedCredentials {
        api_key: api_key.to_string(),
        timestamp: header_str(headers, HEADER_TIMESTAMP).unwrap_or_default().to_string(),
        nonce: header_str(headers, HEADER_NONCE).unwrap_or_default().to_string(),
        signature: header_str(headers, HEADER_SIGNATURE).unwrap_or_default().to_string(),
    });

    Credentials::from_authorization_header(header_str(headers, header::AUTHORIZATION.as_str()))
        .with_signed(signed)
}

/// Client address from the socket, or from `X-Forwarded-For` when proxies are trusted
pub fn extract_client_ip(req: &Request<Body>, trust_forwarded: bool) -> String {
    if trust_forwarded {
        let forwarded = header_str(req.headers(), "x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }
    }

    let extensions = req.extensions();
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
        .or_else(|| {
            extensions
                .get::<MockConnectInfo<SocketAddr>>()
                .map(|MockConnectInfo(addr)| *addr)
        })
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Add rate limit headers to response
pub fn add_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert("X-RateLimit-Limit", HeaderValue::from(decision.limit));
    headers.insert("X-RateLimit-Remaining", HeaderValue::from(decision.remaining));
    headers.insert("X-RateLimit-Reset", HeaderValue::from(decision.reset_at_secs()));
    if !decision.allowed {
        headers.insert(header::RETRY_AFTER, HeaderValue::from(decision.retry_after_secs));
    }
}

impl IntoResponse for GateRejection {
    fn into_response(self) -> Response {
        let mut response = self.error.into_response();
        if let Some(decision) = &self.rate_limit {
            add_rate_limit_headers(response.headers_mut(), decision);
        }
        response
    }
}

/// Admission middleware: IP allow-list, rate limit, credentials, permissions
pub async fn gate_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let client_ip = extract_client_ip(&req, state.server.trust_forwarded_headers);
    let (parts, body) = req.into_parts();

    let body: Bytes = match axum::body::to_bytes(body, state.server.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(_) => return AppError::PayloadTooLarge(state.server.max_body_bytes).into_response(),
    };

    let meta = RequestMeta {
        method: parts.method.as_str().to_string(),
        path: parts.uri.path().to_string(),
        client_ip: client_ip.clone(),
        credentials: extract_credentials(&parts.headers),
        body: body.clone(),
    };

    let admission = match state.gate.admit(&meta) {
        Ok(admission) => admission,
        Err(rejection) => return rejection.into_response(),
    };

    let mut req = Request::from_parts(parts, Body::from(body));
    req.extensions_mut().insert(ClientIp(client_ip));
    if let Some(context) = admission.context {
        req.extensions_mut().insert(context);
    }

    let mut response = next.run(req).await;
    add_rate_limit_headers(response.headers_mut(), &admission.rate_limit);
    response
}

/// Security headers middleware
pub async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert(
        "Strict-Transport-Security",
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(
        "Referrer-Policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );

    response
}
