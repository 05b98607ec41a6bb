//! API 模块
//!
//! 提供认证 REST API，并把准入网关挂到所有路由上。

pub mod app_state;
pub mod dto;
pub mod handlers;
pub mod routes;

use crate::api::app_state::AppState;
use crate::error::AppError;
use crate::observability::health_check;
use crate::security::middleware::{gate_middleware, security_headers_middleware};
use axum::{Router, middleware, routing::get};
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

pub fn create_router(app_state: AppState) -> Router {
    let timeout = Duration::from_secs(app_state.server.request_timeout.max(1));
    Router::new()
        .nest("/api/auth", routes::auth_routes::create_auth_router())
        .route("/health", get(health_check))
        // Every request, including unknown paths, passes the gate
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            gate_middleware,
        ))
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(TimeoutLayer::new(timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

pub async fn initialize_api(app_state: AppState) -> Result<Router, AppError> {
    tracing::info!("Initializing API router...");
    Ok(create_router(app_state))
}
