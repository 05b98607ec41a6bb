//! Auth Routes
//!
//! 定义认证相关的 API 路由。

use crate::api::handlers::auth_handler::*;
use axum::{
    Router,
    routing::{get, post},
};

use crate::api::app_state::AppState;

/// 创建认证路由器
pub fn create_auth_router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
        .route("/change-password", post(change_password))
        .route("/me", get(me))
        .route("/accounts", post(create_account))
}
