//! Tradegate - 交易运营 API 的请求准入网关
//!
//! 在任何交易业务逻辑执行之前完成来源地址、速率、凭证与权限检查，
//! 为交易接口提供统一的信任边界。

pub mod api;
pub mod config;
pub mod error;
pub mod observability;
pub mod security;
