//! Handlers 模块
//!
//! HTTP 请求处理程序。

pub mod auth_handler;

pub use auth_handler::*;
