//! 可观测性模块
//!
//! 结构化日志初始化与健康检查端点。

use axum::{Json, extract::State, response::IntoResponse};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError,
};

use crate::api::app_state::AppState;
use crate::config::config::LoggingConfig;

/// 健康状态
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: String,
    pub version: String,
    pub uptime_seconds: i64,
    pub accounts: usize,
    pub revoked_tokens: usize,
}

/// 获取健康状态
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let auth = state.gate.auth();
    Json(HealthStatus {
        status: "healthy".to_string(),
        timestamp: Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime_seconds(state.started_at),
        accounts: auth.account_count(),
        revoked_tokens: auth.revoked_count(),
    })
}

fn uptime_seconds(started_at: DateTime<Utc>) -> i64 {
    (Utc::now() - started_at).num_seconds().max(0)
}

// ===== Structured Logging =====

/// 初始化结构化日志
///
/// RUST_LOG 优先于配置的日志级别。配置了日志目录时，额外按天滚动写入 JSON 文件，
/// 返回的 guard 必须在进程退出前保持存活。
pub fn init_tracing(config: &LoggingConfig) -> Result<Option<WorkerGuard>, TryInitError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let stdout_layer = if config.structured {
        fmt::layer().json().with_target(true).boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_line_number(true)
            .boxed()
    };

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, &config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}
