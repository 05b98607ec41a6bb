//! 错误处理模块
//!
//! 定义应用程序的错误类型和错误处理逻辑。

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

use crate::security::accounts::CredentialError;
use crate::security::ip_filter::IpFilterError;
use crate::security::rbac::AccessDenied;
use crate::security::signature::SignatureError;
use crate::security::token::TokenError;
use crate::security::validation::ValidationError;

/// 应用程序错误类型
#[derive(Error, Debug)]
pub enum AppError {
    /// 参数验证错误
    #[error("{0}")]
    Validation(String),

    /// 缺少凭证
    #[error("{0}")]
    AuthRequired(String),

    /// 凭证无效
    #[error("{message}")]
    AuthInvalid { code: &'static str, message: String },

    /// 账户已锁定
    #[error("Account is locked, retry in {retry_after_secs} seconds")]
    AccountLocked { retry_after_secs: u64 },

    /// 令牌已过期
    #[error("Token has expired")]
    TokenExpired,

    /// 令牌已吊销
    #[error("Token has been revoked")]
    TokenRevoked,

    /// 权限不足
    #[error("{0}")]
    Forbidden(String),

    /// 来源地址不在白名单
    #[error("Access from this address is not allowed")]
    IpBlocked(String),

    /// 速率限制
    #[error("Too many requests, retry in {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64, blocked: bool },

    /// 资源不存在
    #[error("{0}")]
    NotFound(String),

    /// 请求体过大
    #[error("Request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),
}

impl AppError {
    pub fn auth_invalid(code: &'static str, message: impl Into<String>) -> Self {
        AppError::AuthInvalid {
            code,
            message: message.into(),
        }
    }

    /// HTTP 状态码
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::AuthRequired(_)
            | AppError::AuthInvalid { .. }
            | AppError::AccountLocked { .. }
            | AppError::TokenExpired
            | AppError::TokenRevoked => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) | AppError::IpBlocked(_) => StatusCode::FORBIDDEN,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Config(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 机器可读错误代码
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::AuthRequired(_) => "AUTH_REQUIRED",
            AppError::AuthInvalid { code, .. } => *code,
            AppError::AccountLocked { .. } => "ACCOUNT_LOCKED",
            AppError::TokenExpired => "TOKEN_EXPIRED",
            AppError::TokenRevoked => "TOKEN_REVOKED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::IpBlocked(_) => "IP_BLOCKED",
            AppError::RateLimited { .. } => "RATE_LIMIT_EXCEEDED",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            AppError::Config(_) | AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 对外消息，内部错误不暴露细节
    pub fn public_message(&self) -> String {
        match self {
            AppError::Config(_) | AppError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<CredentialError> for AppError {
    fn from(e: CredentialError) -> Self {
        match e {
            CredentialError::PasswordTooShort { .. } => AppError::Validation(e.to_string()),
            CredentialError::InvalidCredentials => {
                AppError::auth_invalid("INVALID_CREDENTIALS", e.to_string())
            }
            CredentialError::AccountLocked { retry_after_secs } => {
                AppError::AccountLocked { retry_after_secs }
            }
            CredentialError::InvalidRefreshToken | CredentialError::RefreshIpMismatch => {
                AppError::auth_invalid("INVALID_REFRESH_TOKEN", e.to_string())
            }
            CredentialError::Hashing(msg) => AppError::Internal(msg),
        }
    }
}

impl From<TokenError> for AppError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Revoked => AppError::TokenRevoked,
            TokenError::Expired => AppError::TokenExpired,
            TokenError::InvalidFormat => AppError::auth_invalid("INVALID_FORMAT", e.to_string()),
            TokenError::InvalidSignature => {
                AppError::auth_invalid("INVALID_SIGNATURE", e.to_string())
            }
            TokenError::InvalidToken(_) => AppError::auth_invalid("INVALID_TOKEN", "Invalid token"),
            TokenError::Signing(msg) => AppError::Internal(msg),
        }
    }
}

impl From<SignatureError> for AppError {
    fn from(e: SignatureError) -> Self {
        let code = match e {
            SignatureError::InvalidKey => "INVALID_API_KEY",
            SignatureError::InvalidTimestamp => "INVALID_TIMESTAMP",
            SignatureError::Expired => "REQUEST_EXPIRED",
            SignatureError::ReplayDetected => "REPLAY_DETECTED",
            SignatureError::InvalidSignature => "INVALID_SIGNATURE",
        };
        AppError::auth_invalid(code, e.to_string())
    }
}

impl From<AccessDenied> for AppError {
    fn from(e: AccessDenied) -> Self {
        AppError::Forbidden(e.to_string())
    }
}

impl From<ValidationError> for AppError {
    fn from(e: ValidationError) -> Self {
        AppError::Validation(e.to_string())
    }
}

impl From<IpFilterError> for AppError {
    fn from(e: IpFilterError) -> Self {
        AppError::Config(e.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Internal(e.to_string())
    }
}

/// Axum response implementation for AppError
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }

        let mut body = ErrorResponse::new(self.code(), &self.public_message());
        match &self {
            AppError::RateLimited {
                retry_after_secs,
                blocked,
            } => {
                body.retry_after = Some(*retry_after_secs);
                body.blocked = Some(*blocked);
            }
            AppError::AccountLocked { retry_after_secs } => {
                body.retry_after = Some(*retry_after_secs);
            }
            _ => {}
        }

        let retry_after = body.retry_after;
        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

/// 错误响应
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// 恒为 false
    pub success: bool,
    /// 错误代码
    pub code: String,
    /// 错误消息
    pub error: String,
    /// 重试等待秒数
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    /// 是否处于冷却封禁
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked: Option<bool>,
}

impl ErrorResponse {
    /// 创建新错误响应
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            success: false,
            code: code.to_string(),
            error: message.to_string(),
            retry_after: None,
            blocked: None,
        }
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, AppError>;
