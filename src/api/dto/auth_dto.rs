//! 认证 DTO
//!
//! 定义认证相关的请求和响应数据结构。

use serde::{Deserialize, Serialize};

use crate::security::auth::AuthContext;
use crate::security::validation::{
    RequestValidator, Sanitizable, Validatable, ValidationResult, validators,
};

/// 统一成功响应
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    /// 恒为 true
    pub success: bool,
    /// 响应数据
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    /// 无数据的成功响应
    pub fn empty() -> Self {
        Self {
            success: true,
            data: None,
        }
    }
}

/// 登录请求
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    /// 用户名
    pub username: String,
    /// 密码
    pub password: String,
}

impl Validatable for LoginRequest {
    fn validate(&self) -> ValidationResult<()> {
        validators::validate_username(&self.username)?;
        validators::validate_password_field("password", &self.password)
    }
}

impl Sanitizable for LoginRequest {
    fn sanitize(&mut self) {
        self.username = RequestValidator::sanitize_string(&self.username);
    }
}

/// 刷新令牌请求
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    /// 刷新令牌
    pub refresh_token: String,
}

impl Validatable for RefreshRequest {
    fn validate(&self) -> ValidationResult<()> {
        RequestValidator::new().validate_length("refreshToken", &self.refresh_token, Some(1), Some(128))
    }
}

impl Sanitizable for RefreshRequest {
    fn sanitize(&mut self) {
        self.refresh_token = RequestValidator::sanitize_string(&self.refresh_token);
    }
}

/// 登出请求
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LogoutRequest {
    /// 同时作废的刷新令牌
    pub refresh_token: Option<String>,
}

/// 修改密码请求
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    /// 旧密码
    pub old_password: String,
    /// 新密码
    pub new_password: String,
}

impl Validatable for ChangePasswordRequest {
    fn validate(&self) -> ValidationResult<()> {
        validators::validate_password_field("oldPassword", &self.old_password)?;
        validators::validate_password_field("newPassword", &self.new_password)
    }
}

/// 修改密码响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordResponse {
    /// 被作废的会话数
    pub revoked_sessions: usize,
}

/// 创建账户请求
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountRequest {
    /// 用户名
    pub username: String,
    /// 初始密码
    pub password: String,
    /// 角色
    pub role: String,
}

impl Validatable for CreateAccountRequest {
    fn validate(&self) -> ValidationResult<()> {
        validators::validate_username(&self.username)?;
        validators::validate_password_field("password", &self.password)?;
        RequestValidator::new().validate_safe_chars("role", &self.role, &['-', '_'])
    }
}

impl Sanitizable for CreateAccountRequest {
    fn sanitize(&mut self) {
        self.username = RequestValidator::sanitize_string(&self.username);
        self.role = RequestValidator::sanitize_string(&self.role);
    }
}

/// 当前调用方信息
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    #[serde(flatten)]
    pub context: AuthContext,
    /// 角色与授权合并后的有效权限
    pub effective_permissions: Vec<String>,
}
