//! Security Configuration
//!
//! Security-related configuration settings consumed by the gate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::security::rate_limit::{RouteLimit, WindowStrategy};
use crate::security::rbac::RoutePermission;

/// Registered signing key for the signed-request scheme
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ApiKeySettings {
    pub key: String,
    pub secret: String,
    pub role: String,
    pub permissions: Vec<String>,
    /// Quota multiplier for this key; the role multiplier applies when absent
    pub rate_limit_multiplier: Option<f64>,
}

/// Account created at startup when no account with that name exists
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BootstrapAccount {
    pub username: String,
    pub password: String,
    pub role: String,
}

/// Role and route permission tables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RbacSettings {
    /// Role with unconditional access
    pub admin_role: String,
    /// role -> permission set
    pub roles: HashMap<String, Vec<String>>,
    /// Evaluated in order; the first matching pattern wins
    pub routes: Vec<RoutePermission>,
}

impl Default for RbacSettings {
    fn default() -> Self {
        let roles = [
            ("admin", vec!["*"]),
            (
                "trader",
                vec![
                    "trades:*",
                    "positions:*",
                    "strategies:read",
                    "dashboard:read",
                ],
            ),
            (
                "analyst",
                vec![
                    "trades:read",
                    "positions:read",
                    "strategies:read",
                    "dashboard:read",
                ],
            ),
            ("viewer", vec!["dashboard:read"]),
        ]
        .into_iter()
        .map(|(role, perms)| {
            (
                role.to_string(),
                perms.into_iter().map(str::to_string).collect(),
            )
        })
        .collect();

        let routes = [
            ("POST /api/auth/accounts", "users:manage"),
            ("GET /api/trades", "trades:read"),
            ("POST /api/trades", "trades:write"),
            ("GET /api/trades/:id", "trades:read"),
            ("PUT /api/trades/:id", "trades:write"),
            ("DELETE /api/trades/:id", "trades:delete"),
            ("GET /api/positions", "positions:read"),
            ("GET /api/positions/:symbol", "positions:read"),
            ("POST /api/positions/:symbol/close", "positions:write"),
            ("GET /api/strategies", "strategies:read"),
            ("POST /api/strategies", "strategies:write"),
            ("PUT /api/strategies/:id", "strategies:write"),
            ("POST /api/strategies/:id/start", "strategies:execute"),
            ("POST /api/strategies/:id/stop", "strategies:execute"),
            ("GET /api/dashboard", "dashboard:read"),
        ]
        .into_iter()
        .map(|(route, permission)| RoutePermission::new(route, permission))
        .collect();

        Self {
            admin_role: "admin".to_string(),
            roles,
            routes,
        }
    }
}

/// Extended security configuration for the security layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    /// HMAC secret for bearer tokens
    pub jwt_secret: String,
    /// Access token lifetime in seconds
    pub access_token_ttl_secs: u64,
    /// Refresh token lifetime in seconds
    pub refresh_token_ttl_secs: u64,
    /// PBKDF2 iteration count for new hashes
    pub hash_iterations: u32,
    /// Concurrent password hashes
    pub hash_workers: usize,
    pub min_password_length: usize,
    /// Consecutive failures before lockout
    pub max_login_attempts: u32,
    pub lockout_duration_secs: u64,
    /// Live refresh tokens per user
    pub max_concurrent_sessions: usize,
    /// Bind refresh tokens to the issuing client address
    pub refresh_ip_pinning: bool,
    /// Revocation list size ceiling
    pub blacklist_max_entries: usize,
    /// Allowed clock skew for signed requests
    pub signature_skew_ms: i64,
    /// Addresses or CIDR blocks allowed to reach the API. Empty allows all.
    pub ip_whitelist: Vec<String>,
    /// Enable rate limiting
    pub rate_limit_enabled: bool,
    /// Addresses or CIDR blocks exempt from rate limiting
    pub rate_limit_whitelist: Vec<String>,
    /// role -> limit multiplier
    pub role_multipliers: HashMap<String, f64>,
    /// route prefix -> limit; the `default` key applies to unmatched routes
    pub rate_limits: HashMap<String, RouteLimit>,
    /// Background sweep period
    pub sweep_interval_secs: u64,
    /// Maximum entries each sweep removes per store
    pub sweep_batch: usize,
    pub api_keys: Vec<ApiKeySettings>,
    pub bootstrap_admin: Option<BootstrapAccount>,
    pub rbac: RbacSettings,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        let role_multipliers = [("admin", 2.0), ("trader", 1.5), ("analyst", 1.0), ("viewer", 1.0)]
            .into_iter()
            .map(|(role, m)| (role.to_string(), m))
            .collect();

        let rate_limits = [
            (
                "default",
                RouteLimit::new(60_000, 100, None, WindowStrategy::Sliding),
            ),
            (
                "/api/auth/login",
                RouteLimit::new(15 * 60_000, 10, Some(15 * 60_000), WindowStrategy::Fixed),
            ),
            (
                "/api/auth/refresh",
                RouteLimit::new(60_000, 20, None, WindowStrategy::Sliding),
            ),
            (
                "/api/trades",
                RouteLimit::new(1_000, 10, Some(30_000), WindowStrategy::Sliding),
            ),
        ]
        .into_iter()
        .map(|(route, limit)| (route.to_string(), limit))
        .collect();

        Self {
            jwt_secret: String::new(),
            access_token_ttl_secs: 900,
            refresh_token_ttl_secs: 7 * 24 * 3600,
            hash_iterations: 100_000,
            hash_workers: 4,
            min_password_length: 8,
            max_login_attempts: 5,
            lockout_duration_secs: 900,
            max_concurrent_sessions: 5,
            refresh_ip_pinning: false,
            blacklist_max_entries: 10_000,
            signature_skew_ms: 300_000,
            ip_whitelist: Vec::new(),
            rate_limit_enabled: true,
            rate_limit_whitelist: Vec::new(),
            role_multipliers,
            rate_limits,
            sweep_interval_secs: 60,
            sweep_batch: 1_000,
            api_keys: Vec::new(),
            bootstrap_admin: None,
            rbac: RbacSettings::default(),
        }
    }
}

impl SecuritySettings {
    /// Create development security settings
    pub fn development() -> Self {
        Self {
            jwt_secret: "dev-secret-change-in-production-min-32-chars".to_string(),
            hash_iterations: 10_000,
            rate_limit_whitelist: vec!["127.0.0.1".to_string()],
            bootstrap_admin: Some(BootstrapAccount {
                username: "admin".to_string(),
                password: "change-me-now".to_string(),
                role: "admin".to_string(),
            }),
            ..Self::default()
        }
    }

    /// Create production security settings
    pub fn production() -> Self {
        let mut settings = Self::default();
        settings.refresh_ip_pinning = true;
        settings
    }

    /// Check if a JWT secret is set (indicates production-like environment)
    pub fn has_jwt_secret(&self) -> bool {
        !self.jwt_secret.is_empty()
    }
}
