//! Security Module
//!
//! Admission control for the trading API:
//! - Credentials (password hashing, lockout, bearer and refresh tokens, revocation)
//! - Signed requests with replay protection
//! - IP allow-listing
//! - Rate limiting
//! - Authorization (RBAC)
//! - Gate orchestration and axum middleware

pub mod accounts;
pub mod auth;
pub mod clock;
pub mod config;
pub mod events;
pub mod gate;
pub mod ip_filter;
pub mod middleware;
pub mod password;
pub mod rate_limit;
pub mod rbac;
pub mod refresh;
pub mod revocation;
pub mod signature;
pub mod store;
pub mod sweeper;
pub mod token;
pub mod validation;

#[cfg(test)]
mod security_tests;

pub use auth::{AuthContext, AuthManager, AuthMethod, Credentials};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::SecuritySettings;
pub use events::{NotificationSink, SecurityEvent};
pub use gate::{Admission, Gate, GateRejection, RequestMeta};
pub use rate_limit::{RateLimitDecision, RateLimiter, RouteLimit, WindowStrategy};
pub use rbac::{Authorizer, RoleAuthorizer};
pub use signature::SignatureGuard;
pub use validation::{RequestValidator, Validatable};
