//! Admission Gate
//!
//! Runs every request through the ordered checks:
//! IP allow-list, rate limit, credentials, authorization.
//!
//! The gate only sees the explicit [`RequestMeta`] it is handed, which keeps it
//! independent of the HTTP framework.

use axum::body::Bytes;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::security::auth::{AuthContext, AuthManager, AuthMethod, Credentials};
use crate::security::clock::SharedClock;
use crate::security::config::SecuritySettings;
use crate::security::events::{NotificationSink, SecurityEvent};
use crate::security::ip_filter::{IpAllowList, IpFilterError};
use crate::security::rate_limit::{RateLimitDecision, RateLimiter};
use crate::security::rbac::{Authorizer, RoleAuthorizer};
use crate::security::signature::{ApiKeyProfile, SignatureGuard};
use crate::security::token::{Claims, TokenError};

/// Routes that skip credential and permission checks
pub const PUBLIC_ROUTES: &[&str] = &["POST /api/auth/login", "POST /api/auth/refresh", "GET /health"];

/// Request facts the gate decides on
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub method: String,
    /// Path without query string
    pub path: String,
    pub client_ip: String,
    pub credentials: Credentials,
    /// Raw body, covered by request signatures
    pub body: Bytes,
}

/// Admitted request
#[derive(Debug, Clone)]
pub struct Admission {
    /// `None` on public routes
    pub context: Option<AuthContext>,
    pub rate_limit: RateLimitDecision,
}

/// Rejected request
#[derive(Debug)]
pub struct GateRejection {
    pub error: AppError,
    /// Present once the rate-limit stage has run
    pub rate_limit: Option<RateLimitDecision>,
}

impl GateRejection {
    fn new(error: impl Into<AppError>, rate_limit: Option<RateLimitDecision>) -> Self {
        Self {
            error: error.into(),
            rate_limit,
        }
    }
}

fn route_key(method: &str, path: &str) -> String {
    let path = match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    };
    format!("{} {}", method.to_uppercase(), path)
}

pub struct Gate {
    ip_allow: IpAllowList,
    limiter: RateLimiter,
    auth: Arc<AuthManager>,
    signatures: Arc<SignatureGuard>,
    authorizer: Arc<RoleAuthorizer>,
    public_routes: HashSet<String>,
    sink: Arc<dyn NotificationSink>,
}

impl std::fmt::Debug for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gate")
            .field("ip_allow", &self.ip_allow)
            .field("limiter", &self.limiter)
            .field("auth", &self.auth)
            .field("signatures", &self.signatures)
            .field("public_routes", &self.public_routes)
            .finish()
    }
}

impl Gate {
    pub fn new(
        ip_allow: IpAllowList,
        limiter: RateLimiter,
        auth: Arc<AuthManager>,
        signatures: Arc<SignatureGuard>,
        authorizer: Arc<RoleAuthorizer>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            ip_allow,
            limiter,
            auth,
            signatures,
            authorizer,
            public_routes: PUBLIC_ROUTES.iter().map(|r| r.to_string()).collect(),
            sink,
        }
    }

    /// Build every component from settings and register the configured API keys
    pub fn from_settings(
        settings: &SecuritySettings,
        clock: SharedClock,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self, IpFilterError> {
        let signatures = SignatureGuard::new(settings.signature_skew_ms, clock.clone(), sink.clone());
        for key in &settings.api_keys {
            signatures.register(
                &key.secret,
                ApiKeyProfile {
                    api_key: key.key.clone(),
                    role: key.role.clone(),
                    permissions: key.permissions.clone(),
                    rate_limit_multiplier: key.rate_limit_multiplier,
                },
            );
        }

        Ok(Self::new(
            IpAllowList::new(&settings.ip_whitelist)?,
            RateLimiter::from_settings(settings, clock.clone(), sink.clone())?,
            Arc::new(AuthManager::from_settings(settings, clock, sink.clone())),
            Arc::new(signatures),
            Arc::new(RoleAuthorizer::new(&settings.rbac)),
            sink,
        ))
    }

    /// Mark `"METHOD /path"` as public
    pub fn with_public_route(mut self, method: &str, path: &str) -> Self {
        self.public_routes.insert(route_key(method, path));
        self
    }

    pub fn is_public(&self, method: &str, path: &str) -> bool {
        self.public_routes.contains(&route_key(method, path))
    }

    pub fn auth(&self) -> &Arc<AuthManager> {
        &self.auth
    }

    pub fn signatures(&self) -> &Arc<SignatureGuard> {
        &self.signatures
    }

    pub fn authorizer(&self) -> &Arc<RoleAuthorizer> {
        &self.authorizer
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Limiter key and quota multiplier: a verified bearer subject, then a
    /// registered API key, then the client address. The key lookup leaves the
    /// nonce untouched.
    fn rate_limit_identity(
        &self,
        meta: &RequestMeta,
        bearer: &Option<Result<Claims, TokenError>>,
    ) -> (String, f64) {
        if let Some(Ok(claims)) = bearer {
            return (
                format!("user:{}", claims.sub),
                self.limiter.multiplier_for(Some(claims.role.as_str())),
            );
        }

        let profile = meta
            .credentials
            .signed
            .as_ref()
            .and_then(|signed| self.signatures.profile(&signed.api_key));
        match profile {
            Some(profile) => {
                let multiplier = profile
                    .rate_limit_multiplier
                    .unwrap_or_else(|| self.limiter.multiplier_for(Some(profile.role.as_str())));
                (format!("key:{}", profile.api_key), multiplier)
            }
            None => (format!("ip:{}", meta.client_ip), self.limiter.multiplier_for(None)),
        }
    }

    /// Run the request through every check in order
    pub fn admit(&self, meta: &RequestMeta) -> Result<Admission, GateRejection> {
        if !self.ip_allow.is_empty() && !self.ip_allow.allows(&meta.client_ip) {
            warn!(client_ip = %meta.client_ip, path = %meta.path, "Address not on allow-list");
            self.sink.notify(SecurityEvent::IpRejected {
                ip: meta.client_ip.clone(),
            });
            return Err(GateRejection::new(
                AppError::IpBlocked(meta.client_ip.clone()),
                None,
            ));
        }

        let bearer = meta
            .credentials
            .bearer
            .as_deref()
            .map(|token| self.auth.verify_token(token));

        let (identity, multiplier) = self.rate_limit_identity(meta, &bearer);
        let decision = self
            .limiter
            .check_scaled(&identity, &meta.path, multiplier, &meta.client_ip);
        if !decision.allowed {
            return Err(GateRejection::new(
                AppError::RateLimited {
                    retry_after_secs: decision.retry_after_secs,
                    blocked: decision.blocked,
                },
                Some(decision),
            ));
        }

        if self.is_public(&meta.method, &meta.path) {
            return Ok(Admission {
                context: None,
                rate_limit: decision,
            });
        }

        let context = match (bearer, &meta.credentials.signed) {
            (Some(Ok(claims)), _) => AuthContext::from_claims(&claims),
            (Some(Err(e)), _) => {
                debug!(error = %e, path = %meta.path, "Bearer token rejected");
                return Err(GateRejection::new(e, Some(decision)));
            }
            (None, Some(signed)) => {
                let profile = self
                    .signatures
                    .verify(
                        &signed.api_key,
                        &signed.timestamp,
                        &signed.nonce,
                        &signed.signature,
                        &meta.body,
                    )
                    .map_err(|e| {
                        debug!(error = %e, api_key = %signed.api_key, "Signed request rejected");
                        GateRejection::new(e, Some(decision.clone()))
                    })?;
                AuthContext {
                    subject: profile.api_key,
                    role: profile.role,
                    method: AuthMethod::Signature,
                    permissions: profile.permissions,
                }
            }
            (None, None) => {
                return Err(GateRejection::new(
                    AppError::AuthRequired("Authentication required".to_string()),
                    Some(decision),
                ));
            }
        };

        if let Err(denied) = self.authorizer.authorize(&context, &meta.method, &meta.path) {
            return Err(GateRejection::new(denied, Some(decision)));
        }

        Ok(Admission {
            context: Some(context),
            rate_limit: decision,
        })
    }
}
