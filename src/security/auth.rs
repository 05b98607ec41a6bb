//! Authentication Module
//!
//! Provides the credential and token manager:
//! - Account passwords with lockout
//! - Bearer token issuance and verification
//! - Refresh tokens with a per-user session cap
//! - Revocation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::Result;
use crate::security::accounts::{AccountStore, AccountView, CredentialError, CredentialPolicy};
use crate::security::clock::SharedClock;
use crate::security::config::SecuritySettings;
use crate::security::events::{NotificationSink, SecurityEvent};
use crate::security::password::HashPool;
use crate::security::refresh::RefreshTokenStore;
use crate::security::revocation::TokenBlacklist;
use crate::security::token::{Claims, JwtCodec, TokenCodec, TokenError};

/// Signed-request header values
#[derive(Debug, Clone, PartialEq)]
pub struct SignedCredentials {
    pub api_key: String,
    pub timestamp: String,
    pub nonce: String,
    pub signature: String,
}

/// Credentials presented with a request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Credentials {
    /// Bearer token (if provided)
    pub bearer: Option<String>,
    /// Signed-request quartet (if all four headers were provided)
    pub signed: Option<SignedCredentials>,
}

impl Credentials {
    /// Try to extract a bearer token from the Authorization header
    pub fn from_authorization_header(auth_header: Option<&str>) -> Self {
        let bearer = auth_header
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        Self {
            bearer,
            signed: None,
        }
    }

    pub fn with_signed(mut self, signed: Option<SignedCredentials>) -> Self {
        self.signed = signed;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.bearer.is_none() && self.signed.is_none()
    }
}

/// How a caller authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    Bearer,
    Signature,
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Bearer => write!(f, "bearer"),
            AuthMethod::Signature => write!(f, "signature"),
        }
    }
}

/// Authenticated caller attached to the request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthContext {
    /// Username or API key
    pub subject: String,
    pub role: String,
    pub method: AuthMethod,
    /// Extra permissions carried by the credential itself
    pub permissions: Vec<String>,
}

impl AuthContext {
    pub fn from_claims(claims: &Claims) -> Self {
        Self {
            subject: claims.sub.clone(),
            role: claims.role.clone(),
            method: AuthMethod::Bearer,
            permissions: Vec::new(),
        }
    }
}

/// Result of a successful login
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    pub user: AccountView,
}

/// Result of a refresh
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessGrant {
    pub access_token: String,
    pub expires_in: i64,
}

/// Credential and token manager
pub struct AuthManager {
    accounts: AccountStore,
    codec: Arc<dyn TokenCodec>,
    blacklist: TokenBlacklist,
    refresh: RefreshTokenStore,
    access_ttl_secs: i64,
    clock: SharedClock,
    sink: Arc<dyn NotificationSink>,
}

impl fmt::Debug for AuthManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthManager")
            .field("accounts", &self.accounts)
            .field("codec", &self.codec)
            .field("blacklist", &self.blacklist)
            .field("refresh", &self.refresh)
            .field("access_ttl_secs", &self.access_ttl_secs)
            .finish()
    }
}

impl AuthManager {
    pub fn new(
        accounts: AccountStore,
        codec: Arc<dyn TokenCodec>,
        blacklist: TokenBlacklist,
        refresh: RefreshTokenStore,
        access_ttl_secs: i64,
        clock: SharedClock,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            accounts,
            codec,
            blacklist,
            refresh,
            access_ttl_secs: access_ttl_secs.max(1),
            clock,
            sink,
        }
    }

    /// Create from security settings
    pub fn from_settings(
        settings: &SecuritySettings,
        clock: SharedClock,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let policy = CredentialPolicy {
            iterations: settings.hash_iterations,
            min_password_length: settings.min_password_length,
            max_login_attempts: settings.max_login_attempts,
            lockout_duration_ms: (settings.lockout_duration_secs as i64).saturating_mul(1000),
        };
        let accounts = AccountStore::new(
            policy,
            HashPool::new(settings.hash_workers),
            clock.clone(),
            sink.clone(),
        );
        let refresh = RefreshTokenStore::new(
            (settings.refresh_token_ttl_secs as i64).saturating_mul(1000),
            settings.max_concurrent_sessions,
            settings.refresh_ip_pinning,
            clock.clone(),
        );

        Self::new(
            accounts,
            Arc::new(JwtCodec::new(&settings.jwt_secret)),
            TokenBlacklist::new(settings.blacklist_max_entries, clock.clone()),
            refresh,
            settings.access_token_ttl_secs as i64,
            clock,
            sink,
        )
    }

    pub fn access_ttl_secs(&self) -> i64 {
        self.access_ttl_secs
    }

    pub async fn create_account(
        &self,
        username: &str,
        password: &str,
        role: &str,
    ) -> std::result::Result<AccountView, CredentialError> {
        self.accounts.create(username, password, role).await
    }

    pub async fn verify_password(
        &self,
        username: &str,
        password: &str,
    ) -> std::result::Result<AccountView, CredentialError> {
        self.accounts
            .verify(username, password)
            .await
            .map(|account| account.view())
    }

    /// Sign a fresh access token for `subject`
    pub fn issue_token(&self, subject: &str, role: &str) -> std::result::Result<String, TokenError> {
        let iat = self.clock.now_secs();
        let claims = Claims {
            sub: subject.to_string(),
            role: role.to_string(),
            iat,
            exp: iat + self.access_ttl_secs,
            jti: Uuid::new_v4().to_string(),
        };
        self.codec.encode(&claims)
    }

    /// Verify an access token: revocation, structure, signature, payload, expiry
    pub fn verify_token(&self, token: &str) -> std::result::Result<Claims, TokenError> {
        if self.blacklist.is_revoked(token) {
            return Err(TokenError::Revoked);
        }
        let claims = self.codec.decode(token)?;
        if claims.is_expired_at(self.clock.now_ms()) {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }

    pub fn issue_refresh_token(&self, username: &str, client_ip: &str) -> String {
        self.refresh.issue(username, client_ip)
    }

    /// Exchange a refresh token for a new access token. The refresh token stays valid.
    pub fn refresh_access_token(&self, refresh_token: &str, client_ip: &str) -> Result<AccessGrant> {
        let record = self.refresh.validate(refresh_token, client_ip)?;
        let account = self
            .accounts
            .get(&record.username)
            .ok_or(CredentialError::InvalidRefreshToken)?;

        let access_token = self.issue_token(&account.username, &account.role)?;
        debug!(username = %account.username, "Access token refreshed");
        Ok(AccessGrant {
            access_token,
            expires_in: self.access_ttl_secs,
        })
    }

    /// Blacklist an access token and drop the paired refresh token.
    /// The refresh token is only dropped when it belongs to the access token's subject.
    pub fn revoke(&self, token: &str, refresh_token: Option<&str>) {
        let claims = self.codec.decode(token).ok();
        let expires_at = claims
            .as_ref()
            .map(|claims| claims.expires_at_ms())
            .unwrap_or_else(|| self.clock.now_ms() + self.access_ttl_secs * 1000);
        self.blacklist.revoke(token, expires_at);

        if let Some(refresh_token) = refresh_token {
            let removed = claims
                .as_ref()
                .and_then(|claims| self.refresh.remove_owned(refresh_token, &claims.sub));
            if removed.is_none() {
                debug!("Refresh token not owned by the revoked subject, left in place");
            }
        }
    }

    /// Change a password and end every session of the user
    pub async fn change_password(
        &self,
        username: &str,
        old_password: &str,
        new_password: &str,
    ) -> std::result::Result<usize, CredentialError> {
        self.accounts
            .change_password(username, old_password, new_password)
            .await?;

        let count = self.refresh.revoke_all(username);
        self.sink.notify(SecurityEvent::PasswordChanged {
            username: username.to_string(),
        });
        if count > 0 {
            self.sink.notify(SecurityEvent::SessionsRevoked {
                username: username.to_string(),
                count,
            });
        }
        Ok(count)
    }

    pub async fn login(&self, username: &str, password: &str, client_ip: &str) -> Result<LoginResponse> {
        let user = self.verify_password(username, password).await?;
        let access_token = self.issue_token(&user.username, &user.role)?;
        let refresh_token = self.issue_refresh_token(&user.username, client_ip);

        info!(username = %user.username, client_ip = %client_ip, "Login succeeded");
        Ok(LoginResponse {
            access_token,
            refresh_token,
            expires_in: self.access_ttl_secs,
            user,
        })
    }

    /// Revoke and report success regardless of token state
    pub fn logout(&self, token: &str, refresh_token: Option<&str>) {
        self.revoke(token, refresh_token);
        debug!("Logout processed");
    }

    pub fn account(&self, username: &str) -> Option<AccountView> {
        self.accounts.get(username).map(|account| account.view())
    }

    /// Remove an account together with its refresh tokens
    pub fn delete_account(&self, username: &str) -> bool {
        let removed = self.accounts.remove(username).is_some();
        let count = self.refresh.revoke_all(username);
        if removed {
            info!(username = %username, sessions = count, "Account deleted");
        }
        removed
    }

    pub fn active_sessions(&self, username: &str) -> usize {
        self.refresh.active_sessions(username)
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    /// Expire refresh tokens and revocation entries
    pub fn sweep(&self, limit: usize) -> usize {
        self.blacklist.sweep(limit) + self.refresh.sweep(limit)
    }

    pub fn revoked_count(&self) -> usize {
        self.blacklist.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_from_authorization_header() {
        let creds = Credentials::from_authorization_header(Some("Bearer abc.def.ghi"));
        assert_eq!(creds.bearer.as_deref(), Some("abc.def.ghi"));

        assert!(Credentials::from_authorization_header(Some("Basic xyz")).is_empty());
        assert!(Credentials::from_authorization_header(Some("Bearer   ")).is_empty());
        assert!(Credentials::from_authorization_header(None).is_empty());
    }

    #[test]
    fn test_auth_context_serialises_camel_case() {
        let ctx = AuthContext {
            subject: "alice".into(),
            role: "trader".into(),
            method: AuthMethod::Signature,
            permissions: vec![],
        };
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["method"], "signature");
        assert_eq!(json["subject"], "alice");
    }
}
