//! Account Store Module
//!
//! Owns the account records: creation, password verification with lockout,
//! and password changes.

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::security::clock::SharedClock;
use crate::security::events::{NotificationSink, SecurityEvent};
use crate::security::password::{self, HashPool};
use crate::security::store::KeyedStore;

/// Credential errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CredentialError {
    #[error("Password must be at least {min} characters")]
    PasswordTooShort { min: usize },

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Account is locked, retry in {retry_after_secs} seconds")]
    AccountLocked { retry_after_secs: u64 },

    #[error("Invalid or expired refresh token")]
    InvalidRefreshToken,

    #[error("Refresh token is bound to a different client address")]
    RefreshIpMismatch,

    #[error("Password hashing failed: {0}")]
    Hashing(String),
}

/// Stored account
#[derive(Debug, Clone)]
pub struct Account {
    pub username: String,
    pub password_hash: String,
    pub salt: String,
    pub iterations: u32,
    pub role: String,
    pub failed_attempts: u32,
    /// Epoch milliseconds
    pub locked_until: Option<i64>,
    pub created_at: i64,
    pub last_login: Option<i64>,
}

impl Account {
    pub fn is_locked(&self, now_ms: i64) -> bool {
        matches!(self.locked_until, Some(until) if until > now_ms)
    }

    pub fn view(&self) -> AccountView {
        AccountView {
            username: self.username.clone(),
            role: self.role.clone(),
            created_at: self.created_at,
            last_login: self.last_login,
        }
    }
}

/// Public projection of an account
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub username: String,
    pub role: String,
    pub created_at: i64,
    pub last_login: Option<i64>,
}

/// Password and lockout policy
#[derive(Debug, Clone)]
pub struct CredentialPolicy {
    pub iterations: u32,
    pub min_password_length: usize,
    pub max_login_attempts: u32,
    pub lockout_duration_ms: i64,
}

impl Default for CredentialPolicy {
    fn default() -> Self {
        Self {
            iterations: password::DEFAULT_ITERATIONS,
            min_password_length: 8,
            max_login_attempts: 5,
            lockout_duration_ms: 15 * 60 * 1000,
        }
    }
}

enum FailureOutcome {
    Counted(u32),
    Locked(i64),
    AlreadyLocked(i64),
    Gone,
}

fn retry_after_secs(until_ms: i64, now_ms: i64) -> u64 {
    let remaining = (until_ms - now_ms).max(0) as u64;
    remaining.div_ceil(1000).max(1)
}

/// In-memory account store
pub struct AccountStore {
    accounts: KeyedStore<String, Account>,
    policy: CredentialPolicy,
    pool: HashPool,
    clock: SharedClock,
    sink: Arc<dyn NotificationSink>,
}

impl std::fmt::Debug for AccountStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountStore")
            .field("accounts", &self.accounts)
            .field("policy", &self.policy)
            .finish()
    }
}

impl AccountStore {
    pub fn new(
        policy: CredentialPolicy,
        pool: HashPool,
        clock: SharedClock,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            accounts: KeyedStore::new(clock.clone()),
            policy,
            pool,
            clock,
            sink,
        }
    }

    pub fn policy(&self) -> &CredentialPolicy {
        &self.policy
    }

    fn check_length(&self, password: &str) -> Result<(), CredentialError> {
        if password.chars().count() < self.policy.min_password_length {
            return Err(CredentialError::PasswordTooShort {
                min: self.policy.min_password_length,
            });
        }
        Ok(())
    }

    async fn hash_new(&self, password: &str) -> Result<(String, String), CredentialError> {
        let salt = password::generate_salt();
        let iterations = self.policy.iterations;
        let password = password.to_string();
        let job_salt = salt.clone();
        let hash = self
            .pool
            .run(move || password::derive_hash(&password, &job_salt, iterations))
            .await?;
        Ok((hash, salt))
    }

    /// Create an account. An existing account with the same username is replaced.
    pub async fn create(
        &self,
        username: &str,
        password: &str,
        role: &str,
    ) -> Result<AccountView, CredentialError> {
        self.check_length(password)?;
        let (password_hash, salt) = self.hash_new(password).await?;

        let account = Account {
            username: username.to_string(),
            password_hash,
            salt,
            iterations: self.policy.iterations,
            role: role.to_string(),
            failed_attempts: 0,
            locked_until: None,
            created_at: self.clock.now_ms(),
            last_login: None,
        };
        let view = account.view();

        if self
            .accounts
            .insert(username.to_string(), account, None)
            .is_some()
        {
            debug!(username = %username, "Account replaced");
        } else {
            info!(username = %username, role = %role, "Account created");
        }

        Ok(view)
    }

    /// Verify a password, applying lockout on repeated failures
    pub async fn verify(&self, username: &str, password: &str) -> Result<Account, CredentialError> {
        let snapshot = self
            .accounts
            .get(&username.to_string())
            .ok_or(CredentialError::InvalidCredentials)?;

        let now = self.clock.now_ms();
        if let Some(until) = snapshot.locked_until.filter(|until| *until > now) {
            return Err(CredentialError::AccountLocked {
                retry_after_secs: retry_after_secs(until, now),
            });
        }

        let matches = {
            let password = password.to_string();
            let salt = snapshot.salt.clone();
            let expected = snapshot.password_hash.clone();
            let iterations = snapshot.iterations;
            self.pool
                .run(move || password::verify_hash(&password, &salt, iterations, &expected))
                .await?
        };

        let now = self.clock.now_ms();
        if matches {
            let verified = self.accounts.update(&username.to_string(), |account| {
                let account = account?;
                if account.password_hash != snapshot.password_hash {
                    return Some(Err(CredentialError::InvalidCredentials));
                }
                if let Some(until) = account.locked_until.filter(|until| *until > now) {
                    return Some(Err(CredentialError::AccountLocked {
                        retry_after_secs: retry_after_secs(until, now),
                    }));
                }
                account.failed_attempts = 0;
                account.locked_until = None;
                account.last_login = Some(now);
                Some(Ok(account.clone()))
            });
            return verified.unwrap_or(Err(CredentialError::InvalidCredentials));
        }

        let max_attempts = self.policy.max_login_attempts.max(1);
        let lockout = self.policy.lockout_duration_ms;
        let outcome = self.accounts.update(&username.to_string(), |account| {
            let Some(account) = account else {
                return FailureOutcome::Gone;
            };
            if let Some(until) = account.locked_until.filter(|until| *until > now) {
                return FailureOutcome::AlreadyLocked(until);
            }
            account.failed_attempts += 1;
            if account.failed_attempts >= max_attempts {
                let until = now + lockout;
                account.locked_until = Some(until);
                account.failed_attempts = 0;
                FailureOutcome::Locked(until)
            } else {
                FailureOutcome::Counted(account.failed_attempts)
            }
        });

        match outcome {
            FailureOutcome::Counted(attempts) => {
                debug!(username = %username, attempts, "Password verification failed");
                self.sink.notify(SecurityEvent::LoginFailed {
                    username: username.to_string(),
                    attempts,
                });
                Err(CredentialError::InvalidCredentials)
            }
            FailureOutcome::Locked(until) => {
                warn!(username = %username, locked_until = until, "Account locked after repeated failures");
                self.sink.notify(SecurityEvent::AccountLocked {
                    username: username.to_string(),
                    until_ms: until,
                });
                Err(CredentialError::AccountLocked {
                    retry_after_secs: retry_after_secs(until, now),
                })
            }
            FailureOutcome::AlreadyLocked(until) => Err(CredentialError::AccountLocked {
                retry_after_secs: retry_after_secs(until, now),
            }),
            FailureOutcome::Gone => Err(CredentialError::InvalidCredentials),
        }
    }

    /// Replace the password after verifying the old one
    pub async fn change_password(
        &self,
        username: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), CredentialError> {
        self.verify(username, old_password).await?;
        self.check_length(new_password)?;
        let (password_hash, salt) = self.hash_new(new_password).await?;
        let iterations = self.policy.iterations;

        let updated = self.accounts.update(&username.to_string(), |account| {
            let Some(account) = account else {
                return false;
            };
            account.password_hash = password_hash;
            account.salt = salt;
            account.iterations = iterations;
            true
        });

        if updated {
            info!(username = %username, "Password changed");
            Ok(())
        } else {
            Err(CredentialError::InvalidCredentials)
        }
    }

    pub fn get(&self, username: &str) -> Option<Account> {
        self.accounts.get(&username.to_string())
    }

    pub fn remove(&self, username: &str) -> Option<Account> {
        self.accounts.remove(&username.to_string())
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}
