//! Refresh Token Store
//!
//! Opaque refresh tokens with a TTL and a per-user cap on concurrent sessions.
//! When a user exceeds the cap the oldest tokens are evicted first.

use rand::RngCore;
use rand::rngs::OsRng;
use std::collections::VecDeque;
use tracing::debug;

use crate::security::accounts::CredentialError;
use crate::security::clock::SharedClock;
use crate::security::store::KeyedStore;

const REFRESH_TOKEN_BYTES: usize = 48;

/// Stored refresh token
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshRecord {
    pub username: String,
    pub client_ip: String,
    pub created_at: i64,
    pub expires_at: i64,
}

#[derive(Debug)]
pub struct RefreshTokenStore {
    records: KeyedStore<String, RefreshRecord>,
    /// username -> tokens in issue order
    by_user: KeyedStore<String, VecDeque<String>>,
    ttl_ms: i64,
    max_sessions: usize,
    ip_pinning: bool,
    clock: SharedClock,
}

fn generate_token() -> String {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

impl RefreshTokenStore {
    pub fn new(ttl_ms: i64, max_sessions: usize, ip_pinning: bool, clock: SharedClock) -> Self {
        Self {
            records: KeyedStore::new(clock.clone()),
            by_user: KeyedStore::new(clock.clone()),
            ttl_ms,
            max_sessions: max_sessions.max(1),
            ip_pinning,
            clock,
        }
    }

    /// Issue a token and evict the user's oldest sessions beyond the cap
    pub fn issue(&self, username: &str, client_ip: &str) -> String {
        let token = generate_token();
        let now = self.clock.now_ms();
        let record = RefreshRecord {
            username: username.to_string(),
            client_ip: client_ip.to_string(),
            created_at: now,
            expires_at: now + self.ttl_ms,
        };
        self.records
            .insert(token.clone(), record, Some(self.ttl_ms));

        let max_sessions = self.max_sessions;
        let evicted: Vec<String> = self.by_user.upsert(
            username.to_string(),
            None,
            VecDeque::new,
            |queue| {
                queue.retain(|t| self.records.contains(t));
                queue.push_back(token.clone());
                let excess = queue.len().saturating_sub(max_sessions);
                queue.drain(..excess).collect()
            },
        );

        for old in &evicted {
            self.records.remove(old);
        }
        if !evicted.is_empty() {
            debug!(username = %username, evicted = evicted.len(), "Evicted oldest refresh tokens");
        }

        token
    }

    /// Look up a live token, enforcing address pinning when enabled
    pub fn validate(&self, token: &str, client_ip: &str) -> Result<RefreshRecord, CredentialError> {
        let record = self
            .records
            .get(&token.to_string())
            .ok_or(CredentialError::InvalidRefreshToken)?;

        if self.ip_pinning && record.client_ip != client_ip {
            return Err(CredentialError::RefreshIpMismatch);
        }
        Ok(record)
    }

    pub fn remove(&self, token: &str) -> Option<RefreshRecord> {
        let record = self.records.remove(&token.to_string())?;
        self.by_user.update(&record.username, |queue| {
            if let Some(queue) = queue {
                queue.retain(|t| t != token);
            }
        });
        Some(record)
    }

    /// Remove `token` only when it belongs to `username`
    pub fn remove_owned(&self, token: &str, username: &str) -> Option<RefreshRecord> {
        let owner = self.records.get(&token.to_string())?.username;
        if owner != username {
            return None;
        }
        self.remove(token)
    }

    /// Remove every token belonging to `username`
    pub fn revoke_all(&self, username: &str) -> usize {
        let Some(tokens) = self.by_user.remove(&username.to_string()) else {
            return 0;
        };
        tokens
            .iter()
            .filter(|t| self.records.remove(*t).is_some())
            .count()
    }

    pub fn active_sessions(&self, username: &str) -> usize {
        self.by_user
            .get(&username.to_string())
            .map(|tokens| tokens.iter().filter(|t| self.records.contains(*t)).count())
            .unwrap_or(0)
    }

    /// Purge at most `limit` expired tokens and at most `limit` user indexes
    /// left without a live token
    pub fn sweep(&self, limit: usize) -> usize {
        let removed = self.records.sweep_expired(limit);
        let emptied = self
            .by_user
            .purge_where(limit, |_, queue, _| queue.iter().all(|t| !self.records.contains(t)));
        if emptied > 0 {
            debug!(users = emptied, "Dropped empty refresh token indexes");
        }
        removed
    }

    /// Number of users with a session index, live or not yet swept
    pub fn indexed_users(&self) -> usize {
        self.by_user.len()
    }
}
