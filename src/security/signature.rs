//! Signed Request Module
//!
//! Callers holding a registered key sign `apiKey ‖ timestamp ‖ nonce ‖ body` with
//! HMAC-SHA256 and send the hex digest in `X-Signature`. Each nonce is accepted
//! once; accepted nonces are remembered for one millisecond past twice the skew
//! window, after which the timestamp check alone rejects a replay.

use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::security::clock::SharedClock;
use crate::security::events::{NotificationSink, SecurityEvent};
use crate::security::store::KeyedStore;

type HmacSha256 = Hmac<Sha256>;

/// Signed request errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SignatureError {
    #[error("Unknown API key")]
    InvalidKey,

    #[error("Timestamp is not a decimal epoch millisecond value")]
    InvalidTimestamp,

    #[error("Request timestamp outside the accepted window")]
    Expired,

    #[error("Nonce has already been used")]
    ReplayDetected,

    #[error("Request signature mismatch")]
    InvalidSignature,
}

/// Identity and permissions bound to an API key
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyProfile {
    pub api_key: String,
    pub role: String,
    pub permissions: Vec<String>,
    /// Overrides the role multiplier when the limiter scales this key's quota
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit_multiplier: Option<f64>,
}

#[derive(Debug, Clone)]
struct RegisteredKey {
    secret: String,
    profile: ApiKeyProfile,
}

fn mac_for(secret: &str, api_key: &str, timestamp: &str, nonce: &str, body: &[u8]) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(api_key.as_bytes());
    mac.update(timestamp.as_bytes());
    mac.update(nonce.as_bytes());
    mac.update(body);
    Some(mac)
}

/// Compute the hex signature a caller sends in `X-Signature`
pub fn sign(secret: &str, api_key: &str, timestamp: &str, nonce: &str, body: &[u8]) -> String {
    mac_for(secret, api_key, timestamp, nonce, body)
        .map(|mac| hex::encode(mac.finalize().into_bytes()))
        .unwrap_or_default()
}

pub struct SignatureGuard {
    keys: KeyedStore<String, RegisteredKey>,
    /// nonce -> first seen, epoch ms
    nonces: KeyedStore<String, i64>,
    skew_ms: i64,
    clock: SharedClock,
    sink: Arc<dyn NotificationSink>,
}

impl std::fmt::Debug for SignatureGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureGuard")
            .field("keys", &self.keys)
            .field("nonces", &self.nonces)
            .field("skew_ms", &self.skew_ms)
            .finish()
    }
}

impl SignatureGuard {
    pub fn new(skew_ms: i64, clock: SharedClock, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            keys: KeyedStore::new(clock.clone()),
            nonces: KeyedStore::new(clock.clone()),
            skew_ms: skew_ms.max(0),
            clock,
            sink,
        }
    }

    /// Bind a shared secret and permission profile to `api_key`
    pub fn register_key(&self, api_key: &str, secret: &str, role: &str, permissions: Vec<String>) {
        self.register(
            secret,
            ApiKeyProfile {
                api_key: api_key.to_string(),
                role: role.to_string(),
                permissions,
                rate_limit_multiplier: None,
            },
        );
    }

    /// Register a full profile, including its rate-limit override
    pub fn register(&self, secret: &str, profile: ApiKeyProfile) {
        info!(
            api_key = %profile.api_key,
            role = %profile.role,
            rate_limit_multiplier = ?profile.rate_limit_multiplier,
            "API key registered"
        );
        let key = RegisteredKey {
            secret: secret.to_string(),
            profile,
        };
        self.keys.insert(key.profile.api_key.clone(), key, None);
    }

    /// Registered profile for `api_key`, without verifying anything
    pub fn profile(&self, api_key: &str) -> Option<ApiKeyProfile> {
        self.keys.get(&api_key.to_string()).map(|key| key.profile)
    }

    pub fn revoke_key(&self, api_key: &str) -> bool {
        self.keys.remove(&api_key.to_string()).is_some()
    }

    /// Verify a signed request and consume its nonce
    pub fn verify(
        &self,
        api_key: &str,
        timestamp: &str,
        nonce: &str,
        signature: &str,
        body: &[u8],
    ) -> Result<ApiKeyProfile, SignatureError> {
        let key = self
            .keys
            .get(&api_key.to_string())
            .ok_or(SignatureError::InvalidKey)?;

        let sent_at: i64 = timestamp
            .trim()
            .parse()
            .map_err(|_| SignatureError::InvalidTimestamp)?;
        let now = self.clock.now_ms();
        if now.abs_diff(sent_at) > self.skew_ms as u64 {
            debug!(api_key = %api_key, sent_at, now, "Signed request outside skew window");
            return Err(SignatureError::Expired);
        }

        if self.nonces.contains(&nonce.to_string()) {
            return Err(self.replay(api_key, nonce));
        }

        let expected = hex::decode(signature.trim()).map_err(|_| SignatureError::InvalidSignature)?;
        let mac = mac_for(&key.secret, api_key, timestamp, nonce, body)
            .ok_or(SignatureError::InvalidSignature)?;
        if mac.verify_slice(&expected).is_err() {
            debug!(api_key = %api_key, "Signed request failed HMAC check");
            return Err(SignatureError::InvalidSignature);
        }

        // A concurrent request may have claimed the nonce since the check above
        if !self
            .nonces
            .insert_if_absent(nonce.to_string(), now, Some(self.nonce_ttl_ms()))
        {
            return Err(self.replay(api_key, nonce));
        }

        Ok(key.profile)
    }

    fn replay(&self, api_key: &str, nonce: &str) -> SignatureError {
        warn!(api_key = %api_key, nonce = %nonce, "Replayed nonce rejected");
        self.sink.notify(SecurityEvent::ReplayDetected {
            api_key: api_key.to_string(),
            nonce: nonce.to_string(),
        });
        SignatureError::ReplayDetected
    }

    /// A timestamp accepted at `now` stays acceptable until `now + 2·skew`
    /// inclusive, so the nonce must outlive that instant
    fn nonce_ttl_ms(&self) -> i64 {
        self.skew_ms.saturating_mul(2).saturating_add(1)
    }

    /// Drop at most `limit` nonces whose replay window has closed
    pub fn purge_nonces(&self, limit: usize) -> usize {
        self.nonces.sweep_expired(limit)
    }

    pub fn nonce_count(&self) -> usize {
        self.nonces.len()
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }
}
