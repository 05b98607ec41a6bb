//! Bearer Token Module
//!
//! Self-issued HS256 tokens: three base64url segments `header.payload.signature`.
//! The wire format sits behind [`TokenCodec`] so the signing scheme can be swapped
//! without touching callers. Expiry is evaluated by the caller against the
//! injected clock, never by the codec.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Token verification errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TokenError {
    #[error("Token has been revoked")]
    Revoked,

    #[error("Malformed token")]
    InvalidFormat,

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token has expired")]
    Expired,

    #[error("Failed to sign token: {0}")]
    Signing(String),
}

/// Token payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (username)
    pub sub: String,
    /// Role name
    pub role: String,
    /// Issued at, epoch seconds
    pub iat: i64,
    /// Expiry, epoch seconds
    pub exp: i64,
    /// Unique token ID
    pub jti: String,
}

impl Claims {
    pub fn expires_at_ms(&self) -> i64 {
        self.exp.saturating_mul(1000)
    }

    /// `exp <= now` means expired
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.expires_at_ms() <= now_ms
    }
}

/// Encodes and decodes signed tokens
pub trait TokenCodec: Send + Sync + fmt::Debug {
    fn encode(&self, claims: &Claims) -> Result<String, TokenError>;

    /// Check structure and signature and parse the payload. Does not check expiry.
    fn decode(&self, token: &str) -> Result<Claims, TokenError>;
}

/// HS256 codec backed by `jsonwebtoken`
pub struct JwtCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl fmt::Debug for JwtCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtCodec")
            .field("algorithm", &Algorithm::HS256)
            .finish()
    }
}

impl JwtCodec {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.required_spec_claims = HashSet::new();

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

impl TokenCodec for JwtCodec {
    fn encode(&self, claims: &Claims) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    fn decode(&self, token: &str) -> Result<Claims, TokenError> {
        if token.split('.').count() != 3 {
            return Err(TokenError::InvalidFormat);
        }

        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::InvalidToken(e.to_string()),
            })
    }
}
