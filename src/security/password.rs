//! Password Hashing Module
//!
//! PBKDF2-HMAC-SHA512 with a per-account random salt. Derivation is deliberately
//! slow, so it runs on tokio's blocking pool behind a semaphore that bounds how
//! many hashes can be in flight at once.

use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha512;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::sync::Semaphore;

use crate::security::accounts::CredentialError;

/// Derived key length in bytes
pub const HASH_LEN: usize = 64;

/// Salt length in bytes
pub const SALT_LEN: usize = 32;

/// Default PBKDF2 iteration count
pub const DEFAULT_ITERATIONS: u32 = 100_000;

/// Generate a random hex-encoded salt
pub fn generate_salt() -> String {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    hex::encode(salt)
}

/// Derive the hex-encoded hash of `password` under `salt`
pub fn derive_hash(password: &str, salt: &str, iterations: u32) -> String {
    let mut out = [0u8; HASH_LEN];
    pbkdf2::pbkdf2_hmac::<Sha512>(password.as_bytes(), salt.as_bytes(), iterations, &mut out);
    hex::encode(out)
}

/// Recompute and compare in constant time
pub fn verify_hash(password: &str, salt: &str, iterations: u32, expected_hex: &str) -> bool {
    let candidate = derive_hash(password, salt, iterations);
    candidate.as_bytes().ct_eq(expected_hex.as_bytes()).into()
}

/// Bounded worker pool for CPU-heavy hashing
#[derive(Debug, Clone)]
pub struct HashPool {
    permits: Arc<Semaphore>,
}

impl HashPool {
    pub fn new(workers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Run `job` on the blocking pool once a worker slot is free
    pub async fn run<F, T>(&self, job: F) -> Result<T, CredentialError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| CredentialError::Hashing(e.to_string()))?;

        tokio::task::spawn_blocking(job)
            .await
            .map_err(|e| CredentialError::Hashing(e.to_string()))
    }
}
