//! Revocation List
//!
//! Revoked access tokens are held by exact string until they would have expired
//! naturally. When the table grows past its ceiling it is first purged of expired
//! entries and, if still oversized, cleared wholesale; a token dropped that way
//! stays usable only until its own `exp`.

use tracing::warn;

use crate::security::clock::SharedClock;
use crate::security::store::KeyedStore;

#[derive(Debug)]
pub struct TokenBlacklist {
    entries: KeyedStore<String, ()>,
    max_entries: usize,
    clock: SharedClock,
}

impl TokenBlacklist {
    pub fn new(max_entries: usize, clock: SharedClock) -> Self {
        Self {
            entries: KeyedStore::new(clock.clone()),
            max_entries: max_entries.max(1),
            clock,
        }
    }

    /// Hold `token` until `expires_at_ms`
    pub fn revoke(&self, token: &str, expires_at_ms: i64) {
        let ttl = (expires_at_ms - self.clock.now_ms()).max(1);
        self.entries.insert(token.to_string(), (), Some(ttl));

        if self.entries.len() > self.max_entries {
            self.compact();
        }
    }

    pub fn is_revoked(&self, token: &str) -> bool {
        self.entries.contains(&token.to_string())
    }

    /// Drop expired entries, then everything if still above the ceiling
    pub fn compact(&self) -> usize {
        let before = self.entries.len();
        self.entries.sweep_expired(usize::MAX);
        if self.entries.len() > self.max_entries {
            warn!(
                entries = self.entries.len(),
                ceiling = self.max_entries,
                "Revocation list over ceiling, clearing"
            );
            self.entries.clear();
        }
        before - self.entries.len()
    }

    /// Incremental purge of naturally expired entries
    pub fn sweep(&self, limit: usize) -> usize {
        self.entries.sweep_expired(limit)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
