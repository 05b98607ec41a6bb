//! Keyed Store Module
//!
//! Concurrency-safe associative store shared by every stateful security component.
//!
//! All mutations that depend on the current value go through [`KeyedStore::update`]
//! or [`KeyedStore::upsert`], which run the caller's closure while the entry's shard
//! lock is held. Callers never do a separate get followed by a separate set.
//!
//! Closures passed to this store must not call back into the same store.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::fmt;
use std::hash::Hash;

use crate::security::clock::SharedClock;

#[derive(Debug, Clone)]
struct Slot<V> {
    value: V,
    expires_at: Option<i64>,
}

impl<V> Slot<V> {
    fn new(value: V, now: i64, ttl_ms: Option<i64>) -> Self {
        Self {
            value,
            expires_at: ttl_ms.map(|ttl| now.saturating_add(ttl)),
        }
    }

    fn is_expired(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// DashMap-backed store with optional per-entry expiry
pub struct KeyedStore<K, V> {
    entries: DashMap<K, Slot<V>>,
    clock: SharedClock,
}

impl<K: Eq + Hash, V> fmt::Debug for KeyedStore<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedStore")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl<K, V> KeyedStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Read a live value. Expired entries read as absent.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now_ms();
        self.entries
            .get(key)
            .filter(|slot| !slot.is_expired(now))
            .map(|slot| slot.value.clone())
    }

    pub fn contains(&self, key: &K) -> bool {
        let now = self.clock.now_ms();
        self.entries
            .get(key)
            .is_some_and(|slot| !slot.is_expired(now))
    }

    /// Insert or overwrite, returning the previous live value
    pub fn insert(&self, key: K, value: V, ttl_ms: Option<i64>) -> Option<V> {
        let now = self.clock.now_ms();
        self.entries
            .insert(key, Slot::new(value, now, ttl_ms))
            .filter(|old| !old.is_expired(now))
            .map(|old| old.value)
    }

    /// Insert only when no live entry exists. Returns `true` if the value was stored.
    pub fn insert_if_absent(&self, key: K, value: V, ttl_ms: Option<i64>) -> bool {
        let now = self.clock.now_ms();
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(Slot::new(value, now, ttl_ms));
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::new(value, now, ttl_ms));
                true
            }
        }
    }

    /// Remove an entry, returning its value if it was still live
    pub fn remove(&self, key: &K) -> Option<V> {
        let now = self.clock.now_ms();
        self.entries
            .remove(key)
            .map(|(_, slot)| slot)
            .filter(|slot| !slot.is_expired(now))
            .map(|slot| slot.value)
    }

    /// Atomic read-modify-write on an existing live entry.
    ///
    /// The closure receives `None` when the key is absent or expired.
    pub fn update<R>(&self, key: &K, f: impl FnOnce(Option<&mut V>) -> R) -> R {
        let now = self.clock.now_ms();
        match self.entries.get_mut(key) {
            Some(mut slot) if !slot.is_expired(now) => f(Some(&mut slot.value)),
            Some(slot) => {
                drop(slot);
                self.entries.remove_if(key, |_, slot| slot.is_expired(now));
                f(None)
            }
            None => f(None),
        }
    }

    /// Atomic insert-or-modify.
    ///
    /// `init` builds the value when the key is absent or expired; `ttl_ms` only
    /// applies to a freshly created entry.
    pub fn upsert<R>(
        &self,
        key: K,
        ttl_ms: Option<i64>,
        init: impl FnOnce() -> V,
        f: impl FnOnce(&mut V) -> R,
    ) -> R {
        let now = self.clock.now_ms();
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(Slot::new(init(), now, ttl_ms));
                }
                f(&mut occupied.get_mut().value)
            }
            Entry::Vacant(vacant) => {
                let mut slot = vacant.insert(Slot::new(init(), now, ttl_ms));
                f(&mut slot.value)
            }
        }
    }

    /// Keep only the entries for which `keep` returns true
    pub fn retain(&self, mut keep: impl FnMut(&K, &mut V) -> bool) {
        self.entries.retain(|key, slot| keep(key, &mut slot.value));
    }

    /// Remove at most `limit` entries matching `stale`. Returns the number removed.
    pub fn purge_where(&self, limit: usize, stale: impl Fn(&K, &V, i64) -> bool) -> usize {
        let now = self.clock.now_ms();
        let candidates: Vec<K> = self
            .entries
            .iter()
            .filter(|entry| entry.is_expired(now) || stale(entry.key(), &entry.value, now))
            .take(limit)
            .map(|entry| entry.key().clone())
            .collect();

        candidates
            .iter()
            .filter(|key| {
                self.entries
                    .remove_if(*key, |k, slot| slot.is_expired(now) || stale(k, &slot.value, now))
                    .is_some()
            })
            .count()
    }

    /// Remove at most `limit` expired entries
    pub fn sweep_expired(&self, limit: usize) -> usize {
        self.purge_where(limit, |_, _, _| false)
    }

    /// Raw entry count, including entries that expired but were not yet swept
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
