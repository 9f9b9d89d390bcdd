//! The TTL cache proper: entry stamping, expiry, and whole-document I/O.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sstart_types::Secrets;

use crate::backend::CacheBackend;

/// One cached provider contribution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedEntry {
    /// The provider's (post-remap) contribution.
    pub secrets: Secrets,
    /// When the entry was written.
    pub cached_at: DateTime<Utc>,
    /// When the entry stops being served.
    pub expires_at: DateTime<Utc>,
}

impl CachedEntry {
    /// True when the entry is past its expiry at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// fingerprint -> entry, serialized as one JSON document.
type CacheStore = BTreeMap<String, CachedEntry>;

/// Aggregate counts reported by [`SecretCache::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Entries present in the document.
    pub total: usize,
    /// Entries still within their TTL.
    pub valid: usize,
    /// Entries past their TTL (not yet purged).
    pub expired: usize,
}

/// TTL cache over a [`CacheBackend`].
///
/// Expired entries are invisible to reads and purged when discovered.
/// Backend failures never propagate: a read becomes a miss, a write a
/// no-op. The collector treats the cache as best-effort throughout.
pub struct SecretCache {
    backend: Box<dyn CacheBackend>,
    ttl: Duration,
}

impl SecretCache {
    /// A cache over the OS keyring with the given entry TTL.
    pub fn with_keyring(ttl: Duration) -> Self {
        Self::with_backend(Box::new(crate::KeyringBackend::new()), ttl)
    }

    /// A cache over an explicit backend (tests, in-memory use).
    pub fn with_backend(backend: Box<dyn CacheBackend>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    fn read_store(&self) -> CacheStore {
        let Some(document) = self.backend.load() else {
            return CacheStore::new();
        };
        match serde_json::from_str(&document) {
            Ok(store) => store,
            Err(err) => {
                tracing::warn!(error = %err, "discarding unreadable cache document");
                CacheStore::new()
            }
        }
    }

    fn write_store(&self, store: &CacheStore) {
        match serde_json::to_string(store) {
            Ok(document) => {
                self.backend.store(&document);
            }
            Err(err) => tracing::warn!(error = %err, "cannot serialize cache document"),
        }
    }

    /// Look up a fingerprint. Expired entries miss and are purged.
    pub fn get(&self, fingerprint: &str) -> Option<Secrets> {
        if !self.backend.available() {
            return None;
        }
        let mut store = self.read_store();
        match store.get(fingerprint) {
            Some(entry) if !entry.is_expired(Utc::now()) => Some(entry.secrets.clone()),
            Some(_) => {
                store.remove(fingerprint);
                self.write_store(&store);
                None
            }
            None => None,
        }
    }

    /// Insert or replace an entry, stamped at now.
    pub fn set(&self, fingerprint: &str, secrets: &Secrets) {
        if !self.backend.available() {
            return;
        }
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::zero());
        let mut store = self.read_store();
        store.insert(
            fingerprint.to_string(),
            CachedEntry {
                secrets: secrets.clone(),
                cached_at: now,
                expires_at: now + ttl,
            },
        );
        self.write_store(&store);
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.backend.remove();
    }

    /// Drop one provider's entry.
    pub fn clear_provider(&self, fingerprint: &str) {
        if !self.backend.available() {
            return;
        }
        let mut store = self.read_store();
        if store.remove(fingerprint).is_some() {
            self.write_store(&store);
        }
    }

    /// Purge expired entries; returns how many were removed.
    pub fn clean_expired(&self) -> usize {
        if !self.backend.available() {
            return 0;
        }
        let now = Utc::now();
        let mut store = self.read_store();
        let before = store.len();
        store.retain(|_, entry| !entry.is_expired(now));
        let removed = before - store.len();
        if removed > 0 {
            self.write_store(&store);
        }
        removed
    }

    /// Entry counts.
    pub fn stats(&self) -> CacheStats {
        let now = Utc::now();
        let store = self.read_store();
        let total = store.len();
        let expired = store.values().filter(|e| e.is_expired(now)).count();
        CacheStats {
            total,
            valid: total - expired,
            expired,
        }
    }
}
