//! Storage backends for the serialized cache document.

use std::sync::{Mutex, OnceLock};

/// Keyring service name for the cache document.
const SERVICE: &str = "sstart-cache";

/// Keyring account name for the cache document.
const ACCOUNT: &str = "cache";

/// Sentinel account probed once per process to detect a usable backend.
const PROBE_ACCOUNT: &str = "__sstart_probe__";

/// Where the serialized [`CacheStore`](crate::SecretCache) document lives.
///
/// `load`/`store`/`remove` move the whole document; the cache layer above
/// owns entry semantics. An unavailable backend answers `false` from
/// `available` and the cache degrades to a no-op.
pub trait CacheBackend: Send + Sync {
    /// Whether the backend can be used at all.
    fn available(&self) -> bool;

    /// Read the whole document, if present.
    fn load(&self) -> Option<String>;

    /// Replace the whole document. Failures are swallowed by the caller.
    fn store(&self, document: &str) -> bool;

    /// Delete the document.
    fn remove(&self);
}

/// OS keyring backend (macOS Keychain, Windows Credential Manager, Linux
/// Secret Service).
#[derive(Debug, Default)]
pub struct KeyringBackend;

impl KeyringBackend {
    /// Create the backend. Availability is probed lazily, once per process.
    pub fn new() -> Self {
        Self
    }

    fn probe() -> bool {
        static AVAILABLE: OnceLock<bool> = OnceLock::new();
        *AVAILABLE.get_or_init(|| {
            let Ok(entry) = keyring::Entry::new(SERVICE, PROBE_ACCOUNT) else {
                return false;
            };
            match entry.get_password() {
                // "not found" proves the backend answered; anything found does too.
                Ok(_) | Err(keyring::Error::NoEntry) => true,
                Err(err) => {
                    tracing::debug!(error = %err, "keyring unavailable; cache disabled");
                    false
                }
            }
        })
    }
}

impl CacheBackend for KeyringBackend {
    fn available(&self) -> bool {
        Self::probe()
    }

    fn load(&self) -> Option<String> {
        if !self.available() {
            return None;
        }
        let entry = keyring::Entry::new(SERVICE, ACCOUNT).ok()?;
        entry.get_password().ok()
    }

    fn store(&self, document: &str) -> bool {
        if !self.available() {
            return false;
        }
        let Ok(entry) = keyring::Entry::new(SERVICE, ACCOUNT) else {
            return false;
        };
        entry.set_password(document).is_ok()
    }

    fn remove(&self) {
        if !self.available() {
            return;
        }
        if let Ok(entry) = keyring::Entry::new(SERVICE, ACCOUNT) {
            let _ = entry.delete_credential();
        }
    }
}

/// In-memory backend for tests and for callers that want a per-process
/// cache without touching the OS keyring.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    document: Mutex<Option<String>>,
    unavailable: bool,
}

impl MemoryBackend {
    /// A working in-memory backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend that reports itself unusable, mimicking a missing keyring.
    pub fn unavailable() -> Self {
        Self {
            document: Mutex::new(None),
            unavailable: true,
        }
    }
}

impl CacheBackend for MemoryBackend {
    fn available(&self) -> bool {
        !self.unavailable
    }

    fn load(&self) -> Option<String> {
        if self.unavailable {
            return None;
        }
        self.document.lock().ok()?.clone()
    }

    fn store(&self, document: &str) -> bool {
        if self.unavailable {
            return false;
        }
        if let Ok(mut slot) = self.document.lock() {
            *slot = Some(document.to_string());
            true
        } else {
            false
        }
    }

    fn remove(&self) {
        if let Ok(mut slot) = self.document.lock() {
            *slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_backend_round_trip() {
        let backend = MemoryBackend::new();
        assert!(backend.available());
        assert_eq!(backend.load(), None);
        assert!(backend.store("{}"));
        assert_eq!(backend.load().as_deref(), Some("{}"));
        backend.remove();
        assert_eq!(backend.load(), None);
    }

    #[test]
    fn unavailable_backend_is_inert() {
        let backend = MemoryBackend::unavailable();
        assert!(!backend.available());
        assert!(!backend.store("{}"));
        assert_eq!(backend.load(), None);
    }
}
