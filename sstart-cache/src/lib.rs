#![deny(missing_docs)]
//! Fingerprint-keyed TTL cache for collected secrets.
//!
//! The whole cache is one JSON document stored under a single OS keyring
//! entry (`service=sstart-cache`, `account=cache`). When no keyring backend
//! is usable (headless CI, stripped-down containers), every operation is a
//! silent no-op: reads miss, writes vanish. Collection still works, it just
//! refetches.
//!
//! Entries are keyed by a [fingerprint](generate_key) of the provider's
//! identity and canonicalized config, so a config edit naturally invalidates
//! the entry while injected SSO tokens (which rotate) do not.
//!
//! The cache is only called from the collector, which runs providers
//! sequentially; no internal locking beyond the one-shot availability probe.

mod backend;
mod fingerprint;
mod store;

pub use backend::{CacheBackend, KeyringBackend, MemoryBackend};
pub use fingerprint::generate_key;
pub use store::{CacheStats, CachedEntry, SecretCache};
