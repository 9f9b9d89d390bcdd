//! Runtime secret maps and the provider output pair.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// An ordered mapping of secret names to values.
///
/// Order matters: when two providers yield the same key, the one that ran
/// later wins, and "later" is declaration order in the config.
pub type Secrets = IndexMap<String, String>;

/// Per-provider contributions, keyed by provider id, in execution order.
pub type ProviderSecretsMap = IndexMap<String, Secrets>;

/// A `source_key -> target_key` rename map (see [`crate::ProviderSpec::keys`]).
pub type KeyMap = IndexMap<String, String>;

/// The sentinel rename target that preserves the source key name.
pub const KEEP_NAME: &str = "==";

/// A single key/value pair as returned by a provider fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    /// The (already remapped) secret name.
    pub key: String,
    /// The secret value.
    pub value: String,
}

impl KeyValue {
    /// Create a pair.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Merge `contribution` into `target`. Existing keys are overwritten;
/// the caller is expected to merge in declaration order so that later
/// providers win on collision.
pub fn merge_into(target: &mut Secrets, contribution: &Secrets) {
    for (key, value) in contribution {
        target.insert(key.clone(), value.clone());
    }
}
