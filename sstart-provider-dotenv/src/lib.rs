#![deny(missing_docs)]
//! Secret provider that reads a dotenv file.
//!
//! Recognized config keys: `path` (required). Every variable in the file
//! is a candidate pair; the descriptor's `keys` map filters and renames as
//! usual.

use async_trait::async_trait;
use sstart_provider::{Provider, ProviderError, SecretContext, apply_keys, config::require_str};
use sstart_types::{KeyMap, KeyValue};

/// Provider for local `.env` files.
#[derive(Debug, Default)]
pub struct DotenvProvider;

impl DotenvProvider {
    /// Create the provider.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Provider for DotenvProvider {
    fn name(&self) -> &'static str {
        "dotenv"
    }

    async fn fetch(
        &self,
        _ctx: &SecretContext,
        _map_id: &str,
        config: &serde_json::Map<String, serde_json::Value>,
        keys: &KeyMap,
    ) -> Result<Vec<KeyValue>, ProviderError> {
        let path = require_str(config, "path")?;

        let mut pairs = Vec::new();
        for item in dotenvy::from_path_iter(path)
            .map_err(|e| ProviderError::Backend(format!("cannot read {path}: {e}")))?
        {
            let (key, value) = item.map_err(|e| {
                ProviderError::Backend(format!("cannot parse {path}: {e}"))
            })?;
            pairs.push(KeyValue::new(key, value));
        }

        Ok(apply_keys(pairs, keys))
    }
}
