#![deny(missing_docs)]
//! Provider resolution for sstart.
//!
//! This crate defines the [`Provider`] trait every secret backend
//! implements, the [`SecretContext`] handed to each fetch (cancellation +
//! a [`SecretsResolver`] view over other providers' outputs), the
//! [`ProviderRegistry`] that maps a config `kind` to an implementation,
//! and the key-remap helpers shared by all backends.
//!
//! ## Design
//!
//! - Providers receive their descriptor's expanded `config` and `keys`
//!   verbatim and return pairs **already** filtered/renamed; the collector
//!   does not re-filter.
//! - The resolver view is a value copy restricted to the descriptor's
//!   `uses` list. A provider cannot observe or mutate anything it was not
//!   granted.
//! - The registry dispatches by kind, following the same composition
//!   pattern as the rest of the workspace: built as a value, exposed
//!   process-wide by the umbrella crate.

pub mod cli;
pub mod config;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sstart_types::{KEEP_NAME, KeyMap, KeyValue, ProviderSecretsMap, Secrets};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors from a provider fetch. Fatal for the current collect; the
/// collector prefixes them with the provider id.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The requested secret does not exist upstream.
    #[error("secret not found: {0}")]
    NotFound(String),

    /// The upstream denied access.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// A required config key is missing from the descriptor.
    #[error("missing required config key: {0}")]
    MissingConfig(&'static str),

    /// A config value is present but unusable.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Upstream communication failure (network, CLI, parse).
    #[error("backend error: {0}")]
    Backend(String),

    /// The fetch was cancelled before completing.
    #[error("cancelled")]
    Cancelled,

    /// No provider is registered for this kind.
    #[error("unknown provider kind: {0}")]
    UnknownKind(String),

    /// Catch-all. Include context.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Read-only view over other providers' secrets, pre-filtered by the
/// descriptor's `uses` list.
///
/// Lookups outside the granted set resolve to nothing. The backing map is
/// a copy, so a provider can never mutate another provider's output.
#[derive(Debug, Clone, Default)]
pub struct SecretsResolver {
    view: ProviderSecretsMap,
}

impl SecretsResolver {
    /// A resolver that sees nothing. Used when `uses` is empty.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A resolver whose view is a copy of `all` restricted to the ids in
    /// `uses`. Ids not (yet) present in `all` are simply absent.
    pub fn restricted(all: &ProviderSecretsMap, uses: &[String]) -> Self {
        let mut view = ProviderSecretsMap::new();
        for id in uses {
            if let Some(secrets) = all.get(id) {
                view.insert(id.clone(), secrets.clone());
            }
        }
        Self { view }
    }

    /// Look up one key of one provider.
    pub fn get(&self, provider_id: &str, key: &str) -> Option<&str> {
        self.view.get(provider_id)?.get(key).map(String::as_str)
    }

    /// The full contribution of one provider, when granted.
    pub fn provider(&self, provider_id: &str) -> Option<&Secrets> {
        self.view.get(provider_id)
    }

    /// Ids visible through this resolver.
    pub fn provider_ids(&self) -> impl Iterator<Item = &str> {
        self.view.keys().map(String::as_str)
    }
}

/// Per-fetch context: cancellation signal plus the resolver view.
#[derive(Debug, Clone)]
pub struct SecretContext {
    cancel: CancellationToken,
    resolver: SecretsResolver,
}

impl SecretContext {
    /// Build a context from an existing cancellation token.
    pub fn new(cancel: CancellationToken, resolver: SecretsResolver) -> Self {
        Self { cancel, resolver }
    }

    /// A context with a fresh, never-cancelled token. Convenient in tests
    /// and single-shot tools.
    pub fn detached(resolver: SecretsResolver) -> Self {
        Self {
            cancel: CancellationToken::new(),
            resolver,
        }
    }

    /// The cancellation token for this fetch. Long operations should
    /// `select!` against `cancel().cancelled()`.
    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    /// True once the fetch has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The resolver view granted to this provider.
    pub fn resolver(&self) -> &SecretsResolver {
        &self.resolver
    }
}

/// A pluggable source of secrets.
///
/// Implementations are backend-specific: `DotenvProvider` reads a file,
/// `VaultProvider` talks to Vault, `TemplateProvider` composes from the
/// resolver view, and so on. Implementations are stateless across fetches
/// apart from memoized SDK clients.
#[async_trait]
pub trait Provider: Send + Sync {
    /// The registry key (the config `kind`) this provider answers to.
    fn name(&self) -> &'static str;

    /// Fetch key/value pairs.
    ///
    /// `map_id` is the descriptor's effective id, for diagnostics.
    /// `config` is the descriptor's config after environment expansion.
    /// `keys` is the rename map; the returned pairs must already honor it
    /// (see [`apply_keys`]).
    async fn fetch(
        &self,
        ctx: &SecretContext,
        map_id: &str,
        config: &serde_json::Map<String, serde_json::Value>,
        keys: &KeyMap,
    ) -> Result<Vec<KeyValue>, ProviderError>;
}

/// Filter and rename fetched pairs per the descriptor's `keys` map.
///
/// Empty map: every pair passes unchanged. Non-empty map: only listed
/// source keys pass, renamed to their target (the `==` sentinel keeps the
/// source name). Listed keys absent from the fetch are skipped.
pub fn apply_keys(pairs: Vec<KeyValue>, keys: &KeyMap) -> Vec<KeyValue> {
    if keys.is_empty() {
        return pairs;
    }
    let by_key: HashMap<&str, &str> = pairs
        .iter()
        .map(|kv| (kv.key.as_str(), kv.value.as_str()))
        .collect();
    let mut out = Vec::with_capacity(keys.len());
    for (source, target) in keys {
        if let Some(value) = by_key.get(source.as_str()) {
            let name = if target == KEEP_NAME { source } else { target };
            out.push(KeyValue::new(name.clone(), (*value).to_string()));
        }
    }
    out
}

/// Map an opaque upstream blob to pairs.
///
/// A blob that parses as a JSON object is mapped key-wise (non-string
/// values keep their JSON rendering). Anything else becomes a single
/// `<UPPER(map_id, '-' -> '_')>_SECRET` entry, with a warning, so that an
/// unstructured secret still lands in the environment under a predictable
/// name. The `keys` map applies afterwards either way.
pub fn pairs_from_blob(map_id: &str, blob: &str, keys: &KeyMap) -> Vec<KeyValue> {
    let pairs = match serde_json::from_str::<serde_json::Value>(blob) {
        Ok(serde_json::Value::Object(map)) => map
            .into_iter()
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => KeyValue::new(k, s),
                other => KeyValue::new(k, other.to_string()),
            })
            .collect(),
        _ => {
            let key = format!("{}_SECRET", map_id.to_uppercase().replace('-', "_"));
            tracing::warn!(
                provider = %map_id,
                key = %key,
                "upstream secret is not a JSON object; exposing raw content under a single key"
            );
            vec![KeyValue::new(key, blob.to_string())]
        }
    };
    apply_keys(pairs, keys)
}

/// Maps a config `kind` to a provider implementation.
///
/// Built once by the umbrella crate with every built-in kind and shared
/// process-wide; read-only afterwards.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<&'static str, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its own [`Provider::name`].
    pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.providers.insert(provider.name(), provider);
        self
    }

    /// Look up a provider by kind.
    pub fn get(&self, kind: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(kind).cloned()
    }

    /// Look up a provider by kind, or fail with [`ProviderError::UnknownKind`].
    pub fn require(&self, kind: &str) -> Result<Arc<dyn Provider>, ProviderError> {
        self.get(kind)
            .ok_or_else(|| ProviderError::UnknownKind(kind.to_string()))
    }

    /// All registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<&'static str> = self.providers.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
