//! Configuration model: the provider graph, SSO, and cache settings.
//!
//! The CLI front-end parses a YAML file into [`Config`]; everything past
//! that boundary works with these types. [`Config::validate`] enforces the
//! structural invariants (unique ids, env-only client secret) before any
//! provider runs.

use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors. Fatal before any provider executes.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("cannot read config {path}: {message}")]
    Read {
        /// Path that was attempted.
        path: String,
        /// Underlying I/O message.
        message: String,
    },

    /// The config file could not be parsed.
    #[error("cannot parse config: {0}")]
    Parse(String),

    /// Two provider descriptors resolved to the same id.
    #[error("duplicate provider id: {0}")]
    DuplicateProviderId(String),

    /// Two MCP server entries share an id.
    #[error("duplicate mcp server id: {0}")]
    DuplicateServerId(String),

    /// A descriptor references an unknown provider kind.
    #[error("unknown provider kind: {0}")]
    UnknownKind(String),

    /// The requested provider id is not declared in the config.
    #[error("provider not found: {0}")]
    ProviderNotFound(String),

    /// The OIDC client secret appeared in the config file. It is only
    /// accepted from the `SSTART_SSO_SECRET` environment variable.
    #[error("sso.clientSecret must not be set in the config file; use SSTART_SSO_SECRET")]
    ClientSecretInFile,

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// One entry of the provider graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSpec {
    /// Which implementation to instantiate (registry key).
    pub kind: String,

    /// Unique id within the config. Defaults to `kind` when absent;
    /// required when multiple descriptors share a kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Provider-specific configuration, passed through after environment
    /// expansion. Recognized keys are documented per provider.
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,

    /// `source_key -> target_key` rename map. The sentinel value `==`
    /// preserves the source name. Empty means "all keys pass unchanged";
    /// non-empty means "only listed keys pass" (filter + rename).
    #[serde(default)]
    pub keys: IndexMap<String, String>,

    /// `target_key -> template text`, evaluated by the template kind.
    #[serde(default)]
    pub templates: IndexMap<String, String>,

    /// Provider ids whose secrets this provider may read via the resolver.
    #[serde(default)]
    pub uses: Vec<String>,

    /// Static key/value pairs added to this provider's contribution.
    #[serde(default)]
    pub env: IndexMap<String, String>,
}

impl ProviderSpec {
    /// The effective id: explicit `id`, or `kind` when unset.
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.kind)
    }
}

/// OIDC single-sign-on settings.
///
/// The client secret is deliberately absent: it is read only from the
/// `SSTART_SSO_SECRET` environment variable. A `clientSecret` key in the
/// file is captured here solely so that validation can reject it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SsoConfig {
    /// OAuth2/OIDC client id.
    pub client_id: String,

    /// Issuer URL; discovery runs against
    /// `{issuer}/.well-known/openid-configuration`.
    pub issuer: String,

    /// Scopes requested on every grant.
    #[serde(default)]
    pub scopes: Vec<String>,

    /// Redirect URI override for the interactive flow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,

    /// OIDC `response_mode` override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_mode: Option<String>,

    /// Force PKCE even when a client secret is available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pkce: Option<bool>,

    /// Rejected by [`Config::validate`]. Never read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

/// Cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether the TTL cache is consulted at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Entry lifetime in seconds.
    #[serde(default = "default_ttl", rename = "ttl")]
    pub ttl_secs: u64,
}

impl CacheConfig {
    /// The TTL as a [`Duration`].
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_ttl(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_ttl() -> u64 {
    900
}

/// One child MCP server behind the proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerSpec {
    /// Unique id; becomes the namespace prefix for the server's primitives.
    pub id: String,

    /// Executable to spawn.
    pub command: String,

    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,

    /// Provider ids whose secrets go into this server's environment.
    /// Empty means "all configured providers".
    #[serde(default)]
    pub providers: Vec<String>,
}

/// The `mcp` config section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpConfig {
    /// Child servers, in listing order.
    #[serde(default)]
    pub servers: Vec<McpServerSpec>,
}

/// The configuration root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Whether child processes inherit the parent environment.
    #[serde(default = "default_true")]
    pub inherit: bool,

    /// Optional SSO settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sso: Option<SsoConfig>,

    /// Cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// The provider graph, in execution order.
    #[serde(default)]
    pub providers: Vec<ProviderSpec>,

    /// Child MCP servers for `mcp` mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp: Option<McpConfig>,
}

impl Config {
    /// Enforce structural invariants: unique provider ids and the
    /// env-only client secret rule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for spec in &self.providers {
            if !seen.insert(spec.id().to_string()) {
                return Err(ConfigError::DuplicateProviderId(spec.id().to_string()));
            }
        }
        if let Some(sso) = &self.sso {
            if sso.client_secret.is_some() {
                return Err(ConfigError::ClientSecretInFile);
            }
        }
        if let Some(mcp) = &self.mcp {
            let mut seen = std::collections::HashSet::new();
            for server in &mcp.servers {
                if !seen.insert(server.id.as_str()) {
                    return Err(ConfigError::DuplicateServerId(server.id.clone()));
                }
            }
        }
        Ok(())
    }

    /// Look up a descriptor by effective id.
    pub fn provider(&self, id: &str) -> Option<&ProviderSpec> {
        self.providers.iter().find(|p| p.id() == id)
    }

    /// All effective provider ids, in declaration order.
    pub fn provider_ids(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.id().to_string()).collect()
    }
}
