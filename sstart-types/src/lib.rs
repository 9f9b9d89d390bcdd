#![deny(missing_docs)]
//! Shared vocabulary for sstart.
//!
//! This crate defines the data types every other sstart crate speaks:
//! the configuration model ([`Config`], [`ProviderSpec`], [`SsoConfig`]),
//! the runtime secret maps ([`Secrets`], [`ProviderSecretsMap`]), persisted
//! OIDC tokens ([`Tokens`]), and the redaction helpers.
//!
//! ## Design
//!
//! - Data types only. Behavior (fetching, caching, authenticating) lives in
//!   the crates above this one; this layer defines the stability contract.
//! - Secret maps are [`IndexMap`]s: declaration order is semantics (later
//!   providers overwrite earlier keys), not an accident of hashing.
//! - [`Tokens`] has a redacted `Debug` and zeroes its string fields on drop.

pub mod config;
pub mod redact;
pub mod secrets;
pub mod tokens;

pub use config::{
    CacheConfig, Config, ConfigError, McpConfig, McpServerSpec, ProviderSpec, SsoConfig,
};
pub use redact::{mask, redact};
pub use secrets::{KEEP_NAME, KeyMap, KeyValue, ProviderSecretsMap, Secrets, merge_into};
pub use tokens::Tokens;

/// Config key under which the SSO access token is injected into a
/// provider's expanded config.
pub const SSO_ACCESS_TOKEN_KEY: &str = "_sso_access_token";

/// Config key under which the SSO ID token is injected into a
/// provider's expanded config.
pub const SSO_ID_TOKEN_KEY: &str = "_sso_id_token";
