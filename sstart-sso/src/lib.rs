#![deny(missing_docs)]
//! OIDC single-sign-on for sstart.
//!
//! [`SsoClient`] obtains, persists, and refreshes tokens from an OIDC
//! issuer, and hands them to the collector for injection into providers.
//!
//! Two grant flows:
//!
//! - **client-credentials** (non-interactive) when `SSTART_SSO_SECRET` is
//!   set and PKCE is not forced;
//! - **authorization-code + PKCE** (interactive) otherwise: a loopback
//!   HTTP server on port 5747 receives the callback while the user's
//!   browser talks to the issuer. Five-minute overall timeout, five-second
//!   drain on shutdown.
//!
//! Tokens persist in the OS keyring (`sstart`/`sso-tokens`), falling back
//! to a 0600-mode file under the XDG config directory. The client secret
//! is read **only** from the environment, never from a config file.

mod browser;
mod client;
mod discovery;
mod error;
mod flow;
mod store;

pub use client::{SsoClient, client_secret_from_env};
pub use discovery::DiscoveryDocument;
pub use error::AuthError;
pub use store::TokenStore;

/// Environment variable holding the OIDC client secret.
pub const CLIENT_SECRET_ENV: &str = "SSTART_SSO_SECRET";
