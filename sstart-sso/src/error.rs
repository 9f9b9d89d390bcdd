//! SSO error type.

use thiserror::Error;

/// Authentication errors. Fatal for the collect that triggered them.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum AuthError {
    /// No persisted tokens and no way to obtain them on this path.
    #[error("not authenticated: run login first")]
    NotAuthenticated,

    /// OIDC discovery against the issuer failed.
    #[error("discovery failed for {issuer}: {message}")]
    Discovery {
        /// The issuer that was queried.
        issuer: String,
        /// What went wrong.
        message: String,
    },

    /// The interactive login flow failed (denied, bad state, server error).
    #[error("interactive login failed: {0}")]
    Flow(String),

    /// The interactive login did not complete in time.
    #[error("interactive login timed out")]
    Timeout,

    /// A token endpoint exchange (code, refresh, client-credentials) failed.
    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    /// Reading or writing the persisted token record failed.
    #[error("token storage error: {0}")]
    Storage(String),

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}
