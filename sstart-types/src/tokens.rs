//! Persisted OIDC token record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Tokens issued by the OIDC provider, as persisted between runs.
///
/// `Debug` never prints token material. String fields are zeroed when the
/// value is dropped.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Tokens {
    /// The access token presented to downstream APIs.
    pub access_token: String,

    /// Refresh token, when the grant issued one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// OIDC ID token, when `openid` scope was granted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,

    /// Token type, usually `Bearer`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,

    /// Absolute expiry of the access token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[zeroize(skip)]
    pub expiry: Option<DateTime<Utc>>,
}

impl Tokens {
    /// True when the access token is past its expiry. Tokens without an
    /// expiry are treated as still valid.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry.map(|exp| now > exp).unwrap_or(false)
    }
}

impl std::fmt::Debug for Tokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokens")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("id_token", &self.id_token.as_ref().map(|_| "[REDACTED]"))
            .field("token_type", &self.token_type)
            .field("expiry", &self.expiry)
            .finish()
    }
}
