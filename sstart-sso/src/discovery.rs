//! OIDC discovery document.

use serde::Deserialize;

use crate::error::AuthError;

/// The subset of `/.well-known/openid-configuration` sstart needs.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryDocument {
    /// The issuer identifier, echoed back by the IdP.
    pub issuer: String,
    /// Authorization endpoint for the interactive flow.
    pub authorization_endpoint: String,
    /// Token endpoint for every grant.
    pub token_endpoint: String,
    /// Userinfo endpoint, when the IdP publishes one.
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
}

/// Fetch the discovery document from `{issuer}/.well-known/openid-configuration`.
pub(crate) async fn discover(
    http: &reqwest::Client,
    issuer: &str,
) -> Result<DiscoveryDocument, AuthError> {
    let url = format!(
        "{}/.well-known/openid-configuration",
        issuer.trim_end_matches('/')
    );
    tracing::debug!(url = %url, "fetching OIDC discovery document");

    let failed = |message: String| AuthError::Discovery {
        issuer: issuer.to_string(),
        message,
    };

    let response = http
        .get(&url)
        .send()
        .await
        .map_err(|e| failed(e.to_string()))?;
    if !response.status().is_success() {
        return Err(failed(format!("unexpected status {}", response.status())));
    }
    response.json().await.map_err(|e| failed(e.to_string()))
}
