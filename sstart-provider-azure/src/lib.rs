#![deny(missing_docs)]
//! Azure Key Vault provider.
//!
//! Recognized config keys: `vault_url` and `secret_name` (required),
//! `access_token`. The bearer token is resolved in order: config
//! `access_token`, `$AZURE_ACCESS_TOKEN`, then
//! `az account get-access-token` scoped to the Key Vault resource.

use async_trait::async_trait;
use serde::Deserialize;
use sstart_provider::cli::capture_stdout;
use sstart_provider::config::{optional_str, require_str};
use sstart_provider::{Provider, ProviderError, SecretContext, pairs_from_blob};
use sstart_types::{KeyMap, KeyValue};

/// Key Vault REST API version.
const API_VERSION: &str = "7.4";

/// OAuth resource for Key Vault tokens.
const VAULT_RESOURCE: &str = "https://vault.azure.net";

/// `GET /secrets/{name}` response.
#[derive(Debug, Deserialize)]
struct SecretBundle {
    value: String,
}

/// Provider for Azure Key Vault secrets.
pub struct AzureKeyVaultProvider {
    http: reqwest::Client,
}

impl AzureKeyVaultProvider {
    /// Create the provider with a shared HTTP client.
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    async fn access_token(
        &self,
        config: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<String, ProviderError> {
        if let Some(token) = optional_str(config, "access_token")? {
            return Ok(token.to_string());
        }
        if let Ok(token) = std::env::var("AZURE_ACCESS_TOKEN") {
            if !token.is_empty() {
                return Ok(token);
            }
        }
        tracing::debug!("no access token configured; asking az");
        let mut command = tokio::process::Command::new("az");
        command.args([
            "account",
            "get-access-token",
            "--resource",
            VAULT_RESOURCE,
            "--query",
            "accessToken",
            "--output",
            "tsv",
        ]);
        let token = capture_stdout(&mut command).await?;
        Ok(token.trim().to_string())
    }
}

impl Default for AzureKeyVaultProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for AzureKeyVaultProvider {
    fn name(&self) -> &'static str {
        "azure_keyvault"
    }

    async fn fetch(
        &self,
        _ctx: &SecretContext,
        map_id: &str,
        config: &serde_json::Map<String, serde_json::Value>,
        keys: &KeyMap,
    ) -> Result<Vec<KeyValue>, ProviderError> {
        let vault_url = require_str(config, "vault_url")?.trim_end_matches('/');
        let secret_name = require_str(config, "secret_name")?;

        let token = self.access_token(config).await?;
        let url = format!("{vault_url}/secrets/{secret_name}?api-version={API_VERSION}");

        let response = self
            .http
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| ProviderError::Backend(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound(format!(
                "secret {secret_name} not found in {vault_url}"
            )));
        }
        if status == reqwest::StatusCode::FORBIDDEN || status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ProviderError::AccessDenied(format!(
                "access to secret {secret_name} denied ({status})"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Backend(format!(
                "secret read failed with status {status}: {body}"
            )));
        }

        let bundle: SecretBundle = response
            .json()
            .await
            .map_err(|e| ProviderError::Backend(e.to_string()))?;

        Ok(pairs_from_blob(map_id, &bundle.value, keys))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sstart_provider::SecretsResolver;

    #[test]
    fn secret_bundle_deserializes() {
        let json = r#"{
            "value": "{\"USER\":\"u\"}",
            "id": "https://v.vault.azure.net/secrets/db/abc",
            "attributes": { "enabled": true }
        }"#;
        let bundle: SecretBundle = serde_json::from_str(json).unwrap();
        assert_eq!(bundle.value, r#"{"USER":"u"}"#);
    }

    #[tokio::test]
    async fn missing_required_keys_are_config_errors() {
        let provider = AzureKeyVaultProvider::new();
        let ctx = SecretContext::detached(SecretsResolver::empty());

        let err = provider
            .fetch(&ctx, "kv", &serde_json::Map::new(), &KeyMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::MissingConfig("vault_url")));
    }
}
