#![deny(missing_docs)]
//! Google Cloud Secret Manager provider.
//!
//! Recognized config keys: `project_id` and `secret_id` (required),
//! `endpoint` (default `https://secretmanager.googleapis.com`),
//! `access_token`. The bearer token is resolved in order: config
//! `access_token`, `$GOOGLE_OAUTH_ACCESS_TOKEN`, then
//! `gcloud auth print-access-token`.
//!
//! Payloads are base64 in the REST response; after decoding they go
//! through the blob shim like every opaque-payload provider.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use sstart_provider::cli::capture_stdout;
use sstart_provider::config::{optional_str, require_str};
use sstart_provider::{Provider, ProviderError, SecretContext, pairs_from_blob};
use sstart_types::{KeyMap, KeyValue};

/// Default Secret Manager REST endpoint.
const DEFAULT_ENDPOINT: &str = "https://secretmanager.googleapis.com";

/// `versions/latest:access` response.
#[derive(Debug, Deserialize)]
struct AccessSecretVersionResponse {
    payload: SecretPayload,
}

/// The payload half of an access response. `data` is base64.
#[derive(Debug, Deserialize)]
struct SecretPayload {
    data: String,
}

/// Provider for GCP Secret Manager.
pub struct GcloudSecretManagerProvider {
    http: reqwest::Client,
}

impl GcloudSecretManagerProvider {
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
        if let Ok(token) = std::env::var("GOOGLE_OAUTH_ACCESS_TOKEN") {
            if !token.is_empty() {
                return Ok(token);
            }
        }
        tracing::debug!("no access token configured; asking gcloud");
        let mut command = tokio::process::Command::new("gcloud");
        command.args(["auth", "print-access-token"]);
        let token = capture_stdout(&mut command).await?;
        Ok(token.trim().to_string())
    }
}

impl Default for GcloudSecretManagerProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for GcloudSecretManagerProvider {
    fn name(&self) -> &'static str {
        "gcloud_secretmanager"
    }

    async fn fetch(
        &self,
        _ctx: &SecretContext,
        map_id: &str,
        config: &serde_json::Map<String, serde_json::Value>,
        keys: &KeyMap,
    ) -> Result<Vec<KeyValue>, ProviderError> {
        let project_id = require_str(config, "project_id")?;
        let secret_id = require_str(config, "secret_id")?;
        let endpoint = optional_str(config, "endpoint")?
            .unwrap_or(DEFAULT_ENDPOINT)
            .trim_end_matches('/');

        let token = self.access_token(config).await?;
        let url = format!(
            "{endpoint}/v1/projects/{project_id}/secrets/{secret_id}/versions/latest:access"
        );

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
                "secret {secret_id} not found in project {project_id}"
            )));
        }
        if status == reqwest::StatusCode::FORBIDDEN || status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ProviderError::AccessDenied(format!(
                "access to secret {secret_id} denied ({status})"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Backend(format!(
                "access request failed with status {status}: {body}"
            )));
        }

        let access: AccessSecretVersionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Backend(e.to_string()))?;
        let bytes = BASE64
            .decode(access.payload.data.as_bytes())
            .map_err(|e| ProviderError::Backend(format!("payload is not valid base64: {e}")))?;
        let blob = String::from_utf8_lossy(&bytes).into_owned();

        Ok(pairs_from_blob(map_id, &blob, keys))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sstart_provider::SecretsResolver;

    #[test]
    fn access_response_deserializes() {
        let json = r#"{
            "name": "projects/p/secrets/s/versions/3",
            "payload": { "data": "eyJVU0VSIjoidSJ9" }
        }"#;
        let response: AccessSecretVersionResponse = serde_json::from_str(json).unwrap();
        let bytes = BASE64.decode(response.payload.data.as_bytes()).unwrap();
        assert_eq!(bytes, br#"{"USER":"u"}"#);
    }

    #[tokio::test]
    async fn missing_required_keys_are_config_errors() {
        let provider = GcloudSecretManagerProvider::new();
        let ctx = SecretContext::detached(SecretsResolver::empty());

        let err = provider
            .fetch(&ctx, "gcp", &serde_json::Map::new(), &KeyMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::MissingConfig("project_id")));

        let config: serde_json::Map<String, serde_json::Value> =
            serde_json::from_value(serde_json::json!({ "project_id": "p" })).expect("test config");
        let err = provider
            .fetch(&ctx, "gcp", &config, &KeyMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::MissingConfig("secret_id")));
    }
}
