#![deny(missing_docs)]
//! Doppler provider.
//!
//! Recognized config keys: `project` and `config` (required), `token`.
//! The service token is resolved from config `token` or `$DOPPLER_TOKEN`.
//! Secrets come from the download endpoint in JSON format, which returns
//! a flat `NAME -> value` object.

use async_trait::async_trait;
use sstart_provider::config::{optional_str, require_str};
use sstart_provider::{Provider, ProviderError, SecretContext, apply_keys};
use sstart_types::{KeyMap, KeyValue};

/// Doppler API base URL.
const API_URL: &str = "https://api.doppler.com";

/// Provider for Doppler configs.
pub struct DopplerProvider {
    http: reqwest::Client,
}

impl DopplerProvider {
    /// Create the provider with a shared HTTP client.
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for DopplerProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Flatten the downloaded JSON object into pairs.
fn download_pairs(json: &serde_json::Value) -> Result<Vec<KeyValue>, ProviderError> {
    let serde_json::Value::Object(map) = json else {
        return Err(ProviderError::Backend(
            "download response is not a JSON object".into(),
        ));
    };
    Ok(map
        .iter()
        .map(|(k, v)| match v {
            serde_json::Value::String(s) => KeyValue::new(k.clone(), s.clone()),
            other => KeyValue::new(k.clone(), other.to_string()),
        })
        .collect())
}

#[async_trait]
impl Provider for DopplerProvider {
    fn name(&self) -> &'static str {
        "doppler"
    }

    async fn fetch(
        &self,
        _ctx: &SecretContext,
        _map_id: &str,
        config: &serde_json::Map<String, serde_json::Value>,
        keys: &KeyMap,
    ) -> Result<Vec<KeyValue>, ProviderError> {
        let project = require_str(config, "project")?;
        let doppler_config = require_str(config, "config")?;
        let token = match optional_str(config, "token")? {
            Some(token) => token.to_string(),
            None => std::env::var("DOPPLER_TOKEN")
                .ok()
                .filter(|t| !t.is_empty())
                .ok_or_else(|| {
                    ProviderError::AccessDenied("no doppler token: set token or DOPPLER_TOKEN".into())
                })?,
        };

        let url = format!("{API_URL}/v3/configs/config/secrets/download");
        let response = self
            .http
            .get(&url)
            .query(&[
                ("format", "json"),
                ("project", project),
                ("config", doppler_config),
            ])
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| ProviderError::Backend(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ProviderError::AccessDenied(format!(
                "doppler rejected the token ({status})"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Backend(format!(
                "download failed with status {status}: {body}"
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Backend(e.to_string()))?;
        Ok(apply_keys(download_pairs(&json)?, keys))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_object_maps_key_wise() {
        let json = serde_json::json!({ "DB_URL": "postgres://", "RETRIES": 3 });
        let pairs = download_pairs(&json).unwrap();
        assert!(pairs.contains(&KeyValue::new("DB_URL", "postgres://")));
        assert!(pairs.contains(&KeyValue::new("RETRIES", "3")));
    }

    #[test]
    fn non_object_download_is_a_backend_error() {
        assert!(matches!(
            download_pairs(&serde_json::json!(["a"])),
            Err(ProviderError::Backend(_))
        ));
    }

    #[tokio::test]
    async fn missing_required_keys_are_config_errors() {
        let provider = DopplerProvider::new();
        let ctx = sstart_provider::SecretContext::detached(
            sstart_provider::SecretsResolver::empty(),
        );
        let err = provider
            .fetch(&ctx, "doppler", &serde_json::Map::new(), &KeyMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::MissingConfig("project")));
    }
}
