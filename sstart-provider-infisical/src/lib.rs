#![deny(missing_docs)]
//! Infisical provider.
//!
//! Recognized config keys: `project_id` and `environment` (required),
//! `path` (default `/`), `recursive`, `include_imports`, `expand_secrets`,
//! `site_url` (default `https://app.infisical.com`), `token`. The machine
//! token is resolved from config `token` or `$INFISICAL_TOKEN`.

use async_trait::async_trait;
use serde::Deserialize;
use sstart_provider::config::{optional_bool, optional_str, require_str};
use sstart_provider::{Provider, ProviderError, SecretContext, apply_keys};
use sstart_types::{KeyMap, KeyValue};

/// Default Infisical instance.
const DEFAULT_SITE_URL: &str = "https://app.infisical.com";

/// `GET /api/v3/secrets/raw` response.
#[derive(Debug, Deserialize)]
struct RawSecretsResponse {
    #[serde(default)]
    secrets: Vec<RawSecret>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSecret {
    secret_key: String,
    secret_value: String,
}

/// Provider for Infisical projects.
pub struct InfisicalProvider {
    http: reqwest::Client,
}

impl InfisicalProvider {
    /// Create the provider with a shared HTTP client.
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for InfisicalProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for InfisicalProvider {
    fn name(&self) -> &'static str {
        "infisical"
    }

    async fn fetch(
        &self,
        _ctx: &SecretContext,
        _map_id: &str,
        config: &serde_json::Map<String, serde_json::Value>,
        keys: &KeyMap,
    ) -> Result<Vec<KeyValue>, ProviderError> {
        let project_id = require_str(config, "project_id")?;
        let environment = require_str(config, "environment")?;
        let secret_path = optional_str(config, "path")?.unwrap_or("/");
        let site_url = optional_str(config, "site_url")?
            .unwrap_or(DEFAULT_SITE_URL)
            .trim_end_matches('/');
        let token = match optional_str(config, "token")? {
            Some(token) => token.to_string(),
            None => std::env::var("INFISICAL_TOKEN")
                .ok()
                .filter(|t| !t.is_empty())
                .ok_or_else(|| {
                    ProviderError::AccessDenied(
                        "no infisical token: set token or INFISICAL_TOKEN".into(),
                    )
                })?,
        };

        let recursive = optional_bool(config, "recursive")?.unwrap_or(false);
        let include_imports = optional_bool(config, "include_imports")?.unwrap_or(false);
        let expand_secrets = optional_bool(config, "expand_secrets")?.unwrap_or(true);

        let url = format!("{site_url}/api/v3/secrets/raw");
        let response = self
            .http
            .get(&url)
            .query(&[
                ("workspaceId", project_id),
                ("environment", environment),
                ("secretPath", secret_path),
                ("recursive", if recursive { "true" } else { "false" }),
                (
                    "include_imports",
                    if include_imports { "true" } else { "false" },
                ),
                (
                    "expandSecretReferences",
                    if expand_secrets { "true" } else { "false" },
                ),
            ])
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| ProviderError::Backend(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ProviderError::AccessDenied(format!(
                "infisical rejected the token ({status})"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Backend(format!(
                "secret listing failed with status {status}: {body}"
            )));
        }

        let listing: RawSecretsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Backend(e.to_string()))?;
        let pairs = listing
            .secrets
            .into_iter()
            .map(|s| KeyValue::new(s.secret_key, s.secret_value))
            .collect();

        Ok(apply_keys(pairs, keys))
    }
}
