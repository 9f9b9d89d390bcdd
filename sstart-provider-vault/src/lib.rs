#![deny(missing_docs)]
//! HashiCorp Vault KV provider.
//!
//! Recognized config keys: `path` (required), `address` (default
//! `$VAULT_ADDR`, then `http://127.0.0.1:8200`), `mount` (default
//! `secret`), and `auth`:
//!
//! - `method: token`: token from `auth.token` or `$VAULT_TOKEN`;
//! - `method: jwt` / `method: oidc`: exchanges the injected SSO ID token
//!   via `POST v1/auth/<auth.mount>/login` for a client token.
//!
//! Reads try KV v2 (`v1/<mount>/data/<path>`) first and fall back to the
//! KV v1 layout on 404.

use async_trait::async_trait;
use sstart_provider::config::{optional_object, optional_str, require_str};
use sstart_provider::{Provider, ProviderError, SecretContext, apply_keys};
use sstart_types::{KeyMap, KeyValue, SSO_ID_TOKEN_KEY};

/// Default Vault address when neither config nor `$VAULT_ADDR` gives one.
const DEFAULT_ADDRESS: &str = "http://127.0.0.1:8200";

/// Default KV mount.
const DEFAULT_MOUNT: &str = "secret";

/// Provider for Vault KV secrets.
pub struct VaultProvider {
    http: reqwest::Client,
}

impl VaultProvider {
    /// Create the provider with a shared HTTP client.
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// Resolve the client token per the `auth` config.
    async fn client_token(
        &self,
        address: &str,
        config: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<String, ProviderError> {
        let auth = optional_object(config, "auth")?;
        let method = auth
            .map(|a| optional_str(a, "method"))
            .transpose()?
            .flatten()
            .unwrap_or("token");

        match method {
            "token" => {
                if let Some(auth) = auth {
                    if let Some(token) = optional_str(auth, "token")? {
                        return Ok(token.to_string());
                    }
                }
                std::env::var("VAULT_TOKEN")
                    .ok()
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| {
                        ProviderError::AccessDenied(
                            "no vault token: set auth.token or VAULT_TOKEN".into(),
                        )
                    })
            }
            "jwt" | "oidc" => {
                let Some(serde_json::Value::String(jwt)) = config.get(SSO_ID_TOKEN_KEY) else {
                    return Err(ProviderError::AccessDenied(
                        "jwt auth needs an SSO ID token; configure sso and sign in".into(),
                    ));
                };
                let login_mount = auth
                    .map(|a| optional_str(a, "mount"))
                    .transpose()?
                    .flatten()
                    .unwrap_or(method);
                let role = auth.map(|a| optional_str(a, "role")).transpose()?.flatten();
                self.jwt_login(address, login_mount, jwt, role).await
            }
            other => Err(ProviderError::InvalidConfig(format!(
                "unsupported vault auth method: {other}"
            ))),
        }
    }

    /// Exchange a JWT for a client token via `auth/<mount>/login`.
    async fn jwt_login(
        &self,
        address: &str,
        mount: &str,
        jwt: &str,
        role: Option<&str>,
    ) -> Result<String, ProviderError> {
        let url = format!("{address}/v1/auth/{mount}/login");
        let mut body = serde_json::json!({ "jwt": jwt });
        if let Some(role) = role {
            body["role"] = serde_json::Value::String(role.to_string());
        }

        tracing::debug!(url = %url, "logging into vault with jwt");
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Backend(e.to_string()))?;
        let status = response.status();
        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Backend(e.to_string()))?;

        if !status.is_success() {
            return Err(ProviderError::AccessDenied(format!(
                "vault jwt login failed with status {status}: {}",
                vault_errors(&json)
            )));
        }

        json.pointer("/auth/client_token")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                ProviderError::Backend("vault login response missing auth.client_token".into())
            })
    }

    async fn read_kv(
        &self,
        address: &str,
        mount: &str,
        path: &str,
        token: &str,
    ) -> Result<Vec<KeyValue>, ProviderError> {
        // KV v2 first.
        let v2_url = format!("{address}/v1/{mount}/data/{path}");
        let response = self.get(&v2_url, token).await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            let v1_url = format!("{address}/v1/{mount}/{path}");
            let response = self.get(&v1_url, token).await?;
            return parse_kv_response(response).await;
        }
        parse_kv_response(response).await
    }

    async fn get(&self, url: &str, token: &str) -> Result<reqwest::Response, ProviderError> {
        self.http
            .get(url)
            .header("X-Vault-Token", token)
            .send()
            .await
            .map_err(|e| ProviderError::Backend(e.to_string()))
    }
}

impl Default for VaultProvider {
    fn default() -> Self {
        Self::new()
    }
}

async fn parse_kv_response(response: reqwest::Response) -> Result<Vec<KeyValue>, ProviderError> {
    let status = response.status();
    let json: serde_json::Value = response
        .json()
        .await
        .map_err(|e| ProviderError::Backend(e.to_string()))?;

    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(ProviderError::NotFound(format!(
            "vault secret not found: {}",
            vault_errors(&json)
        )));
    }
    if status == reqwest::StatusCode::FORBIDDEN {
        return Err(ProviderError::AccessDenied(vault_errors(&json)));
    }
    if !status.is_success() {
        return Err(ProviderError::Backend(format!(
            "vault read failed with status {status}: {}",
            vault_errors(&json)
        )));
    }

    Ok(secret_data_pairs(&json))
}

/// Collect vault's `errors` array into one message.
fn vault_errors(json: &serde_json::Value) -> String {
    json.get("errors")
        .and_then(serde_json::Value::as_array)
        .map(|errors| {
            errors
                .iter()
                .filter_map(serde_json::Value::as_str)
                .collect::<Vec<_>>()
                .join("; ")
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "no error detail".into())
}

/// Extract the secret data object from a KV v2 (`data.data`) or KV v1
/// (`data`) read response.
fn secret_data_pairs(json: &serde_json::Value) -> Vec<KeyValue> {
    let data = json
        .pointer("/data/data")
        .and_then(serde_json::Value::as_object)
        .or_else(|| json.get("data").and_then(serde_json::Value::as_object));

    let Some(data) = data else {
        return Vec::new();
    };

    data.iter()
        .map(|(k, v)| match v {
            serde_json::Value::String(s) => KeyValue::new(k.clone(), s.clone()),
            other => KeyValue::new(k.clone(), other.to_string()),
        })
        .collect()
}

#[async_trait]
impl Provider for VaultProvider {
    fn name(&self) -> &'static str {
        "vault"
    }

    async fn fetch(
        &self,
        _ctx: &SecretContext,
        _map_id: &str,
        config: &serde_json::Map<String, serde_json::Value>,
        keys: &KeyMap,
    ) -> Result<Vec<KeyValue>, ProviderError> {
        let path = require_str(config, "path")?;
        let address = match optional_str(config, "address")? {
            Some(address) => address.trim_end_matches('/').to_string(),
            None => std::env::var("VAULT_ADDR")
                .ok()
                .filter(|a| !a.is_empty())
                .map(|a| a.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_ADDRESS.to_string()),
        };
        let mount = optional_str(config, "mount")?.unwrap_or(DEFAULT_MOUNT);

        let token = self.client_token(&address, config).await?;
        let pairs = self.read_kv(&address, mount, path, &token).await?;
        Ok(apply_keys(pairs, keys))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kv_v2_response_shape() {
        let json = serde_json::json!({
            "data": {
                "data": { "USER": "u", "PORT": 5432 },
                "metadata": { "version": 3 }
            }
        });
        let pairs = secret_data_pairs(&json);
        assert!(pairs.contains(&KeyValue::new("USER", "u")));
        assert!(pairs.contains(&KeyValue::new("PORT", "5432")));
        assert_eq!(pairs.len(), 2);
    }

    #[test]
    fn kv_v1_response_shape() {
        let json = serde_json::json!({ "data": { "USER": "u" } });
        assert_eq!(secret_data_pairs(&json), vec![KeyValue::new("USER", "u")]);
    }

    #[test]
    fn empty_response_yields_no_pairs() {
        assert!(secret_data_pairs(&serde_json::json!({})).is_empty());
    }

    #[test]
    fn vault_errors_joined() {
        let json = serde_json::json!({ "errors": ["permission denied", "try again"] });
        assert_eq!(vault_errors(&json), "permission denied; try again");
        assert_eq!(vault_errors(&serde_json::json!({})), "no error detail");
    }

    #[tokio::test]
    async fn missing_path_is_a_config_error() {
        let provider = VaultProvider::new();
        let ctx = sstart_provider::SecretContext::detached(
            sstart_provider::SecretsResolver::empty(),
        );
        let err = provider
            .fetch(&ctx, "vault", &serde_json::Map::new(), &KeyMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::MissingConfig("path")));
    }

    #[tokio::test]
    async fn jwt_method_without_injected_token_is_denied() {
        let provider = VaultProvider::new();
        let config: serde_json::Map<String, serde_json::Value> = serde_json::from_value(
            serde_json::json!({ "auth": { "method": "jwt", "role": "ci" } }),
        )
        .expect("test config");
        let err = provider
            .client_token("http://127.0.0.1:8200", &config)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::AccessDenied(_)));
    }

    /// Integration test against a live Vault with JWT auth enabled.
    /// Requires VAULT_ADDR plus an OIDC ID token in SSTART_TEST_ID_TOKEN.
    #[tokio::test]
    #[ignore]
    async fn integration_jwt_login_and_read() {
        let id_token = std::env::var("SSTART_TEST_ID_TOKEN").expect("SSTART_TEST_ID_TOKEN");
        let provider = VaultProvider::new();
        let config: serde_json::Map<String, serde_json::Value> =
            serde_json::from_value(serde_json::json!({
                "path": "ci/db",
                "auth": { "method": "jwt", "role": "ci" },
                "_sso_id_token": id_token,
            }))
            .expect("test config");
        let ctx = sstart_provider::SecretContext::detached(
            sstart_provider::SecretsResolver::empty(),
        );
        let pairs = provider
            .fetch(&ctx, "vault", &config, &KeyMap::new())
            .await
            .unwrap();
        assert!(!pairs.is_empty());
    }

    #[tokio::test]
    async fn unknown_auth_method_is_invalid() {
        let provider = VaultProvider::new();
        let config: serde_json::Map<String, serde_json::Value> =
            serde_json::from_value(serde_json::json!({ "auth": { "method": "ldap" } }))
                .expect("test config");
        let err = provider
            .client_token("http://127.0.0.1:8200", &config)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidConfig(_)));
    }
}
