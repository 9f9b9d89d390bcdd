#![deny(missing_docs)]
//! AWS Secrets Manager provider.
//!
//! Recognized config keys: `secret_id` (required), `region`, `endpoint`,
//! `role_arn`, `session_name`, `duration`. Credentials come from the SDK's
//! default chain (env, profile, IMDS, IRSA); when `role_arn` is set, an
//! STS assume-role runs first and the temporary credentials are used for
//! the Secrets Manager call.
//!
//! Secret payloads go through the blob shim: JSON objects map key-wise,
//! anything else lands under a single `<ID>_SECRET` key.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_credential_types::provider::SharedCredentialsProvider;
use sstart_provider::config::{optional_str, optional_u64, require_str};
use sstart_provider::{Provider, ProviderError, SecretContext, pairs_from_blob};
use sstart_types::{KeyMap, KeyValue};

/// Session name used for assume-role when none is configured.
const DEFAULT_SESSION_NAME: &str = "sstart";

/// Provider for AWS Secrets Manager.
#[derive(Debug, Default)]
pub struct AwsSecretsManagerProvider;

impl AwsSecretsManagerProvider {
    /// Create the provider.
    pub fn new() -> Self {
        Self
    }

    async fn sdk_config(
        &self,
        config: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<aws_config::SdkConfig, ProviderError> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = optional_str(config, "region")? {
            loader = loader.region(Region::new(region.to_string()));
        }
        if let Some(endpoint) = optional_str(config, "endpoint")? {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        let Some(role_arn) = optional_str(config, "role_arn")? else {
            return Ok(sdk_config);
        };

        let session_name =
            optional_str(config, "session_name")?.unwrap_or(DEFAULT_SESSION_NAME);
        tracing::debug!(role = %role_arn, session = %session_name, "assuming role");

        let sts = aws_sdk_sts::Client::new(&sdk_config);
        let mut request = sts
            .assume_role()
            .role_arn(role_arn)
            .role_session_name(session_name);
        if let Some(duration) = optional_u64(config, "duration")? {
            request = request.duration_seconds(duration as i32);
        }
        let assumed = request
            .send()
            .await
            .map_err(|e| ProviderError::AccessDenied(format!("assume-role failed: {e}")))?;
        let creds = assumed.credentials().ok_or_else(|| {
            ProviderError::Backend("assume-role response missing credentials".into())
        })?;

        let credentials = Credentials::new(
            creds.access_key_id(),
            creds.secret_access_key(),
            Some(creds.session_token().to_string()),
            None,
            "sstart-assume-role",
        );
        Ok(sdk_config
            .to_builder()
            .credentials_provider(SharedCredentialsProvider::new(credentials))
            .build())
    }
}

#[async_trait]
impl Provider for AwsSecretsManagerProvider {
    fn name(&self) -> &'static str {
        "aws_secretsmanager"
    }

    async fn fetch(
        &self,
        _ctx: &SecretContext,
        map_id: &str,
        config: &serde_json::Map<String, serde_json::Value>,
        keys: &KeyMap,
    ) -> Result<Vec<KeyValue>, ProviderError> {
        let secret_id = require_str(config, "secret_id")?;
        let sdk_config = self.sdk_config(config).await?;
        let client = aws_sdk_secretsmanager::Client::new(&sdk_config);

        let output = client
            .get_secret_value()
            .secret_id(secret_id)
            .send()
            .await
            .map_err(|e| ProviderError::Backend(format!("GetSecretValue failed: {e}")))?;

        let blob = match (output.secret_string(), output.secret_binary()) {
            (Some(text), _) => text.to_string(),
            (None, Some(binary)) => String::from_utf8_lossy(binary.as_ref()).into_owned(),
            (None, None) => {
                return Err(ProviderError::NotFound(format!(
                    "secret {secret_id} has no value"
                )));
            }
        };

        Ok(pairs_from_blob(map_id, &blob, keys))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sstart_provider::SecretsResolver;

    #[tokio::test]
    async fn missing_secret_id_is_a_config_error() {
        let provider = AwsSecretsManagerProvider::new();
        let ctx = SecretContext::detached(SecretsResolver::empty());
        let err = provider
            .fetch(&ctx, "aws", &serde_json::Map::new(), &KeyMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::MissingConfig("secret_id")));
    }

    #[tokio::test]
    async fn non_string_region_is_invalid() {
        let provider = AwsSecretsManagerProvider::new();
        let config: serde_json::Map<String, serde_json::Value> =
            serde_json::from_value(serde_json::json!({ "secret_id": "db", "region": 5 }))
                .expect("test config");
        let ctx = SecretContext::detached(SecretsResolver::empty());
        let err = provider
            .fetch(&ctx, "aws", &config, &KeyMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidConfig(_)));
    }
}
