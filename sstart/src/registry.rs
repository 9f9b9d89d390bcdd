//! The process-wide provider registry.

use std::sync::{Arc, OnceLock};

use sstart_provider::ProviderRegistry;
use sstart_provider_aws::AwsSecretsManagerProvider;
use sstart_provider_azure::AzureKeyVaultProvider;
use sstart_provider_bitwarden::{BitwardenProvider, BitwardenSmProvider};
use sstart_provider_doppler::DopplerProvider;
use sstart_provider_dotenv::DotenvProvider;
use sstart_provider_gcloud::GcloudSecretManagerProvider;
use sstart_provider_infisical::InfisicalProvider;
use sstart_provider_onepassword::OnePasswordProvider;
use sstart_provider_template::TemplateProvider;
use sstart_provider_vault::VaultProvider;

/// Every built-in provider kind, wired once per process. Read-only after
/// initialization.
pub fn default_registry() -> Arc<ProviderRegistry> {
    static REGISTRY: OnceLock<Arc<ProviderRegistry>> = OnceLock::new();
    Arc::clone(REGISTRY.get_or_init(|| {
        Arc::new(
            ProviderRegistry::new()
                .with_provider(Arc::new(DotenvProvider::new()))
                .with_provider(Arc::new(TemplateProvider::new()))
                .with_provider(Arc::new(VaultProvider::new()))
                .with_provider(Arc::new(AwsSecretsManagerProvider::new()))
                .with_provider(Arc::new(GcloudSecretManagerProvider::new()))
                .with_provider(Arc::new(AzureKeyVaultProvider::new()))
                .with_provider(Arc::new(OnePasswordProvider::new()))
                .with_provider(Arc::new(BitwardenProvider::new()))
                .with_provider(Arc::new(BitwardenSmProvider::new()))
                .with_provider(Arc::new(DopplerProvider::new()))
                .with_provider(Arc::new(InfisicalProvider::new())),
        )
    }))
}
