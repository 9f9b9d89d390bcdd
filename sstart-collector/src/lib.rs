#![deny(missing_docs)]
//! Provider graph execution.
//!
//! [`Collector::collect`] runs the configured providers strictly in
//! declaration order, feeding each one an expanded config, an optional
//! SSO token injection, and a resolver view restricted to its `uses`
//! grants, then merges the contributions with later-provider-wins
//! semantics.
//!
//! The TTL cache sits between expansion and fetching: a fresh fingerprint
//! hit short-circuits the provider entirely, and every successful fetch is
//! written back best-effort.

pub mod expand;

use std::sync::Arc;

use sstart_cache::{SecretCache, generate_key};
use sstart_provider::{
    Provider, ProviderError, ProviderRegistry, SecretContext, SecretsResolver,
};
use sstart_sso::{AuthError, SsoClient};
use sstart_types::{
    Config, ConfigError, ProviderSecretsMap, ProviderSpec, SSO_ACCESS_TOKEN_KEY, SSO_ID_TOKEN_KEY,
    Secrets, merge_into,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors from a collect run. The first failure aborts the run; partial
/// state is discarded.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CollectError {
    /// Structural config problem (duplicate ids, unknown kind, bad selection).
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// SSO authentication failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// A provider fetch failed.
    #[error("failed to fetch from provider '{id}': {source}")]
    Provider {
        /// The descriptor id that failed.
        id: String,
        /// The provider's own error, verbatim.
        source: ProviderError,
    },

    /// The run was cancelled.
    #[error("collection cancelled")]
    Cancelled,
}

/// Executes the provider graph of one [`Config`].
pub struct Collector {
    config: Config,
    registry: Arc<ProviderRegistry>,
    cache: Option<SecretCache>,
    sso: Option<SsoClient>,
    force_auth: bool,
}

impl Collector {
    /// Create a collector. Validates the config's structural invariants.
    pub fn new(config: Config, registry: Arc<ProviderRegistry>) -> Result<Self, CollectError> {
        config.validate()?;
        Ok(Self {
            config,
            registry,
            cache: None,
            sso: None,
            force_auth: false,
        })
    }

    /// Attach a TTL cache. Without one, every collect refetches.
    #[must_use]
    pub fn with_cache(mut self, cache: SecretCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Attach the SSO client used when the config has an `sso` section.
    #[must_use]
    pub fn with_sso(mut self, sso: SsoClient) -> Self {
        self.sso = Some(sso);
        self
    }

    /// Skip the already-authenticated short-circuit and re-run the active
    /// SSO flow unconditionally.
    #[must_use]
    pub fn with_force_auth(mut self, force: bool) -> Self {
        self.force_auth = force;
        self
    }

    /// The validated config.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Collect with a fresh, never-cancelled token.
    pub async fn collect(&self, provider_ids: &[String]) -> Result<Secrets, CollectError> {
        self.collect_with(&CancellationToken::new(), provider_ids)
            .await
    }

    /// Collect the selected providers (all of them when `provider_ids` is
    /// empty), honoring `cancel`.
    pub async fn collect_with(
        &self,
        cancel: &CancellationToken,
        provider_ids: &[String],
    ) -> Result<Secrets, CollectError> {
        let sso_tokens = self.authenticate().await?;

        let selected: Vec<String> = if provider_ids.is_empty() {
            self.config.provider_ids()
        } else {
            provider_ids.to_vec()
        };

        let mut result = Secrets::new();
        let mut contributions = ProviderSecretsMap::new();

        for id in &selected {
            let spec = self
                .config
                .provider(id)
                .ok_or_else(|| ConfigError::ProviderNotFound(id.clone()))?;

            let contribution = self
                .run_provider(cancel, spec, &contributions, &sso_tokens)
                .await?;

            contributions.insert(id.clone(), contribution.clone());
            merge_into(&mut result, &contribution);
        }

        Ok(result)
    }

    /// Authenticate against SSO when configured; returns (access, id) tokens.
    async fn authenticate(&self) -> Result<(Option<String>, Option<String>), CollectError> {
        let (Some(_), Some(sso)) = (&self.config.sso, &self.sso) else {
            return Ok((None, None));
        };
        let tokens = sso.authenticate(self.force_auth).await?;
        tracing::debug!("SSO authentication complete");
        Ok((
            Some(tokens.access_token.clone()),
            tokens.id_token.clone(),
        ))
    }

    /// Run one provider: expand, consult the cache, fetch, write back.
    async fn run_provider(
        &self,
        cancel: &CancellationToken,
        spec: &ProviderSpec,
        contributions: &ProviderSecretsMap,
        sso_tokens: &(Option<String>, Option<String>),
    ) -> Result<Secrets, CollectError> {
        let id = spec.id();
        let mut expanded = expand::expand_config(&spec.config);

        // The template kind reads its templates from the config map; carry
        // them over verbatim so a template edit also changes the fingerprint.
        if !spec.templates.is_empty() {
            let templates: serde_json::Map<String, serde_json::Value> = spec
                .templates
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            expanded.insert("templates".into(), serde_json::Value::Object(templates));
        }

        let fingerprint = generate_key(id, &spec.kind, &expanded);

        if self.config.cache.enabled {
            if let Some(cache) = &self.cache {
                if let Some(secrets) = cache.get(&fingerprint) {
                    tracing::debug!(provider = %id, "cache hit");
                    return Ok(secrets);
                }
            }
        }

        let provider = self.lookup(&spec.kind)?;

        let (access_token, id_token) = sso_tokens;
        if let Some(token) = access_token {
            expanded.insert(
                SSO_ACCESS_TOKEN_KEY.into(),
                serde_json::Value::String(token.clone()),
            );
        }
        if let Some(token) = id_token {
            expanded.insert(
                SSO_ID_TOKEN_KEY.into(),
                serde_json::Value::String(token.clone()),
            );
        }

        let resolver = if spec.uses.is_empty() {
            SecretsResolver::empty()
        } else {
            SecretsResolver::restricted(contributions, &spec.uses)
        };
        let ctx = SecretContext::new(cancel.child_token(), resolver);

        tracing::debug!(provider = %id, kind = %spec.kind, "fetching");
        let pairs = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CollectError::Cancelled),
            result = provider.fetch(&ctx, id, &expanded, &spec.keys) => {
                result.map_err(|source| CollectError::Provider { id: id.to_string(), source })?
            }
        };

        let mut contribution = Secrets::new();
        for pair in pairs {
            contribution.insert(pair.key, pair.value);
        }
        for (key, value) in &spec.env {
            contribution.insert(key.clone(), expand::expand_str(value));
        }

        if self.config.cache.enabled {
            if let Some(cache) = &self.cache {
                cache.set(&fingerprint, &contribution);
            }
        }

        Ok(contribution)
    }

    fn lookup(&self, kind: &str) -> Result<Arc<dyn Provider>, CollectError> {
        self.registry.require(kind).map_err(|err| match err {
            ProviderError::UnknownKind(kind) => {
                CollectError::Config(ConfigError::UnknownKind(kind))
            }
            other => CollectError::Provider {
                id: kind.to_string(),
                source: other,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use indexmap::IndexMap;
    use sstart_cache::MemoryBackend;
    use sstart_provider_dotenv::DotenvProvider;
    use sstart_provider_template::TemplateProvider;
    use sstart_types::{CacheConfig, KeyMap, KeyValue};
    use std::io::Write;
    use std::time::Duration;

    /// Provider that returns a fixed pair set, honoring `keys`.
    struct FixedProvider {
        kind: &'static str,
        pairs: Vec<(&'static str, &'static str)>,
    }

    #[async_trait]
    impl Provider for FixedProvider {
        fn name(&self) -> &'static str {
            self.kind
        }

        async fn fetch(
            &self,
            _ctx: &SecretContext,
            _map_id: &str,
            _config: &serde_json::Map<String, serde_json::Value>,
            keys: &KeyMap,
        ) -> Result<Vec<KeyValue>, ProviderError> {
            let pairs = self
                .pairs
                .iter()
                .map(|(k, v)| KeyValue::new(*k, *v))
                .collect();
            Ok(sstart_provider::apply_keys(pairs, keys))
        }
    }

    fn spec(kind: &str, id: Option<&str>) -> ProviderSpec {
        ProviderSpec {
            kind: kind.into(),
            id: id.map(Into::into),
            config: serde_json::Map::new(),
            keys: IndexMap::new(),
            templates: IndexMap::new(),
            uses: vec![],
            env: IndexMap::new(),
        }
    }

    fn key_map(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn config(providers: Vec<ProviderSpec>) -> Config {
        Config {
            inherit: true,
            sso: None,
            cache: CacheConfig::default(),
            providers,
            mcp: None,
        }
    }

    fn no_cache_config(providers: Vec<ProviderSpec>) -> Config {
        Config {
            cache: CacheConfig {
                enabled: false,
                ttl_secs: 0,
            },
            ..config(providers)
        }
    }

    #[tokio::test]
    async fn rename_filter_and_override() {
        // P1 yields {A=1,B=2} keeping only A; P2 yields {A=9,C=3} keeping
        // both. Later provider wins on A; B is filtered out.
        let registry = Arc::new(
            ProviderRegistry::new()
                .with_provider(Arc::new(FixedProvider {
                    kind: "p1",
                    pairs: vec![("A", "1"), ("B", "2")],
                }))
                .with_provider(Arc::new(FixedProvider {
                    kind: "p2",
                    pairs: vec![("A", "9"), ("C", "3")],
                })),
        );

        let mut first = spec("p1", None);
        first.keys = key_map(&[("A", "==")]);
        let mut second = spec("p2", None);
        second.keys = key_map(&[("A", "=="), ("C", "==")]);

        let collector = Collector::new(no_cache_config(vec![first, second]), registry).unwrap();
        let secrets = collector.collect(&[]).await.unwrap();

        assert_eq!(secrets.get("A").map(String::as_str), Some("9"));
        assert_eq!(secrets.get("C").map(String::as_str), Some("3"));
        assert!(!secrets.contains_key("B"));
    }

    #[tokio::test]
    async fn template_composes_from_granted_providers() {
        let registry = Arc::new(
            ProviderRegistry::new()
                .with_provider(Arc::new(FixedProvider {
                    kind: "aws_prod",
                    pairs: vec![("PG_USER", "u"), ("PG_PASS", "p")],
                }))
                .with_provider(Arc::new(FixedProvider {
                    kind: "aws_generic",
                    pairs: vec![("PG_HOST", "h")],
                }))
                .with_provider(Arc::new(TemplateProvider::new())),
        );

        let mut template = spec("template", None);
        template.uses = vec!["aws_prod".into(), "aws_generic".into()];
        template.templates = key_map(&[(
            "PG_URI",
            "pgsql://{{.aws_prod.PG_USER}}:{{.aws_prod.PG_PASS}}@{{.aws_generic.PG_HOST}}",
        )]);

        let collector = Collector::new(
            no_cache_config(vec![spec("aws_prod", None), spec("aws_generic", None), template]),
            registry,
        )
        .unwrap();
        let secrets = collector.collect(&[]).await.unwrap();

        assert_eq!(secrets.get("PG_URI").map(String::as_str), Some("pgsql://u:p@h"));
    }

    #[tokio::test]
    async fn template_without_uses_sees_no_value() {
        let registry = Arc::new(
            ProviderRegistry::new()
                .with_provider(Arc::new(FixedProvider {
                    kind: "aws_prod",
                    pairs: vec![("PG_USER", "u"), ("PG_PASS", "p")],
                }))
                .with_provider(Arc::new(FixedProvider {
                    kind: "aws_generic",
                    pairs: vec![("PG_HOST", "h")],
                }))
                .with_provider(Arc::new(TemplateProvider::new())),
        );

        let mut template = spec("template", None);
        template.templates = key_map(&[(
            "PG_URI",
            "pgsql://{{.aws_prod.PG_USER}}:{{.aws_prod.PG_PASS}}@{{.aws_generic.PG_HOST}}",
        )]);

        let collector = Collector::new(
            no_cache_config(vec![spec("aws_prod", None), spec("aws_generic", None), template]),
            registry,
        )
        .unwrap();
        let secrets = collector.collect(&[]).await.unwrap();

        assert_eq!(
            secrets.get("PG_URI").map(String::as_str),
            Some("pgsql://<no value>:<no value>@<no value>")
        );
    }

    #[tokio::test]
    async fn cache_serves_first_snapshot_within_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join(".env");
        std::fs::File::create(&env_path)
            .and_then(|mut f| f.write_all(b"A=first\n"))
            .unwrap();

        let registry =
            Arc::new(ProviderRegistry::new().with_provider(Arc::new(DotenvProvider::new())));

        let mut dotenv = spec("dotenv", None);
        dotenv.config.insert(
            "path".into(),
            serde_json::Value::String(env_path.to_string_lossy().into_owned()),
        );

        let collector = Collector::new(config(vec![dotenv]), registry)
            .unwrap()
            .with_cache(SecretCache::with_backend(
                Box::new(MemoryBackend::new()),
                Duration::from_secs(60),
            ));

        let first = collector.collect(&[]).await.unwrap();
        assert_eq!(first.get("A").map(String::as_str), Some("first"));

        // Change the file under the same config: within the TTL the first
        // snapshot is still served.
        std::fs::File::create(&env_path)
            .and_then(|mut f| f.write_all(b"A=second\n"))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let second = collector.collect(&[]).await.unwrap();
        assert_eq!(second.get("A").map(String::as_str), Some("first"));
    }

    #[tokio::test]
    async fn disabled_cache_always_refetches() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join(".env");
        std::fs::File::create(&env_path)
            .and_then(|mut f| f.write_all(b"A=first\n"))
            .unwrap();

        let registry =
            Arc::new(ProviderRegistry::new().with_provider(Arc::new(DotenvProvider::new())));

        let mut dotenv = spec("dotenv", None);
        dotenv.config.insert(
            "path".into(),
            serde_json::Value::String(env_path.to_string_lossy().into_owned()),
        );

        let collector = Collector::new(no_cache_config(vec![dotenv]), registry)
            .unwrap()
            .with_cache(SecretCache::with_backend(
                Box::new(MemoryBackend::new()),
                Duration::from_secs(60),
            ));

        collector.collect(&[]).await.unwrap();
        std::fs::File::create(&env_path)
            .and_then(|mut f| f.write_all(b"A=second\n"))
            .unwrap();

        let second = collector.collect(&[]).await.unwrap();
        assert_eq!(second.get("A").map(String::as_str), Some("second"));
    }

    #[tokio::test]
    async fn provider_errors_carry_the_id_prefix() {
        let registry =
            Arc::new(ProviderRegistry::new().with_provider(Arc::new(DotenvProvider::new())));

        let mut dotenv = spec("dotenv", Some("local"));
        dotenv.config.insert(
            "path".into(),
            serde_json::Value::String("/no/such/file.env".into()),
        );

        let collector = Collector::new(no_cache_config(vec![dotenv]), registry).unwrap();
        let err = collector.collect(&[]).await.unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("failed to fetch from provider 'local':"));
    }

    #[tokio::test]
    async fn unknown_kind_is_a_config_error() {
        let registry = Arc::new(ProviderRegistry::new());
        let collector =
            Collector::new(no_cache_config(vec![spec("martian", None)]), registry).unwrap();
        let err = collector.collect(&[]).await.unwrap_err();
        assert!(matches!(
            err,
            CollectError::Config(ConfigError::UnknownKind(kind)) if kind == "martian"
        ));
    }

    #[tokio::test]
    async fn selection_restricts_and_validates_ids() {
        let registry = Arc::new(ProviderRegistry::new().with_provider(Arc::new(FixedProvider {
            kind: "p1",
            pairs: vec![("A", "1")],
        })));

        let collector = Collector::new(
            no_cache_config(vec![spec("p1", Some("one")), spec("p1", Some("two"))]),
            registry,
        )
        .unwrap();

        let secrets = collector.collect(&["one".to_string()]).await.unwrap();
        assert_eq!(secrets.len(), 1);

        let err = collector.collect(&["ghost".to_string()]).await.unwrap_err();
        assert!(matches!(
            err,
            CollectError::Config(ConfigError::ProviderNotFound(id)) if id == "ghost"
        ));
    }

    #[tokio::test]
    async fn static_env_pairs_join_the_contribution() {
        let registry = Arc::new(ProviderRegistry::new().with_provider(Arc::new(FixedProvider {
            kind: "p1",
            pairs: vec![("A", "1")],
        })));

        let mut with_env = spec("p1", None);
        with_env.env = key_map(&[("STATIC", "value"), ("A", "overridden")]);

        let collector = Collector::new(no_cache_config(vec![with_env]), registry).unwrap();
        let secrets = collector.collect(&[]).await.unwrap();
        assert_eq!(secrets.get("STATIC").map(String::as_str), Some("value"));
        assert_eq!(secrets.get("A").map(String::as_str), Some("overridden"));
    }

    /// Provider that echoes selected config keys back as pairs, for
    /// observing what the collector injected.
    struct EchoConfigProvider {
        echo: &'static [&'static str],
    }

    #[async_trait]
    impl Provider for EchoConfigProvider {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn fetch(
            &self,
            _ctx: &SecretContext,
            _map_id: &str,
            config: &serde_json::Map<String, serde_json::Value>,
            _keys: &KeyMap,
        ) -> Result<Vec<KeyValue>, ProviderError> {
            Ok(self
                .echo
                .iter()
                .filter_map(|key| {
                    config
                        .get(*key)
                        .and_then(serde_json::Value::as_str)
                        .map(|value| KeyValue::new((*key).to_string(), value))
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn sso_tokens_are_injected_into_provider_configs() {
        use sstart_sso::{SsoClient, TokenStore};
        use sstart_types::{SsoConfig, Tokens};

        // A persisted, unexpired token record: authenticate() short-circuits
        // to the store and never talks to an IdP.
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::with_file(dir.path().join("tokens.json"));
        store
            .save(&Tokens {
                access_token: "at-injected".into(),
                refresh_token: None,
                id_token: Some("idt-injected".into()),
                token_type: Some("Bearer".into()),
                expiry: None,
            })
            .unwrap();

        let sso_config = SsoConfig {
            client_id: "cli".into(),
            issuer: "https://idp.example.com".into(),
            scopes: vec!["openid".into()],
            redirect_uri: None,
            response_mode: None,
            pkce: None,
            client_secret: None,
        };

        let registry = Arc::new(ProviderRegistry::new().with_provider(Arc::new(
            EchoConfigProvider {
                echo: &[SSO_ACCESS_TOKEN_KEY, SSO_ID_TOKEN_KEY],
            },
        )));

        let mut config = no_cache_config(vec![spec("echo", None)]);
        config.sso = Some(sso_config.clone());

        let collector = Collector::new(config, registry)
            .unwrap()
            .with_sso(SsoClient::with_store(sso_config, store));
        let secrets = collector.collect(&[]).await.unwrap();

        assert_eq!(
            secrets.get(SSO_ACCESS_TOKEN_KEY).map(String::as_str),
            Some("at-injected")
        );
        assert_eq!(
            secrets.get(SSO_ID_TOKEN_KEY).map(String::as_str),
            Some("idt-injected")
        );
    }

    #[tokio::test]
    async fn cancelled_collect_aborts() {
        let registry = Arc::new(ProviderRegistry::new().with_provider(Arc::new(FixedProvider {
            kind: "p1",
            pairs: vec![("A", "1")],
        })));
        let collector =
            Collector::new(no_cache_config(vec![spec("p1", None)]), registry).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = collector.collect_with(&cancel, &[]).await.unwrap_err();
        assert!(matches!(err, CollectError::Cancelled));
    }
}
