#![deny(missing_docs)]
//! Provider that composes secrets from other providers' outputs.
//!
//! The template kind has no upstream store. Its config carries a
//! `templates` mapping (`target_key -> template text`); each text may
//! reference `{{.<provider_id>.<KEY>}}`, resolved against the
//! [`SecretsResolver`](sstart_provider::SecretsResolver) view, i.e.
//! against exactly the providers granted by the descriptor's `uses` list.
//!
//! References outside the granted view render as the literal `<no value>`
//! instead of failing: that sentinel is the enforcement path for
//! `uses`-based visibility, and it makes a missing grant visible in the
//! produced value rather than aborting the whole collect.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use sstart_provider::{Provider, ProviderError, SecretContext, SecretsResolver, apply_keys};
use sstart_types::{KeyMap, KeyValue};

/// Rendered in place of a reference the resolver cannot satisfy.
pub const NO_VALUE: &str = "<no value>";

fn reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*\.([A-Za-z0-9_-]+)\.([A-Za-z0-9_.-]+)\s*\}\}")
            .expect("hard-coded pattern compiles")
    })
}

/// Render one template text against a resolver view.
pub fn render(text: &str, resolver: &SecretsResolver) -> String {
    reference_pattern()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            resolver
                .get(&caps[1], &caps[2])
                .unwrap_or(NO_VALUE)
                .to_string()
        })
        .into_owned()
}

/// The `template` provider kind.
#[derive(Debug, Default)]
pub struct TemplateProvider;

impl TemplateProvider {
    /// Create the provider.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Provider for TemplateProvider {
    fn name(&self) -> &'static str {
        "template"
    }

    async fn fetch(
        &self,
        ctx: &SecretContext,
        _map_id: &str,
        config: &serde_json::Map<String, serde_json::Value>,
        keys: &KeyMap,
    ) -> Result<Vec<KeyValue>, ProviderError> {
        let templates = match config.get("templates") {
            Some(serde_json::Value::Object(map)) => map,
            Some(other) => {
                return Err(ProviderError::InvalidConfig(format!(
                    "templates must be a mapping, got {other}"
                )));
            }
            None => return Err(ProviderError::MissingConfig("templates")),
        };

        let mut pairs = Vec::with_capacity(templates.len());
        for (target, text) in templates {
            let serde_json::Value::String(text) = text else {
                return Err(ProviderError::InvalidConfig(format!(
                    "template {target} must be a string"
                )));
            };
            pairs.push(KeyValue::new(target.clone(), render(text, ctx.resolver())));
        }

        Ok(apply_keys(pairs, keys))
    }
}
