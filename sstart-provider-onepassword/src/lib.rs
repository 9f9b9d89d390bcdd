#![deny(missing_docs)]
//! 1Password provider, backed by the `op` CLI.
//!
//! Recognized config keys: `ref` (required), `use_section_prefix`.
//!
//! The `ref` grammar is `op://<vault>/<item>[/<section>[/<field>]]`:
//!
//! - vault + item: every top-level and sectioned field is emitted;
//! - with a section: only that section's fields;
//! - with section + field: exactly that field.
//!
//! With `use_section_prefix: true` sectioned fields are emitted as
//! `<section>_<field>`. Without the prefix, the same field name appearing
//! in two sections is a fetch error rather than a silent overwrite.

use async_trait::async_trait;
use serde::Deserialize;
use sstart_provider::cli::capture_stdout;
use sstart_provider::config::{optional_bool, require_str};
use sstart_provider::{Provider, ProviderError, SecretContext, apply_keys};
use sstart_types::{KeyMap, KeyValue};

/// A parsed `op://` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
struct OpRef {
    vault: String,
    item: String,
    section: Option<String>,
    field: Option<String>,
}

/// Parse the `op://vault/item[/section[/field]]` grammar.
fn parse_ref(reference: &str) -> Result<OpRef, ProviderError> {
    let rest = reference.strip_prefix("op://").ok_or_else(|| {
        ProviderError::InvalidConfig(format!("ref must start with op://, got {reference}"))
    })?;
    let segments: Vec<&str> = rest.split('/').collect();
    if segments.len() < 2 || segments.len() > 4 || segments.iter().any(|s| s.is_empty()) {
        return Err(ProviderError::InvalidConfig(format!(
            "ref must be op://vault/item[/section[/field]], got {reference}"
        )));
    }
    Ok(OpRef {
        vault: segments[0].to_string(),
        item: segments[1].to_string(),
        section: segments.get(2).map(|s| s.to_string()),
        field: segments.get(3).map(|s| s.to_string()),
    })
}

/// `op item get --format json` output, reduced to what we read.
#[derive(Debug, Deserialize)]
struct OpItem {
    #[serde(default)]
    fields: Vec<OpField>,
}

#[derive(Debug, Deserialize)]
struct OpField {
    label: String,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    section: Option<OpSection>,
}

#[derive(Debug, Deserialize)]
struct OpSection {
    #[serde(default)]
    label: Option<String>,
}

impl OpField {
    fn section_label(&self) -> Option<&str> {
        self.section.as_ref().and_then(|s| s.label.as_deref())
    }
}

/// Select and name fields per the reference and prefix setting.
fn collect_fields(
    item: &OpItem,
    reference: &OpRef,
    use_section_prefix: bool,
) -> Result<Vec<KeyValue>, ProviderError> {
    let mut pairs: Vec<KeyValue> = Vec::new();

    for field in &item.fields {
        let Some(value) = field.value.as_deref() else {
            continue;
        };
        let section = field.section_label();

        if let Some(wanted_section) = &reference.section {
            if section != Some(wanted_section.as_str()) {
                continue;
            }
            if let Some(wanted_field) = &reference.field {
                if &field.label != wanted_field {
                    continue;
                }
                return Ok(vec![KeyValue::new(field.label.clone(), value)]);
            }
        }

        let name = match (section, use_section_prefix) {
            (Some(section), true) => format!("{section}_{}", field.label),
            _ => field.label.clone(),
        };

        if pairs.iter().any(|kv| kv.key == name) {
            return Err(ProviderError::InvalidConfig(format!(
                "field name {name} appears in more than one section; set use_section_prefix"
            )));
        }
        pairs.push(KeyValue::new(name, value));
    }

    if let Some(wanted_field) = &reference.field {
        if pairs.is_empty() {
            return Err(ProviderError::NotFound(format!(
                "field {wanted_field} not found in item {}",
                reference.item
            )));
        }
    }

    Ok(pairs)
}

/// Provider for 1Password items.
#[derive(Debug, Default)]
pub struct OnePasswordProvider;

impl OnePasswordProvider {
    /// Create the provider.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Provider for OnePasswordProvider {
    fn name(&self) -> &'static str {
        "1password"
    }

    async fn fetch(
        &self,
        _ctx: &SecretContext,
        _map_id: &str,
        config: &serde_json::Map<String, serde_json::Value>,
        keys: &KeyMap,
    ) -> Result<Vec<KeyValue>, ProviderError> {
        let reference = parse_ref(require_str(config, "ref")?)?;
        let use_section_prefix = optional_bool(config, "use_section_prefix")?.unwrap_or(false);

        let mut command = tokio::process::Command::new("op");
        command.args([
            "item",
            "get",
            &reference.item,
            "--vault",
            &reference.vault,
            "--format",
            "json",
        ]);
        let output = capture_stdout(&mut command).await?;
        let item: OpItem = serde_json::from_str(&output)
            .map_err(|e| ProviderError::Backend(format!("cannot parse op output: {e}")))?;

        let pairs = collect_fields(&item, &reference, use_section_prefix)?;
        Ok(apply_keys(pairs, keys))
    }
}
