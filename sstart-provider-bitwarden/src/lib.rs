#![deny(missing_docs)]
//! Bitwarden providers, backed by the official CLIs.
//!
//! Two kinds live here:
//!
//! - `bitwarden` ([`BitwardenProvider`]): reads a vault item via `bw get
//!   item`. Config: `item_id` (required), `format` ∈ `fields` | `note` |
//!   `both` (default `fields`). `fields` reads the item's custom fields;
//!   `note` parses the item notes as JSON; `both` unions them with fields
//!   taking precedence.
//! - `bitwarden_sm` ([`BitwardenSmProvider`]): lists machine secrets via
//!   `bws secret list`. Config: `organization_id` and `project_id`
//!   (required), `server_url`. Authentication rides on `BWS_ACCESS_TOKEN`
//!   in the environment, as the CLI expects.

use async_trait::async_trait;
use serde::Deserialize;
use sstart_provider::cli::capture_stdout;
use sstart_provider::config::{optional_str, require_str};
use sstart_provider::{Provider, ProviderError, SecretContext, apply_keys};
use sstart_types::{KeyMap, KeyValue};

/// `bw get item` output, reduced to what we read.
#[derive(Debug, Deserialize)]
struct BwItem {
    #[serde(default)]
    fields: Vec<BwField>,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BwField {
    name: String,
    #[serde(default)]
    value: Option<String>,
}

/// Which parts of the item feed the contribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemFormat {
    Fields,
    Note,
    Both,
}

impl ItemFormat {
    fn parse(text: Option<&str>) -> Result<Self, ProviderError> {
        match text {
            None | Some("fields") => Ok(Self::Fields),
            Some("note") => Ok(Self::Note),
            Some("both") => Ok(Self::Both),
            Some(other) => Err(ProviderError::InvalidConfig(format!(
                "format must be fields, note, or both, got {other}"
            ))),
        }
    }
}

/// Turn an item into pairs per the format rules.
fn item_pairs(item: &BwItem, format: ItemFormat) -> Result<Vec<KeyValue>, ProviderError> {
    let field_pairs = || -> Vec<KeyValue> {
        item.fields
            .iter()
            .filter_map(|f| {
                f.value
                    .as_deref()
                    .map(|v| KeyValue::new(f.name.clone(), v))
            })
            .collect()
    };

    let note_pairs = || -> Result<Vec<KeyValue>, ProviderError> {
        let Some(notes) = item.notes.as_deref().filter(|n| !n.trim().is_empty()) else {
            return Ok(Vec::new());
        };
        let parsed: serde_json::Value = serde_json::from_str(notes).map_err(|e| {
            ProviderError::Backend(format!("item notes are not valid JSON: {e}"))
        })?;
        let serde_json::Value::Object(map) = parsed else {
            return Err(ProviderError::Backend(
                "item notes must be a JSON object".into(),
            ));
        };
        Ok(map
            .into_iter()
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => KeyValue::new(k, s),
                other => KeyValue::new(k, other.to_string()),
            })
            .collect())
    };

    match format {
        ItemFormat::Fields => Ok(field_pairs()),
        ItemFormat::Note => note_pairs(),
        ItemFormat::Both => {
            // Fields win over note keys of the same name.
            let fields = field_pairs();
            let mut pairs = note_pairs()?;
            pairs.retain(|kv| !fields.iter().any(|f| f.key == kv.key));
            pairs.extend(fields);
            Ok(pairs)
        }
    }
}

/// Provider for Bitwarden vault items.
#[derive(Debug, Default)]
pub struct BitwardenProvider;

impl BitwardenProvider {
    /// Create the provider.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Provider for BitwardenProvider {
    fn name(&self) -> &'static str {
        "bitwarden"
    }

    async fn fetch(
        &self,
        _ctx: &SecretContext,
        _map_id: &str,
        config: &serde_json::Map<String, serde_json::Value>,
        keys: &KeyMap,
    ) -> Result<Vec<KeyValue>, ProviderError> {
        let item_id = require_str(config, "item_id")?;
        let format = ItemFormat::parse(optional_str(config, "format")?)?;

        let mut command = tokio::process::Command::new("bw");
        command.args(["get", "item", item_id]);
        let output = capture_stdout(&mut command).await?;
        let item: BwItem = serde_json::from_str(&output)
            .map_err(|e| ProviderError::Backend(format!("cannot parse bw output: {e}")))?;

        Ok(apply_keys(item_pairs(&item, format)?, keys))
    }
}

/// One entry of `bws secret list --output json`.
#[derive(Debug, Deserialize)]
struct BwsSecret {
    key: String,
    value: String,
}

/// Provider for Bitwarden Secrets Manager projects.
#[derive(Debug, Default)]
pub struct BitwardenSmProvider;

impl BitwardenSmProvider {
    /// Create the provider.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Provider for BitwardenSmProvider {
    fn name(&self) -> &'static str {
        "bitwarden_sm"
    }

    async fn fetch(
        &self,
        _ctx: &SecretContext,
        _map_id: &str,
        config: &serde_json::Map<String, serde_json::Value>,
        keys: &KeyMap,
    ) -> Result<Vec<KeyValue>, ProviderError> {
        // organization_id scopes the access token; the CLI itself only
        // needs the project to list.
        let _organization_id = require_str(config, "organization_id")?;
        let project_id = require_str(config, "project_id")?;

        let mut command = tokio::process::Command::new("bws");
        command.args(["secret", "list", project_id, "--output", "json"]);
        if let Some(server_url) = optional_str(config, "server_url")? {
            command.args(["--server-url", server_url]);
        }
        let output = capture_stdout(&mut command).await?;
        let secrets: Vec<BwsSecret> = serde_json::from_str(&output)
            .map_err(|e| ProviderError::Backend(format!("cannot parse bws output: {e}")))?;

        let pairs = secrets
            .into_iter()
            .map(|s| KeyValue::new(s.key, s.value))
            .collect();
        Ok(apply_keys(pairs, keys))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(fields: &[(&str, Option<&str>)], notes: Option<&str>) -> BwItem {
        BwItem {
            fields: fields
                .iter()
                .map(|(name, value)| BwField {
                    name: name.to_string(),
                    value: value.map(Into::into),
                })
                .collect(),
            notes: notes.map(Into::into),
        }
    }

    #[test]
    fn fields_format_reads_custom_fields() {
        let item = item(&[("USER", Some("u")), ("EMPTY", None)], None);
        let pairs = item_pairs(&item, ItemFormat::Fields).unwrap();
        assert_eq!(pairs, vec![KeyValue::new("USER", "u")]);
    }

    #[test]
    fn note_format_parses_notes_as_json() {
        let item = item(&[], Some(r#"{"USER":"u","PORT":5432}"#));
        let pairs = item_pairs(&item, ItemFormat::Note).unwrap();
        assert!(pairs.contains(&KeyValue::new("USER", "u")));
        assert!(pairs.contains(&KeyValue::new("PORT", "5432")));
    }

    #[test]
    fn note_format_rejects_non_json_notes() {
        let item = item(&[], Some("just some text"));
        assert!(matches!(
            item_pairs(&item, ItemFormat::Note),
            Err(ProviderError::Backend(_))
        ));
    }

    #[test]
    fn both_format_fields_take_precedence() {
        let item = item(
            &[("USER", Some("from-field"))],
            Some(r#"{"USER":"from-note","HOST":"h"}"#),
        );
        let pairs = item_pairs(&item, ItemFormat::Both).unwrap();
        assert!(pairs.contains(&KeyValue::new("USER", "from-field")));
        assert!(pairs.contains(&KeyValue::new("HOST", "h")));
        assert_eq!(pairs.len(), 2);
    }

    #[test]
    fn format_parsing() {
        assert_eq!(ItemFormat::parse(None).unwrap(), ItemFormat::Fields);
        assert_eq!(ItemFormat::parse(Some("note")).unwrap(), ItemFormat::Note);
        assert_eq!(ItemFormat::parse(Some("both")).unwrap(), ItemFormat::Both);
        assert!(ItemFormat::parse(Some("xml")).is_err());
    }

    #[test]
    fn bws_secret_list_deserializes() {
        let json = r#"[
            {"id":"9f2","key":"DB_URL","value":"postgres://","note":""},
            {"id":"a01","key":"API_KEY","value":"k"}
        ]"#;
        let secrets: Vec<BwsSecret> = serde_json::from_str(json).unwrap();
        assert_eq!(secrets.len(), 2);
        assert_eq!(secrets[0].key, "DB_URL");
    }
}
