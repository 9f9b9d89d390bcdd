//! Config file loading.
//!
//! Search order: `--config` path, `./sstart.yaml`, then
//! `$XDG_CONFIG_HOME/sstart/sstart.yaml`. The file is YAML; the parsed
//! [`Config`] is validated before anything runs.

use std::path::{Path, PathBuf};

use sstart_types::{Config, ConfigError};

/// Default config file name.
pub const CONFIG_FILE: &str = "sstart.yaml";

/// Candidate paths in search order.
fn candidates() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(CONFIG_FILE)];
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("sstart").join(CONFIG_FILE));
    }
    paths
}

/// Load and validate the config, from `path` or the search locations.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => candidates()
            .into_iter()
            .find(|p| p.exists())
            .ok_or_else(|| ConfigError::Read {
                path: CONFIG_FILE.into(),
                message: "no config file found; create sstart.yaml or pass --config".into(),
            })?,
    };

    let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    parse_config(&text)
}

/// Parse and validate a YAML config document.
pub fn parse_config(text: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_document() {
        let yaml = r#"
inherit: true
cache:
  enabled: true
  ttl: 300
providers:
  - kind: dotenv
    id: local
    config:
      path: .env
  - kind: template
    uses: [local]
    templates:
      URI: "{{.local.HOST}}"
mcp:
  servers:
    - id: fs
      command: mcp-filesystem
      args: ["--root", "/tmp"]
      providers: [local]
"#;
        let config = parse_config(yaml).unwrap();
        assert_eq!(config.cache.ttl_secs, 300);
        assert_eq!(config.providers.len(), 2);
        let mcp = config.mcp.unwrap();
        assert_eq!(mcp.servers[0].id, "fs");
        assert_eq!(mcp.servers[0].providers, vec!["local"]);
    }

    #[test]
    fn parse_rejects_duplicate_ids() {
        let yaml = r#"
providers:
  - kind: dotenv
  - kind: dotenv
"#;
        assert!(matches!(
            parse_config(yaml),
            Err(ConfigError::DuplicateProviderId(_))
        ));
    }

    #[test]
    fn parse_rejects_invalid_yaml() {
        assert!(matches!(
            parse_config(": not yaml"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn load_missing_explicit_path_is_a_read_error() {
        let err = load_config(Some(Path::new("/no/such/sstart.yaml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn load_from_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sstart.yaml");
        std::fs::write(&path, "providers: []\n").unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert!(config.providers.is_empty());
    }
}
