//! Environment expansion over provider configs.
//!
//! Two substitution passes run over every string, recursively through maps
//! and lists:
//!
//! 1. `{{ get_env(name="X", default="D") }}`: the value of `X`, or the
//!    default, or empty when neither exists;
//! 2. `${VAR}` / `$VAR`: the value of `VAR`; references to unset
//!    variables are left untouched so that literal dollar text (passwords,
//!    cron specs) survives expansion.
//!
//! Expansion always yields a fresh value; the descriptor is never mutated.

use std::sync::OnceLock;

use regex::{Captures, Regex};

fn get_env_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r#"\{\{\s*get_env\(\s*name\s*=\s*"([^"]+)"(?:\s*,\s*default\s*=\s*"([^"]*)")?\s*\)\s*\}\}"#,
        )
        .expect("hard-coded pattern compiles")
    })
}

fn var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
            .expect("hard-coded pattern compiles")
    })
}

/// Expand one string.
pub fn expand_str(text: &str) -> String {
    let after_get_env = get_env_pattern().replace_all(text, |caps: &Captures<'_>| {
        match std::env::var(&caps[1]) {
            Ok(value) => value,
            Err(_) => caps.get(2).map(|d| d.as_str().to_string()).unwrap_or_default(),
        }
    });

    var_pattern()
        .replace_all(&after_get_env, |caps: &Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            match std::env::var(name) {
                Ok(value) => value,
                // Unset: keep the reference text verbatim.
                Err(_) => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Expand a JSON value recursively. Non-string scalars pass through.
pub fn expand_value(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => serde_json::Value::String(expand_str(s)),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(expand_value).collect())
        }
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), expand_value(v)))
                .collect(),
        ),
        scalar => scalar.clone(),
    }
}

/// Expand a whole config map into a fresh map.
pub fn expand_config(
    config: &serde_json::Map<String, serde_json::Value>,
) -> serde_json::Map<String, serde_json::Value> {
    config
        .iter()
        .map(|(k, v)| (k.clone(), expand_value(v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var tests share process environment; use distinct names per test.

    #[test]
    fn get_env_with_value() {
        unsafe { std::env::set_var("SSTART_TEST_EXPAND_A", "from-env") };
        assert_eq!(
            expand_str(r#"{{ get_env(name="SSTART_TEST_EXPAND_A", default="fallback") }}"#),
            "from-env"
        );
    }

    #[test]
    fn get_env_with_default() {
        assert_eq!(
            expand_str(r#"{{ get_env(name="SSTART_TEST_EXPAND_UNSET", default="fallback") }}"#),
            "fallback"
        );
    }

    #[test]
    fn get_env_without_default_is_empty() {
        assert_eq!(
            expand_str(r#"pre-{{ get_env(name="SSTART_TEST_EXPAND_UNSET2") }}-post"#),
            "pre--post"
        );
    }

    #[test]
    fn dollar_brace_and_bare_forms() {
        unsafe { std::env::set_var("SSTART_TEST_EXPAND_B", "v") };
        assert_eq!(expand_str("${SSTART_TEST_EXPAND_B}"), "v");
        assert_eq!(expand_str("x-$SSTART_TEST_EXPAND_B-y"), "x-v-y");
    }

    #[test]
    fn unset_dollar_reference_is_kept() {
        assert_eq!(
            expand_str("${SSTART_TEST_EXPAND_UNSET3}"),
            "${SSTART_TEST_EXPAND_UNSET3}"
        );
    }

    #[test]
    fn expansion_recurses_and_preserves_scalars() {
        unsafe { std::env::set_var("SSTART_TEST_EXPAND_C", "deep") };
        let config: serde_json::Map<String, serde_json::Value> = serde_json::from_value(
            serde_json::json!({
                "nested": { "value": "${SSTART_TEST_EXPAND_C}" },
                "list": ["${SSTART_TEST_EXPAND_C}", 42],
                "count": 7,
                "flag": true
            }),
        )
        .expect("test config");

        let expanded = expand_config(&config);
        assert_eq!(expanded["nested"]["value"], "deep");
        assert_eq!(expanded["list"][0], "deep");
        assert_eq!(expanded["list"][1], 42);
        assert_eq!(expanded["count"], 7);
        assert_eq!(expanded["flag"], true);
        // Source untouched.
        assert_eq!(config["nested"]["value"], "${SSTART_TEST_EXPAND_C}");
    }
}
