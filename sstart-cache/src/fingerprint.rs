//! Deterministic provider fingerprints.

use sha2::{Digest, Sha256};
use sstart_types::{SSO_ACCESS_TOKEN_KEY, SSO_ID_TOKEN_KEY};

/// Render a JSON value with object keys sorted at every depth.
///
/// serde_json's map type already sorts keys unless the `preserve_order`
/// feature sneaks in transitively; sorting here keeps the canonical form
/// independent of feature unification.
fn canonical_json(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::Value::String((*key).clone()).to_string());
                out.push(':');
                canonical_json(&map[*key], out);
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                canonical_json(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Compute the cache fingerprint for a provider descriptor.
///
/// SHA-256 over the canonical JSON of `{config, kind, provider_id}` with
/// the injected SSO token keys removed first, hex-encoded. Removing the
/// token keys keeps rotated tokens from invalidating cached secrets;
/// sorting keeps the key insensitive to config insertion order.
pub fn generate_key(
    provider_id: &str,
    kind: &str,
    config: &serde_json::Map<String, serde_json::Value>,
) -> String {
    let mut stripped = serde_json::Map::new();
    for (key, value) in config {
        if key == SSO_ACCESS_TOKEN_KEY || key == SSO_ID_TOKEN_KEY {
            continue;
        }
        stripped.insert(key.clone(), value.clone());
    }

    let identity = serde_json::json!({
        "provider_id": provider_id,
        "kind": kind,
        "config": stripped,
    });

    let mut canonical = String::new();
    canonical_json(&identity, &mut canonical);

    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)
}
