//! Key derivation shared by the deduplicator and the response cache.
//!
//! Both namespaces hash the same canonical material so they can never
//! disagree about what counts as "the same request".

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Identity used when no username resolved.
pub const ANONYMOUS: &str = "anonymous";

/// Serialize `value` with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                if let Some(v) = map.get(key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Size of the canonical parameter serialization in bytes.
pub fn serialized_len(params: &Value) -> usize {
    canonical_json(params).len()
}

/// Argument flags that ask for a fresh upstream read.
pub const FRESHNESS_FLAGS: &[&str] = &["force_refresh", "no_cache", "skip_cache"];

/// True when any freshness flag is set to `true`.
pub fn requests_fresh_data(params: &Value) -> bool {
    FRESHNESS_FLAGS
        .iter()
        .any(|flag| params.get(flag).and_then(Value::as_bool).unwrap_or(false))
}

pub fn sha256_hex(bytes: impl AsRef<[u8]>) -> String {
    format!("{:x}", Sha256::digest(bytes.as_ref()))
}

/// Derive `"{namespace}:{sha256}"` over method, identity and params.
pub fn derive_key(namespace: &str, method: &str, params: &Value, identity: &str) -> String {
    let material = format!("{method}\n{identity}\n{}", canonical_json(params));
    format!("{namespace}:{}", sha256_hex(material))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let v = json!({"b": 1, "a": {"z": [ {"y": 1, "x": 2} ], "c": null}});
        assert_eq!(
            canonical_json(&v),
            r#"{"a":{"c":null,"z":[{"x":2,"y":1}]},"b":1}"#
        );
    }

    #[test]
    fn keys_differ_by_namespace_and_identity() {
        let p = json!({"query": "test"});
        let a = derive_key("dedup", "search_nodes", &p, "alice");
        assert_ne!(a, derive_key("cache", "search_nodes", &p, "alice"));
        assert_ne!(a, derive_key("dedup", "search_nodes", &p, "bob"));
        assert_eq!(a, derive_key("dedup", "search_nodes", &json!({"query": "test"}), "alice"));
        assert!(a.starts_with("dedup:"));
    }
}
