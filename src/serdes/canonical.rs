//! Canonical JSON rendering.
//!
//! Object keys are sorted lexicographically (UTF-8 byte order) at every
//! depth and the output uses compact separators, so the same value always
//! renders to the same bytes. This is what makes payload hashing and
//! snapshot tests stable.

use serde_json::{Map, Value};

/// Return a copy of `value` with every object's keys in sorted order.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.as_bytes().cmp(b.as_bytes()));
            let mut sorted = Map::with_capacity(entries.len());
            for (key, item) in entries {
                sorted.insert(key.clone(), canonicalize(item));
            }
            Value::Object(sorted)
        },
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Render `value` as canonical JSON text.
pub fn to_canonical_string(value: &Value) -> String {
    canonicalize(value).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_nested_keys() {
        let value = json!({"b": 1, "a": {"z": true, "__class__": "X"}, "c": [{"y": 1, "x": 2}]});
        assert_eq!(
            to_canonical_string(&value),
            r#"{"a":{"__class__":"X","z":true},"b":1,"c":[{"x":2,"y":1}]}"#
        );
    }

    #[test]
    fn rendering_is_stable_across_insertion_order() {
        let first = json!({"one": 1, "two": 2});
        let mut map = Map::new();
        map.insert("two".to_string(), json!(2));
        map.insert("one".to_string(), json!(1));
        assert_eq!(
            to_canonical_string(&first),
            to_canonical_string(&Value::Object(map))
        );
    }
}
