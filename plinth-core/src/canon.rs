//! Canonical JSON encoding.
//!
//! Deterministic serialization with object keys emitted in sorted order at
//! every depth. This is the stable-ordering primitive under safe cache keys,
//! query cache keys and the authenticated tree encoding: two logically
//! identical values always encode to the same bytes, regardless of the
//! insertion order their maps were built with.

use serde_json::Value;

/// Encode a JSON value deterministically.
///
/// Scalars and arrays follow serde_json's own formatting (compact, no
/// whitespace); objects are rewritten with keys in ascending byte order,
/// recursively. The output is valid JSON and parses back to an equal value.
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
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Display on Value::String yields the escaped JSON form.
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
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
