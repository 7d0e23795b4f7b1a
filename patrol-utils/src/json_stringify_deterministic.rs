use serde::Serialize;
use serde_json::Value;

/// Compact JSON with object keys sorted at every level.
///
/// Signatures and evidence digests are computed over this form so that two
/// validators serializing the same value always hash the same bytes,
/// regardless of field declaration order or map implementation.
pub fn stringify_deterministic(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

pub fn to_deterministic_string<T: Serialize>(value: &T) -> serde_json::Result<String> {
    Ok(stringify_deterministic(&serde_json::to_value(value)?))
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_value(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}
