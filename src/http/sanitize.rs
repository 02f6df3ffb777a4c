//! Legacy input hardening for parsed JSON bodies
//!
//! Strips `<` and `>` from strings and truncates oversized strings and
//! object keys. Kept as a configurable stage for compatibility with the
//! original gateway; structured validation belongs to handlers.

use serde_json::Value;

const MAX_STRING_CHARS: usize = 10_000;
const MAX_KEY_CHARS: usize = 100;

/// Rewrites `value` in place according to the hardening rules.
pub(crate) fn sanitize_value(value: &mut Value) {
    match value {
        Value::String(s) => *s = sanitize_str(s, MAX_STRING_CHARS),
        Value::Array(items) => {
            for item in items {
                sanitize_value(item);
            }
        }
        Value::Object(map) => {
            let entries = std::mem::take(map);
            for (key, mut item) in entries {
                sanitize_value(&mut item);
                map.insert(sanitize_str(&key, MAX_KEY_CHARS), item);
            }
        }
        _ => (),
    }
}

fn sanitize_str(input: &str, max_chars: usize) -> String {
    input
        .chars()
        .filter(|c| *c != '<' && *c != '>')
        .take(max_chars)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn it_strips_angle_brackets() {
        let mut value = json!({ "name": "<script>alert(1)</script>" });

        sanitize_value(&mut value);

        assert_eq!(value["name"], "scriptalert(1)/script");
    }

    #[test]
    fn it_truncates_long_strings() {
        let mut value = Value::String("a".repeat(MAX_STRING_CHARS + 5));

        sanitize_value(&mut value);

        assert_eq!(value.as_str().unwrap().chars().count(), MAX_STRING_CHARS);
    }

    #[test]
    fn it_truncates_long_keys() {
        let key = "k".repeat(MAX_KEY_CHARS + 10);
        let mut value = json!({ key: 1 });

        sanitize_value(&mut value);

        let map = value.as_object().unwrap();
        let stored = map.keys().next().unwrap();
        assert_eq!(stored.chars().count(), MAX_KEY_CHARS);
        assert_eq!(map[stored], 1);
    }

    #[test]
    fn it_recurses_into_arrays_and_objects() {
        let mut value = json!({ "items": [{ "note": "a<b>c" }], "count": 2 });

        sanitize_value(&mut value);

        assert_eq!(value["items"][0]["note"], "abc");
        assert_eq!(value["count"], 2);
    }

    #[test]
    fn it_leaves_numbers_and_bools_alone() {
        let mut value = json!({ "n": 42, "b": true, "nil": null });
        let expected = value.clone();

        sanitize_value(&mut value);

        assert_eq!(value, expected);
    }
}
