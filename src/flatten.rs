//! Projects an arbitrarily nested JSON object into a single-level record
//! keyed by dotted paths, so `{"nested": {"data": 1}}` becomes a single
//! entry `nested.data -> 1`. The record preserves the order in which keys
//! were encountered during a depth-first walk, which (with serde_json's
//! `preserve_order` feature) is the order they appeared on the wire.

use serde_json::{Map, Value};

/// Separator joined between the path segments of nested keys.
pub const PATH_SEPARATOR: &str = ".";

/// Flattens a decoded JSON object into an ordered list of
/// `(dotted path, value)` pairs.
///
/// Each value lands in exactly one of three branches:
///
/// - a nested object is recursed into, contributing its own entries under
///   `parent.key` and no entry for the object key itself,
/// - a list is kept whole as one entry whose value is the list's compact
///   JSON text (it is never split into per-index columns),
/// - any scalar (null, bool, number, string) is kept unchanged.
///
/// The match is exhaustive and the branches cannot overlap, so no key can
/// ever be emitted twice. A sender can still collide two paths onto one
/// (a literal `"a.b"` key alongside `{"a": {"b": ..}}`); the record keeps
/// one entry for the path, at its first position, holding the last value
/// walked. Pure function: no side effects, and equal inputs always
/// produce equal outputs.
pub fn flatten(msg: &Map<String, Value>) -> Vec<(String, Value)> {
    let mut items = Vec::new();
    flatten_into(msg, "", &mut items);
    items
}

fn flatten_into(msg: &Map<String, Value>, parent_key: &str, items: &mut Vec<(String, Value)>) {
    for (key, value) in msg {
        let new_key = if parent_key.is_empty() {
            key.clone()
        } else {
            format!("{parent_key}{PATH_SEPARATOR}{key}")
        };

        match value {
            Value::Object(nested) => flatten_into(nested, &new_key, items),
            list @ Value::Array(_) => {
                insert_or_replace(items, new_key, Value::String(list.to_string()))
            }
            scalar => insert_or_replace(items, new_key, scalar.clone()),
        }
    }
}

// Colliding paths would otherwise become duplicate CSV columns; keep the
// first key's position and the last value, as a dict insert would.
fn insert_or_replace(items: &mut Vec<(String, Value)>, key: String, value: Value) {
    match items.iter_mut().find(|(existing, _)| *existing == key) {
        Some((_, slot)) => *slot = value,
        None => items.push((key, value)),
    }
}
