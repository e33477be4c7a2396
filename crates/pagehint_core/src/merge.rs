//! Recursive merge used to compose `extends` chains.
//!
//! Objects are merged key by key, recursively. Everything else, arrays
//! included, is replaced wholesale by the overriding value.

use serde_json::Value;

/// Merges `overlay` into `base`. `overlay` wins on conflicts.
pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Merges every value left to right into an empty object.
pub fn merge_all<I>(values: I) -> Value
where
    I: IntoIterator<Item = Value>,
{
    let mut result = Value::Object(serde_json::Map::new());
    for value in values {
        merge(&mut result, value);
    }
    result
}
