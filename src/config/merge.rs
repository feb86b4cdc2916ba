//! Deep merge of JSON configuration trees.

use serde_json::Value;

/// Merge `overlay` into `base`, later layer wins.
///
/// Objects merge key by key, recursively. Every other value (arrays included)
/// replaces the base value wholesale. A `null` value inside the overlay clears
/// the field, which is how a higher layer unsets an optional setting. A `null`
/// overlay as a whole is an absent layer and leaves `base` untouched.
pub fn deep_merge(base: &mut Value, overlay: &Value) {
    if overlay.is_null() {
        return;
    }
    merge_value(base, overlay);
}

fn merge_value(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_value) => merge_value(base_value, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base, overlay) => {
            *base = overlay.clone();
        }
    }
}

/// Merge an ordered list of layers, lowest priority first.
pub fn merge_layers<'a, I>(layers: I) -> Value
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut merged = Value::Object(serde_json::Map::new());
    for layer in layers {
        deep_merge(&mut merged, layer);
    }
    merged
}
