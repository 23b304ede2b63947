use serde_json::Value;

/// Deep-merge `overlay` onto `base`: objects merge key-by-key, anything
/// else (including arrays and scalars) replaces the base value outright.
/// Only keys actually present in `overlay` are touched, so a source that
/// sets nothing for a field never clobbers a lower-precedence value.
pub fn merge_values(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_value) => merge_values(base_value, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_objects_merge_key_by_key() {
        let mut base = json!({"ollama": {"url": "a", "model": "m1"}});
        let overlay = json!({"ollama": {"model": "m2"}});
        merge_values(&mut base, &overlay);
        assert_eq!(base, json!({"ollama": {"url": "a", "model": "m2"}}));
    }

    #[test]
    fn overlay_scalar_replaces_base_scalar() {
        let mut base = json!({"preset": "default"});
        let overlay = json!({"preset": "strict"});
        merge_values(&mut base, &overlay);
        assert_eq!(base["preset"], "strict");
    }

    #[test]
    fn overlay_without_a_key_leaves_base_value_untouched() {
        let mut base = json!({"log": {"level": "info", "console": true}});
        let overlay = json!({"log": {"level": "debug"}});
        merge_values(&mut base, &overlay);
        assert_eq!(base["log"]["console"], true);
        assert_eq!(base["log"]["level"], "debug");
    }
}
