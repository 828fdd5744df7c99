// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shape guard for config imported from untrusted sources.

use serde_json::Value;

/// Decide whether an untrusted JSON value is plausibly a user config.
///
/// Rejects the shapes we have actually seen people paste in by accident:
/// history records, and arrays re-keyed as `{"0": …, "1": …}` objects.
/// Accepts both the current field names and the legacy
/// `enabled_services` / `services` pair from pre-rewrite exports.
pub fn is_valid_user_config(value: &Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };

    // A history record is not a config.
    if obj.contains_key("results")
        && (obj.contains_key("generated_link") || obj.contains_key("primary_backend"))
    {
        return false;
    }

    // Numerically-keyed objects are serialised arrays, not configs.
    if !obj.is_empty() && obj.keys().all(|k| k.chars().all(|c| c.is_ascii_digit())) {
        return false;
    }

    let enabled = obj
        .get("enabled_backends")
        .or_else(|| obj.get("enabled_services"));
    let backends = obj.get("backends").or_else(|| obj.get("services"));

    match (enabled, backends) {
        (Some(e), Some(b)) => e.is_array() && b.is_object(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn current_shape_is_accepted() {
        let v = json!({"enabled_backends": [], "backends": {}});
        assert!(is_valid_user_config(&v));
    }

    #[test]
    fn legacy_shape_is_accepted() {
        let v = json!({"enabled_services": ["weibo"], "services": {"weibo": {}}});
        assert!(is_valid_user_config(&v));
    }

    #[test]
    fn history_record_is_rejected() {
        let v = json!({
            "id": "x",
            "results": [{"backend_id": "weibo", "status": "success"}],
            "generated_link": "https://…",
            "enabled_backends": [],
            "backends": {},
        });
        assert!(!is_valid_user_config(&v));
    }

    #[test]
    fn numerically_keyed_object_is_rejected() {
        let v = json!({"0": {"a": 1}, "1": {"b": 2}});
        assert!(!is_valid_user_config(&v));
    }

    #[test]
    fn wrong_field_types_are_rejected() {
        assert!(!is_valid_user_config(&json!({
            "enabled_backends": {},
            "backends": {},
        })));
        assert!(!is_valid_user_config(&json!({
            "enabled_backends": [],
            "backends": [],
        })));
    }

    #[test]
    fn non_objects_are_rejected() {
        assert!(!is_valid_user_config(&json!([1, 2, 3])));
        assert!(!is_valid_user_config(&json!("config")));
        assert!(!is_valid_user_config(&json!(null)));
    }

    #[test]
    fn real_default_config_is_accepted() {
        let v = serde_json::to_value(crate::UserConfig::default()).unwrap();
        assert!(is_valid_user_config(&v));
    }
}
