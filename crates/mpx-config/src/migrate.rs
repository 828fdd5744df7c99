// SPDX-License-Identifier: MIT OR Apache-2.0
//! Forward-only config migrations.
//!
//! Each step is a pure `v_n -> v_{n+1}` transform over raw JSON so that
//! fields this build does not model are carried along untouched. Migrations
//! add and reshape; they never delete user data.

use crate::ConfigError;
use serde_json::{Value, json};

/// Newest config shape this build reads and writes.
pub const CURRENT_CONFIG_VERSION: u32 = 3;

/// Migrate a raw config value to [`CURRENT_CONFIG_VERSION`].
///
/// Returns the migrated value and the version it started at.
///
/// # Errors
///
/// Fails when the value is not an object or claims a version newer than this
/// build supports.
pub fn migrate_to_current(mut value: Value) -> Result<(Value, u32), ConfigError> {
    let obj = value.as_object().ok_or_else(|| ConfigError::Invalid {
        reasons: vec!["config root must be an object".into()],
    })?;
    let start = obj
        .get("config_version")
        .and_then(Value::as_u64)
        .unwrap_or(0) as u32;

    if start > CURRENT_CONFIG_VERSION {
        return Err(ConfigError::VersionTooNew {
            found: start,
            supported: CURRENT_CONFIG_VERSION,
        });
    }

    let mut version = start;
    while version < CURRENT_CONFIG_VERSION {
        match version {
            0 => migrate_0_to_1(&mut value),
            1 => migrate_1_to_2(&mut value),
            2 => migrate_2_to_3(&mut value),
            _ => unreachable!("version bounded by CURRENT_CONFIG_VERSION"),
        }
        version += 1;
        if let Some(obj) = value.as_object_mut() {
            obj.insert("config_version".into(), json!(version));
        }
    }
    Ok((value, start))
}

/// v0 → v1: the single `custom_prefix` string becomes `link_prefix_config`
/// with a list and a selected index.
fn migrate_0_to_1(value: &mut Value) {
    let Some(obj) = value.as_object_mut() else {
        return;
    };
    if obj.contains_key("link_prefix_config") {
        return;
    }
    let prefix = obj
        .remove("custom_prefix")
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_default();
    let enabled = !prefix.is_empty();
    let prefix_list: Vec<String> = if prefix.is_empty() { vec![] } else { vec![prefix] };
    obj.insert(
        "link_prefix_config".into(),
        json!({
            "enabled": enabled,
            "prefix_list": prefix_list,
            "selected_index": 0,
        }),
    );
}

/// v1 → v2: newly supported backends join `available_backends` so the UI can
/// offer them; existing entries and order of user data are untouched.
fn migrate_1_to_2(value: &mut Value) {
    const ADDED_IN_V2: &[&str] = &["smms", "imgur", "tencent", "aliyun", "qiniu", "upyun"];
    let Some(obj) = value.as_object_mut() else {
        return;
    };
    let available = obj
        .entry("available_backends")
        .or_insert_with(|| json!([]));
    if let Some(arr) = available.as_array_mut() {
        for id in ADDED_IN_V2 {
            if !arr.iter().any(|v| v.as_str() == Some(id)) {
                arr.push(json!(id));
            }
        }
    }
}

/// v2 → v3: the GitHub backend entry gains a `cdn_config` substructure.
fn migrate_2_to_3(value: &mut Value) {
    let Some(github) = value
        .get_mut("backends")
        .and_then(|b| b.get_mut("github"))
        .and_then(Value::as_object_mut)
    else {
        return;
    };
    if !github.contains_key("cdn_config") {
        github.insert(
            "cdn_config".into(),
            serde_json::to_value(crate::CdnConfig::default())
                .unwrap_or_else(|_| json!({"enabled": false, "templates": [], "selected_index": 0})),
        );
    }
}
