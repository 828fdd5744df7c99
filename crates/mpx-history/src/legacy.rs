// SPDX-License-Identifier: MIT OR Apache-2.0
//! One-shot import of the pre-SQL shard format.
//!
//! Early releases kept history as `.history/index.dat` plus quarter shards
//! (`<YYYY>-Q<1..4>.dat`), each a JSON array of records. On first open the
//! shards are drained into SQLite and the directory is renamed so the import
//! never runs twice.

use crate::{HistoryError, store::HistoryStore};
use mpx_core::HistoryRecord;
use serde_json::Value;
use std::path::Path;
use tracing::warn;

/// Directory name of the legacy format, relative to the database directory.
pub const LEGACY_DIR_NAME: &str = ".history";

/// Suffix given to the legacy directory after a successful import.
const MIGRATED_SUFFIX: &str = ".migrated";

/// Import legacy shards from `data_dir`, returning how many records landed.
///
/// Missing legacy data is not an error. Records that fail to parse are
/// skipped with a warning rather than aborting the import; rows that
/// collide with existing ids are replaced (the shard is the older source).
pub fn import_legacy_shards(
    store: &HistoryStore,
    data_dir: &Path,
) -> Result<usize, HistoryError> {
    let legacy_dir = data_dir.join(LEGACY_DIR_NAME);
    let index_path = legacy_dir.join("index.dat");
    if !index_path.exists() {
        return Ok(0);
    }

    let index_raw = std::fs::read_to_string(&index_path).map_err(|e| HistoryError::Io {
        op: "read",
        path: index_path.clone(),
        source: e,
    })?;
    let shard_names = parse_index(&index_raw);

    let mut imported = 0;
    for name in shard_names {
        let shard_path = legacy_dir.join(&name);
        let raw = match std::fs::read_to_string(&shard_path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(shard = %shard_path.display(), %e, "skipping unreadable legacy shard");
                continue;
            }
        };
        let records: Vec<Value> = match serde_json::from_str(&raw) {
            Ok(records) => records,
            Err(e) => {
                warn!(shard = %shard_path.display(), %e, "skipping unparseable legacy shard");
                continue;
            }
        };
        for value in records {
            match serde_json::from_value::<HistoryRecord>(value) {
                Ok(record) => {
                    if let Err(e) = store.insert(&record) {
                        warn!(id = %record.id, %e, "skipping invalid legacy record");
                    } else {
                        imported += 1;
                    }
                }
                Err(e) => warn!(%e, "skipping malformed legacy record"),
            }
        }
    }

    let migrated = data_dir.join(format!("{LEGACY_DIR_NAME}{MIGRATED_SUFFIX}"));
    std::fs::rename(&legacy_dir, &migrated).map_err(|e| HistoryError::Io {
        op: "rename",
        path: legacy_dir,
        source: e,
    })?;
    Ok(imported)
}

/// The index is either `{"shards": [...]}` or a bare array of names.
fn parse_index(raw: &str) -> Vec<String> {
    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };
    let list = value
        .get("shards")
        .and_then(Value::as_array)
        .cloned()
        .or_else(|| value.as_array().cloned())
        .unwrap_or_default();
    list.into_iter()
        .filter_map(|v| v.as_str().map(String::from))
        .collect()
}
