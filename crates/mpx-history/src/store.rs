// SPDX-License-Identifier: MIT OR Apache-2.0
//! The SQLite-backed store.

use crate::{HistoryError, HistoryEvent, legacy};
use mpx_core::{BackendAttempt, BackendId, HistoryRecord, ImageMeta};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{info, warn};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS history (
    id TEXT PRIMARY KEY,
    timestamp INTEGER NOT NULL,
    local_file_name TEXT,
    file_path TEXT,
    primary_backend TEXT,
    results TEXT,
    generated_link TEXT,
    width INTEGER,
    height INTEGER,
    aspect_ratio REAL,
    file_size INTEGER,
    format TEXT,
    link_check_status TEXT
);
CREATE INDEX IF NOT EXISTS idx_history_timestamp ON history(timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_history_primary_backend ON history(primary_backend);
CREATE INDEX IF NOT EXISTS idx_history_file_path ON history(file_path);
";

const SELECT_COLUMNS: &str = "id, timestamp, local_file_name, file_path, primary_backend, \
     results, generated_link, width, height, aspect_ratio, file_size, format, link_check_status";

/// One page of history, newest first.
#[derive(Debug, Clone)]
pub struct HistoryPage {
    /// Records on this page.
    pub records: Vec<HistoryRecord>,
    /// Total records matching the filter.
    pub total: u64,
    /// 1-based page number.
    pub page: u32,
    /// Page size the query used.
    pub page_size: u32,
    /// Whether later pages exist.
    pub has_more: bool,
}

/// Per-month record counts for the timeline sidebar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodStat {
    /// Calendar year.
    pub year: i32,
    /// Calendar month, 1–12.
    pub month: u32,
    /// Records uploaded in that month.
    pub count: u64,
}

/// Partial update of a record.
///
/// `results` patches replace the whole blob and are serialised against every
/// other results mutation; see [`HistoryStore::patch_results`] for targeted
/// repairs.
#[derive(Debug, Clone, Default)]
pub struct RecordPatch {
    /// Replace the attempt list.
    pub results: Option<Vec<BackendAttempt>>,
    /// Replace the elected primary backend.
    pub primary_backend: Option<BackendId>,
    /// Replace the generated link.
    pub generated_link: Option<String>,
    /// Replace the source file path.
    pub file_path: Option<String>,
    /// Replace the opaque link-check data.
    pub link_check_status: Option<serde_json::Value>,
}

struct Inner {
    conn: Mutex<Connection>,
    events: broadcast::Sender<HistoryEvent>,
    results_lock: tokio::sync::Mutex<()>,
}

/// The history store. Cheap to clone; all clones share one database handle.
#[derive(Clone)]
pub struct HistoryStore {
    inner: Arc<Inner>,
}

impl HistoryStore {
    /// Open (or create) the database at `path`, migrating any legacy
    /// shard-file history found next to it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, HistoryError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| HistoryError::Io {
                    op: "create dir",
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }
        let conn = Connection::open(path)?;
        let store = Self::from_connection(conn)?;
        if let Some(parent) = path.parent() {
            let imported = legacy::import_legacy_shards(&store, parent)?;
            if imported > 0 {
                info!(imported, "migrated legacy history shards");
            }
        }
        Ok(store)
    }

    /// Open an in-memory database; for tests.
    pub fn open_in_memory() -> Result<Self, HistoryError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, HistoryError> {
        conn.execute_batch(SCHEMA)?;
        let (events, _) = broadcast::channel(64);
        Ok(Self {
            inner: Arc::new(Inner {
                conn: Mutex::new(conn),
                events,
                results_lock: tokio::sync::Mutex::new(()),
            }),
        })
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<HistoryEvent> {
        self.inner.events.subscribe()
    }

    fn emit(&self, event: HistoryEvent) {
        // Nobody listening is fine.
        let _ = self.inner.events.send(event);
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, HistoryError>,
    ) -> Result<T, HistoryError> {
        let conn = self
            .inner
            .conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&conn)
    }

    /// Insert a record, replacing any previous row with the same id.
    ///
    /// The record invariants are checked first; an all-failure record never
    /// reaches the database.
    pub fn insert(&self, record: &HistoryRecord) -> Result<(), HistoryError> {
        record.validate()?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO history (\
                     id, timestamp, local_file_name, file_path, primary_backend, results, \
                     generated_link, width, height, aspect_ratio, file_size, format, \
                     link_check_status) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    record.id,
                    record.timestamp_ms,
                    record.local_file_name,
                    record.file_path,
                    record.primary_backend.as_str(),
                    serde_json::to_string(&record.results)?,
                    record.generated_link,
                    record.image_meta.width,
                    record.image_meta.height,
                    record.image_meta.aspect_ratio,
                    record.image_meta.file_size,
                    record.image_meta.format,
                    record
                        .link_check_status
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?,
                ],
            )?;
            Ok(())
        })?;
        self.emit(HistoryEvent::Updated {
            id: record.id.clone(),
        });
        Ok(())
    }

    /// Point lookup by id.
    pub fn get_by_id(&self, id: &str) -> Result<Option<HistoryRecord>, HistoryError> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM history WHERE id = ?1"),
                params![id],
                row_to_record,
            )
            .optional()
            .map_err(Into::into)
        })
    }

    /// Point lookup by source file path (newest row wins).
    pub fn get_by_file_path(&self, path: &str) -> Result<Option<HistoryRecord>, HistoryError> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {SELECT_COLUMNS} FROM history WHERE file_path = ?1 \
                     ORDER BY timestamp DESC LIMIT 1"
                ),
                params![path],
                row_to_record,
            )
            .optional()
            .map_err(Into::into)
        })
    }

    /// Paginated listing, newest first, optionally filtered by primary
    /// backend. `page` is 1-based.
    pub fn get_page(
        &self,
        page: u32,
        page_size: u32,
        filter: Option<BackendId>,
    ) -> Result<HistoryPage, HistoryError> {
        let page = page.max(1);
        let offset = u64::from(page - 1) * u64::from(page_size);
        self.with_conn(|conn| {
            let (total, records) = match filter {
                Some(backend) => {
                    let total: u64 = conn.query_row(
                        "SELECT COUNT(*) FROM history WHERE primary_backend = ?1",
                        params![backend.as_str()],
                        |row| row.get(0),
                    )?;
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {SELECT_COLUMNS} FROM history WHERE primary_backend = ?1 \
                         ORDER BY timestamp DESC LIMIT ?2 OFFSET ?3"
                    ))?;
                    let records = collect_rows(
                        stmt.query_map(params![backend.as_str(), page_size, offset], row_to_record)?,
                    );
                    (total, records)
                }
                None => {
                    let total: u64 =
                        conn.query_row("SELECT COUNT(*) FROM history", [], |row| row.get(0))?;
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {SELECT_COLUMNS} FROM history \
                         ORDER BY timestamp DESC LIMIT ?1 OFFSET ?2"
                    ))?;
                    let records =
                        collect_rows(stmt.query_map(params![page_size, offset], row_to_record)?);
                    (total, records)
                }
            };
            Ok(HistoryPage {
                records,
                total,
                page,
                page_size,
                has_more: total > u64::from(page) * u64::from(page_size),
            })
        })
    }

    /// Case-insensitive substring search over file names and generated
    /// links, newest first.
    pub fn search(
        &self,
        query: &str,
        filter: Option<BackendId>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<HistoryRecord>, HistoryError> {
        let needle = format!(
            "%{}%",
            query.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
        );
        self.with_conn(|conn| {
            let sql = match filter {
                Some(_) => format!(
                    "SELECT {SELECT_COLUMNS} FROM history \
                     WHERE (local_file_name LIKE ?1 ESCAPE '\\' \
                            OR generated_link LIKE ?1 ESCAPE '\\') \
                       AND primary_backend = ?2 \
                     ORDER BY timestamp DESC LIMIT ?3 OFFSET ?4"
                ),
                None => format!(
                    "SELECT {SELECT_COLUMNS} FROM history \
                     WHERE local_file_name LIKE ?1 ESCAPE '\\' \
                        OR generated_link LIKE ?1 ESCAPE '\\' \
                     ORDER BY timestamp DESC LIMIT ?2 OFFSET ?3"
                ),
            };
            let mut stmt = conn.prepare(&sql)?;
            let records = match filter {
                Some(backend) => collect_rows(stmt.query_map(
                    params![needle, backend.as_str(), limit, offset],
                    row_to_record,
                )?),
                None => collect_rows(stmt.query_map(params![needle, limit, offset], row_to_record)?),
            };
            Ok(records)
        })
    }

    /// Apply a partial update.
    ///
    /// When the patch replaces `results`, the call is serialised against
    /// every other results mutation.
    pub async fn update(&self, id: &str, patch: RecordPatch) -> Result<(), HistoryError> {
        let _guard = if patch.results.is_some() {
            Some(self.inner.results_lock.lock().await)
        } else {
            None
        };
        self.update_unlocked(id, patch)
    }

    /// Load-modify-store a record's attempt list under the global results
    /// lock. `mutate` sees the current attempts and edits them in place.
    pub async fn patch_results<F>(&self, id: &str, mutate: F) -> Result<HistoryRecord, HistoryError>
    where
        F: FnOnce(&mut Vec<BackendAttempt>),
    {
        let _guard = self.inner.results_lock.lock().await;
        let mut record = self
            .get_by_id(id)?
            .ok_or_else(|| HistoryError::NotFound { id: id.to_string() })?;
        mutate(&mut record.results);
        self.update_unlocked(
            id,
            RecordPatch {
                results: Some(record.results.clone()),
                ..RecordPatch::default()
            },
        )?;
        Ok(record)
    }

    fn update_unlocked(&self, id: &str, patch: RecordPatch) -> Result<(), HistoryError> {
        let changed = self.with_conn(|conn| {
            let mut changed = 0;
            if let Some(results) = &patch.results {
                changed += conn.execute(
                    "UPDATE history SET results = ?1 WHERE id = ?2",
                    params![serde_json::to_string(results)?, id],
                )?;
            }
            if let Some(primary) = patch.primary_backend {
                changed += conn.execute(
                    "UPDATE history SET primary_backend = ?1 WHERE id = ?2",
                    params![primary.as_str(), id],
                )?;
            }
            if let Some(link) = &patch.generated_link {
                changed += conn.execute(
                    "UPDATE history SET generated_link = ?1 WHERE id = ?2",
                    params![link, id],
                )?;
            }
            if let Some(path) = &patch.file_path {
                changed += conn.execute(
                    "UPDATE history SET file_path = ?1 WHERE id = ?2",
                    params![path, id],
                )?;
            }
            if let Some(status) = &patch.link_check_status {
                changed += conn.execute(
                    "UPDATE history SET link_check_status = ?1 WHERE id = ?2",
                    params![serde_json::to_string(status)?, id],
                )?;
            }
            Ok(changed)
        })?;
        if changed == 0 {
            return Err(HistoryError::NotFound { id: id.to_string() });
        }
        self.emit(HistoryEvent::Updated { id: id.to_string() });
        Ok(())
    }

    /// Delete one record.
    pub fn delete(&self, id: &str) -> Result<(), HistoryError> {
        self.delete_many(std::slice::from_ref(&id.to_string()))
    }

    /// Delete many records in one transaction.
    pub fn delete_many(&self, ids: &[String]) -> Result<(), HistoryError> {
        if ids.is_empty() {
            return Ok(());
        }
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("DELETE FROM history WHERE id = ?1")?;
            for id in ids {
                stmt.execute(params![id])?;
            }
            Ok(())
        })?;
        self.emit(HistoryEvent::Deleted { ids: ids.to_vec() });
        Ok(())
    }

    /// Remove every record.
    pub fn clear(&self) -> Result<(), HistoryError> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM history", [])?;
            Ok(())
        })?;
        self.emit(HistoryEvent::Cleared);
        Ok(())
    }

    /// Per-month record counts, newest first.
    pub fn get_time_period_stats(&self) -> Result<Vec<PeriodStat>, HistoryError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT CAST(strftime('%Y', timestamp / 1000, 'unixepoch') AS INTEGER) AS y, \
                        CAST(strftime('%m', timestamp / 1000, 'unixepoch') AS INTEGER) AS m, \
                        COUNT(*) \
                 FROM history GROUP BY y, m ORDER BY y DESC, m DESC",
            )?;
            let stats = stmt
                .query_map([], |row| {
                    Ok(PeriodStat {
                        year: row.get(0)?,
                        month: row.get::<_, u32>(1)?,
                        count: row.get(2)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(stats)
        })
    }
}

/// Drain a row iterator, dropping rows that no longer decode.
///
/// A single mangled row must not take down a whole page or search; point
/// lookups still surface [`HistoryError::Corrupt`] for the row itself.
fn collect_rows(
    rows: impl Iterator<Item = rusqlite::Result<HistoryRecord>>,
) -> Vec<HistoryRecord> {
    let mut records = Vec::new();
    for row in rows {
        match row {
            Ok(record) => records.push(record),
            Err(e) => warn!(%e, "skipping corrupt history row"),
        }
    }
    records
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<HistoryRecord> {
    let primary: String = row.get(4)?;
    let results_json: String = row.get(5)?;
    let link_check_json: Option<String> = row.get(12)?;

    let primary_backend = primary.parse::<BackendId>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let results: Vec<BackendAttempt> = serde_json::from_str(&results_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let link_check_status = link_check_json
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(12, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(HistoryRecord {
        id: row.get(0)?,
        timestamp_ms: row.get(1)?,
        local_file_name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        file_path: row.get(3)?,
        primary_backend,
        results,
        generated_link: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        image_meta: ImageMeta {
            width: row.get(7)?,
            height: row.get(8)?,
            aspect_ratio: row.get(9)?,
            file_size: row.get(10)?,
            format: row.get(11)?,
        },
        link_check_status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mpx_core::{AttemptStatus, UploadResult};
    use std::collections::BTreeMap;

    fn result_for(id: BackendId) -> UploadResult {
        UploadResult {
            backend_id: id,
            file_key: format!("{id}/key.png"),
            url: format!("https://{id}.example/key.png"),
            size_bytes: 10,
            width: None,
            height: None,
            metadata: BTreeMap::new(),
        }
    }

    fn record(id: &str, ts: i64, primary: BackendId, name: &str) -> HistoryRecord {
        HistoryRecord {
            id: id.into(),
            timestamp_ms: ts,
            local_file_name: name.into(),
            file_path: Some(format!("/tmp/{name}")),
            primary_backend: primary,
            results: vec![BackendAttempt::success(result_for(primary))],
            generated_link: format!("https://{primary}.example/key.png"),
            image_meta: ImageMeta::default(),
            link_check_status: None,
        }
    }

    #[test]
    fn insert_and_get_roundtrip() {
        let store = HistoryStore::open_in_memory().unwrap();
        let rec = record("a", 1000, BackendId::R2, "cat.png");
        store.insert(&rec).unwrap();
        assert_eq!(store.get_by_id("a").unwrap().unwrap(), rec);
        assert_eq!(
            store.get_by_file_path("/tmp/cat.png").unwrap().unwrap().id,
            "a"
        );
        assert!(store.get_by_id("missing").unwrap().is_none());
    }

    #[test]
    fn insert_is_idempotent_on_id() {
        let store = HistoryStore::open_in_memory().unwrap();
        store.insert(&record("a", 1000, BackendId::R2, "one.png")).unwrap();
        store.insert(&record("a", 2000, BackendId::R2, "two.png")).unwrap();
        let page = store.get_page(1, 10, None).unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.records[0].local_file_name, "two.png");
    }

    #[test]
    fn invalid_record_is_rejected() {
        let store = HistoryStore::open_in_memory().unwrap();
        let mut rec = record("a", 1000, BackendId::R2, "cat.png");
        rec.results = vec![BackendAttempt::failed(BackendId::R2, "boom")];
        let err = store.insert(&rec).unwrap_err();
        assert!(matches!(err, HistoryError::InvalidRecord(_)));
        assert_eq!(store.get_page(1, 10, None).unwrap().total, 0);
    }

    #[test]
    fn pages_are_newest_first_with_total_math() {
        let store = HistoryStore::open_in_memory().unwrap();
        for i in 0..25 {
            store
                .insert(&record(&format!("r{i}"), 1000 + i, BackendId::R2, "x.png"))
                .unwrap();
        }
        let page1 = store.get_page(1, 10, None).unwrap();
        assert_eq!(page1.total, 25);
        assert_eq!(page1.records.len(), 10);
        assert!(page1.has_more);
        assert_eq!(page1.records[0].id, "r24");

        let page3 = store.get_page(3, 10, None).unwrap();
        assert_eq!(page3.records.len(), 5);
        assert!(!page3.has_more);
    }

    #[test]
    fn filter_restricts_to_primary_backend() {
        let store = HistoryStore::open_in_memory().unwrap();
        store.insert(&record("a", 1, BackendId::R2, "a.png")).unwrap();
        store.insert(&record("b", 2, BackendId::Weibo, "b.png")).unwrap();
        let page = store.get_page(1, 10, Some(BackendId::Weibo)).unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.records[0].id, "b");
    }

    #[test]
    fn search_is_case_insensitive_over_name_and_link() {
        let store = HistoryStore::open_in_memory().unwrap();
        store
            .insert(&record("a", 1, BackendId::R2, "Holiday-Cat.png"))
            .unwrap();
        store.insert(&record("b", 2, BackendId::R2, "dog.png")).unwrap();

        let hits = store.search("holiday", None, 10, 0).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");

        // Link side: every record's link contains "example".
        let hits = store.search("EXAMPLE", None, 10, 0).unwrap();
        assert_eq!(hits.len(), 2);

        // LIKE wildcards in the query are literal.
        let hits = store.search("%", None, 10, 0).unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn update_patches_fields() {
        let store = HistoryStore::open_in_memory().unwrap();
        store.insert(&record("a", 1, BackendId::R2, "a.png")).unwrap();
        store
            .update(
                "a",
                RecordPatch {
                    generated_link: Some("https://new.example/x".into()),
                    ..RecordPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(
            store.get_by_id("a").unwrap().unwrap().generated_link,
            "https://new.example/x"
        );

        let err = store
            .update("missing", RecordPatch {
                generated_link: Some("x".into()),
                ..RecordPatch::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, HistoryError::NotFound { .. }));
    }

    #[tokio::test]
    async fn patch_results_flips_one_attempt() {
        let store = HistoryStore::open_in_memory().unwrap();
        let mut rec = record("a", 1, BackendId::R2, "a.png");
        rec.results
            .push(BackendAttempt::failed(BackendId::Weibo, "cookie expired"));
        store.insert(&rec).unwrap();

        store
            .patch_results("a", |results| {
                for a in results.iter_mut() {
                    if a.backend_id == BackendId::Weibo {
                        *a = BackendAttempt::success(result_for(BackendId::Weibo));
                    }
                }
            })
            .await
            .unwrap();

        let got = store.get_by_id("a").unwrap().unwrap();
        assert!(got.results.iter().all(|a| a.status == AttemptStatus::Success));
        // Primary untouched by a targeted repair.
        assert_eq!(got.primary_backend, BackendId::R2);
    }

    #[tokio::test]
    async fn interleaved_patches_lose_nothing() {
        let store = HistoryStore::open_in_memory().unwrap();
        let mut rec = record("a", 1, BackendId::R2, "a.png");
        rec.results
            .push(BackendAttempt::failed(BackendId::Weibo, "boom"));
        rec.results
            .push(BackendAttempt::failed(BackendId::Zhihu, "boom"));
        store.insert(&rec).unwrap();

        let mut handles = Vec::new();
        for backend in [BackendId::Weibo, BackendId::Zhihu] {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .patch_results("a", move |results| {
                        for a in results.iter_mut() {
                            if a.backend_id == backend {
                                *a = BackendAttempt::success(result_for(backend));
                            }
                        }
                    })
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let got = store.get_by_id("a").unwrap().unwrap();
        assert_eq!(got.results.len(), 3);
        assert!(
            got.results.iter().all(|a| a.is_success()),
            "a patch was lost: {:?}",
            got.results
        );
    }

    #[test]
    fn delete_and_clear_emit_events() {
        let store = HistoryStore::open_in_memory().unwrap();
        let mut rx = store.subscribe();
        store.insert(&record("a", 1, BackendId::R2, "a.png")).unwrap();
        store.insert(&record("b", 2, BackendId::R2, "b.png")).unwrap();
        store.delete("a").unwrap();
        store.clear().unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            HistoryEvent::Updated { id: "a".into() }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            HistoryEvent::Updated { id: "b".into() }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            HistoryEvent::Deleted {
                ids: vec!["a".into()]
            }
        );
        assert_eq!(rx.try_recv().unwrap(), HistoryEvent::Cleared);
        assert_eq!(store.get_page(1, 10, None).unwrap().total, 0);
    }

    #[test]
    fn time_period_stats_group_by_month() {
        let store = HistoryStore::open_in_memory().unwrap();
        // 2024-05-01 and 2024-05-02, then 2023-12-31 (all UTC).
        store
            .insert(&record("a", 1_714_521_600_000, BackendId::R2, "a.png"))
            .unwrap();
        store
            .insert(&record("b", 1_714_608_000_000, BackendId::R2, "b.png"))
            .unwrap();
        store
            .insert(&record("c", 1_704_000_000_000, BackendId::R2, "c.png"))
            .unwrap();

        let stats = store.get_time_period_stats().unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(
            stats[0],
            PeriodStat {
                year: 2024,
                month: 5,
                count: 2
            }
        );
        assert_eq!(stats[1].year, 2023);
        assert_eq!(stats[1].month, 12);
        assert_eq!(stats[1].count, 1);
    }

    #[test]
    fn corrupt_row_surfaces_on_lookup_but_not_in_pages() {
        let store = HistoryStore::open_in_memory().unwrap();
        store
            .insert(&record("good", 2, BackendId::R2, "good.png"))
            .unwrap();
        // A backend id this build does not know, as an old or newer release
        // might have written it.
        store
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO history (id, timestamp, primary_backend, results) \
                     VALUES ('bad', 1, 'flickr', '[]')",
                    [],
                )?;
                Ok(())
            })
            .unwrap();

        let err = store.get_by_id("bad").unwrap_err();
        assert!(matches!(err, HistoryError::Corrupt { .. }), "got {err:?}");
        assert!(err.to_string().contains("corrupt history row"));

        // The listing skips the bad row instead of failing wholesale.
        let page = store.get_page(1, 10, None).unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].id, "good");
    }

    #[test]
    fn mangled_results_json_is_corrupt_not_db() {
        let store = HistoryStore::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO history (id, timestamp, primary_backend, results) \
                     VALUES ('bad', 1, 'r2', 'not json at all')",
                    [],
                )?;
                Ok(())
            })
            .unwrap();
        let err = store.get_by_id("bad").unwrap_err();
        assert!(matches!(err, HistoryError::Corrupt { .. }), "got {err:?}");
        assert!(store.search("anything", None, 10, 0).unwrap().is_empty());
    }

    #[test]
    fn link_check_status_is_stored_verbatim() {
        let store = HistoryStore::open_in_memory().unwrap();
        let mut rec = record("a", 1, BackendId::R2, "a.png");
        rec.link_check_status = Some(serde_json::json!({
            "r2": {"is_valid": true, "last_check_ms": 123, "error_type": "none"}
        }));
        store.insert(&rec).unwrap();
        let got = store.get_by_id("a").unwrap().unwrap();
        assert_eq!(got.link_check_status, rec.link_check_status);
    }
}
