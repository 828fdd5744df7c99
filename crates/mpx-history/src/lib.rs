// SPDX-License-Identifier: MIT OR Apache-2.0
//! Durable history of upload attempts.
//!
//! One row per uploaded file in a single-file SQLite database. Reads are
//! plain queries; every mutation that touches the `results` blob runs under
//! one async mutex so a full-record retry and a single-backend retry for the
//! same record can never lose each other's writes. Change notifications go
//! out on a broadcast channel so open list views can reload.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod legacy;
mod store;

pub use legacy::LEGACY_DIR_NAME;
pub use store::{HistoryPage, HistoryStore, PeriodStat, RecordPatch};

use mpx_core::RecordError;
use std::path::PathBuf;

/// Errors from the history store.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// SQLite-level failure.
    #[error("history database error: {0}")]
    Db(#[source] rusqlite::Error),

    /// A stored JSON blob failed to (de)serialise.
    #[error("history serialisation error: {0}")]
    Serde(#[from] serde_json::Error),

    /// The requested record does not exist.
    #[error("history record not found: {id}")]
    NotFound {
        /// The id that missed.
        id: String,
    },

    /// A record violated its invariants on insert.
    #[error("invalid history record: {0}")]
    InvalidRecord(#[from] RecordError),

    /// A stored row no longer parses (e.g. unknown backend id, mangled
    /// results JSON). The row stays in place for inspection; every other
    /// row keeps working.
    #[error("corrupt history row: {detail}")]
    Corrupt {
        /// What failed to parse.
        detail: String,
    },

    /// Filesystem failure during open or legacy import.
    #[error("{op} {path:?}: {source}")]
    Io {
        /// Operation that failed.
        op: &'static str,
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl From<rusqlite::Error> for HistoryError {
    /// Row-decoding failures (`row_to_record` reports them as
    /// `FromSqlConversionFailure`) become [`HistoryError::Corrupt`];
    /// everything else is a database-level [`HistoryError::Db`].
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::FromSqlConversionFailure(column, _, source) => Self::Corrupt {
                detail: format!("column {column}: {source}"),
            },
            other => Self::Db(other),
        }
    }
}

/// Change notifications for open views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryEvent {
    /// A record was inserted or modified.
    Updated {
        /// Record id.
        id: String,
    },
    /// Records were deleted.
    Deleted {
        /// Removed record ids.
        ids: Vec<String>,
    },
    /// The whole history was cleared.
    Cleared,
}
