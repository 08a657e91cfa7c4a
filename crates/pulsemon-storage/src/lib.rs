//! Persistence for the collector's metric table.
//!
//! Two interchangeable backupers implement the same three-operation
//! contract: a relational variant backed by an embedded SQLite database and
//! a JSON file-snapshot variant. Either one is a total function over the
//! table: ids and counter/gauge payloads survive a save/restore round trip
//! exactly; integrity tags are never persisted and are recomputed on read.

pub mod db;
pub mod error;
pub mod file;


use pulsemon_common::types::MetricTable;

pub use db::DbBackuper;
pub use error::{Result, StorageError};
pub use file::FileBackuper;

/// Persists and restores the full metric table.
///
/// Implementations must be shareable across the request handlers and the
/// periodic recorder (`Send + Sync`). `save` must be atomic from a reader's
/// point of view; `restore` must treat a missing source as an empty table.
pub trait Backuper: Send + Sync {
    /// Persists the full current table.
    fn save(&self, table: &MetricTable) -> Result<()>;

    /// Populates an empty table from persistent storage.
    fn restore(&self, table: &mut MetricTable) -> Result<()>;

    /// Liveness probe for the backing store.
    fn health(&self) -> Result<()>;
}

/// Opens the configured backuper: the database variant when a DSN is set,
/// the file-snapshot variant otherwise.
pub fn open(db_dsn: Option<&str>, store_file: &str) -> Result<Box<dyn Backuper>> {
    match db_dsn {
        Some(dsn) if !dsn.is_empty() => {
            tracing::info!(dsn, "using database backuper");
            Ok(Box::new(DbBackuper::open(dsn)?))
        }
        _ => {
            tracing::info!(path = store_file, "using file backuper");
            Ok(Box::new(FileBackuper::new(store_file)))
        }
    }
}
