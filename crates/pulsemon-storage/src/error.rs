/// Errors from the persistence layer. Save failures are logged by callers
/// and never stop the collector; health probes surface them.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage: SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("storage: I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A restored row's payload columns do not match its declared type.
    #[error("storage: row '{id}' does not match its declared type")]
    CorruptRow { id: String },
}

pub type Result<T> = std::result::Result<T, StorageError>;
