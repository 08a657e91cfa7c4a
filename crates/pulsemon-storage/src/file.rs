use crate::error::Result;
use crate::Backuper;
use pulsemon_common::types::{Metric, MetricTable};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

/// File-snapshot backuper. The snapshot is a JSON array of metric objects,
/// rewritten whole on every save (open, truncate, write, close), so a crash
/// mid-write leaves a syntactically detectable partial file rather than a
/// mix of old and new rows.
pub struct FileBackuper {
    path: PathBuf,
}

impl FileBackuper {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Backuper for FileBackuper {
    fn save(&self, table: &MetricTable) -> Result<()> {
        let list: Vec<Metric> = table
            .snapshot()
            .into_iter()
            .map(|mut m| {
                m.hash = None;
                m
            })
            .collect();
        let data = serde_json::to_vec(&list)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;
        file.write_all(&data)?;
        Ok(())
    }

    fn restore(&self, table: &mut MetricTable) -> Result<()> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if data.is_empty() {
            return Ok(());
        }
        // A truncated snapshot (crash mid-write) reads as an empty table so
        // first boot after a failure still comes up.
        match serde_json::from_slice::<Vec<Metric>>(&data) {
            Ok(list) => {
                for m in list {
                    table.insert(m);
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "snapshot is unreadable, starting with an empty table"
                );
            }
        }
        Ok(())
    }

    fn health(&self) -> Result<()> {
        Ok(())
    }
}
