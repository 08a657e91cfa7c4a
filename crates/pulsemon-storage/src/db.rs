use crate::error::{Result, StorageError};
use crate::Backuper;
use pulsemon_common::types::{Metric, MetricKind, MetricTable, MetricValue};
use rusqlite::Connection;
use std::sync::Mutex;
use std::time::Duration;

/// Relational backuper. One row per metric, keyed by id; exactly one of
/// `delta`/`value` is populated per row depending on `mtype`.
pub struct DbBackuper {
    conn: Mutex<Connection>,
}

const INIT_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS metrics (
        id TEXT PRIMARY KEY,
        mtype TEXT NOT NULL,
        delta BIGINT,
        value DOUBLE PRECISION
    )";

const UPSERT: &str = "
    INSERT INTO metrics (id, mtype, delta, value)
    VALUES (?1, ?2, ?3, ?4)
    ON CONFLICT (id) DO UPDATE
    SET delta = ?3,
        value = ?4";

impl DbBackuper {
    /// Opens (or creates) the database at `dsn` and runs the idempotent
    /// schema initialization.
    pub fn open(dsn: &str) -> Result<Self> {
        let conn = Connection::open(dsn)?;
        conn.busy_timeout(Duration::from_secs(1))?;
        conn.execute_batch(INIT_TABLE)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl Backuper for DbBackuper {
    fn save(&self, table: &MetricTable) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let tx = conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(UPSERT)?;
            for m in table.snapshot() {
                let (delta, value) = match m.value {
                    MetricValue::Gauge(v) => (None, Some(v)),
                    MetricValue::Counter(d) => (Some(d), None),
                };
                stmt.execute(rusqlite::params![
                    m.id,
                    m.kind().to_string(),
                    delta,
                    value
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn restore(&self, table: &mut MetricTable) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare("SELECT id, mtype, delta, value FROM metrics")?;
        let rows = stmt.query_map([], |row| {
            let id: String = row.get(0)?;
            let mtype: String = row.get(1)?;
            let delta: Option<i64> = row.get(2)?;
            let value: Option<f64> = row.get(3)?;
            Ok((id, mtype, delta, value))
        })?;
        for row in rows {
            let (id, mtype, delta, value) = row?;
            let kind: MetricKind = mtype
                .parse()
                .map_err(|_| StorageError::CorruptRow { id: id.clone() })?;
            let value = match (kind, delta, value) {
                (MetricKind::Gauge, _, Some(v)) => MetricValue::Gauge(v),
                (MetricKind::Counter, Some(d), _) => MetricValue::Counter(d),
                _ => return Err(StorageError::CorruptRow { id }),
            };
            table.insert(Metric {
                id,
                value,
                hash: None,
            });
        }
        Ok(())
    }

    fn health(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }
}
