//! The collector's in-memory metric table plus its write-through policy to
//! the backuper.

use pulsemon_common::error::ModelError;
use pulsemon_common::sign;
use pulsemon_common::types::{Metric, MetricTable};
use pulsemon_storage::{Backuper, StorageError};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Shared collector state: the table under its lock and the backuper.
///
/// The backuper always receives an owned snapshot of the table, never a
/// reference that outlives the lock.
#[derive(Clone)]
pub struct MetricService {
    inner: Arc<Inner>,
}

struct Inner {
    table: Mutex<MetricTable>,
    backuper: Box<dyn Backuper>,
    /// Save after every write (DB variant, or store-interval zero).
    sync_save: bool,
    key: Option<String>,
}

impl MetricService {
    pub fn new(
        backuper: Box<dyn Backuper>,
        sync_save: bool,
        key: Option<String>,
        restore: bool,
    ) -> Result<Self, StorageError> {
        let mut table = MetricTable::new();
        if restore {
            backuper.restore(&mut table)?;
            tracing::info!(count = table.len(), "restored metrics");
        }
        Ok(Self {
            inner: Arc::new(Inner {
                table: Mutex::new(table),
                backuper,
                sync_save,
                key,
            }),
        })
    }

    /// Recomputes the integrity tag when a key is configured. Admission
    /// calls this on every mutating metric before it reaches the table.
    pub fn verify(&self, m: &Metric) -> Result<(), ModelError> {
        match &self.inner.key {
            Some(key) => sign::verify(m, key),
            None => Ok(()),
        }
    }

    pub fn update_one(&self, m: Metric) {
        {
            let mut table = self.lock_table();
            table.apply(m);
        }
        if self.inner.sync_save {
            self.save_now();
        }
    }

    /// Merges the batch in list order (repeated counters in one batch
    /// accumulate), then saves at most once.
    pub fn update_many(&self, list: Vec<Metric>) {
        {
            let mut table = self.lock_table();
            for m in list {
                table.apply(m);
            }
        }
        if self.inner.sync_save {
            self.save_now();
        }
    }

    /// Last-known value for `id`, with the tag recomputed on read when a
    /// key is configured.
    pub fn get(&self, id: &str) -> Option<Metric> {
        let mut m = self.lock_table().get(id).cloned()?;
        if let Some(key) = &self.inner.key {
            m.hash = Some(sign::compute(&m, key));
        }
        Some(m)
    }

    pub fn list(&self) -> Vec<Metric> {
        self.lock_table().snapshot()
    }

    pub fn health(&self) -> Result<(), StorageError> {
        self.inner.backuper.health()
    }

    /// Persists a snapshot of the current table. Failures are logged, never
    /// fatal; the next save retries from current state.
    pub fn save_now(&self) {
        let snapshot = self.lock_table().clone();
        if let Err(e) = self.inner.backuper.save(&snapshot) {
            tracing::error!(error = %e, "saving metrics failed");
        }
    }

    /// Saves every `period` until cancellation. The shutdown path performs
    /// the final save, so cancellation exits immediately.
    pub async fn run_recorder(self, period: Duration, token: CancellationToken) {
        tracing::info!(period = ?period, "periodic recorder started");
        let mut tick = interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tick.tick().await; // consume the immediate first tick
        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    tracing::info!("periodic recorder stopped");
                    return;
                }
                _ = tick.tick() => {
                    self.save_now();
                }
            }
        }
    }

    fn lock_table(&self) -> std::sync::MutexGuard<'_, MetricTable> {
        self.inner.table.lock().unwrap_or_else(|e| e.into_inner())
    }
}
