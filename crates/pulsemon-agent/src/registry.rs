//! Registry writer: drains the sample channel into the shared metric table
//! under its lock.

use crate::sampler::Sample;
use pulsemon_common::types::{Metric, MetricTable};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// The one counter the agent emits; everything else is a gauge.
pub const POLL_COUNT: &str = "PollCount";

pub type SharedRegistry = Arc<Mutex<MetricTable>>;

pub fn new_registry() -> SharedRegistry {
    Arc::new(Mutex::new(MetricTable::new()))
}

/// Applies one sample to the registry. The kind is decided by name:
/// `PollCount` is a counter, all other samples are gauges. A zero
/// `PollCount` write is the reporter's explicit reset and replaces the
/// stored total instead of accumulating.
pub fn write_sample(registry: &SharedRegistry, sample: Sample) {
    let mut table = registry.lock().unwrap_or_else(|e| e.into_inner());
    if sample.name == POLL_COUNT {
        let metric = Metric::counter(sample.name, sample.counter);
        if sample.counter == 0 {
            table.insert(metric);
        } else {
            table.apply(metric);
        }
    } else {
        table.apply(Metric::gauge(sample.name, sample.gauge));
    }
}

/// Consumes samples until cancellation. On cancel it drains at most one
/// sample already in flight before exiting, so a sampler blocked on a full
/// channel at shutdown does not lose its last write.
pub async fn run_writer(
    registry: SharedRegistry,
    mut data_rx: mpsc::Receiver<Sample>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = token.cancelled() => {
                if let Ok(sample) = data_rx.try_recv() {
                    write_sample(&registry, sample);
                }
                tracing::info!("registry writer stopped");
                return;
            }
            sample = data_rx.recv() => {
                match sample {
                    Some(sample) => write_sample(&registry, sample),
                    None => return,
                }
            }
        }
    }
}
