//! Reporter: periodically snapshots the registry and pushes it to the
//! collector, per metric and as a batch.

use crate::registry::{SharedRegistry, POLL_COUNT};
use crate::sampler::Sample;
use crate::sender::MetricSender;
use pulsemon_common::types::Metric;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub struct Reporter<S> {
    registry: SharedRegistry,
    sender: S,
    period: Duration,
    data_tx: mpsc::Sender<Sample>,
}

impl<S: MetricSender> Reporter<S> {
    pub fn new(
        registry: SharedRegistry,
        sender: S,
        period: Duration,
        data_tx: mpsc::Sender<Sample>,
    ) -> Self {
        Self {
            registry,
            sender,
            period,
            data_tx,
        }
    }

    /// One combine-and-send pass: snapshot the registry under its lock,
    /// release, push each metric individually, then push the whole slice as
    /// a batch. A failed single push never stops the batch; batch failures
    /// are logged and not retried. If the `PollCount` single push
    /// succeeded, an explicit zero counter-write is enqueued afterwards so
    /// the registry resets without reading any state back.
    async fn combine_and_send(&self) {
        let list: Vec<Metric> = self
            .registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .snapshot();

        let mut reset_requested = false;
        for m in &list {
            match self.sender.send_one(m).await {
                Ok(()) => {
                    if m.id == POLL_COUNT {
                        reset_requested = true;
                    }
                }
                Err(e) => {
                    tracing::warn!(metric = %m.id, error = %e, "single-metric push failed");
                }
            }
        }

        if !list.is_empty() {
            if let Err(e) = self.sender.send_batch(&list).await {
                tracing::warn!(error = %e, "batch push failed");
            }
        }

        if reset_requested {
            // The writer may already be gone during shutdown; that loses
            // nothing since the registry dies with the process.
            let _ = self.data_tx.send(Sample::counter(POLL_COUNT, 0)).await;
        }
    }

    /// Runs until cancellation, reporting once per period. On cancel it
    /// performs exactly one extra combine-and-send pass, then signals
    /// `done_tx` so the lifecycle can bound the drain.
    pub async fn run(self, token: CancellationToken, done_tx: oneshot::Sender<()>) {
        tracing::info!(period = ?self.period, "reporter started");
        let mut tick = interval(self.period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tick.tick().await; // consume the immediate first tick
        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    tracing::info!("cancelled, sending processed data");
                    self.combine_and_send().await;
                    let _ = done_tx.send(());
                    tracing::info!("reporter stopped");
                    return;
                }
                _ = tick.tick() => {
                    self.combine_and_send().await;
                }
            }
        }
    }
}
