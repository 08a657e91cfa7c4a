//! Sampler workers: a shared ticker fans a sync signal out to the runtime
//! and memory samplers; the CPU sampler paces itself on its measurement
//! window. All samples flow into one channel drained by the registry
//! writer.

use rand::Rng;
use std::time::Duration;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Window the CPU sampler measures utilization over. Deliberately not tied
/// to the poll interval.
pub const CPU_POLL_WINDOW: Duration = Duration::from_secs(10);

/// Untagged carrier between samplers and the registry writer. The writer
/// decides the metric kind by name, so only one of the two payload fields
/// is meaningful per sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub gauge: f64,
    pub counter: i64,
}

impl Sample {
    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            gauge: value,
            counter: 0,
        }
    }

    pub fn counter(name: impl Into<String>, delta: i64) -> Self {
        Self {
            name: name.into(),
            gauge: 0.0,
            counter: delta,
        }
    }
}

/// Emits one sync signal per poll interval to every subscribed sampler.
pub async fn run_ticker(
    period: Duration,
    sync_tx: broadcast::Sender<()>,
    token: CancellationToken,
) {
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tick.tick().await; // consume the immediate first tick
    loop {
        tokio::select! {
            biased;

            _ = token.cancelled() => {
                tracing::info!("ticker stopped");
                return;
            }
            _ = tick.tick() => {
                // Receivers may lag or be gone during shutdown.
                let _ = sync_tx.send(());
            }
        }
    }
}

/// Samples the agent process's own runtime statistics on every sync tick.
///
/// The emitted name set is a fixed part of the collector contract.
/// Allocator and GC counters with no host-side equivalent report zero so
/// the set stays stable.
pub struct RuntimeSampler {
    system: System,
    pid: Pid,
    poll_count: i64,
}

impl RuntimeSampler {
    pub fn new() -> anyhow::Result<Self> {
        let pid = sysinfo::get_current_pid().map_err(anyhow::Error::msg)?;
        Ok(Self {
            system: System::new(),
            pid,
            poll_count: 0,
        })
    }

    fn collect(&mut self) -> Vec<Sample> {
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[self.pid]));
        let (rss, virt) = match self.system.process(self.pid) {
            Some(p) => (p.memory() as f64, p.virtual_memory() as f64),
            None => (0.0, 0.0),
        };
        self.poll_count += 1;

        let mut out = Vec::with_capacity(29);
        let mut gauge = |name: &str, value: f64| out.push(Sample::gauge(name, value));

        gauge("Alloc", rss);
        gauge("TotalAlloc", virt);
        gauge("BuckHashSys", 0.0);
        gauge("Frees", 0.0);
        gauge("GCCPUFraction", 0.0);
        gauge("GCSys", 0.0);
        gauge("HeapAlloc", rss);
        gauge("HeapIdle", (virt - rss).max(0.0));
        gauge("HeapInuse", rss);
        gauge("HeapObjects", 0.0);
        gauge("HeapReleased", 0.0);
        gauge("HeapSys", virt);
        gauge("LastGC", 0.0);
        gauge("Lookups", 0.0);
        gauge("MCacheInuse", 0.0);
        gauge("MCacheSys", 0.0);
        gauge("MSpanInuse", 0.0);
        gauge("MSpanSys", 0.0);
        gauge("Mallocs", 0.0);
        gauge("NextGC", 0.0);
        gauge("NumForcedGC", 0.0);
        gauge("NumGC", 0.0);
        gauge("OtherSys", 0.0);
        gauge("PauseTotalNs", 0.0);
        gauge("StackInuse", 0.0);
        gauge("StackSys", 0.0);
        gauge("Sys", virt);
        gauge("RandomValue", rand::thread_rng().gen::<f64>() * 100.0);
        out.push(Sample::counter("PollCount", 1));
        out
    }

    pub async fn run(
        mut self,
        data_tx: mpsc::Sender<Sample>,
        mut sync_rx: broadcast::Receiver<()>,
        token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    tracing::info!("runtime sampler stopped");
                    return;
                }
                tick = sync_rx.recv() => {
                    match tick {
                        Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                            for sample in self.collect() {
                                if data_tx.send(sample).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    }
                }
            }
        }
    }
}

/// Samples host memory totals on every sync tick.
pub struct MemorySampler {
    system: System,
}

impl MemorySampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    fn collect(&mut self) -> Vec<Sample> {
        self.system.refresh_memory();
        vec![
            Sample::gauge("TotalMemory", self.system.total_memory() as f64),
            Sample::gauge("FreeMemory", self.system.free_memory() as f64),
        ]
    }

    pub async fn run(
        mut self,
        data_tx: mpsc::Sender<Sample>,
        mut sync_rx: broadcast::Receiver<()>,
        token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    tracing::info!("memory sampler stopped");
                    return;
                }
                tick = sync_rx.recv() => {
                    match tick {
                        Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                            for sample in self.collect() {
                                if data_tx.send(sample).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    }
                }
            }
        }
    }
}

/// Measures per-core CPU utilization over [`CPU_POLL_WINDOW`] and emits one
/// `CPUutilization<i>` gauge per logical CPU. Runs on its own cadence.
pub async fn run_cpu_sampler(data_tx: mpsc::Sender<Sample>, token: CancellationToken) {
    let mut system = System::new();
    system.refresh_cpu_all();
    loop {
        tokio::select! {
            biased;

            _ = token.cancelled() => {
                tracing::info!("cpu sampler stopped");
                return;
            }
            _ = tokio::time::sleep(CPU_POLL_WINDOW) => {
                system.refresh_cpu_all();
                for (i, cpu) in system.cpus().iter().enumerate() {
                    let sample = Sample::gauge(
                        format!("CPUutilization{i}"),
                        f64::from(cpu.cpu_usage()),
                    );
                    if data_tx.send(sample).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}
