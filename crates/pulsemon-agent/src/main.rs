//! pulsemon-agent: collects host and process metrics and pushes them to
//! the collector over HTTP/JSON or the binary RPC.

mod config;
mod netutil;
mod registry;
mod reporter;
mod sampler;
mod sender;

use anyhow::{bail, Result};
use reporter::Reporter;
use sender::{GrpcSender, HttpSender, MetricSender};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// How long the lifecycle waits for the reporter's final drain.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate =
            signal(SignalKind::terminate()).expect("cannot install SIGTERM handler");
        let mut quit = signal(SignalKind::quit()).expect("cannot install SIGQUIT handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
            _ = quit.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn spawn_reporter<S: MetricSender + 'static>(
    sender: S,
    registry: registry::SharedRegistry,
    period: Duration,
    data_tx: mpsc::Sender<sampler::Sample>,
    token: CancellationToken,
) -> oneshot::Receiver<()> {
    let (done_tx, done_rx) = oneshot::channel();
    let reporter = Reporter::new(registry, sender, period, data_tx);
    tokio::spawn(reporter.run(token, done_tx));
    done_rx
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pulsemon=info".parse()?))
        .init();

    let cfg = config::load()?;
    tracing::info!(
        address = %cfg.address,
        poll = ?cfg.poll_interval,
        report = ?cfg.report_interval,
        transport = ?cfg.transport,
        "pulsemon-agent starting"
    );

    let source_ip = match cfg.source_ip.clone() {
        Some(ip) => Some(ip),
        None => match netutil::local_ip(&cfg.address) {
            Ok(ip) => Some(ip),
            Err(e) => {
                tracing::warn!(error = %e, "cannot detect local source address");
                None
            }
        },
    };

    let token = CancellationToken::new();
    let registry = registry::new_registry();
    let (data_tx, data_rx) = mpsc::channel::<sampler::Sample>(64);
    let (sync_tx, _) = broadcast::channel::<()>(4);

    tokio::spawn(sampler::run_ticker(
        cfg.poll_interval,
        sync_tx.clone(),
        token.clone(),
    ));
    tokio::spawn(registry::run_writer(
        registry.clone(),
        data_rx,
        token.clone(),
    ));
    tokio::spawn(
        sampler::RuntimeSampler::new()?.run(data_tx.clone(), sync_tx.subscribe(), token.clone()),
    );
    tokio::spawn(
        sampler::MemorySampler::new().run(data_tx.clone(), sync_tx.subscribe(), token.clone()),
    );
    tokio::spawn(sampler::run_cpu_sampler(data_tx.clone(), token.clone()));

    let done_rx = match cfg.transport {
        config::Transport::Http => {
            let sender = HttpSender::new(&cfg, source_ip)?;
            spawn_reporter(
                sender,
                registry.clone(),
                cfg.report_interval,
                data_tx.clone(),
                token.clone(),
            )
        }
        config::Transport::Rpc => {
            let sender = GrpcSender::connect(&cfg, source_ip).await?;
            spawn_reporter(
                sender,
                registry.clone(),
                cfg.report_interval,
                data_tx.clone(),
                token.clone(),
            )
        }
    };

    shutdown_signal().await;
    tracing::info!("shutdown signal received, draining");
    token.cancel();

    match timeout(SHUTDOWN_GRACE, done_rx).await {
        Ok(Ok(())) => {
            tracing::info!("drain complete");
            Ok(())
        }
        _ => bail!("reporter did not drain within {SHUTDOWN_GRACE:?}"),
    }
}
