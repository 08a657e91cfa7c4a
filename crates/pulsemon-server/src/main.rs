use anyhow::{bail, Context, Result};
use pulsemon_common::proto::metrics_agent_server::MetricsAgentServer;
use pulsemon_crypto::Decryptor;
use pulsemon_server::http::AppState;
use pulsemon_server::service::MetricService;
use pulsemon_server::{config, grpc, http};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// How long the lifecycle waits for in-flight requests after cancellation.
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

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pulsemon=info".parse()?))
        .init();

    let cfg = config::load()?;
    tracing::info!(
        address = %cfg.address,
        transport = ?cfg.transport,
        store_interval = ?cfg.store_interval,
        restore = cfg.restore,
        "pulsemon-server starting"
    );

    let backuper = pulsemon_storage::open(cfg.db_dsn.as_deref(), &cfg.store_file)
        .context("cannot open storage")?;
    let service = MetricService::new(backuper, cfg.sync_save(), cfg.key.clone(), cfg.restore)
        .context("cannot restore metrics")?;

    let decryptor = match &cfg.crypto_key {
        Some(path) => Some(Arc::new(
            Decryptor::from_pem_file(path)
                .with_context(|| format!("cannot load private key '{}'", path.display()))?,
        )),
        None => None,
    };

    let token = CancellationToken::new();

    if cfg.periodic_recorder() {
        tokio::spawn(
            service
                .clone()
                .run_recorder(cfg.store_interval, token.clone()),
        );
    }

    let mut server_task = match cfg.transport {
        config::Transport::Http => {
            let state = AppState {
                service: service.clone(),
                decryptor,
                trusted: cfg.trusted_subnet,
            };
            let router = http::build_router(state);
            let listener = TcpListener::bind(&cfg.address)
                .await
                .with_context(|| format!("cannot listen on '{}'", cfg.address))?;
            tracing::info!(address = %cfg.address, "HTTP server listening");
            let shutdown = token.clone();
            tokio::spawn(async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(shutdown.cancelled_owned())
                    .await
                    .map_err(anyhow::Error::from)
            })
        }
        config::Transport::Rpc => {
            let addr = tokio::net::lookup_host(&cfg.address)
                .await
                .with_context(|| format!("cannot resolve '{}'", cfg.address))?
                .next()
                .with_context(|| format!("'{}' resolves to no address", cfg.address))?;
            let svc = MetricsAgentServer::new(grpc::MetricsAgentService::new(
                service.clone(),
                cfg.trusted_subnet,
            ));
            tracing::info!(address = %addr, "RPC server listening");
            let shutdown = token.clone();
            tokio::spawn(async move {
                tonic::transport::Server::builder()
                    .add_service(svc)
                    .serve_with_shutdown(addr, shutdown.cancelled_owned())
                    .await
                    .map_err(anyhow::Error::from)
            })
        }
    };

    tokio::select! {
        res = &mut server_task => {
            token.cancel();
            service.save_now();
            match res {
                Ok(Ok(())) => bail!("server exited unexpectedly"),
                Ok(Err(e)) => return Err(e.context("server error")),
                Err(e) => return Err(anyhow::Error::from(e).context("server task panicked")),
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining");
            token.cancel();
        }
    }

    let drained = timeout(SHUTDOWN_GRACE, &mut server_task).await;
    service.save_now();
    match drained {
        Ok(Ok(Ok(()))) => {
            tracing::info!("drain complete");
            Ok(())
        }
        Ok(Ok(Err(e))) => Err(e.context("server error during drain")),
        Ok(Err(e)) => Err(anyhow::Error::from(e).context("server task panicked")),
        Err(_) => bail!("server did not drain within {SHUTDOWN_GRACE:?}"),
    }
}
