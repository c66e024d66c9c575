use std::sync::Arc;

use muxkeeper::Error;
use muxkeeper::KeeperConfig;
use muxkeeper::Result;
use muxkeeper::SupervisorBuilder;
use muxkeeper::SystemError;
use muxkeeper::TracingNotifier;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio::sync::watch;
use tracing::error;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    init_observability();

    let settings = KeeperConfig::new()?.validate()?;
    info!(?settings, "configuration loaded");

    // Initializing Shutdown Signal
    let (graceful_tx, graceful_rx) = watch::channel(());

    let supervisor = SupervisorBuilder::new(settings).notifier(Arc::new(TracingNotifier)).build()?;

    let failed = supervisor.start_on_launch().await;
    if !failed.is_empty() {
        error!(?failed, "some sessions could not be started");
    }

    let reconciler = supervisor.spawn_reconciler(graceful_rx);
    info!("Supervisor started. Waiting for CTRL+C signal...");

    if let Err(e) = graceful_shutdown(graceful_tx).await {
        error!("Failed to shutdown: {:?}", e);
    }

    supervisor.shutdown();
    reconciler.await?;

    info!("Exiting program.");
    Ok(())
}

async fn graceful_shutdown(graceful_tx: watch::Sender<()>) -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected.");
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C detected.");
        },
    }

    graceful_tx.send(()).map_err(|e| {
        error!("Failed to send shutdown signal: {}", e);
        Error::System(SystemError::SignalSendFailed(format!(
            "Failed to send shutdown signal: {}",
            e
        )))
    })?;

    info!("Shutdown completed");
    Ok(())
}

fn init_observability() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
