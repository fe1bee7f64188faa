use anyhow::Result;
use tokio::signal;

/// Resolves once Ctrl+C or SIGTERM arrives.
pub async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        sigterm.recv().await;
        Ok::<(), std::io::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<std::io::Result<()>>();

    tokio::select! {
        result = signal::ctrl_c() => {
            result.inspect_err(|e| tracing::error!(%e, "Failed to listen for Ctrl+C"))?;
            tracing::info!("Received Ctrl+C signal");
        }
        result = terminate => {
            result.inspect_err(|e| tracing::error!(%e, "Failed to listen for SIGTERM"))?;
            tracing::info!("Received SIGTERM signal");
        }
    }

    tracing::info!("Shutdown signal received, draining in-flight dispatches");
    Ok(())
}
