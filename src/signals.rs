/// Shutdown signal handling.
///
/// SIGINT (Ctrl-C) and SIGTERM both request a graceful stop: the monitor
/// loop abandons the current execution or sleep and renders its summary.
use tokio::signal::unix::{signal, SignalKind};

/// Resolves when SIGINT or SIGTERM is received.
///
/// If the SIGTERM handler cannot be installed, only SIGINT is watched.
pub async fn shutdown_signal() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => Some(s),
        Err(e) => {
            tracing::warn!(error = %e, "failed to install SIGTERM handler");
            None
        }
    };

    let terminate = async {
        match sigterm.as_mut() {
            Some(s) => {
                s.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => tracing::info!("SIGINT received, stopping"),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to listen for SIGINT");
                    std::future::pending::<()>().await;
                }
            }
        }
        _ = terminate => tracing::info!("SIGTERM received, stopping"),
    }
}
