use std::fmt;

use anyhow::{Context, Result};
use tokio::signal;

/// Process signal that asked the server to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Interrupt,
    #[cfg(unix)]
    Terminate,
}

impl fmt::Display for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => f.write_str("SIGINT"),
            #[cfg(unix)]
            Self::Terminate => f.write_str("SIGTERM"),
        }
    }
}

/// Resolve on the first of Ctrl+C or SIGTERM.
///
/// # Errors
/// Returns an error if a signal handler cannot be installed.
pub async fn wait_for_stop_signal() -> Result<StopSignal> {
    let received = tokio::select! {
        result = interrupt() => result?,
        result = terminate() => result?,
    };
    tracing::info!(signal = %received, "Stop signal received, draining listeners");
    Ok(received)
}

async fn interrupt() -> Result<StopSignal> {
    signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    Ok(StopSignal::Interrupt)
}

#[cfg(unix)]
async fn terminate() -> Result<StopSignal> {
    let mut stream = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("failed to install SIGTERM handler")?;
    stream.recv().await;
    Ok(StopSignal::Terminate)
}

#[cfg(not(unix))]
async fn terminate() -> Result<StopSignal> {
    std::future::pending().await
}
