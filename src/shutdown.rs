//! Process shutdown signals.
//!
//! Handlers are registered when [`ShutdownSignal::install`] returns, not on
//! first poll, so a signal that lands during a cycle is held until the loop
//! checks for it between cycles.

use std::io;

#[cfg(unix)]
use tokio::signal::unix::{Signal, SignalKind, signal};

/// Listens for Ctrl-C, or SIGINT/SIGTERM on unix.
pub struct ShutdownSignal {
    #[cfg(unix)]
    interrupt: Signal,
    #[cfg(unix)]
    terminate: Signal,
    #[cfg(windows)]
    ctrl_c: tokio::signal::windows::CtrlC,
}

impl ShutdownSignal {
    /// Register the handlers. Must be called inside a tokio runtime.
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            interrupt: signal(SignalKind::interrupt())?,
            #[cfg(unix)]
            terminate: signal(SignalKind::terminate())?,
            #[cfg(windows)]
            ctrl_c: tokio::signal::windows::ctrl_c()?,
        })
    }

    /// Resolves once a shutdown signal has been received.
    #[cfg(unix)]
    pub async fn recv(mut self) {
        tokio::select! {
            _ = self.interrupt.recv() => tracing::info!("Received SIGINT"),
            _ = self.terminate.recv() => tracing::info!("Received SIGTERM"),
        }
    }

    /// Resolves once a shutdown signal has been received.
    #[cfg(windows)]
    pub async fn recv(mut self) {
        self.ctrl_c.recv().await;
        tracing::info!("Received Ctrl-C");
    }
}
