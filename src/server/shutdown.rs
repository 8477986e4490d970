//! Two-stage shutdown for the controller manager
//!
//! - Stage 1 (`shutdown`): stop handing out work, let in-flight
//!   reconciliations finish within the grace period
//! - Stage 2 (`force`): abandon the drain and abort whatever is still running
//!
//! SIGTERM/SIGINT are translated into these stages by the binary.

use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownStage {
    Running,
    Draining,
    Forced,
}

/// Receiving half, cloned into every component that must stop
///
/// A dropped [`ShutdownController`] counts as a forced shutdown.
#[derive(Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<ShutdownStage>,
}

impl ShutdownSignal {
    async fn wait_for_stage(&self, stage: ShutdownStage) {
        let mut receiver = self.receiver.clone();
        // Err means the controller is gone
        let _ = receiver.wait_for(|current| *current >= stage).await;
    }

    /// Wait for the first stage
    pub async fn wait(&self) {
        self.wait_for_stage(ShutdownStage::Draining).await;
    }

    /// Wait for the second stage
    pub async fn wait_forced(&self) {
        self.wait_for_stage(ShutdownStage::Forced).await;
    }

    /// Check if shutdown was signaled (non-blocking)
    pub fn is_shutdown(&self) -> bool {
        self.stage() >= ShutdownStage::Draining
    }

    pub fn is_forced(&self) -> bool {
        self.stage() == ShutdownStage::Forced
    }

    pub fn stage(&self) -> ShutdownStage {
        if self.receiver.has_changed().is_err() {
            return ShutdownStage::Forced;
        }
        *self.receiver.borrow()
    }
}

/// Sending half, owned by whoever decides when to stop
pub struct ShutdownController {
    sender: watch::Sender<ShutdownStage>,
}

impl ShutdownController {
    /// Stage 1: stop accepting work and drain
    pub fn shutdown(&self) {
        let changed = self.sender.send_if_modified(|stage| {
            if *stage == ShutdownStage::Running {
                *stage = ShutdownStage::Draining;
                true
            } else {
                false
            }
        });
        if changed {
            info!("Shutdown requested, draining");
        }
    }

    /// Stage 2: stop waiting for in-flight work
    pub fn force(&self) {
        let changed = self.sender.send_if_modified(|stage| {
            if *stage != ShutdownStage::Forced {
                *stage = ShutdownStage::Forced;
                true
            } else {
                false
            }
        });
        if changed {
            info!("Forced shutdown requested");
        }
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            receiver: self.sender.subscribe(),
        }
    }
}

/// Create a new shutdown signal pair
///
/// Returns (controller, signal) where:
/// - controller: Used to trigger shutdown
/// - signal: Cloned and passed to components that need to listen
pub fn shutdown_channel() -> (ShutdownController, ShutdownSignal) {
    let (sender, receiver) = watch::channel(ShutdownStage::Running);
    (ShutdownController { sender }, ShutdownSignal { receiver })
}

/// Wait for SIGTERM or SIGINT
///
/// Returns the signal name that was received, or an error if the handlers
/// cannot be registered.
#[cfg(unix)]
pub async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let name = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    info!(signal = name, "Received signal");
    Ok(name)
}

/// Wait for Ctrl+C (non-unix)
#[cfg(not(unix))]
pub async fn wait_for_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    info!(signal = "CTRL_C", "Received signal");
    Ok("CTRL_C")
}
