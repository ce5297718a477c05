//! Cooperative shutdown for the processor loop.
//!
//! ## Architecture
//!
//! - [`ShutdownTrigger`]: held by `main`, clears the running flag once
//! - [`ShutdownSignal`]: cloned into the loop, checked between iterations
//! - [`wait_for_signal`]: waits for SIGTERM or Ctrl+C
//! - [`join_with_timeout`]: bounded join of the loop task
//!
//! ## Usage
//!
//! ```ignore
//! let (trigger, signal) = shutdown::channel();
//! let task = tokio::spawn(async move { processor.run(signal).await });
//!
//! shutdown::wait_for_signal().await?;
//! trigger.trigger();
//! shutdown::join_with_timeout(task, Duration::from_secs(30)).await?;
//! ```

use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Errors from shutdown coordination.
#[derive(Error, Debug)]
pub enum ShutdownError {
    /// The loop task did not finish in time and was aborted.
    #[error("Task did not stop within {0:?}")]
    Timeout(Duration),

    /// The loop task panicked or was cancelled.
    #[error("Task failed: {0}")]
    Join(String),

    /// Signal handlers could not be installed.
    #[error("Failed to install signal handler: {0}")]
    Signal(#[from] std::io::Error),
}

/// Owner side of the running flag.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

/// Observer side of the running flag.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// A signal that never fires, for one-shot or test use.
    #[must_use]
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        // Dropping the sender leaves the value at false forever.
        drop(tx);
        Self { rx }
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown is requested. Pending forever if the trigger was
    /// dropped without firing.
    pub async fn triggered(&mut self) {
        if self.rx.wait_for(|stopped| *stopped).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Create a connected trigger and signal.
#[must_use]
pub fn channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, ShutdownSignal { rx })
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
///
/// # Errors
///
/// Returns [`ShutdownError::Signal`] if the handlers cannot be installed.
pub async fn wait_for_signal() -> Result<(), ShutdownError> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Received Ctrl+C");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}

/// Wait for a task to finish, aborting it after `timeout`.
///
/// # Errors
///
/// Returns [`ShutdownError::Timeout`] if the task had to be aborted and
/// [`ShutdownError::Join`] if it panicked.
pub async fn join_with_timeout<T>(mut task: JoinHandle<T>, timeout: Duration) -> Result<T, ShutdownError> {
    match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(ShutdownError::Join(e.to_string())),
        Err(_) => {
            warn!(timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX), "Task did not stop in time, aborting");
            task.abort();
            Err(ShutdownError::Timeout(timeout))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_is_observed() {
        let (trigger, mut signal) = channel();
        assert!(!signal.is_triggered());

        let waiter = tokio::spawn(async move {
            signal.triggered().await;
            "signal_received"
        });

        trigger.trigger();
        trigger.trigger();
        assert_eq!(waiter.await.unwrap(), "signal_received");
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_signal_stays_pending() {
        let mut signal = ShutdownSignal::never();
        assert!(!signal.is_triggered());
        let result = tokio::time::timeout(Duration::from_secs(60), signal.triggered()).await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_with_timeout_aborts_slow_task() {
        let task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        let result = join_with_timeout(task, Duration::from_millis(100)).await;
        assert!(matches!(result, Err(ShutdownError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_join_with_timeout_returns_value() {
        let task = tokio::spawn(async { 7 });
        assert_eq!(join_with_timeout(task, Duration::from_secs(1)).await.unwrap(), 7);
    }
}
