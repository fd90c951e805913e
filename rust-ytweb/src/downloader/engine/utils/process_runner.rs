//! Process management utilities for download engines.
//!
//! Provides a waiter task that supervises a child process and stops it
//! gracefully when the download is cancelled.

use std::time::Duration;

use tokio::process::Child;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// How a supervised process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessExit {
    /// The process exited on its own. `None` when it was killed by a signal.
    Exited(Option<i32>),
    /// Cancellation was requested and the process has been stopped.
    Cancelled,
    /// Waiting on the process failed.
    WaitFailed(String),
}

/// Spawn a task that waits for a process to exit and reports how it ended.
///
/// If the cancellation token is triggered first, the process is asked to
/// stop (SIGINT on unix, a kill request elsewhere) and given `grace` to exit
/// before it is force-killed. [`ProcessExit::Cancelled`] is reported only
/// once the process is gone.
pub fn spawn_process_waiter(
    mut child: Child,
    cancellation_token: CancellationToken,
    grace: Duration,
) -> oneshot::Receiver<ProcessExit> {
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let exit = tokio::select! {
            status = child.wait() => match status {
                Ok(exit_status) => {
                    let code = exit_status.code();
                    if let Some(c) = code
                        && c != 0
                    {
                        warn!("Process exited with code: {}", c);
                    }
                    ProcessExit::Exited(code)
                }
                Err(e) => {
                    error!("Error waiting for process: {}", e);
                    ProcessExit::WaitFailed(e.to_string())
                }
            },
            _ = cancellation_token.cancelled() => {
                terminate_gracefully(&mut child, grace).await;
                ProcessExit::Cancelled
            }
        };
        let _ = tx.send(exit);
    });

    rx
}

/// Ask a child to stop, escalating to a hard kill after `grace`.
pub async fn terminate_gracefully(child: &mut Child, grace: Duration) {
    let Some(pid) = child.id() else {
        // Already reaped.
        return;
    };

    if let Err(e) = process_utils::interrupt(pid) {
        debug!(pid, "Interrupt not delivered ({}), requesting kill", e);
        if let Err(e) = child.start_kill() {
            warn!(pid, "Failed to request process kill: {}", e);
        }
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => debug!(pid, ?status, "Process stopped after interrupt"),
        Ok(Err(e)) => warn!(pid, "Error waiting for interrupted process: {}", e),
        Err(_) => {
            warn!(
                pid,
                grace_ms = grace.as_millis() as u64,
                "Process did not exit within grace period, killing"
            );
            if let Err(e) = child.kill().await {
                error!(pid, "Failed to kill process: {}", e);
            }
        }
    }
}
