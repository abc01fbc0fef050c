//! Connection tracking and OS signal handling for graceful shutdown.
//!
//! The engine-level state machine lives in [`hashd_core::ShutdownCoordinator`];
//! this module feeds it from SIGINT/SIGTERM and tracks open connections so
//! the server can let in-flight requests finish before draining workers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use hashd_core::ShutdownCoordinator;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Spawns a task that requests shutdown on SIGINT or SIGTERM.
///
/// If no signal handler can be installed the failure is logged and the
/// task exits; `/shutdown` still works.
pub fn spawn_signal_listener(coordinator: ShutdownCoordinator) -> JoinHandle<()> {
    tokio::spawn(async move {
        match wait_for_os_signal().await {
            Ok(signal) => {
                tracing::info!(signal, "received signal, initiating graceful shutdown");
                coordinator.request_shutdown();
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install signal handlers");
            }
        }
    })
}

/// Waits for SIGTERM or SIGINT and returns its name.
///
/// On non-Unix systems only Ctrl+C is observed.
async fn wait_for_os_signal() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => Ok("SIGTERM"),
            _ = sigint.recv() => Ok("SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok("Ctrl+C")
    }
}

/// Tracks active connections during shutdown.
///
/// When all [`ConnectionToken`]s are dropped, [`wait_idle`] completes.
///
/// # Example
///
/// ```rust
/// use hashd_server::shutdown::ConnectionTracker;
///
/// let tracker = ConnectionTracker::new();
///
/// let token = tracker.acquire();
/// assert_eq!(tracker.active_connections(), 1);
///
/// drop(token);
/// assert_eq!(tracker.active_connections(), 0);
/// ```
///
/// [`wait_idle`]: ConnectionTracker::wait_idle
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active: Arc<AtomicUsize>,
    notify: Arc<Notify>,
}

impl ConnectionTracker {
    /// Creates a new connection tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires a token to hold for the lifetime of a connection.
    #[must_use]
    pub fn acquire(&self) -> ConnectionToken {
        self.active.fetch_add(1, Ordering::SeqCst);
        ConnectionToken {
            active: Arc::clone(&self.active),
            notify: Arc::clone(&self.notify),
        }
    }

    /// Returns the number of active connections.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Waits until no connections are active.
    ///
    /// Completes immediately if there are none.
    pub async fn wait_idle(&self) {
        loop {
            // Register interest before reading the count, otherwise a token
            // dropped in between would wake nobody.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.active.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// A token representing an active connection.
#[derive(Debug)]
pub struct ConnectionToken {
    active: Arc<AtomicUsize>,
    notify: Arc<Notify>,
}

impl Drop for ConnectionToken {
    fn drop(&mut self) {
        if self.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notify.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_test::{assert_pending, assert_ready, task};

    #[test]
    fn test_connection_tracker_counts() {
        let tracker = ConnectionTracker::new();
        let first = tracker.acquire();
        let second = tracker.clone().acquire();

        assert_eq!(tracker.active_connections(), 2);

        drop(first);
        assert_eq!(tracker.active_connections(), 1);

        drop(second);
        assert_eq!(tracker.active_connections(), 0);
    }

    #[test]
    fn test_wait_idle_immediate() {
        let tracker = ConnectionTracker::new();
        let mut wait = task::spawn(tracker.wait_idle());
        assert_ready!(wait.poll());
    }

    #[test]
    fn test_wait_idle_wakes_on_last_token() {
        let tracker = ConnectionTracker::new();
        let first = tracker.acquire();
        let second = tracker.acquire();

        let mut wait = task::spawn(tracker.wait_idle());
        assert_pending!(wait.poll());

        drop(first);
        assert_pending!(wait.poll());

        drop(second);
        assert!(wait.is_woken());
        assert_ready!(wait.poll());
    }

    #[tokio::test]
    async fn test_wait_idle_across_tasks() {
        let tracker = ConnectionTracker::new();
        let token = tracker.acquire();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            drop(token);
        });

        tokio::time::timeout(Duration::from_secs(1), tracker.wait_idle())
            .await
            .expect("wait_idle should complete once the token drops");
    }
}
