//! Shared daemon state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;

/// Shared daemon state handle.
pub type SharedState = Arc<DaemonState>;

/// State shared between the tick loop and the signal handler.
#[derive(Debug)]
pub struct DaemonState {
    /// Shutdown flag (atomic for lock-free checking).
    shutdown: AtomicBool,
    /// Wakes the tick loop when shutdown is requested mid-interval.
    shutdown_notify: Notify,
    /// Time when the daemon started.
    started_at: DateTime<Utc>,
}

impl DaemonState {
    /// Create a new state handle.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shutdown: AtomicBool::new(false),
            shutdown_notify: Notify::new(),
            started_at: Utc::now(),
        }
    }

    /// Check if shutdown has been requested.
    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Request shutdown. The tick loop stops after its current tick.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.shutdown_notify.notify_one();
    }

    /// Resolves once shutdown is requested.
    ///
    /// Supports a single waiter; a request made before the call is not lost.
    pub async fn shutdown_requested(&self) {
        if !self.is_shutdown_requested() {
            self.shutdown_notify.notified().await;
        }
    }

    /// Get daemon uptime in seconds.
    #[must_use]
    #[allow(clippy::cast_sign_loss)] // max(0) ensures non-negative
    pub fn uptime_secs(&self) -> u64 {
        (Utc::now() - self.started_at).num_seconds().max(0) as u64
    }
}

impl Default for DaemonState {
    fn default() -> Self {
        Self::new()
    }
}
