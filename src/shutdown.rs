//! Process-wide shutdown flag
//!
//! `Shutdown` is the bridge's `running` flag inverted: it starts clear and
//! is set exactly once. Requesting shutdown only flips an atomic and wakes
//! waiters; all I/O and resource release happens on the tasks that observe it.

use crate::error::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::info;

struct Inner {
    requested: AtomicBool,
    notify: Notify,
}

/// Cloneable handle to the shutdown flag
#[derive(Clone)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                requested: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Request shutdown
    ///
    /// Returns true for the call that actually flipped the flag.
    /// Later calls are no-ops.
    pub fn trigger(&self) -> bool {
        let first = !self.inner.requested.swap(true, Ordering::SeqCst);
        if first {
            self.inner.notify.notify_waiters();
        }
        first
    }

    /// True once shutdown has been requested
    #[inline]
    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// True while the bridge should keep running
    #[inline]
    pub fn is_running(&self) -> bool {
        !self.is_requested()
    }

    /// Resolves once shutdown has been requested
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent trigger is not missed
        notified.as_mut().enable();
        if self.is_requested() {
            return;
        }
        notified.await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Install SIGINT/SIGTERM handling that triggers `shutdown`
///
/// Must be called from within the runtime. Registration happens before this
/// returns, so failure to install is reported to the caller.
#[cfg(unix)]
pub fn install_signal_handlers(shutdown: Shutdown) -> Result<()> {
    use crate::error::BridgeError;
    use tokio::signal::unix::{signal, SignalKind};

    let map_err = |source| BridgeError::SignalInstall { source };
    let mut sigterm = signal(SignalKind::terminate()).map_err(map_err)?;
    let mut sigint = signal(SignalKind::interrupt()).map_err(map_err)?;

    tokio::spawn(async move {
        loop {
            let name = tokio::select! {
                _ = sigterm.recv() => "SIGTERM",
                _ = sigint.recv() => "SIGINT",
            };
            if shutdown.trigger() {
                info!("Received {}, shutting down", name);
            } else {
                info!("Received {}, shutdown already in progress", name);
            }
        }
    });

    Ok(())
}

#[cfg(not(unix))]
pub fn install_signal_handlers(shutdown: Shutdown) -> Result<()> {
    // ctrl_c registers lazily; a registration failure surfaces in the task
    tokio::spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Ctrl-C handler failed: {}", e);
                shutdown.trigger();
                break;
            }
            if shutdown.trigger() {
                info!("Received Ctrl-C, shutting down");
            } else {
                info!("Received Ctrl-C, shutdown already in progress");
            }
        }
    });

    Ok(())
}
