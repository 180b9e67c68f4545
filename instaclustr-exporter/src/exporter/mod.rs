use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use thiserror::Error as ThisError;
use tokio::sync::watch;
use tracing::info;

/// Error types possible from an exporter.
#[derive(Debug, ThisError)]
pub enum ExporterError {
    /// The listening socket could not be registered with the runtime.
    #[error("failed to register HTTP listener: {0}")]
    HttpListener(#[from] io::Error),
}

/// Convenience type for Future implementing an exporter.
pub type ExporterFuture = Pin<Box<dyn Future<Output = Result<(), ExporterError>> + Send + 'static>>;

struct ShutdownState {
    requested: AtomicBool,
    tx: watch::Sender<bool>,
}

/// Requests a graceful shutdown of a running exporter.
///
/// Cloning is cheap; all clones control the same exporter.
#[derive(Clone)]
pub struct ShutdownHandle {
    state: Arc<ShutdownState>,
}

impl ShutdownHandle {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { state: Arc::new(ShutdownState { requested: AtomicBool::new(false), tx }) }
    }

    /// Asks the exporter to stop.
    ///
    /// Only the first call has any effect; it returns `true`. Later calls return `false`.
    pub fn shutdown(&self) -> bool {
        if self
            .state
            .requested
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!("Shutdown already in progress...");
            return false;
        }

        self.state.tx.send_replace(true);
        true
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.state.requested.load(Ordering::Acquire)
    }

    /// Waits until shutdown has been requested.
    pub async fn wait(&self) {
        let mut rx = self.state.tx.subscribe();
        // The sender lives as long as `self`, so this only returns once the flag is set.
        let _ = rx.wait_for(|requested| *requested).await;
    }
}

/// Triggers `handle` on SIGINT or SIGTERM.
pub async fn shutdown_on_signal(handle: ShutdownHandle) {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::warn!(error = %e, "failed to listen for SIGINT");
                return;
            }
            info!("Shutdown request (signal: SIGINT)");
        }
        () = terminate => info!("Shutdown request (signal: SIGTERM)"),
        () = handle.wait() => return,
    }

    handle.shutdown();
}

mod http_listener;

pub(crate) mod builder;
