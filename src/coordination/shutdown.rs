//! Cooperative stop signal
//!
//! Checked by the crawl loop at every item boundary and raced against every
//! pacing sleep, so a run ends between items rather than mid-item.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Cloneable handle; any clone can trigger, every clone observes
#[derive(Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Request a stop. Idempotent.
    pub fn trigger(&self) {
        if !*self.tx.borrow() {
            info!("Stop requested; finishing current item");
        }
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once a stop has been requested
    pub async fn stopped(&self) {
        let mut rx = self.rx.clone();
        // The sender lives in `self`, so this only errors after every handle is gone
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

/// Trigger `stop` on Ctrl+C or SIGTERM
pub fn install_signal_handlers(stop: StopSignal) {
    tokio::spawn(async move {
        shutdown_signal().await;
        stop.trigger();
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
