use axum::Router;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// How long the gateway waits for in-flight requests after a signal.
pub const GATEWAY_GRACE: Duration = Duration::from_secs(30);
/// Same, for the internal portfolio service.
pub const SERVICE_GRACE: Duration = Duration::from_secs(10);

/// Process-wide stop flag. Background loops hold a receiver and exit when it
/// flips to `true`.
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves once `rx` reads `true` or its sender is gone.
pub async fn wait(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Ctrl+C or SIGTERM. A handler that cannot be installed never fires.
pub async fn signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
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

    info!("Shutdown signal received");
}

/// Serves `app` until a signal arrives, then stops accepting, flips
/// `shutdown` and gives open connections `grace` to finish.
pub async fn serve(listener: TcpListener, app: Router, shutdown: &Shutdown, grace: Duration) -> anyhow::Result<()> {
    let stop = shutdown.subscribe();
    let mut server = tokio::spawn(async move { axum::serve(listener, app).with_graceful_shutdown(wait(stop)).await });

    tokio::select! {
        result = &mut server => {
            shutdown.trigger();
            return Ok(result??);
        }
        _ = signal() => {}
    }

    info!("Shutting down gracefully...");
    shutdown.trigger();

    match tokio::time::timeout(grace, server).await {
        Ok(result) => {
            result??;
            info!("All connections drained");
        }
        Err(_) => warn!("Connections still open after {:?}; exiting anyway", grace),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_returns_after_trigger() {
        let shutdown = Shutdown::new();
        let rx = shutdown.subscribe();
        let waiter = tokio::spawn(wait(rx));
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish")
            .unwrap();
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn wait_returns_when_already_triggered() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        tokio::time::timeout(Duration::from_millis(100), wait(shutdown.subscribe()))
            .await
            .expect("already triggered");
    }
}
