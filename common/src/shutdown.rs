//! Ordered graceful shutdown.
//!
//! Services register named hooks during startup; on SIGTERM/SIGINT the
//! coordinator broadcasts a cancellation to every long-running task and then
//! runs the hooks in reverse registration order, each bounded by the grace
//! window. A second signal aborts immediately with exit code 1.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

type Hook = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<()>,
    hooks: Mutex<Vec<(String, Hook)>>,
    grace: Duration,
}

impl ShutdownCoordinator {
    #[must_use]
    pub fn new(grace: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            shutdown_tx,
            hooks: Mutex::new(Vec::new()),
            grace,
        }
    }

    /// Receiver for the cancellation broadcast. Every spawned loop selects
    /// on this next to its own work.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Register a hook. Hooks run in reverse registration order, so register
    /// in startup order: the last subsystem brought up is the first torn
    /// down.
    pub fn register<F, Fut>(&self, name: &str, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut hooks = self.hooks.lock().unwrap_or_else(|e| e.into_inner());
        hooks.push((name.to_string(), Box::new(move || Box::pin(hook()))));
    }

    /// Block until a termination signal arrives, then drain. Returns once
    /// every hook has run (or timed out).
    pub async fn run(&self) {
        wait_for_signal().await;
        info!("termination signal received, starting graceful shutdown");

        if self.shutdown_tx.send(()).is_err() {
            warn!("no tasks were listening for the shutdown broadcast");
        }

        // A second signal bypasses the drain entirely.
        tokio::spawn(async {
            wait_for_signal().await;
            error!("second termination signal received, exiting immediately");
            std::process::exit(1);
        });

        let hooks = {
            let mut guard = self.hooks.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };

        for (name, hook) in hooks.into_iter().rev() {
            info!(hook = %name, "running shutdown hook");
            if tokio::time::timeout(self.grace, hook()).await.is_err() {
                warn!(hook = %name, timeout_secs = self.grace.as_secs(), "shutdown hook timed out");
            }
        }

        info!("graceful shutdown complete");
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to listen for SIGINT: {e}");
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
                error!("failed to register SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn hooks_run_in_reverse_registration_order() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        let order = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            coordinator.register(name, move || async move {
                order.lock().unwrap().push(name);
            });
        }

        // Drive the drain directly rather than delivering a real signal.
        let hooks = {
            let mut guard = coordinator.hooks.lock().unwrap();
            std::mem::take(&mut *guard)
        };
        for (_, hook) in hooks.into_iter().rev() {
            hook().await;
        }

        assert_eq!(*order.lock().unwrap(), vec!["third", "second", "first"]);
    }

    #[tokio::test]
    async fn slow_hooks_are_bounded_by_the_grace_window() {
        let coordinator = ShutdownCoordinator::new(Duration::from_millis(20));
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = Arc::clone(&ran);

        coordinator.register("slow", move || async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            ran_clone.fetch_add(1, Ordering::SeqCst);
        });

        let hooks = {
            let mut guard = coordinator.hooks.lock().unwrap();
            std::mem::take(&mut *guard)
        };
        for (_, hook) in hooks.into_iter().rev() {
            let _ = tokio::time::timeout(coordinator.grace, hook()).await;
        }

        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn subscribers_observe_the_broadcast() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        let mut rx = coordinator.subscribe();
        coordinator.shutdown_tx.send(()).unwrap();
        assert!(rx.recv().await.is_ok());
    }
}
