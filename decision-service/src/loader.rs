//! The coherence loader keeps the snapshot in step with the authoritative
//! store.
//!
//! A subscriber task turns each valid invalidation notice into an entry in
//! the `pending` buffer; a tick task drains the buffer once per interval and
//! runs at most one reload, however many notices arrived. Callbacks ride
//! along solely so tests can observe a completed cycle.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use common::notification::{Notification, NOTIFICATION_CHANNEL};
use common::shutdown::ShutdownCoordinator;
use common::storage::{KvStore, StorageError};
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::SnapshotCache;
use crate::metrics::ServiceMetrics;

const SUBSCRIBE_RETRY: Duration = Duration::from_secs(10);

pub type ReloadCallback = Box<dyn FnOnce() + Send>;

/// Where invalidation notices come from. Production subscribes through the
/// key-value store; tests feed a channel-backed stream.
#[async_trait]
pub trait NotificationBus: Send + Sync {
    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, String>, StorageError>;
}

#[async_trait]
impl NotificationBus for KvStore {
    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, String>, StorageError> {
        KvStore::subscribe(self, channel).await
    }
}

pub struct Loader {
    cache: Arc<SnapshotCache>,
    bus: Arc<dyn NotificationBus>,
    metrics: Arc<ServiceMetrics>,
    pending: Mutex<Vec<Option<ReloadCallback>>>,
    tick: Duration,
}

impl Loader {
    #[must_use]
    pub fn new(
        cache: Arc<SnapshotCache>,
        bus: Arc<dyn NotificationBus>,
        tick: Duration,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            cache,
            bus,
            metrics,
            pending: Mutex::new(Vec::new()),
            tick,
        }
    }

    /// Run one immediate reload, then spawn the subscriber and tick loops.
    pub async fn start(
        self: &Arc<Self>,
        shutdown: &ShutdownCoordinator,
    ) -> (JoinHandle<()>, JoinHandle<()>) {
        self.do_reload().await;

        let subscriber = tokio::spawn(Arc::clone(self).subscriber_loop(shutdown.subscribe()));
        let ticker = tokio::spawn(Arc::clone(self).tick_loop(shutdown.subscribe()));
        (subscriber, ticker)
    }

    /// Queue a reload for the next tick. Production callers enqueue `None`;
    /// tests pass a callback to observe the completed cycle.
    pub fn enqueue_reload(&self, callback: Option<ReloadCallback>) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.push(callback);
    }

    /// One drain cycle: swap out the buffer and, when it was non-empty, run
    /// exactly one reload followed by the queued callbacks.
    pub async fn drain_once(&self) {
        let drained = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *pending)
        };
        if drained.is_empty() {
            return;
        }

        let start = Instant::now();
        self.do_reload().await;
        for callback in drained.into_iter().flatten() {
            callback();
        }
        info!(elapsed_ms = start.elapsed().as_millis() as u64, "reload cycle completed");
    }

    async fn tick_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut tick = tokio::time::interval(self.tick);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The startup reload already ran; skip the interval's immediate fire.
        tick.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.recv() => return,
                _ = tick.tick() => self.drain_once().await,
            }
        }
    }

    async fn subscriber_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        loop {
            let subscription = tokio::select! {
                _ = shutdown.recv() => return,
                result = self.bus.subscribe(NOTIFICATION_CHANNEL) => result,
            };

            match subscription {
                Ok(mut messages) => {
                    debug!(channel = NOTIFICATION_CHANNEL, "subscribed to invalidation channel");
                    loop {
                        tokio::select! {
                            _ = shutdown.recv() => return,
                            message = messages.next() => match message {
                                Some(payload) => self.handle_notification(&payload),
                                None => {
                                    warn!("invalidation subscription closed by peer");
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(StorageError::Down) => {}
                Err(e) => {
                    error!(
                        retry_secs = SUBSCRIBE_RETRY.as_secs(),
                        "invalidation subscription failed, will retry: {e}"
                    );
                }
            }

            tokio::select! {
                _ = shutdown.recv() => return,
                () = tokio::time::sleep(SUBSCRIBE_RETRY) => {}
            }
        }
    }

    /// Validate one raw message from the channel. Malformed payloads, bad
    /// signatures, and unknown commands are logged and dropped; only a
    /// verified notice queues a reload.
    pub fn handle_notification(&self, payload: &str) {
        let value: serde_json::Value = match serde_json::from_str(payload) {
            Ok(value) => value,
            Err(e) => {
                error!("dropping malformed notification: {e}");
                return;
            }
        };

        let command = value
            .get("command")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();
        if command != "PolicyChanged" && command != "SecretChanged" {
            warn!(command = %command, "dropping notification with unknown command");
            return;
        }

        let notification: Notification = match serde_json::from_value(value) {
            Ok(notification) => notification,
            Err(e) => {
                error!("dropping malformed notification: {e}");
                return;
            }
        };

        if !notification.verify_signature() {
            warn!(command = %command, "dropping notification with invalid signature");
            return;
        }

        info!(command = %command, "invalidation received, reload queued");
        self.enqueue_reload(None);
    }

    async fn do_reload(&self) {
        match self.cache.reload().await {
            Ok(()) => {
                self.metrics.snapshot_reloads_total.inc();
                debug!("snapshot refresh succeeded");
            }
            Err(e) => {
                self.metrics.snapshot_reload_failures_total.inc();
                error!("failed to refresh snapshot, keeping previous: {e}");
            }
        }
    }
}
