//! The audit analytics fan-in pipeline.
//!
//! Producers push one [`AuditRecord`] per decision into a bounded channel; a
//! pool of workers encodes them (MessagePack) and appends them in pipelined
//! batches to the shared list key. When the channel is full `record_hit`
//! blocks its caller; that backpressure is what keeps memory bounded.
//! During shutdown the stop flag makes `record_hit` a silent drop while the
//! workers drain everything already accepted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use common::model::Effect;
use common::storage::{KvStore, StorageError};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// The shared list key every replica appends to.
pub const ANALYTICS_KEY: &str = "iam-system-analytics";

/// Hard upper bound between flushes, regardless of the configured interval.
const FORCE_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// One audit entry. `request`, `policies`, and `deciders` carry
/// JSON-serialized copies of the decision inputs so the record is
/// self-contained once it leaves the process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: i64,
    pub username: String,
    pub effect: Effect,
    pub conclusion: String,
    pub request: String,
    pub policies: String,
    pub deciders: String,
    pub expire_at: i64,
}

impl AuditRecord {
    /// Stamp `expire_at` from a retention in seconds; a retention of `0`
    /// pins the record to a 100-year horizon.
    pub fn set_expiry(&mut self, retention_secs: i64) {
        let retention = if retention_secs == 0 {
            100 * 365 * 24 * 3600
        } else {
            retention_secs
        };
        self.expire_at = chrono::Utc::now().timestamp() + retention;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsOptions {
    /// Worker count.
    pub pool_size: usize,
    /// Channel capacity; each worker buffers `records_buffer_size / pool_size`.
    pub records_buffer_size: usize,
    /// Per-worker flush timer in milliseconds.
    pub flush_interval_ms: u64,
    /// TTL for the shared list key; `<= 0` disables expiry.
    pub storage_expiration_secs: i64,
    pub enable: bool,
}

impl Default for AnalyticsOptions {
    fn default() -> Self {
        Self {
            pool_size: 8,
            records_buffer_size: 2000,
            flush_interval_ms: 200,
            storage_expiration_secs: 86400,
            enable: true,
        }
    }
}

impl AnalyticsOptions {
    fn worker_buffer_size(&self) -> usize {
        (self.records_buffer_size / self.pool_size.max(1)).max(1)
    }

    fn expiration(&self) -> Option<Duration> {
        (self.storage_expiration_secs > 0)
            .then(|| Duration::from_secs(self.storage_expiration_secs as u64))
    }
}

/// Where flushed batches go. The key-value store in production; a recording
/// sink in tests.
#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    async fn append_batch(
        &self,
        key: &str,
        records: &[Vec<u8>],
        expiration: Option<Duration>,
    ) -> Result<(), StorageError>;
}

#[async_trait]
impl AnalyticsStore for KvStore {
    async fn append_batch(
        &self,
        key: &str,
        records: &[Vec<u8>],
        expiration: Option<Duration>,
    ) -> Result<(), StorageError> {
        self.append_to_list_pipelined(key, records, expiration).await
    }
}

pub struct Analytics {
    store: Arc<dyn AnalyticsStore>,
    options: AnalyticsOptions,
    sender: Mutex<Option<mpsc::Sender<AuditRecord>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    should_stop: AtomicBool,
}

impl Analytics {
    #[must_use]
    pub fn new(options: AnalyticsOptions, store: Arc<dyn AnalyticsStore>) -> Self {
        Self {
            store,
            options,
            sender: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
            should_stop: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn options(&self) -> &AnalyticsOptions {
        &self.options
    }

    /// Spawn the worker pool. Calling `start` again after `stop` brings the
    /// pipeline back with a fresh channel.
    pub fn start(&self) {
        self.should_stop.store(false, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(self.options.records_buffer_size);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut handles = Vec::with_capacity(self.options.pool_size);
        for _ in 0..self.options.pool_size {
            handles.push(tokio::spawn(record_worker(
                Arc::clone(&self.store),
                Arc::clone(&rx),
                self.options.worker_buffer_size(),
                Duration::from_millis(self.options.flush_interval_ms),
                self.options.expiration(),
            )));
        }

        *self.sender.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
        *self.workers.lock().unwrap_or_else(|e| e.into_inner()) = handles;
        debug!(
            pool_size = self.options.pool_size,
            worker_buffer = self.options.worker_buffer_size(),
            "analytics pipeline started"
        );
    }

    /// Submit one record. Silently dropped once shutdown began; otherwise
    /// this blocks the caller while the channel is at capacity, which is the
    /// documented backpressure contract.
    pub async fn record_hit(&self, record: AuditRecord) {
        if !self.options.enable || self.should_stop.load(Ordering::SeqCst) {
            return;
        }

        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(sender) = sender {
            if sender.send(record).await.is_err() {
                // The channel closed between the flag check and the send;
                // shutdown is in progress and the drop is intentional.
                warn!("audit record dropped during pipeline shutdown");
            }
        }
    }

    /// Stop accepting records, drain, and wait for every worker. Everything
    /// accepted before this call is in the store when it returns.
    pub async fn stop(&self) {
        self.should_stop.store(true, Ordering::SeqCst);

        // Dropping the sender closes the channel; workers drain and exit.
        self.sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        let handles = {
            let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *workers)
        };
        for handle in handles {
            if let Err(e) = handle.await {
                error!("analytics worker exited abnormally: {e}");
            }
        }
        debug!("analytics pipeline drained");
    }
}

async fn record_worker(
    store: Arc<dyn AnalyticsStore>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<AuditRecord>>>,
    worker_buffer: usize,
    flush_interval: Duration,
    expiration: Option<Duration>,
) {
    let mut buffer: Vec<Vec<u8>> = Vec::with_capacity(worker_buffer);
    let mut last_flush = Instant::now();

    loop {
        let mut ready_to_send = false;

        tokio::select! {
            record = async { rx.lock().await.recv().await } => {
                match record {
                    Some(record) => {
                        match rmp_serde::to_vec_named(&record) {
                            Ok(encoded) => buffer.push(encoded),
                            Err(e) => error!("failed to encode audit record: {e}"),
                        }
                        ready_to_send = buffer.len() >= worker_buffer;
                    }
                    None => {
                        // Channel closed: flush the remainder and exit.
                        flush(store.as_ref(), &mut buffer, expiration).await;
                        return;
                    }
                }
            }
            () = tokio::time::sleep(flush_interval) => {
                ready_to_send = true;
            }
        }

        if !buffer.is_empty()
            && (ready_to_send || last_flush.elapsed() >= FORCE_FLUSH_INTERVAL)
        {
            flush(store.as_ref(), &mut buffer, expiration).await;
            last_flush = Instant::now();
        }
    }
}

async fn flush(store: &dyn AnalyticsStore, buffer: &mut Vec<Vec<u8>>, expiration: Option<Duration>) {
    if buffer.is_empty() {
        return;
    }
    if let Err(e) = store.append_batch(ANALYTICS_KEY, buffer, expiration).await {
        // Never propagated to the request path: log and drop.
        error!(records = buffer.len(), "failed to flush audit batch: {e}");
    }
    buffer.clear();
}
