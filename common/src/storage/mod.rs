//! Semantic adapter over the shared key-value store.
//!
//! One handle works across the three deployment topologies (single node,
//! sentinel failover, cluster). Keys are transparently prefixed and
//! optionally hashed; list/set/sorted-set operations, a pipelined batch
//! append, a rolling-window primitive, keyspace scans, and pub/sub are
//! exposed with the platform's semantics rather than raw commands.
//!
//! A background probe round-trips a `SET`/`GET` every second and publishes
//! the result in a process-wide flag; every data-path operation checks that
//! flag first and fails fast with [`StorageError::Down`] instead of piling
//! up on a dead connection.

mod config;

pub use config::{RedisConfig, RedisConfigError, Topology};

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::stream::{BoxStream, StreamExt};
use redis::aio::ConnectionManager;
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use redis::sentinel::Sentinel;
use redis::FromRedisValue;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage is either down or not configured")]
    Down,

    #[error("key not found")]
    KeyNotFound,

    #[error("redis command failed: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("payload encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("invalid storage configuration: {0}")]
    Config(#[from] RedisConfigError),
}

// Process-wide connectedness flag, fed by the health probe. Initialized by
// `KvStore::connect` and owned by `spawn_health_probe` afterwards.
static STORE_UP: AtomicBool = AtomicBool::new(false);

/// True when the last health probe round-tripped successfully.
#[must_use]
pub fn connected() -> bool {
    STORE_UP.load(Ordering::Relaxed)
}

fn set_connected(up: bool) {
    STORE_UP.store(up, Ordering::Relaxed);
}

/// Key namespace: prefix plus optional hashing of the key body.
#[derive(Debug, Clone, Default)]
pub struct KeySpace {
    pub prefix: String,
    pub hash_keys: bool,
}

impl KeySpace {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            hash_keys: false,
        }
    }

    fn hash_key(&self, key: &str) -> String {
        if self.hash_keys {
            hex::encode(Sha256::digest(key.as_bytes()))
        } else {
            key.to_string()
        }
    }

    #[must_use]
    pub fn fix_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, self.hash_key(key))
    }

    #[must_use]
    pub fn clean_key(&self, key: &str) -> String {
        key.strip_prefix(&self.prefix).unwrap_or(key).to_string()
    }
}

#[derive(Clone)]
enum Backend {
    Single(ConnectionManager),
    Sentinel(ConnectionManager),
    Cluster(ClusterConnection),
}

/// Handle over the key-value store. Cheap to clone; all clones share the
/// underlying multiplexed connections.
#[derive(Clone)]
pub struct KvStore {
    backend: Backend,
    // Scan target for single/sentinel (the resolved master). Cluster
    // masters shift under resharding and failover, so they are discovered
    // from cluster state per scan instead of being held here.
    scan_clients: Vec<redis::Client>,
    pubsub_client: redis::Client,
    keyspace: KeySpace,
    config: RedisConfig,
}

impl KvStore {
    /// Dial the configured topology and run one probe round-trip so the
    /// connectedness flag starts out truthful.
    pub async fn connect(config: &RedisConfig, keyspace: KeySpace) -> Result<Self, StorageError> {
        config.validate()?;

        let addrs = config.addresses();
        let urls: Vec<String> = addrs.iter().map(|a| config.url_for(a)).collect();

        let (backend, scan_clients, pubsub_client) = match config.topology() {
            Topology::Sentinel => {
                debug!(master = %config.master_name, "connecting via sentinel failover");
                let mut sentinel = Sentinel::build(urls.clone())?;
                let master = sentinel.async_master_for(&config.master_name, None).await?;
                let manager = master.get_connection_manager().await?;
                (
                    Backend::Sentinel(manager),
                    vec![master.clone()],
                    master,
                )
            }
            Topology::Cluster => {
                debug!(nodes = addrs.len(), "connecting cluster client");
                let cluster = ClusterClient::new(urls.clone())?;
                let connection = cluster.get_async_connection().await?;
                let pubsub_client = redis::Client::open(urls[0].as_str())?;
                (Backend::Cluster(connection), Vec::new(), pubsub_client)
            }
            Topology::Single => {
                debug!(addr = %addrs[0], "connecting single-node client");
                let client = redis::Client::open(urls[0].as_str())?;
                let manager = client.get_connection_manager().await?;
                (Backend::Single(manager), vec![client.clone()], client)
            }
        };

        let store = Self {
            backend,
            scan_clients,
            pubsub_client,
            keyspace,
            config: config.clone(),
        };

        set_connected(store.probe().await);
        Ok(store)
    }

    #[must_use]
    pub fn key_prefix(&self) -> &str {
        &self.keyspace.prefix
    }

    /// A handle over the same connections but a different key namespace.
    #[must_use]
    pub fn with_keyspace(&self, keyspace: KeySpace) -> Self {
        Self {
            keyspace,
            ..self.clone()
        }
    }

    fn up(&self) -> Result<(), StorageError> {
        if connected() {
            Ok(())
        } else {
            Err(StorageError::Down)
        }
    }

    async fn query<T: FromRedisValue>(&self, cmd: &redis::Cmd) -> Result<T, StorageError> {
        let result = match &self.backend {
            Backend::Single(conn) | Backend::Sentinel(conn) => {
                cmd.query_async(&mut conn.clone()).await
            }
            Backend::Cluster(conn) => cmd.query_async(&mut conn.clone()).await,
        };
        result.map_err(StorageError::from)
    }

    async fn query_pipe<T: FromRedisValue>(
        &self,
        pipe: &redis::Pipeline,
    ) -> Result<T, StorageError> {
        let result = match &self.backend {
            Backend::Single(conn) | Backend::Sentinel(conn) => {
                pipe.query_async(&mut conn.clone()).await
            }
            Backend::Cluster(conn) => pipe.query_async(&mut conn.clone()).await,
        };
        result.map_err(StorageError::from)
    }

    // === strings ===

    pub async fn get_key(&self, key: &str) -> Result<String, StorageError> {
        self.up()?;
        let value: Option<String> = self
            .query(redis::cmd("GET").arg(self.keyspace.fix_key(key)))
            .await?;
        value.ok_or(StorageError::KeyNotFound)
    }

    pub async fn set_key(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        self.up()?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.keyspace.fix_key(key)).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl.as_secs().max(1));
        }
        self.query(&cmd).await
    }

    pub async fn delete_key(&self, key: &str) -> Result<bool, StorageError> {
        self.up()?;
        let removed: i64 = self
            .query(redis::cmd("DEL").arg(self.keyspace.fix_key(key)))
            .await?;
        Ok(removed > 0)
    }

    pub async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        self.up()?;
        let found: i64 = self
            .query(redis::cmd("EXISTS").arg(self.keyspace.fix_key(key)))
            .await?;
        Ok(found == 1)
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StorageError> {
        self.up()?;
        self.query(
            redis::cmd("EXPIRE")
                .arg(self.keyspace.fix_key(key))
                .arg(ttl.as_secs().max(1)),
        )
        .await
    }

    /// Seconds to live: `-1` means no TTL, `-2` means no such key.
    pub async fn ttl(&self, key: &str) -> Result<i64, StorageError> {
        self.up()?;
        self.query(redis::cmd("TTL").arg(self.keyspace.fix_key(key)))
            .await
    }

    // === lists ===

    pub async fn append_to_list(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.up()?;
        self.query(redis::cmd("RPUSH").arg(self.keyspace.fix_key(key)).arg(value))
            .await
    }

    pub async fn list_range(
        &self,
        key: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<String>, StorageError> {
        self.up()?;
        self.query(
            redis::cmd("LRANGE")
                .arg(self.keyspace.fix_key(key))
                .arg(from)
                .arg(to),
        )
        .await
    }

    pub async fn remove_from_list(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.up()?;
        self.query(
            redis::cmd("LREM")
                .arg(self.keyspace.fix_key(key))
                .arg(0)
                .arg(value),
        )
        .await
    }

    /// Append a batch of encoded records in a single pipeline. When
    /// `expiration` is given, the key's TTL is stamped only if it has none
    /// yet, unless `always_refresh_list_ttl` was configured.
    pub async fn append_to_list_pipelined(
        &self,
        key: &str,
        values: &[Vec<u8>],
        expiration: Option<Duration>,
    ) -> Result<(), StorageError> {
        if values.is_empty() {
            return Ok(());
        }
        self.up()?;

        let fixed = self.keyspace.fix_key(key);
        let mut pipe = redis::pipe();
        for value in values {
            pipe.cmd("RPUSH").arg(&fixed).arg(value.as_slice()).ignore();
        }
        self.query_pipe::<()>(&pipe).await?;

        if let Some(expiration) = expiration {
            if self.config.always_refresh_list_ttl || self.ttl(key).await? == -1 {
                self.expire(key, expiration).await?;
            }
        }

        Ok(())
    }

    // === sets ===

    pub async fn add_to_set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.up()?;
        self.query(redis::cmd("SADD").arg(self.keyspace.fix_key(key)).arg(value))
            .await
    }

    pub async fn remove_from_set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.up()?;
        self.query(redis::cmd("SREM").arg(self.keyspace.fix_key(key)).arg(value))
            .await
    }

    pub async fn set_members(&self, key: &str) -> Result<Vec<String>, StorageError> {
        self.up()?;
        self.query(redis::cmd("SMEMBERS").arg(self.keyspace.fix_key(key)))
            .await
    }

    pub async fn is_member_of_set(&self, key: &str, value: &str) -> Result<bool, StorageError> {
        self.up()?;
        self.query(
            redis::cmd("SISMEMBER")
                .arg(self.keyspace.fix_key(key))
                .arg(value),
        )
        .await
    }

    // === sorted sets ===

    pub async fn add_to_sorted_set(
        &self,
        key: &str,
        member: &str,
        score: f64,
    ) -> Result<(), StorageError> {
        self.up()?;
        self.query(
            redis::cmd("ZADD")
                .arg(self.keyspace.fix_key(key))
                .arg(score)
                .arg(member),
        )
        .await
    }

    /// Members and scores within `[score_from, score_to]`; bounds take the
    /// usual `-inf`/`+inf` forms.
    pub async fn sorted_set_range(
        &self,
        key: &str,
        score_from: &str,
        score_to: &str,
    ) -> Result<Vec<(String, f64)>, StorageError> {
        self.up()?;
        self.query(
            redis::cmd("ZRANGEBYSCORE")
                .arg(self.keyspace.fix_key(key))
                .arg(score_from)
                .arg(score_to)
                .arg("WITHSCORES"),
        )
        .await
    }

    pub async fn remove_sorted_set_range(
        &self,
        key: &str,
        score_from: &str,
        score_to: &str,
    ) -> Result<(), StorageError> {
        self.up()?;
        self.query(
            redis::cmd("ZREMRANGEBYSCORE")
                .arg(self.keyspace.fix_key(key))
                .arg(score_from)
                .arg(score_to),
        )
        .await
    }

    /// Rolling-window update: atomically drop entries older than the
    /// window, add one scored now, and read back the survivors. Scores are
    /// unix milliseconds. Returns the surviving member count and members.
    /// The window key's TTL is refreshed inside the pipeline unless
    /// `always_refresh_window_ttl` was disabled, in which case it is
    /// stamped only when absent.
    pub async fn set_rolling_window(
        &self,
        key: &str,
        window: Duration,
        member: Option<&str>,
    ) -> Result<(usize, Vec<String>), StorageError> {
        self.up()?;

        let fixed = self.keyspace.fix_key(key);
        let now_ms = chrono::Utc::now().timestamp_millis();
        let cutoff = now_ms - window.as_millis() as i64;
        let member = member
            .map(ToString::to_string)
            .unwrap_or_else(|| now_ms.to_string());

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(&fixed)
            .arg("-inf")
            .arg(cutoff)
            .ignore()
            .cmd("ZADD")
            .arg(&fixed)
            .arg(now_ms)
            .arg(&member)
            .ignore()
            .cmd("ZRANGE")
            .arg(&fixed)
            .arg(0)
            .arg(-1);
        if self.config.always_refresh_window_ttl {
            pipe.cmd("EXPIRE").arg(&fixed).arg(window.as_secs().max(1)).ignore();
        }

        let (members,): (Vec<String>,) = self.query_pipe(&pipe).await?;

        if !self.config.always_refresh_window_ttl && self.ttl(key).await? == -1 {
            self.expire(key, window).await?;
        }

        Ok((members.len(), members))
    }

    // === scans ===

    /// Cursor-based `SCAN` over raw key patterns; never a blocking `KEYS`.
    /// On cluster topology the scan fans out across the master shards,
    /// enumerated from live cluster state on every call so resharding and
    /// failover are honored and replicas are never scanned.
    pub async fn scan_match(&self, pattern: &str) -> Result<Vec<String>, StorageError> {
        self.up()?;

        let clients = match &self.backend {
            Backend::Cluster(_) => self.cluster_master_clients().await?,
            _ => self.scan_clients.clone(),
        };

        let mut keys = Vec::new();
        for client in &clients {
            keys.extend(scan_node(client, pattern).await?);
        }
        Ok(keys)
    }

    // One client per master currently reported by `CLUSTER SLOTS`.
    async fn cluster_master_clients(&self) -> Result<Vec<redis::Client>, StorageError> {
        let slots: redis::Value = self.query(redis::cmd("CLUSTER").arg("SLOTS")).await?;
        let mut clients = Vec::new();
        for (host, port) in master_endpoints_from_slots(&slots) {
            let url = self.config.url_for(&format!("{host}:{port}"));
            clients.push(redis::Client::open(url.as_str())?);
        }
        Ok(clients)
    }

    /// All keys in this keyspace matching `filter`, with the prefix
    /// stripped from the results.
    pub async fn keys(&self, filter: &str) -> Result<Vec<String>, StorageError> {
        let pattern = format!("{}{}*", self.keyspace.prefix, self.keyspace.hash_key(filter));
        let keys = self.scan_match(&pattern).await?;
        Ok(keys.iter().map(|k| self.keyspace.clean_key(k)).collect())
    }

    /// Scan-and-delete for a raw pattern. Returns how many keys went away.
    pub async fn delete_scan_match(&self, pattern: &str) -> Result<usize, StorageError> {
        let keys = self.scan_match(pattern).await?;
        for key in &keys {
            self.query::<()>(redis::cmd("DEL").arg(key)).await?;
        }
        if keys.is_empty() {
            debug!(pattern, "scan-delete matched nothing");
        }
        Ok(keys.len())
    }

    // === pub/sub ===

    pub async fn publish(&self, channel: &str, message: &str) -> Result<(), StorageError> {
        self.up()?;
        self.query(redis::cmd("PUBLISH").arg(channel).arg(message))
            .await
    }

    /// Subscribe to a channel. Fails immediately when the subscription
    /// cannot be established so the caller owns the retry policy.
    pub async fn subscribe(
        &self,
        channel: &str,
    ) -> Result<BoxStream<'static, String>, StorageError> {
        self.up()?;
        let mut pubsub = self.pubsub_client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;

        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| async move {
                match msg.get_payload::<String>() {
                    Ok(payload) => Some(payload),
                    Err(e) => {
                        warn!("dropping non-text pub/sub payload: {e}");
                        None
                    }
                }
            })
            .boxed();
        Ok(stream)
    }

    // === health ===

    /// One probe round-trip: SET then GET of a throwaway key. Bypasses the
    /// connectedness gate, since it is what feeds that gate.
    pub async fn probe(&self) -> bool {
        let probe_key = format!("{}probe-{}", self.keyspace.prefix, Uuid::new_v4());

        let set: Result<(), StorageError> = self
            .query(redis::cmd("SET").arg(&probe_key).arg("probe").arg("EX").arg(1))
            .await;
        if let Err(e) = set {
            warn!("health probe SET failed: {e}");
            return false;
        }

        let get: Result<Option<String>, StorageError> =
            self.query(redis::cmd("GET").arg(&probe_key)).await;
        match get {
            Ok(_) => true,
            Err(e) => {
                warn!("health probe GET failed: {e}");
                false
            }
        }
    }
}

// `CLUSTER SLOTS` replies with one entry per slot range:
// [start, end, master, replica, ...] where each node is [host, port, id, ...].
// Only the master (index 2) is a scan target; ranges served by the same
// master collapse to one endpoint.
fn master_endpoints_from_slots(slots: &redis::Value) -> Vec<(String, u16)> {
    let redis::Value::Array(ranges) = slots else {
        return Vec::new();
    };

    let mut endpoints = BTreeSet::new();
    for range in ranges {
        let redis::Value::Array(parts) = range else {
            continue;
        };
        let Some(redis::Value::Array(master)) = parts.get(2) else {
            continue;
        };

        let host = match master.first() {
            Some(redis::Value::BulkString(bytes)) => String::from_utf8_lossy(bytes).to_string(),
            Some(redis::Value::SimpleString(host)) => host.clone(),
            _ => continue,
        };
        let Some(redis::Value::Int(port)) = master.get(1) else {
            continue;
        };
        endpoints.insert((host, *port as u16));
    }

    endpoints.into_iter().collect()
}

async fn scan_node(client: &redis::Client, pattern: &str) -> Result<Vec<String>, StorageError> {
    let mut conn = client.get_multiplexed_async_connection().await?;
    let mut keys = Vec::new();
    let mut cursor: u64 = 0;
    loop {
        let (next, mut batch): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(128)
            .query_async(&mut conn)
            .await?;
        keys.append(&mut batch);
        if next == 0 {
            break;
        }
        cursor = next;
    }
    Ok(keys)
}

/// Run the 1 s probe loop until the shutdown broadcast fires. The flag is
/// left `false` on the way out so late operations fail fast.
pub fn spawn_health_probe(
    store: KvStore,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    set_connected(false);
                    return;
                }
                _ = tick.tick() => {
                    let up = store.probe().await;
                    if up != connected() {
                        if up {
                            debug!("key-value store is reachable again");
                        } else {
                            error!("key-value store became unreachable");
                        }
                    }
                    set_connected(up);
                }
            }
        }
    })
}
