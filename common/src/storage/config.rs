//! Redis connection configuration covering all three deployment topologies.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

const MAX_POOL_SIZE: u32 = 1000;

#[derive(Debug, Error)]
pub enum RedisConfigError {
    #[error("invalid Redis address list: {0}")]
    InvalidAddrs(String),
    #[error("invalid pool size: must be between 1 and {max}")]
    InvalidPoolSize { max: u32 },
    #[error("invalid timeout: must be greater than 0")]
    InvalidTimeout,
    #[error("sentinel master name and cluster mode are mutually exclusive")]
    AmbiguousTopology,
}

/// Which kind of deployment the adapter talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    Single,
    Sentinel,
    Cluster,
}

/// Connection options for the key-value store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Host used when `addrs` is empty.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port used when `addrs` is empty.
    #[serde(default = "default_port")]
    pub port: u16,

    /// `host:port` list; multiple entries select sentinel or cluster nodes.
    #[serde(default)]
    pub addrs: Vec<String>,

    /// Sentinel master set name; non-empty selects the failover topology.
    #[serde(default)]
    pub master_name: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Logical database, ignored in cluster mode.
    #[serde(default)]
    pub database: i64,

    /// Maximum sockets per node.
    #[serde(default = "default_max_active")]
    pub max_active: u32,

    /// Dial/read/write timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub enable_cluster: bool,

    /// When true, pipelined batch appends refresh the destination key's TTL
    /// on every write; when false a TTL is stamped only if the key has none
    /// yet.
    #[serde(default)]
    pub always_refresh_list_ttl: bool,

    /// When true, rolling-window updates run `EXPIRE` inside every update
    /// pipeline; when false the TTL is stamped only if the key has none
    /// yet.
    #[serde(default = "default_true")]
    pub always_refresh_window_ttl: bool,
}

const fn default_port() -> u16 {
    6379
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_max_active() -> u32 {
    500
}

const fn default_timeout_secs() -> u64 {
    5
}

const fn default_true() -> bool {
    true
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            addrs: Vec::new(),
            master_name: String::new(),
            username: String::new(),
            password: String::new(),
            database: 0,
            max_active: default_max_active(),
            timeout_secs: default_timeout_secs(),
            enable_cluster: false,
            always_refresh_list_ttl: false,
            always_refresh_window_ttl: true,
        }
    }
}

impl RedisConfig {
    /// Read connection settings from `REDIS_*` environment variables,
    /// falling back to the single-node defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(host) = std::env::var("REDIS_HOST") {
            config.host = host;
        }
        if let Ok(port) = std::env::var("REDIS_PORT") {
            if let Ok(port) = port.parse() {
                config.port = port;
            }
        }
        if let Ok(addrs) = std::env::var("REDIS_ADDRS") {
            config.addrs = addrs
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
                .collect();
        }
        if let Ok(master) = std::env::var("REDIS_MASTER_NAME") {
            config.master_name = master;
        }
        if let Ok(password) = std::env::var("REDIS_PASSWORD") {
            config.password = password;
        }
        if let Ok(cluster) = std::env::var("REDIS_ENABLE_CLUSTER") {
            config.enable_cluster = cluster == "1" || cluster.eq_ignore_ascii_case("true");
        }
        config
    }

    pub fn validate(&self) -> Result<(), RedisConfigError> {
        if !self.master_name.is_empty() && self.enable_cluster {
            return Err(RedisConfigError::AmbiguousTopology);
        }
        if self.addrs.is_empty() && self.host.is_empty() {
            return Err(RedisConfigError::InvalidAddrs(
                "no addresses and no host configured".to_string(),
            ));
        }
        if self.addrs.iter().any(|a| !a.contains(':')) {
            return Err(RedisConfigError::InvalidAddrs(
                "addresses must be host:port".to_string(),
            ));
        }
        if self.max_active == 0 || self.max_active > MAX_POOL_SIZE {
            return Err(RedisConfigError::InvalidPoolSize { max: MAX_POOL_SIZE });
        }
        if self.timeout_secs == 0 {
            return Err(RedisConfigError::InvalidTimeout);
        }
        Ok(())
    }

    #[must_use]
    pub fn topology(&self) -> Topology {
        if !self.master_name.is_empty() {
            Topology::Sentinel
        } else if self.enable_cluster {
            Topology::Cluster
        } else {
            Topology::Single
        }
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// `host:port` pairs to dial: the explicit list, or the single
    /// host/port fallback.
    #[must_use]
    pub fn addresses(&self) -> Vec<String> {
        if self.addrs.is_empty() {
            vec![format!("{}:{}", self.host, self.port)]
        } else {
            self.addrs.clone()
        }
    }

    /// Full connection URL for one `host:port` pair, carrying credentials
    /// and (outside cluster mode) the database index.
    #[must_use]
    pub fn url_for(&self, addr: &str) -> String {
        let auth = if self.password.is_empty() {
            String::new()
        } else if self.username.is_empty() {
            format!(":{}@", self.password)
        } else {
            format!("{}:{}@", self.username, self.password)
        };

        if self.enable_cluster {
            format!("redis://{auth}{addr}")
        } else {
            format!("redis://{auth}{addr}/{}", self.database)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid_single_node() {
        let config = RedisConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.topology(), Topology::Single);
        assert_eq!(config.addresses(), vec!["127.0.0.1:6379".to_string()]);
    }

    #[test]
    fn master_name_selects_sentinel() {
        let config = RedisConfig {
            master_name: "mymaster".into(),
            addrs: vec!["10.0.0.1:26379".into(), "10.0.0.2:26379".into()],
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.topology(), Topology::Sentinel);
    }

    #[test]
    fn cluster_flag_selects_cluster() {
        let config = RedisConfig {
            enable_cluster: true,
            addrs: vec!["10.0.0.1:6379".into()],
            ..Default::default()
        };
        assert_eq!(config.topology(), Topology::Cluster);
    }

    #[test]
    fn sentinel_plus_cluster_is_rejected() {
        let config = RedisConfig {
            master_name: "mymaster".into(),
            enable_cluster: true,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(RedisConfigError::AmbiguousTopology)
        ));
    }

    #[test]
    fn ttl_refresh_flags_default_per_operation() {
        let config = RedisConfig::default();
        // Batch appends stamp a TTL only when the key has none; rolling
        // windows refresh it on every update.
        assert!(!config.always_refresh_list_ttl);
        assert!(config.always_refresh_window_ttl);
    }

    #[test]
    fn bad_addr_is_rejected() {
        let config = RedisConfig {
            addrs: vec!["not-an-addr".into()],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn urls_carry_credentials_and_database() {
        let config = RedisConfig {
            password: "hunter2".into(),
            database: 3,
            ..Default::default()
        };
        assert_eq!(
            config.url_for("127.0.0.1:6379"),
            "redis://:hunter2@127.0.0.1:6379/3"
        );

        let cluster = RedisConfig {
            enable_cluster: true,
            ..Default::default()
        };
        assert_eq!(cluster.url_for("10.0.0.1:6379"), "redis://10.0.0.1:6379");
    }
}
