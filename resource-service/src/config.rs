//! Environment-driven configuration for the resource service.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use common::storage::RedisConfig;
use tracing::warn;

const DEV_JWT_KEY: &str = "insecure-dev-signing-key";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// Key for this service's own session tokens.
    pub jwt_key: String,
    pub token_ttl_secs: i64,
    pub redis: RedisConfig,
}

impl AppConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let port: u16 = std::env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(8081);
        let host: IpAddr = std::env::var("HOST")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

        let jwt_key = std::env::var("JWT_KEY").unwrap_or_else(|_| {
            warn!("JWT_KEY not set, using the insecure development key");
            DEV_JWT_KEY.to_string()
        });

        let token_ttl_secs = std::env::var("TOKEN_TTL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3600);

        Self {
            bind_addr: SocketAddr::new(host, port),
            jwt_key,
            token_ttl_secs,
            redis: RedisConfig::from_env(),
        }
    }
}
