//! Environment-driven configuration for the decision service.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use common::storage::RedisConfig;

use crate::analytics::AnalyticsOptions;

/// Audience expected in bearer tokens presented to `/v1/authz`.
pub const DEFAULT_AUDIENCE: &str = "iam.authz.local";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub resource_service_url: String,
    pub audience: String,
    /// Cadence of the coherence loader's drain loop.
    pub reload_tick: Duration,
    pub upstream_timeout: Duration,
    pub redis: RedisConfig,
    pub analytics: AnalyticsOptions,
}

impl AppConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let port: u16 = env_parse("PORT", 8082);
        let host: IpAddr = std::env::var("HOST")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

        let mut analytics = AnalyticsOptions::default();
        analytics.pool_size = env_parse("ANALYTICS_POOL_SIZE", analytics.pool_size);
        analytics.records_buffer_size =
            env_parse("ANALYTICS_BUFFER_SIZE", analytics.records_buffer_size);
        analytics.flush_interval_ms =
            env_parse("ANALYTICS_FLUSH_INTERVAL_MS", analytics.flush_interval_ms);
        analytics.storage_expiration_secs = env_parse(
            "ANALYTICS_STORAGE_EXPIRATION_SECS",
            analytics.storage_expiration_secs,
        );
        if let Ok(enable) = std::env::var("ANALYTICS_ENABLE") {
            analytics.enable = enable == "1" || enable.eq_ignore_ascii_case("true");
        }

        Self {
            bind_addr: SocketAddr::new(host, port),
            resource_service_url: std::env::var("RESOURCE_SERVICE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8081".to_string()),
            audience: std::env::var("AUTHZ_AUDIENCE")
                .unwrap_or_else(|_| DEFAULT_AUDIENCE.to_string()),
            reload_tick: Duration::from_millis(env_parse("RELOAD_TICK_MS", 1000)),
            upstream_timeout: Duration::from_secs(env_parse("UPSTREAM_TIMEOUT_SECS", 10)),
            redis: RedisConfig::from_env(),
            analytics,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, fallback: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(fallback)
}
