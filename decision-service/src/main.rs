use std::sync::Arc;
use std::time::Duration;

use common::shutdown::ShutdownCoordinator;
use common::storage::{spawn_health_probe, KeySpace, KvStore};
use decision_service::analytics::Analytics;
use decision_service::cache::SnapshotCache;
use decision_service::client::HttpPlatformClient;
use decision_service::config::AppConfig;
use decision_service::loader::Loader;
use decision_service::metrics::ServiceMetrics;
use decision_service::{app, AppState};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const ANALYTICS_KEY_PREFIX: &str = "analytics-";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();
    let shutdown = Arc::new(ShutdownCoordinator::new(SHUTDOWN_GRACE));

    // Key-value store plus its health probe; the probe owns the
    // process-wide connectedness flag from here on.
    let store = KvStore::connect(&config.redis, KeySpace::default()).await?;
    let probe = spawn_health_probe(store.clone(), shutdown.subscribe());
    shutdown.register("key-value-store", move || async move {
        let _ = probe.await;
    });

    // Snapshot cache and its coherence loader.
    let client = Arc::new(HttpPlatformClient::new(
        &config.resource_service_url,
        config.upstream_timeout,
    )?);
    let cache = SnapshotCache::instance_or_init(client);
    let metrics = Arc::new(ServiceMetrics::new()?);

    let loader = Arc::new(Loader::new(
        Arc::clone(&cache),
        Arc::new(store.clone()),
        config.reload_tick,
        Arc::clone(&metrics),
    ));
    let (subscriber, ticker) = loader.start(&shutdown).await;
    shutdown.register("coherence-loader", move || async move {
        let _ = subscriber.await;
        let _ = ticker.await;
    });

    // Audit analytics pipeline.
    let analytics_store = store.with_keyspace(KeySpace::new(ANALYTICS_KEY_PREFIX));
    let analytics = Arc::new(Analytics::new(
        config.analytics.clone(),
        Arc::new(analytics_store),
    ));
    analytics.start();
    let analytics_hook = Arc::clone(&analytics);
    shutdown.register("analytics-pipeline", move || async move {
        analytics_hook.stop().await;
    });

    // HTTP server, drained first on shutdown (hooks run in reverse order).
    let state = AppState {
        cache,
        analytics,
        metrics,
        audience: config.audience.clone(),
    };
    let listener = TcpListener::bind(config.bind_addr).await?;
    info!("decision-service listening on {}", config.bind_addr);

    let mut server_shutdown = shutdown.subscribe();
    let server = axum::serve(listener, app(state)).with_graceful_shutdown(async move {
        let _ = server_shutdown.recv().await;
    });
    let server_task = tokio::spawn(async move {
        if let Err(e) = server.await {
            error!("http server failed: {e}");
        }
    });
    shutdown.register("http-server", move || async move {
        let _ = server_task.await;
    });

    shutdown.run().await;
    Ok(())
}
