use std::sync::Arc;
use std::time::Duration;

use common::shutdown::ShutdownCoordinator;
use common::storage::{spawn_health_probe, KeySpace, KvStore};
use rand::Rng;
use resource_service::auth::TokenIssuer;
use resource_service::config::AppConfig;
use resource_service::notify::RedisNotifier;
use resource_service::store::{MemoryStore, Store, User};
use resource_service::{app, AppState};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();
    let shutdown = Arc::new(ShutdownCoordinator::new(SHUTDOWN_GRACE));

    let kv = KvStore::connect(&config.redis, KeySpace::default()).await?;
    let probe = spawn_health_probe(kv.clone(), shutdown.subscribe());
    shutdown.register("key-value-store", move || async move {
        let _ = probe.await;
    });

    let store = Arc::new(MemoryStore::new());
    bootstrap_admin(store.as_ref()).await?;

    let state = AppState {
        store,
        notifier: Arc::new(RedisNotifier::new(kv)),
        tokens: Arc::new(TokenIssuer::new(config.jwt_key.clone(), config.token_ttl_secs)),
    };

    let listener = TcpListener::bind(config.bind_addr).await?;
    info!("resource-service listening on {}", config.bind_addr);

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

/// Seed the administrator account the first requests authenticate as.
async fn bootstrap_admin(store: &dyn Store) -> anyhow::Result<()> {
    let password = match std::env::var("BOOTSTRAP_ADMIN_PASSWORD") {
        Ok(password) if !password.is_empty() => password,
        _ => {
            let generated = hex::encode(rand::thread_rng().gen::<[u8; 16]>());
            warn!(
                password = %generated,
                "BOOTSTRAP_ADMIN_PASSWORD not set, generated a one-off admin password"
            );
            generated
        }
    };

    let admin = User::new("admin", &password, "admin@localhost", true)
        .map_err(|e| anyhow::anyhow!("failed to create bootstrap admin: {e}"))?;
    store
        .create_user(admin)
        .await
        .map_err(|e| anyhow::anyhow!("failed to store bootstrap admin: {e}"))?;
    Ok(())
}
