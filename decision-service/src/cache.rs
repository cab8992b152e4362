//! The per-replica snapshot of secrets and policies.
//!
//! Readers are on the request path and must never block behind a reload:
//! `reload` builds both replacement maps entirely off-line from two pulls
//! and swaps each `Arc` under a momentary write lock. A failed pull keeps
//! the previous snapshot untouched.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use common::model::{Policy, Secret};
use once_cell::sync::OnceCell;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::client::{ClientError, PlatformClient};

const RELOAD_ATTEMPTS: u32 = 3;
const RELOAD_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("secret not found")]
    SecretNotFound,

    #[error("reload failed: {0}")]
    Reload(#[from] ClientError),
}

static INSTANCE: OnceCell<Arc<SnapshotCache>> = OnceCell::new();

pub struct SnapshotCache {
    client: Arc<dyn PlatformClient>,
    secrets: RwLock<Arc<HashMap<String, Secret>>>,
    policies: RwLock<Arc<HashMap<String, Vec<Policy>>>>,
}

impl SnapshotCache {
    #[must_use]
    pub fn new(client: Arc<dyn PlatformClient>) -> Self {
        Self {
            client,
            secrets: RwLock::new(Arc::new(HashMap::new())),
            policies: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// The process-wide cache. The first caller wins and binds the client;
    /// later calls return the existing instance. One cache per replica is a
    /// documented invariant: the loader and every request handler must
    /// observe the same snapshot.
    pub fn instance_or_init(client: Arc<dyn PlatformClient>) -> Arc<Self> {
        INSTANCE.get_or_init(|| Arc::new(Self::new(client))).clone()
    }

    pub async fn get_secret(&self, secret_id: &str) -> Result<Secret, CacheError> {
        let snapshot = self.secrets.read().await.clone();
        snapshot
            .get(secret_id)
            .cloned()
            .ok_or(CacheError::SecretNotFound)
    }

    /// The user's policy list; an unknown user gets an empty list, never an
    /// error.
    pub async fn get_policies(&self, username: &str) -> Vec<Policy> {
        let snapshot = self.policies.read().await.clone();
        snapshot.get(username).cloned().unwrap_or_default()
    }

    /// Pull the full universe and replace both maps. The two swaps are
    /// independent of each other, but each swap is atomic from a reader's
    /// point of view.
    pub async fn reload(&self) -> Result<(), CacheError> {
        let secrets = {
            let client = Arc::clone(&self.client);
            retry_pull("secrets", move || {
                let client = Arc::clone(&client);
                async move { client.list_secrets().await }
            })
            .await?
        };
        let secret_count = secrets.len();
        let secret_map: HashMap<String, Secret> = secrets
            .into_iter()
            .map(|secret| (secret.secret_id.clone(), secret))
            .collect();
        *self.secrets.write().await = Arc::new(secret_map);

        let policies = {
            let client = Arc::clone(&self.client);
            retry_pull("policies", move || {
                let client = Arc::clone(&client);
                async move { client.list_policies().await }
            })
            .await?
        };
        let policy_count = policies.len();
        let mut policy_map: HashMap<String, Vec<Policy>> = HashMap::new();
        for policy in policies {
            policy_map
                .entry(policy.username.clone())
                .or_default()
                .push(policy);
        }
        *self.policies.write().await = Arc::new(policy_map);

        info!(secrets = secret_count, policies = policy_count, "snapshot reloaded");
        Ok(())
    }
}

async fn retry_pull<T, F, Fut>(what: &str, mut pull: F) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let mut delay = RELOAD_BACKOFF;
    let mut attempt = 1;
    loop {
        match pull().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= RELOAD_ATTEMPTS {
                    return Err(err);
                }
                warn!(what, attempt, "snapshot pull failed, retrying: {err}");
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::model::{Effect, PolicyDocument};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct FakeClient {
        secrets: Vec<Secret>,
        policies: Vec<Policy>,
        fail: AtomicBool,
        calls: AtomicU32,
    }

    impl FakeClient {
        fn new(secrets: Vec<Secret>, policies: Vec<Policy>) -> Self {
            Self {
                secrets,
                policies,
                fail: AtomicBool::new(false),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl PlatformClient for FakeClient {
        async fn list_secrets(&self) -> Result<Vec<Secret>, ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(ClientError::Status(503));
            }
            Ok(self.secrets.clone())
        }

        async fn list_policies(&self) -> Result<Vec<Policy>, ClientError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(ClientError::Status(503));
            }
            Ok(self.policies.clone())
        }
    }

    fn secret(id: &str, username: &str) -> Secret {
        Secret {
            secret_id: id.into(),
            username: username.into(),
            secret_key: "key-material".into(),
            expires: 0,
            description: String::new(),
        }
    }

    fn policy(name: &str, username: &str) -> Policy {
        Policy {
            name: name.into(),
            username: username.into(),
            policy: PolicyDocument {
                subjects: vec![format!("users:{username}")],
                actions: vec!["articles:read".into()],
                resources: vec![format!("articles:{username}:*")],
                effect: Effect::Allow,
                conditions: Default::default(),
            },
        }
    }

    #[tokio::test]
    async fn reload_populates_both_maps() {
        let client = Arc::new(FakeClient::new(
            vec![secret("S1", "alice")],
            vec![policy("P1", "alice"), policy("P2", "alice")],
        ));
        let cache = SnapshotCache::new(client);

        cache.reload().await.unwrap();

        assert_eq!(cache.get_secret("S1").await.unwrap().username, "alice");
        assert_eq!(cache.get_policies("alice").await.len(), 2);
    }

    #[tokio::test]
    async fn unknown_lookups_behave_per_contract() {
        let cache = SnapshotCache::new(Arc::new(FakeClient::new(vec![], vec![])));
        cache.reload().await.unwrap();

        assert!(matches!(
            cache.get_secret("missing").await,
            Err(CacheError::SecretNotFound)
        ));
        // Unknown user yields an empty list, not an error.
        assert!(cache.get_policies("nobody").await.is_empty());
    }

    #[tokio::test]
    async fn failed_reload_preserves_previous_snapshot() {
        let client = Arc::new(FakeClient::new(
            vec![secret("S1", "alice")],
            vec![policy("P1", "alice")],
        ));
        let cache = SnapshotCache::new(Arc::clone(&client) as Arc<dyn PlatformClient>);
        cache.reload().await.unwrap();

        client.fail.store(true, Ordering::SeqCst);
        assert!(cache.reload().await.is_err());

        assert!(cache.get_secret("S1").await.is_ok());
        assert_eq!(cache.get_policies("alice").await.len(), 1);
    }

    #[tokio::test]
    async fn failing_pull_is_retried_three_times() {
        let client = Arc::new(FakeClient::new(vec![], vec![]));
        client.fail.store(true, Ordering::SeqCst);
        let cache = SnapshotCache::new(Arc::clone(&client) as Arc<dyn PlatformClient>);

        assert!(cache.reload().await.is_err());
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn reload_replaces_rather_than_merges() {
        let client = Arc::new(FakeClient::new(
            vec![secret("S1", "alice"), secret("S2", "bob")],
            vec![],
        ));
        let cache = SnapshotCache::new(Arc::clone(&client) as Arc<dyn PlatformClient>);
        cache.reload().await.unwrap();
        assert!(cache.get_secret("S2").await.is_ok());

        // Shrink the universe; a reload must drop the stale entry.
        let shrunk = Arc::new(FakeClient::new(vec![secret("S1", "alice")], vec![]));
        let cache = SnapshotCache::new(shrunk);
        cache.reload().await.unwrap();
        assert!(cache.get_secret("S2").await.is_err());
        assert!(cache.get_secret("S1").await.is_ok());
    }
}
