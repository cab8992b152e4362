//! Invalidation notifier middleware.
//!
//! After a mutating request under `/v1/policies` or `/v1/secrets` completes
//! with HTTP 200, a signed notification goes out on the shared channel so
//! decision replicas reload their snapshots. Publish failures are logged
//! and never change the response.

use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use common::notification::{Notification, NotificationCommand, NOTIFICATION_CHANNEL};
use common::storage::{KvStore, StorageError};
use tracing::{debug, error};

use crate::AppState;

/// Publish seam; the Redis-backed implementation is the production one and
/// router tests record through a mock.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), StorageError>;
}

pub struct RedisNotifier {
    store: KvStore,
    channel: String,
}

impl RedisNotifier {
    #[must_use]
    pub fn new(store: KvStore) -> Self {
        Self {
            store,
            channel: NOTIFICATION_CHANNEL.to_string(),
        }
    }
}

#[async_trait]
impl Notifier for RedisNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), StorageError> {
        let payload = serde_json::to_string(&notification)?;
        self.store.publish(&self.channel, &payload).await
    }
}

pub async fn publish_invalidation(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    if response.status() != StatusCode::OK {
        debug!(status = %response.status(), "mutation did not succeed, skipping invalidation");
        return response;
    }
    if !is_mutating(&method) {
        return response;
    }

    // Path shape: /v1/<resource>[/<name>].
    let resource = path.split('/').nth(2).unwrap_or_default();
    let command = match resource {
        "policies" => NotificationCommand::PolicyChanged,
        "secrets" => NotificationCommand::SecretChanged,
        _ => return response,
    };

    match state.notifier.notify(Notification::new(command)).await {
        Ok(()) => debug!(method = %method, command = command.as_str(), "invalidation published"),
        Err(e) => error!(command = command.as_str(), "failed to publish invalidation: {e}"),
    }

    response
}

fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::DELETE | Method::PATCH
    )
}
