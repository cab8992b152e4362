//! HTTP handlers for the decision service.

use std::time::Instant;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use common::errors::AppError;
use common::model::Effect;
use serde::Serialize;
use tracing::debug;

use crate::analytics::AuditRecord;
use crate::engine::{self, AuthzRequest, Decision};
use crate::AppState;

/// `POST /v1/authz`: evaluate one request against the caller's cached
/// policies. Always answers with a decision; a missing snapshot simply means
/// no policy allows access.
pub async fn authorize(
    State(state): State<AppState>,
    Json(request): Json<AuthzRequest>,
) -> Result<Json<Decision>, AppError> {
    let Some(username) = request.username().map(ToString::to_string) else {
        return Err(AppError::Validation(
            "request context must carry a username".into(),
        ));
    };

    let start = Instant::now();
    let policies = state.cache.get_policies(&username).await;
    let verdict = engine::evaluate(&policies, &request);
    state
        .metrics
        .observe_decision(verdict.decision.allowed, start.elapsed());

    debug!(
        username = %username,
        allowed = verdict.decision.allowed,
        deciders = verdict.decision.deciders.len(),
        "authorization decision made"
    );

    let mut record = AuditRecord {
        timestamp: chrono::Utc::now().timestamp(),
        username,
        effect: if verdict.decision.allowed {
            Effect::Allow
        } else {
            Effect::Deny
        },
        conclusion: verdict.conclusion.clone(),
        request: serde_json::to_string(&request).unwrap_or_default(),
        policies: serde_json::to_string(&policies).unwrap_or_default(),
        deciders: serde_json::to_string(&verdict.deciders).unwrap_or_default(),
        expire_at: 0,
    };
    record.set_expiry(0);

    state.metrics.audit_records_total.inc();
    // May block briefly when the pipeline is at capacity; that backpressure
    // is the bound on audit memory.
    state.analytics.record_hit(record).await;

    Ok(Json(verdict.decision))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub store_connected: bool,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        store_connected: common::storage::connected(),
    })
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.export()
}
