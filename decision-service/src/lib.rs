//! The decision service answers `POST /v1/authz` from a local snapshot.
//!
//! Request path: bearer authentication (keys from the snapshot cache) →
//! policy evaluation → audit record into the analytics pipeline → decision.
//! Control path: invalidation notices from the resource service coalesce
//! into at most one snapshot reload per tick.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

pub mod analytics;
pub mod authn;
pub mod cache;
pub mod client;
pub mod config;
pub mod engine;
pub mod handlers;
pub mod loader;
pub mod metrics;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::analytics::Analytics;
use crate::cache::SnapshotCache;
use crate::metrics::ServiceMetrics;

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<SnapshotCache>,
    pub analytics: Arc<Analytics>,
    pub metrics: Arc<ServiceMetrics>,
    pub audience: String,
}

pub fn app(state: AppState) -> Router {
    let protected = Router::new()
        .route("/v1/authz", post(handlers::authorize))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            authn::bearer_auth,
        ));

    Router::new()
        .route("/healthz", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .merge(protected)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
