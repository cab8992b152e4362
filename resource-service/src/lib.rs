//! The resource service owns the authoritative store of users, secrets,
//! and policies, issues session tokens, and broadcasts an invalidation
//! notice after every successful policy or secret mutation.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

pub mod auth;
pub mod config;
pub mod handlers;
pub mod notify;
pub mod store;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::auth::TokenIssuer;
use crate::notify::Notifier;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub notifier: Arc<dyn Notifier>,
    pub tokens: Arc<TokenIssuer>,
}

pub fn app(state: AppState) -> Router {
    // Resource routes: authenticated (auto strategy), with the invalidation
    // notifier wrapped inside authentication so it observes the final
    // status of the business handler.
    let v1 = Router::new()
        .route("/v1/users", get(handlers::users::list).post(handlers::users::create))
        .route(
            "/v1/users/:name",
            get(handlers::users::get)
                .put(handlers::users::update)
                .delete(handlers::users::delete),
        )
        .route(
            "/v1/users/:name/change-password",
            put(handlers::users::change_password),
        )
        .route(
            "/v1/policies",
            get(handlers::policies::list).post(handlers::policies::create),
        )
        .route(
            "/v1/policies/:name",
            get(handlers::policies::get)
                .put(handlers::policies::update)
                .delete(handlers::policies::delete),
        )
        .route(
            "/v1/secrets",
            get(handlers::secrets::list).post(handlers::secrets::create),
        )
        .route(
            "/v1/secrets/:name",
            get(handlers::secrets::get)
                .put(handlers::secrets::update)
                .delete(handlers::secrets::delete),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            notify::publish_invalidation,
        ))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::auto_auth));

    let session = Router::new()
        .route("/logout", post(handlers::auth::logout))
        .route("/refresh", post(handlers::auth::refresh))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::auto_auth));

    Router::new()
        .route("/healthz", get(handlers::health))
        .route("/login", post(handlers::auth::login))
        .route("/internal/v1/secrets", get(handlers::internal::list_secrets))
        .route("/internal/v1/policies", get(handlers::internal::list_policies))
        .merge(v1)
        .merge(session)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
