//! HTTP handlers for the resource service.

pub mod auth;
pub mod internal;
pub mod policies;
pub mod secrets;
pub mod users;

use axum::Json;
use serde::{Deserialize, Serialize};

/// Offset/limit query parameters; `limit = -1` means unpaged.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageParams {
    #[serde(default)]
    pub offset: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

const fn default_limit() -> i64 {
    -1
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
