//! Replica pull surface: unpaged listings of the full secret and policy
//! universe, consumed by decision-service snapshot reloads.

use axum::extract::{Query, State};
use axum::Json;
use common::errors::AppError;
use common::model::{ListResponse, Policy, Secret};

use super::PageParams;
use crate::AppState;

pub async fn list_secrets(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> Result<Json<ListResponse<Secret>>, AppError> {
    let (total, items) = state.store.list_secrets(params.offset, params.limit).await?;
    Ok(Json(ListResponse { total, items }))
}

pub async fn list_policies(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> Result<Json<ListResponse<Policy>>, AppError> {
    let (total, items) = state
        .store
        .list_policies(params.offset, params.limit)
        .await?;
    Ok(Json(ListResponse { total, items }))
}
