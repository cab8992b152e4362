//! Policy CRUD. Owner-scoped like secrets; every successful mutation makes
//! the notifier middleware broadcast a `PolicyChanged` invalidation.

use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use common::errors::AppError;
use common::model::{ListResponse, Policy, PolicyDocument};
use serde::Deserialize;
use tracing::info;

use super::PageParams;
use crate::auth::AuthenticatedUser;
use crate::store::page;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreatePolicyRequest {
    pub name: String,
    pub policy: PolicyDocument,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePolicyRequest {
    pub policy: PolicyDocument,
}

pub async fn create(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
    Json(body): Json<CreatePolicyRequest>,
) -> Result<Json<Policy>, AppError> {
    if body.name.is_empty() {
        return Err(AppError::Validation("policy name must be non-empty".into()));
    }

    let policy = Policy {
        name: body.name,
        username: caller.0.clone(),
        policy: body.policy,
    };
    state.store.create_policy(policy.clone()).await?;
    info!(policy = %policy.name, owner = %caller.0, "policy created");
    Ok(Json(policy))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
    Query(params): Query<PageParams>,
) -> Result<Json<ListResponse<Policy>>, AppError> {
    let (_, all) = state.store.list_policies(0, -1).await?;
    let mine: Vec<Policy> = all
        .into_iter()
        .filter(|policy| policy.username == caller.0)
        .collect();
    let total = mine.len() as u64;
    Ok(Json(ListResponse {
        total,
        items: page(&mine, params.offset, params.limit),
    }))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
    Path(name): Path<String>,
) -> Result<Json<Policy>, AppError> {
    let policy = state.store.get_policy(&name).await?;
    if policy.username != caller.0 {
        return Err(AppError::NotFound("policy".into()));
    }
    Ok(Json(policy))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
    Path(name): Path<String>,
    Json(body): Json<UpdatePolicyRequest>,
) -> Result<Json<Policy>, AppError> {
    let mut policy = state.store.get_policy(&name).await?;
    if policy.username != caller.0 {
        return Err(AppError::NotFound("policy".into()));
    }

    policy.policy = body.policy;
    state.store.update_policy(policy.clone()).await?;
    info!(policy = %name, owner = %caller.0, "policy updated");
    Ok(Json(policy))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let policy = state.store.get_policy(&name).await?;
    if policy.username != caller.0 {
        return Err(AppError::NotFound("policy".into()));
    }
    state.store.delete_policy(&name).await?;
    info!(policy = %name, owner = %caller.0, "policy deleted");
    Ok(Json(serde_json::Value::Null))
}
