//! Secret CRUD. Key material is generated server-side; callers only ever
//! choose the description and expiry. All operations are owner-scoped.

use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use common::errors::AppError;
use common::model::{ListResponse, Secret};
use rand::Rng;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use super::PageParams;
use crate::auth::AuthenticatedUser;
use crate::store::page;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateSecretRequest {
    #[serde(default)]
    pub description: String,
    /// Unix seconds; `0` never expires.
    #[serde(default)]
    pub expires: i64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSecretRequest {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub expires: Option<i64>,
}

pub async fn create(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
    Json(body): Json<CreateSecretRequest>,
) -> Result<Json<Secret>, AppError> {
    if body.expires < 0 {
        return Err(AppError::Validation("expires must not be negative".into()));
    }

    let secret = Secret {
        secret_id: Uuid::new_v4().simple().to_string(),
        username: caller.0.clone(),
        secret_key: hex::encode(rand::thread_rng().gen::<[u8; 32]>()),
        expires: body.expires,
        description: body.description,
    };
    state.store.create_secret(secret.clone()).await?;
    info!(secret_id = %secret.secret_id, owner = %caller.0, "secret created");
    Ok(Json(secret))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
    Query(params): Query<PageParams>,
) -> Result<Json<ListResponse<Secret>>, AppError> {
    let (_, all) = state.store.list_secrets(0, -1).await?;
    let mine: Vec<Secret> = all
        .into_iter()
        .filter(|secret| secret.username == caller.0)
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
    Path(secret_id): Path<String>,
) -> Result<Json<Secret>, AppError> {
    let secret = state.store.get_secret(&secret_id).await?;
    if secret.username != caller.0 {
        // Foreign secrets are indistinguishable from absent ones.
        return Err(AppError::NotFound("secret".into()));
    }
    Ok(Json(secret))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
    Path(secret_id): Path<String>,
    Json(body): Json<UpdateSecretRequest>,
) -> Result<Json<Secret>, AppError> {
    let mut secret = state.store.get_secret(&secret_id).await?;
    if secret.username != caller.0 {
        return Err(AppError::NotFound("secret".into()));
    }

    if let Some(description) = body.description {
        secret.description = description;
    }
    if let Some(expires) = body.expires {
        if expires < 0 {
            return Err(AppError::Validation("expires must not be negative".into()));
        }
        secret.expires = expires;
    }
    state.store.update_secret(secret.clone()).await?;
    Ok(Json(secret))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
    Path(secret_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let secret = state.store.get_secret(&secret_id).await?;
    if secret.username != caller.0 {
        return Err(AppError::NotFound("secret".into()));
    }
    state.store.delete_secret(&secret_id).await?;
    info!(secret_id = %secret_id, owner = %caller.0, "secret deleted");
    Ok(Json(serde_json::Value::Null))
}
