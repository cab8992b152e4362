//! User CRUD. Mutating operations are restricted to administrators;
//! password changes additionally allow the account owner.

use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use common::errors::{AppError, AuthError};
use common::model::ListResponse;
use serde::Deserialize;
use tracing::info;

use super::PageParams;
use crate::auth::{require_admin, AuthenticatedUser};
use crate::store::User;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub is_admin: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub is_admin: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    #[serde(default)]
    pub old_password: String,
    pub new_password: String,
}

pub async fn list(
    State(state): State<AppState>,
    Query(page): Query<PageParams>,
) -> Result<Json<ListResponse<User>>, AppError> {
    let (total, items) = state.store.list_users(page.offset, page.limit).await?;
    Ok(Json(ListResponse { total, items }))
}

pub async fn get(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<User>, AppError> {
    Ok(Json(state.store.get_user(&name).await?))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
    Json(body): Json<CreateUserRequest>,
) -> Result<Json<User>, AppError> {
    require_admin(&state, &caller.0).await?;
    if body.username.is_empty() || body.password.is_empty() {
        return Err(AppError::Validation(
            "username and password must be non-empty".into(),
        ));
    }

    let user = User::new(&body.username, &body.password, &body.email, body.is_admin)?;
    state.store.create_user(user.clone()).await?;
    info!(username = %body.username, by = %caller.0, "user created");
    Ok(Json(user))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
    Path(name): Path<String>,
    Json(body): Json<UpdateUserRequest>,
) -> Result<Json<User>, AppError> {
    require_admin(&state, &caller.0).await?;

    let mut user = state.store.get_user(&name).await?;
    if let Some(email) = body.email {
        user.email = email;
    }
    if let Some(is_admin) = body.is_admin {
        user.is_admin = is_admin;
    }
    state.store.update_user(user.clone()).await?;
    Ok(Json(user))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    require_admin(&state, &caller.0).await?;
    state.store.delete_user(&name).await?;
    info!(username = %name, by = %caller.0, "user deleted");
    Ok(Json(serde_json::Value::Null))
}

/// `PUT /v1/users/{name}/change-password`: the owner must present the old
/// password; administrators may reset without it.
pub async fn change_password(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
    Path(name): Path<String>,
    Json(body): Json<ChangePasswordRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let mut user = state.store.get_user(&name).await?;

    if caller.0 == name {
        if !user.verify_password(&body.old_password) {
            return Err(AuthError::InvalidCredentials.into());
        }
    } else {
        require_admin(&state, &caller.0).await?;
    }

    if body.new_password.is_empty() {
        return Err(AppError::Validation("new password must be non-empty".into()));
    }
    user.set_password(&body.new_password)?;
    state.store.update_user(user).await?;
    info!(username = %name, by = %caller.0, "password changed");
    Ok(Json(serde_json::Value::Null))
}
