//! Login, logout, and token refresh.

use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::{Extension, Json};
use common::errors::{AppError, AuthError};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::{verify_basic, AuthenticatedUser};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub expire: String,
}

/// `POST /login`: credentials arrive either as a `Basic` header or as a
/// JSON body; both paths check the salted hash in the store.
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<LoginRequest>>,
) -> Result<Json<TokenResponse>, AppError> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    let username = if !header.is_empty() {
        verify_basic(&state, header).await?
    } else if let Some(Json(login)) = body {
        let user = state
            .store
            .get_user(&login.username)
            .await
            .map_err(|_| AuthError::InvalidCredentials)?;
        if !user.verify_password(&login.password) {
            return Err(AuthError::InvalidCredentials.into());
        }
        user.username
    } else {
        return Err(AuthError::MissingHeader.into());
    };

    let (token, expire) = state.tokens.issue(&username)?;
    info!(username = %username, "user logged in");
    Ok(Json(TokenResponse {
        token,
        expire: expire.to_rfc3339(),
    }))
}

/// `POST /refresh`: re-issue for the already-authenticated caller.
pub async fn refresh(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<TokenResponse>, AppError> {
    let (token, expire) = state.tokens.issue(&user.0)?;
    Ok(Json(TokenResponse {
        token,
        expire: expire.to_rfc3339(),
    }))
}

/// `POST /logout`: tokens are stateless, so this is an acknowledgement.
pub async fn logout(Extension(user): Extension<AuthenticatedUser>) -> Json<serde_json::Value> {
    info!(username = %user.0, "user logged out");
    Json(serde_json::Value::Null)
}
