//! Platform error taxonomy.
//!
//! Every error that crosses a service boundary is one of the kinds below and
//! carries a stable numeric code, so clients can switch on `code` without
//! parsing messages.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::storage::StorageError;

/// Authentication failures. Each maps to its own wire code so a client can
/// tell a missing header from an expired credential.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authorization header cannot be empty")]
    MissingHeader,

    #[error("signature is invalid: {0}")]
    SignatureInvalid(String),

    #[error("invalid token format: missing kid field in header")]
    MissingKid,

    #[error("cannot obtain secret information from cache")]
    MissingSecret,

    #[error("secret has expired at {0}")]
    Expired(String),

    #[error("invalid username or password")]
    InvalidCredentials,
}

impl AuthError {
    #[must_use]
    pub const fn code(&self) -> u32 {
        match self {
            Self::MissingHeader => 110001,
            Self::SignatureInvalid(_) => 110002,
            Self::MissingKid => 110003,
            Self::MissingSecret => 110004,
            Self::Expired(_) => 110005,
            Self::InvalidCredentials => 110006,
        }
    }
}

/// Top-level error for request handlers in both services.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Unauthenticated(#[from] AuthError),

    #[error("permission denied: {0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("upstream service unavailable: {0}")]
    Upstream(String),

    // The payload is logged, never serialized: internals must not leak.
    #[error("internal server error")]
    Internal(String),
}

impl AppError {
    #[must_use]
    pub const fn code(&self) -> u32 {
        match self {
            Self::Unauthenticated(auth) => auth.code(),
            Self::Validation(_) => 100400,
            Self::Forbidden(_) => 100403,
            Self::NotFound(_) => 100404,
            Self::Conflict(_) => 100409,
            Self::Internal(_) => 100500,
            Self::Upstream(_) => 100503,
        }
    }

    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Upstream(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        Self::Upstream(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if let Self::Internal(ref context) = self {
            tracing::error!(context = %context, "internal error while handling request");
        }

        let body = Json(json!({
            "code": self.code(),
            "message": self.to_string(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_map_to_unauthorized() {
        for err in [
            AuthError::MissingHeader,
            AuthError::SignatureInvalid("bad".into()),
            AuthError::MissingKid,
            AuthError::MissingSecret,
            AuthError::Expired("2020-01-01 00:00:00".into()),
        ] {
            let app: AppError = err.into();
            assert_eq!(app.status_code(), StatusCode::UNAUTHORIZED);
        }
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(AppError::from(AuthError::MissingHeader).code(), 110001);
        assert_eq!(AppError::from(AuthError::Expired(String::new())).code(), 110005);
        assert_eq!(AppError::Validation("x".into()).code(), 100400);
        assert_eq!(AppError::NotFound("secret".into()).code(), 100404);
        assert_eq!(AppError::Upstream("down".into()).code(), 100503);
    }

    #[test]
    fn internal_error_hides_context() {
        let err = AppError::Internal("connection string with password".into());
        assert_eq!(err.to_string(), "internal server error");
    }

    #[test]
    fn storage_down_becomes_upstream() {
        let app = AppError::from(StorageError::Down);
        assert_eq!(app.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
