//! Authentication for the resource service.
//!
//! Three strategies: Basic (username/password against the store, used by
//! login), Bearer (a session token issued by this service), and Auto
//! (dispatch on the `Authorization` scheme). The decision
//! service's cache-backed bearer strategy lives over there; this one signs
//! with the service's own key.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use common::errors::{AppError, AuthError};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::AppState;

pub const TOKEN_ISSUER: &str = "iam-resource-service";
pub const TOKEN_AUDIENCE: &str = "iam.resource.local";

/// The verified caller, injected into request extensions.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub String);

#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    iss: String,
    aud: String,
    sub: String,
    iat: i64,
    exp: i64,
}

/// Issues and verifies this service's session tokens.
pub struct TokenIssuer {
    key: String,
    ttl_secs: i64,
}

impl TokenIssuer {
    #[must_use]
    pub fn new(key: String, ttl_secs: i64) -> Self {
        Self { key, ttl_secs }
    }

    pub fn issue(&self, username: &str) -> Result<(String, DateTime<Utc>), AppError> {
        let now = Utc::now();
        let expire = now + ChronoDuration::seconds(self.ttl_secs);
        let claims = SessionClaims {
            iss: TOKEN_ISSUER.to_string(),
            aud: TOKEN_AUDIENCE.to_string(),
            sub: username.to_string(),
            iat: now.timestamp(),
            exp: expire.timestamp(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.key.as_bytes()),
        )
        .map_err(|e| AppError::Internal(format!("token signing failed: {e}")))?;
        Ok((token, expire))
    }

    pub fn verify(&self, token: &str) -> Result<String, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[TOKEN_AUDIENCE]);
        validation.set_issuer(&[TOKEN_ISSUER]);
        let data = decode::<SessionClaims>(
            token,
            &DecodingKey::from_secret(self.key.as_bytes()),
            &validation,
        )
        .map_err(|e| AuthError::SignatureInvalid(e.to_string()))?;
        Ok(data.claims.sub)
    }
}

/// Parsed credentials from a `Basic` header value.
pub fn parse_basic(value: &str) -> Result<(String, String), AuthError> {
    let encoded = value
        .strip_prefix("Basic ")
        .ok_or(AuthError::InvalidCredentials)?;
    let decoded = BASE64
        .decode(encoded)
        .map_err(|_| AuthError::InvalidCredentials)?;
    let decoded = String::from_utf8(decoded).map_err(|_| AuthError::InvalidCredentials)?;
    let (username, password) = decoded
        .split_once(':')
        .ok_or(AuthError::InvalidCredentials)?;
    Ok((username.to_string(), password.to_string()))
}

pub async fn verify_basic(state: &AppState, value: &str) -> Result<String, AuthError> {
    let (username, password) = parse_basic(value)?;
    let user = state
        .store
        .get_user(&username)
        .await
        .map_err(|_| AuthError::InvalidCredentials)?;
    if !user.verify_password(&password) {
        return Err(AuthError::InvalidCredentials);
    }
    Ok(user.username)
}

/// Auto strategy middleware: dispatch on the `Authorization` scheme.
pub async fn auto_auth(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let verified = if header.is_empty() {
        Err(AuthError::MissingHeader)
    } else if header.starts_with("Basic ") {
        verify_basic(&state, &header).await
    } else if let Some(token) = header.strip_prefix("Bearer ") {
        state.tokens.verify(token)
    } else {
        Err(AuthError::SignatureInvalid(
            "unrecognized Authorization scheme".into(),
        ))
    };

    match verified {
        Ok(username) => {
            request.extensions_mut().insert(AuthenticatedUser(username));
            next.run(request).await
        }
        Err(err) => AppError::from(err).into_response(),
    }
}

/// Mutating user operations are restricted to administrators.
pub async fn require_admin(state: &AppState, username: &str) -> Result<(), AppError> {
    let user = state
        .store
        .get_user(username)
        .await
        .map_err(AppError::from)?;
    if user.is_admin {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "user {username} is not an administrator"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_tokens_verify_and_carry_the_subject() {
        let issuer = TokenIssuer::new("test-key".into(), 3600);
        let (token, expire) = issuer.issue("alice").unwrap();
        assert!(expire > Utc::now());
        assert_eq!(issuer.verify(&token).unwrap(), "alice");
    }

    #[test]
    fn foreign_key_tokens_are_rejected() {
        let issuer = TokenIssuer::new("test-key".into(), 3600);
        let (token, _) = issuer.issue("alice").unwrap();
        let other = TokenIssuer::new("different-key".into(), 3600);
        assert!(matches!(
            other.verify(&token),
            Err(AuthError::SignatureInvalid(_))
        ));
    }

    #[test]
    fn basic_header_parses_username_and_password() {
        let value = format!("Basic {}", BASE64.encode("alice:s3cret"));
        let (username, password) = parse_basic(&value).unwrap();
        assert_eq!(username, "alice");
        assert_eq!(password, "s3cret");
    }

    #[test]
    fn malformed_basic_headers_are_rejected() {
        assert!(parse_basic("Bearer abc").is_err());
        assert!(parse_basic("Basic !!!not-base64!!!").is_err());
        let no_colon = format!("Basic {}", BASE64.encode("alicepassword"));
        assert!(parse_basic(&no_colon).is_err());
    }

    #[test]
    fn password_in_basic_may_contain_colons() {
        let value = format!("Basic {}", BASE64.encode("alice:pa:ss:word"));
        let (_, password) = parse_basic(&value).unwrap();
        assert_eq!(password, "pa:ss:word");
    }
}
