//! Bearer-token authentication backed by the snapshot cache.
//!
//! Tokens are signed with per-issuer symmetric keys; the `kid` header names
//! the secret, which must be present in the local snapshot. No network I/O
//! happens on this path.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use common::errors::{AppError, AuthError};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};

use crate::cache::SnapshotCache;
use crate::AppState;

/// The verified caller, injected into request extensions for handlers.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub String);

pub async fn bearer_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    match authenticate(&state.cache, &state.audience, request.headers()).await {
        Ok(username) => {
            request.extensions_mut().insert(AuthenticatedUser(username));
            next.run(request).await
        }
        Err(err) => AppError::from(err).into_response(),
    }
}

pub(crate) async fn authenticate(
    cache: &SnapshotCache,
    audience: &str,
    headers: &HeaderMap,
) -> Result<String, AuthError> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if header.is_empty() {
        return Err(AuthError::MissingHeader);
    }

    let token = header.strip_prefix("Bearer ").ok_or_else(|| {
        AuthError::SignatureInvalid("authorization header is not a bearer token".into())
    })?;

    let token_header =
        decode_header(token).map_err(|e| AuthError::SignatureInvalid(e.to_string()))?;

    if !matches!(
        token_header.alg,
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
    ) {
        return Err(AuthError::SignatureInvalid(format!(
            "unexpected signing method: {:?}",
            token_header.alg
        )));
    }

    let kid = token_header.kid.ok_or(AuthError::MissingKid)?;
    let secret = cache
        .get_secret(&kid)
        .await
        .map_err(|_| AuthError::MissingSecret)?;

    let mut validation = Validation::new(token_header.alg);
    validation.set_audience(&[audience]);
    decode::<serde_json::Value>(
        token,
        &DecodingKey::from_secret(secret.secret_key.as_bytes()),
        &validation,
    )
    .map_err(|e| AuthError::SignatureInvalid(e.to_string()))?;

    if secret.is_expired(chrono::Utc::now().timestamp()) {
        let when = chrono::DateTime::from_timestamp(secret.expires, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| secret.expires.to_string());
        return Err(AuthError::Expired(when));
    }

    Ok(secret.username)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientError, PlatformClient};
    use async_trait::async_trait;
    use axum::http::HeaderValue;
    use common::model::{Policy, Secret};
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;
    use std::sync::Arc;

    const AUDIENCE: &str = "iam.authz.local";
    const KEY: &str = "super-secret-signing-key";

    struct SecretsClient(Vec<Secret>);

    #[async_trait]
    impl PlatformClient for SecretsClient {
        async fn list_secrets(&self) -> Result<Vec<Secret>, ClientError> {
            Ok(self.0.clone())
        }

        async fn list_policies(&self) -> Result<Vec<Policy>, ClientError> {
            Ok(Vec::new())
        }
    }

    #[derive(Serialize)]
    struct Claims {
        aud: String,
        exp: i64,
    }

    fn claims() -> Claims {
        Claims {
            aud: AUDIENCE.into(),
            exp: chrono::Utc::now().timestamp() + 3600,
        }
    }

    async fn cache_with(secrets: Vec<Secret>) -> SnapshotCache {
        let cache = SnapshotCache::new(Arc::new(SecretsClient(secrets)));
        cache.reload().await.unwrap();
        cache
    }

    fn secret(id: &str, key: &str, expires: i64) -> Secret {
        Secret {
            secret_id: id.into(),
            username: "alice".into(),
            secret_key: key.into(),
            expires,
            description: String::new(),
        }
    }

    fn token(kid: Option<&str>, key: &str, claims: &Claims) -> String {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = kid.map(ToString::to_string);
        encode(&header, claims, &EncodingKey::from_secret(key.as_bytes())).unwrap()
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    #[tokio::test]
    async fn valid_token_yields_the_secret_owner() {
        let cache = cache_with(vec![secret("S1", KEY, 0)]).await;
        let headers = bearer(&token(Some("S1"), KEY, &claims()));
        let username = authenticate(&cache, AUDIENCE, &headers).await.unwrap();
        assert_eq!(username, "alice");
    }

    #[tokio::test]
    async fn missing_header_is_rejected() {
        let cache = cache_with(vec![]).await;
        let err = authenticate(&cache, AUDIENCE, &HeaderMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::MissingHeader));
    }

    #[tokio::test]
    async fn non_bearer_scheme_is_rejected() {
        let cache = cache_with(vec![]).await;
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic YWxpY2U6cHc="));
        let err = authenticate(&cache, AUDIENCE, &headers).await.unwrap_err();
        assert!(matches!(err, AuthError::SignatureInvalid(_)));
    }

    #[tokio::test]
    async fn garbage_token_is_rejected() {
        let cache = cache_with(vec![]).await;
        let err = authenticate(&cache, AUDIENCE, &bearer("not.a.jwt"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::SignatureInvalid(_)));
    }

    #[tokio::test]
    async fn alg_none_is_rejected() {
        let cache = cache_with(vec![secret("S1", KEY, 0)]).await;
        // Hand-built unsigned token: header {"alg":"none","kid":"S1"}.
        let unsigned = format!(
            "{}.{}.",
            base64_url(br#"{"alg":"none","kid":"S1"}"#),
            base64_url(format!(r#"{{"aud":"{AUDIENCE}","exp":4102444800}}"#).as_bytes()),
        );
        let err = authenticate(&cache, AUDIENCE, &bearer(&unsigned))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::SignatureInvalid(_)));
    }

    #[tokio::test]
    async fn non_hmac_algorithm_is_rejected() {
        let cache = cache_with(vec![secret("S1", KEY, 0)]).await;
        let unsigned = format!(
            "{}.{}.c2ln",
            base64_url(br#"{"alg":"RS256","kid":"S1"}"#),
            base64_url(format!(r#"{{"aud":"{AUDIENCE}","exp":4102444800}}"#).as_bytes()),
        );
        let err = authenticate(&cache, AUDIENCE, &bearer(&unsigned))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::SignatureInvalid(message) if message.contains("unexpected signing method")));
    }

    #[tokio::test]
    async fn token_without_kid_is_rejected() {
        let cache = cache_with(vec![secret("S1", KEY, 0)]).await;
        let headers = bearer(&token(None, KEY, &claims()));
        let err = authenticate(&cache, AUDIENCE, &headers).await.unwrap_err();
        assert!(matches!(err, AuthError::MissingKid));
    }

    #[tokio::test]
    async fn unknown_kid_is_rejected() {
        let cache = cache_with(vec![secret("S1", KEY, 0)]).await;
        let headers = bearer(&token(Some("other"), KEY, &claims()));
        let err = authenticate(&cache, AUDIENCE, &headers).await.unwrap_err();
        assert!(matches!(err, AuthError::MissingSecret));
    }

    #[tokio::test]
    async fn wrong_key_is_rejected() {
        let cache = cache_with(vec![secret("S1", KEY, 0)]).await;
        let headers = bearer(&token(Some("S1"), "a-different-key", &claims()));
        let err = authenticate(&cache, AUDIENCE, &headers).await.unwrap_err();
        assert!(matches!(err, AuthError::SignatureInvalid(_)));
    }

    #[tokio::test]
    async fn wrong_audience_is_rejected() {
        let cache = cache_with(vec![secret("S1", KEY, 0)]).await;
        let wrong = Claims {
            aud: "somewhere-else".into(),
            exp: chrono::Utc::now().timestamp() + 3600,
        };
        let headers = bearer(&token(Some("S1"), KEY, &wrong));
        let err = authenticate(&cache, AUDIENCE, &headers).await.unwrap_err();
        assert!(matches!(err, AuthError::SignatureInvalid(_)));
    }

    #[tokio::test]
    async fn expired_secret_is_rejected() {
        let past = chrono::Utc::now().timestamp() - 60;
        let cache = cache_with(vec![secret("S2", KEY, past)]).await;
        let headers = bearer(&token(Some("S2"), KEY, &claims()));
        let err = authenticate(&cache, AUDIENCE, &headers).await.unwrap_err();
        assert!(matches!(err, AuthError::Expired(_)));
    }

    #[tokio::test]
    async fn zero_expiry_secret_never_expires() {
        let cache = cache_with(vec![secret("S1", KEY, 0)]).await;
        let headers = bearer(&token(Some("S1"), KEY, &claims()));
        assert!(authenticate(&cache, AUDIENCE, &headers).await.is_ok());
    }

    fn base64_url(data: &[u8]) -> String {
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        use base64::Engine;
        URL_SAFE_NO_PAD.encode(data)
    }
}
