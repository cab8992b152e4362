//! End-to-end tests for `/v1/authz`: bearer authentication, evaluation, and
//! audit submission, all against an in-process snapshot.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::model::{Effect, Policy, PolicyDocument, Secret};
use common::storage::StorageError;
use decision_service::analytics::{Analytics, AnalyticsOptions, AnalyticsStore, AuditRecord};
use decision_service::cache::SnapshotCache;
use decision_service::client::{ClientError, PlatformClient};
use decision_service::metrics::ServiceMetrics;
use decision_service::{app, AppState};
use http_body_util::BodyExt;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};
use tower::ServiceExt;

const AUDIENCE: &str = "iam.authz.local";
const SIGNING_KEY: &str = "alice-signing-key";

struct FixtureClient {
    secrets: Vec<Secret>,
    policies: Vec<Policy>,
}

#[async_trait]
impl PlatformClient for FixtureClient {
    async fn list_secrets(&self) -> Result<Vec<Secret>, ClientError> {
        Ok(self.secrets.clone())
    }

    async fn list_policies(&self) -> Result<Vec<Policy>, ClientError> {
        Ok(self.policies.clone())
    }
}

#[derive(Default)]
struct RecordingStore {
    batches: Mutex<Vec<Vec<u8>>>,
}

impl RecordingStore {
    fn records(&self) -> Vec<AuditRecord> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .map(|raw| rmp_serde::from_slice(raw).unwrap())
            .collect()
    }
}

#[async_trait]
impl AnalyticsStore for RecordingStore {
    async fn append_batch(
        &self,
        _key: &str,
        records: &[Vec<u8>],
        _expiration: Option<Duration>,
    ) -> Result<(), StorageError> {
        self.batches.lock().unwrap().extend(records.iter().cloned());
        Ok(())
    }
}

fn secret(id: &str, username: &str, expires: i64) -> Secret {
    Secret {
        secret_id: id.into(),
        username: username.into(),
        secret_key: SIGNING_KEY.into(),
        expires,
        description: String::new(),
    }
}

fn policy(name: &str, effect: Effect) -> Policy {
    Policy {
        name: name.into(),
        username: "alice".into(),
        policy: PolicyDocument {
            subjects: vec!["users:alice".into()],
            actions: vec!["articles:read".into()],
            resources: vec!["articles:alice:*".into()],
            effect,
            conditions: BTreeMap::new(),
        },
    }
}

async fn fixture(
    secrets: Vec<Secret>,
    policies: Vec<Policy>,
) -> (axum::Router, Arc<Analytics>, Arc<RecordingStore>) {
    let cache = Arc::new(SnapshotCache::new(Arc::new(FixtureClient {
        secrets,
        policies,
    })));
    cache.reload().await.unwrap();

    let sink = Arc::new(RecordingStore::default());
    let analytics = Arc::new(Analytics::new(
        AnalyticsOptions {
            pool_size: 1,
            records_buffer_size: 16,
            flush_interval_ms: 5,
            ..Default::default()
        },
        Arc::clone(&sink) as Arc<dyn AnalyticsStore>,
    ));
    analytics.start();

    let state = AppState {
        cache,
        analytics: Arc::clone(&analytics),
        metrics: Arc::new(ServiceMetrics::new().unwrap()),
        audience: AUDIENCE.into(),
    };
    (app(state), analytics, sink)
}

fn token(kid: &str) -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(kid.into());
    let claims = json!({
        "aud": AUDIENCE,
        "exp": chrono::Utc::now().timestamp() + 3600,
    });
    encode(&header, &claims, &EncodingKey::from_secret(SIGNING_KEY.as_bytes())).unwrap()
}

fn authz_request(kid: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/authz")
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {}", token(kid)))
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn allow_scenario() {
    let (app, analytics, sink) = fixture(
        vec![secret("S1", "alice", 0)],
        vec![policy("P1", Effect::Allow)],
    )
    .await;

    let response = app
        .oneshot(authz_request(
            "S1",
            json!({
                "subject": "users:alice",
                "action": "articles:read",
                "resource": "articles:alice:42",
                "context": {"username": "alice"}
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["allowed"], json!(true));
    assert_eq!(body["deciders"], json!(["P1"]));

    analytics.stop().await;
    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].effect, Effect::Allow);
    assert_eq!(records[0].username, "alice");
    assert!(records[0].deciders.contains("P1"));
}

#[tokio::test]
async fn explicit_deny_wins() {
    let (app, analytics, sink) = fixture(
        vec![secret("S1", "alice", 0)],
        vec![policy("P1", Effect::Allow), policy("P2", Effect::Deny)],
    )
    .await;

    let response = app
        .oneshot(authz_request(
            "S1",
            json!({
                "subject": "users:alice",
                "action": "articles:read",
                "resource": "articles:alice:42",
                "context": {"username": "alice"}
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["allowed"], json!(false));
    assert_eq!(body["reason"], json!("policy P2 forcefully denied the access"));
    assert_eq!(body["deciders"], json!(["P1", "P2"]));

    analytics.stop().await;
    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].effect, Effect::Deny);
    assert!(records[0].deciders.contains("P1") && records[0].deciders.contains("P2"));
}

#[tokio::test]
async fn no_matching_policy_denies() {
    let (app, _analytics, _sink) = fixture(
        vec![secret("S1", "alice", 0)],
        vec![policy("P1", Effect::Allow)],
    )
    .await;

    let response = app
        .oneshot(authz_request(
            "S1",
            json!({
                "subject": "users:alice",
                "action": "articles:read",
                "resource": "articles:bob:1",
                "context": {"username": "alice"}
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["allowed"], json!(false));
    assert_eq!(body["reason"], json!("no policy allowed access"));
}

#[tokio::test]
async fn expired_secret_is_unauthorized() {
    let past = chrono::Utc::now().timestamp() - 60;
    let (app, _analytics, _sink) = fixture(vec![secret("S2", "alice", past)], vec![]).await;

    let response = app
        .oneshot(authz_request(
            "S2",
            json!({
                "subject": "users:alice",
                "action": "articles:read",
                "resource": "articles:alice:42",
                "context": {"username": "alice"}
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["code"], json!(110005));
}

#[tokio::test]
async fn missing_authorization_header_is_unauthorized() {
    let (app, _analytics, _sink) = fixture(vec![], vec![]).await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/authz")
                .header("content-type", "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["code"], json!(110001));
}

#[tokio::test]
async fn missing_username_in_context_is_a_validation_error() {
    let (app, _analytics, _sink) = fixture(vec![secret("S1", "alice", 0)], vec![]).await;

    let response = app
        .oneshot(authz_request(
            "S1",
            json!({
                "subject": "users:alice",
                "action": "articles:read",
                "resource": "articles:alice:42",
                "context": {}
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["code"], json!(100400));
}

#[tokio::test]
async fn health_endpoint_is_open() {
    let (app, _analytics, _sink) = fixture(vec![], vec![]).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], json!("ok"));
}
