//! Pull client for the resource service's replica surface.

use async_trait::async_trait;
use common::model::{ListResponse, Policy, Secret};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("resource service request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("resource service returned status {0}")]
    Status(u16),
}

/// The snapshot source. The snapshot cache pulls the full universe through
/// this seam; tests substitute an in-memory implementation.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn list_secrets(&self) -> Result<Vec<Secret>, ClientError>;
    async fn list_policies(&self) -> Result<Vec<Policy>, ClientError>;
}

/// HTTP implementation against the resource service's internal endpoints.
pub struct HttpPlatformClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpPlatformClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    // offset=0, limit=-1: the pull is deliberately unpaged so one reload
    // observes one consistent universe.
    async fn list_all<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, ClientError> {
        let url = format!("{}{}?offset=0&limit=-1", self.base_url, path);
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ClientError::Status(response.status().as_u16()));
        }
        let body: ListResponse<T> = response.json().await?;
        Ok(body.items)
    }
}

#[async_trait]
impl PlatformClient for HttpPlatformClient {
    async fn list_secrets(&self) -> Result<Vec<Secret>, ClientError> {
        self.list_all("/internal/v1/secrets").await
    }

    async fn list_policies(&self) -> Result<Vec<Policy>, ClientError> {
        self.list_all("/internal/v1/policies").await
    }
}
