//! Persistence seam for the authoritative store.
//!
//! The trait is the interface the rest of the service programs against; the
//! in-memory implementation backs tests and single-node deployments. A
//! relational implementation plugs in behind the same trait.

mod memory;

pub use memory::MemoryStore;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::errors::AppError;
use common::model::{Policy, Secret};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0} already exists")]
    AlreadyExists(&'static str),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::NotFound(what.to_string()),
            StoreError::AlreadyExists(what) => Self::Conflict(format!("{what} already exists")),
        }
    }
}

/// A platform account. The password is stored as an argon2id hash and never
/// serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub email: String,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(
        username: &str,
        password: &str,
        email: &str,
        is_admin: bool,
    ) -> Result<Self, AppError> {
        Ok(Self {
            username: username.to_string(),
            password_hash: hash_password(password)?,
            email: email.to_string(),
            is_admin,
            created_at: Utc::now(),
        })
    }

    #[must_use]
    pub fn verify_password(&self, candidate: &str) -> bool {
        PasswordHash::new(&self.password_hash)
            .map(|parsed| {
                Argon2::default()
                    .verify_password(candidate.as_bytes(), &parsed)
                    .is_ok()
            })
            .unwrap_or(false)
    }

    pub fn set_password(&mut self, password: &str) -> Result<(), AppError> {
        self.password_hash = hash_password(password)?;
        Ok(())
    }
}

fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("password hashing failed: {e}")))
}

/// Offset/limit paging; `limit = -1` returns everything after `offset`.
pub fn page<T: Clone>(items: &[T], offset: i64, limit: i64) -> Vec<T> {
    let start = offset.max(0) as usize;
    if start >= items.len() {
        return Vec::new();
    }
    let rest = &items[start..];
    if limit < 0 {
        rest.to_vec()
    } else {
        rest.iter().take(limit as usize).cloned().collect()
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    // === users ===
    async fn get_user(&self, username: &str) -> Result<User, StoreError>;
    async fn list_users(&self, offset: i64, limit: i64) -> Result<(u64, Vec<User>), StoreError>;
    async fn create_user(&self, user: User) -> Result<(), StoreError>;
    async fn update_user(&self, user: User) -> Result<(), StoreError>;
    async fn delete_user(&self, username: &str) -> Result<(), StoreError>;

    // === secrets ===
    async fn get_secret(&self, secret_id: &str) -> Result<Secret, StoreError>;
    async fn list_secrets(&self, offset: i64, limit: i64)
        -> Result<(u64, Vec<Secret>), StoreError>;
    async fn create_secret(&self, secret: Secret) -> Result<(), StoreError>;
    async fn update_secret(&self, secret: Secret) -> Result<(), StoreError>;
    async fn delete_secret(&self, secret_id: &str) -> Result<(), StoreError>;

    // === policies ===
    async fn get_policy(&self, name: &str) -> Result<Policy, StoreError>;
    async fn list_policies(
        &self,
        offset: i64,
        limit: i64,
    ) -> Result<(u64, Vec<Policy>), StoreError>;
    async fn create_policy(&self, policy: Policy) -> Result<(), StoreError>;
    async fn update_policy(&self, policy: Policy) -> Result<(), StoreError>;
    async fn delete_policy(&self, name: &str) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_round_trip() {
        let user = User::new("alice", "correct horse battery", "a@example.com", false).unwrap();
        assert!(user.verify_password("correct horse battery"));
        assert!(!user.verify_password("wrong"));
        // The stored form is a salted hash, not the password.
        assert!(user.password_hash.starts_with("$argon2"));
    }

    #[test]
    fn set_password_rotates_the_hash() {
        let mut user = User::new("alice", "old", "a@example.com", false).unwrap();
        let old_hash = user.password_hash.clone();
        user.set_password("new").unwrap();
        assert_ne!(user.password_hash, old_hash);
        assert!(user.verify_password("new"));
        assert!(!user.verify_password("old"));
    }

    #[test]
    fn paging_honors_offset_limit_and_unpaged() {
        let items: Vec<i32> = (0..10).collect();
        assert_eq!(page(&items, 0, -1).len(), 10);
        assert_eq!(page(&items, 4, -1), vec![4, 5, 6, 7, 8, 9]);
        assert_eq!(page(&items, 2, 3), vec![2, 3, 4]);
        assert!(page(&items, 100, -1).is_empty());
        assert!(page(&items, 0, 0).is_empty());
    }
}
