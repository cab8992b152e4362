//! `DashMap`-backed store for tests and single-node deployments.

use async_trait::async_trait;
use common::model::{Policy, Secret};
use dashmap::DashMap;

use super::{page, Store, StoreError, User};

#[derive(Default)]
pub struct MemoryStore {
    users: DashMap<String, User>,
    secrets: DashMap<String, Secret>,
    policies: DashMap<String, Policy>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // Listing is key-sorted so pagination is deterministic.
    fn sorted<V: Clone>(map: &DashMap<String, V>) -> Vec<V> {
        let mut entries: Vec<(String, V)> = map
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.into_iter().map(|(_, value)| value).collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_user(&self, username: &str) -> Result<User, StoreError> {
        self.users
            .get(username)
            .map(|entry| entry.clone())
            .ok_or(StoreError::NotFound("user"))
    }

    async fn list_users(&self, offset: i64, limit: i64) -> Result<(u64, Vec<User>), StoreError> {
        let all = Self::sorted(&self.users);
        Ok((all.len() as u64, page(&all, offset, limit)))
    }

    async fn create_user(&self, user: User) -> Result<(), StoreError> {
        if self.users.contains_key(&user.username) {
            return Err(StoreError::AlreadyExists("user"));
        }
        self.users.insert(user.username.clone(), user);
        Ok(())
    }

    async fn update_user(&self, user: User) -> Result<(), StoreError> {
        if !self.users.contains_key(&user.username) {
            return Err(StoreError::NotFound("user"));
        }
        self.users.insert(user.username.clone(), user);
        Ok(())
    }

    async fn delete_user(&self, username: &str) -> Result<(), StoreError> {
        self.users
            .remove(username)
            .map(|_| ())
            .ok_or(StoreError::NotFound("user"))
    }

    async fn get_secret(&self, secret_id: &str) -> Result<Secret, StoreError> {
        self.secrets
            .get(secret_id)
            .map(|entry| entry.clone())
            .ok_or(StoreError::NotFound("secret"))
    }

    async fn list_secrets(
        &self,
        offset: i64,
        limit: i64,
    ) -> Result<(u64, Vec<Secret>), StoreError> {
        let all = Self::sorted(&self.secrets);
        Ok((all.len() as u64, page(&all, offset, limit)))
    }

    async fn create_secret(&self, secret: Secret) -> Result<(), StoreError> {
        if self.secrets.contains_key(&secret.secret_id) {
            return Err(StoreError::AlreadyExists("secret"));
        }
        self.secrets.insert(secret.secret_id.clone(), secret);
        Ok(())
    }

    async fn update_secret(&self, secret: Secret) -> Result<(), StoreError> {
        if !self.secrets.contains_key(&secret.secret_id) {
            return Err(StoreError::NotFound("secret"));
        }
        self.secrets.insert(secret.secret_id.clone(), secret);
        Ok(())
    }

    async fn delete_secret(&self, secret_id: &str) -> Result<(), StoreError> {
        self.secrets
            .remove(secret_id)
            .map(|_| ())
            .ok_or(StoreError::NotFound("secret"))
    }

    async fn get_policy(&self, name: &str) -> Result<Policy, StoreError> {
        self.policies
            .get(name)
            .map(|entry| entry.clone())
            .ok_or(StoreError::NotFound("policy"))
    }

    async fn list_policies(
        &self,
        offset: i64,
        limit: i64,
    ) -> Result<(u64, Vec<Policy>), StoreError> {
        let all = Self::sorted(&self.policies);
        Ok((all.len() as u64, page(&all, offset, limit)))
    }

    async fn create_policy(&self, policy: Policy) -> Result<(), StoreError> {
        if self.policies.contains_key(&policy.name) {
            return Err(StoreError::AlreadyExists("policy"));
        }
        self.policies.insert(policy.name.clone(), policy);
        Ok(())
    }

    async fn update_policy(&self, policy: Policy) -> Result<(), StoreError> {
        if !self.policies.contains_key(&policy.name) {
            return Err(StoreError::NotFound("policy"));
        }
        self.policies.insert(policy.name.clone(), policy);
        Ok(())
    }

    async fn delete_policy(&self, name: &str) -> Result<(), StoreError> {
        self.policies
            .remove(name)
            .map(|_| ())
            .ok_or(StoreError::NotFound("policy"))
    }
}
