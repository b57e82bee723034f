//! `UserDirectory`: a `chatcore_auth::UserLookup` implementation backed by
//! the distributed `KVStore`.
//!
//! The relational store for user profiles is explicitly out of scope for the
//! core (§1) — callers own it behind `ChatStore`. A gateway still needs
//! *some* answer to "does this username exist and what's its password hash"
//! to make `AuthService::login` usable at all, so this stores that one
//! narrow slice (`username -> (user_id, argon2 hash)`) in the same KVStore
//! everything else already depends on, rather than inventing a new
//! persistence layer the teacher's `CredentialStore` would otherwise need a
//! `sqlx::SqlitePool` for.

use std::sync::Arc;

use async_trait::async_trait;
use chatcore_auth::{Result, UserLookup, hash_password, verify_password};
use chatcore_kv::KVStore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn user_key(username: &str) -> String {
    format!("gateway:user:{username}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredUser {
    user_id: String,
    password_hash: String,
}

pub struct UserDirectory {
    kv: Arc<dyn KVStore>,
}

impl UserDirectory {
    #[must_use]
    pub fn new(kv: Arc<dyn KVStore>) -> Self {
        Self { kv }
    }

    /// Register a new user with a freshly hashed password. Returns the
    /// generated `user_id`. Overwrites any existing account for `username`.
    pub async fn create_user(&self, username: &str, password: &str) -> Result<String> {
        let user_id = Uuid::new_v4().to_string();
        let record = StoredUser {
            user_id: user_id.clone(),
            password_hash: hash_password(password),
        };
        self.kv
            .set(&user_key(username), serde_json::to_vec(&record)?, None)
            .await?;
        Ok(user_id)
    }

    /// Change the password for an existing user, verifying the old one
    /// first. Returns `Ok(false)` if the account doesn't exist or the old
    /// password doesn't match.
    pub async fn change_password(&self, username: &str, old_password: &str, new_password: &str) -> Result<bool> {
        let Some(bytes) = self.kv.get(&user_key(username)).await? else {
            return Ok(false);
        };
        let existing: StoredUser = serde_json::from_slice(&bytes)?;
        if !verify_password(old_password, &existing.password_hash) {
            return Ok(false);
        }
        let updated = StoredUser {
            user_id: existing.user_id,
            password_hash: hash_password(new_password),
        };
        self.kv.set(&user_key(username), serde_json::to_vec(&updated)?, None).await?;
        Ok(true)
    }
}

#[async_trait]
impl UserLookup for UserDirectory {
    async fn find_by_username(&self, username: &str) -> Result<Option<(String, String)>> {
        let Some(bytes) = self.kv.get(&user_key(username)).await? else {
            return Ok(None);
        };
        let stored: StoredUser = serde_json::from_slice(&bytes)?;
        Ok(Some((stored.user_id, stored.password_hash)))
    }
}

#[cfg(test)]
mod tests {
    use chatcore_kv::MemoryKv;

    use super::*;

    #[tokio::test]
    async fn create_then_lookup_roundtrips() {
        let directory = UserDirectory::new(Arc::new(MemoryKv::new()));
        let user_id = directory.create_user("alice", "hunter2-but-longer").await.unwrap();
        let found = directory.find_by_username("alice").await.unwrap().unwrap();
        assert_eq!(found.0, user_id);
        assert!(verify_password("hunter2-but-longer", &found.1));
    }

    #[tokio::test]
    async fn unknown_username_returns_none() {
        let directory = UserDirectory::new(Arc::new(MemoryKv::new()));
        assert!(directory.find_by_username("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn change_password_rejects_wrong_old_password() {
        let directory = UserDirectory::new(Arc::new(MemoryKv::new()));
        directory.create_user("alice", "original-password").await.unwrap();
        let ok = directory.change_password("alice", "wrong", "new-password-value").await.unwrap();
        assert!(!ok);
    }

    #[tokio::test]
    async fn change_password_updates_hash() {
        let directory = UserDirectory::new(Arc::new(MemoryKv::new()));
        directory.create_user("alice", "original-password").await.unwrap();
        let ok = directory
            .change_password("alice", "original-password", "new-password-value")
            .await
            .unwrap();
        assert!(ok);
        let found = directory.find_by_username("alice").await.unwrap().unwrap();
        assert!(verify_password("new-password-value", &found.1));
    }
}
