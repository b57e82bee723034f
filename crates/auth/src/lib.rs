//! `AuthService` (§4.F): password login, access/refresh token issuance,
//! refresh-token family rotation with reuse detection, logout, and
//! brute-force protection via a KVStore-backed block list.
//!
//! Persisted state follows §6: `auth:refresh:<token_id>` for rotation
//! records, `auth:family:<family_id>` for the index of live tokens in a
//! family (so a reuse detection can revoke every descendant in one sweep),
//! and `auth:blocked:<ip>` for the brute-force block list.

pub mod error;
pub mod password;
pub mod token;
mod validate;

use std::{net::IpAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use chatcore_kv::KVStore;
use chatcore_ratelimit::{EndpointClass, RateDecision, RateLimit, RateLimitConfig, RateLimiter};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use crate::{
    error::{Error, Result},
    password::{hash_password, verify_password},
    token::{AccessClaims, TokenSigner},
    validate::InputValidator,
};

const MAX_CAS_ATTEMPTS: u32 = 8;

fn refresh_key(token_id: &str) -> String {
    format!("auth:refresh:{token_id}")
}

fn family_key(family_id: &str) -> String {
    format!("auth:family:{family_id}")
}

fn blocked_key(ip: IpAddr) -> String {
    format!("auth:blocked:{ip}")
}

/// Persisted in the KVStore; a family has at most one `used_at_ms = None`
/// record at a time (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    pub token_id: String,
    pub family_id: String,
    pub user_id: String,
    pub username: String,
    pub issued_at_ms: u64,
    pub expires_at_ms: u64,
    pub used_at_ms: Option<u64>,
}

impl RefreshTokenRecord {
    #[must_use]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

/// Resolves a username to the stored user id and password hash. Out of
/// scope for this crate's own persistence (the relational user store lives
/// behind `ChatStore` in the core's view of the world); callers supply an
/// implementation.
#[async_trait]
pub trait UserLookup: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<(String, String)>>;
}

#[derive(Debug, Clone, Copy)]
pub struct AuthServiceConfig {
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub max_login_failures: u32,
    pub login_window: Duration,
    pub block_duration: Duration,
}

impl Default for AuthServiceConfig {
    fn default() -> Self {
        Self {
            access_token_ttl: Duration::from_secs(900),
            refresh_token_ttl: Duration::from_secs(604_800),
            max_login_failures: 5,
            login_window: Duration::from_secs(60),
            block_duration: Duration::from_secs(900),
        }
    }
}

pub struct LoginResult {
    pub access_token: String,
    pub refresh_token_id: String,
    pub family_id: String,
    pub user_id: String,
    pub username: String,
}

pub struct RefreshResult {
    pub access_token: String,
    pub refresh_token_id: String,
    pub family_id: String,
}

pub struct AuthService {
    kv: Arc<dyn KVStore>,
    signer: TokenSigner,
    config: AuthServiceConfig,
    login_limiter: RateLimiter,
}

impl AuthService {
    #[must_use]
    pub fn new(kv: Arc<dyn KVStore>, signer: TokenSigner, config: AuthServiceConfig) -> Self {
        // The brute-force counter is modeled as a dedicated rate-limiter
        // class (§4.F): `record_failed_login` consumes one unit of budget
        // per failed attempt, and a denial is the "N failures in window"
        // signal that triggers the block list.
        let generous = RateLimit {
            max_requests: u32::MAX,
            window: config.login_window,
        };
        let login_limiter = RateLimiter::new(
            Arc::clone(&kv),
            RateLimitConfig {
                general: generous,
                chat: generous,
                login: RateLimit {
                    max_requests: config.max_login_failures,
                    window: config.login_window,
                },
                auth_api: generous,
            },
        );
        Self {
            kv,
            signer,
            config,
            login_limiter,
        }
    }

    /// `(username, password)` login (§4.F). On success, issues a short-TTL
    /// access token plus a new refresh-token family.
    pub async fn login(
        &self,
        ip: IpAddr,
        username: &str,
        password: &str,
        lookup: &dyn UserLookup,
    ) -> Result<LoginResult> {
        InputValidator::validate_username(username)?;
        InputValidator::validate_password(password)?;

        if self.is_blocked(ip).await? {
            return Err(Error::Blocked {
                retry_after_seconds: self.config.block_duration.as_secs(),
            });
        }

        let Some((user_id, password_hash)) = lookup.find_by_username(username).await? else {
            self.record_failed_login(ip).await?;
            return Err(Error::InvalidCredentials);
        };

        if !verify_password(password, &password_hash) {
            self.record_failed_login(ip).await?;
            return Err(Error::InvalidCredentials);
        }

        let now = chatcore_common::now_millis();
        let access_token = self.signer.issue(&user_id, username, now, self.config.access_token_ttl)?;

        let family_id = Uuid::new_v4().to_string();
        let token_id = Uuid::new_v4().to_string();
        let record = RefreshTokenRecord {
            token_id: token_id.clone(),
            family_id: family_id.clone(),
            user_id: user_id.clone(),
            username: username.to_string(),
            issued_at_ms: now,
            expires_at_ms: now + self.config.refresh_token_ttl.as_millis() as u64,
            used_at_ms: None,
        };
        self.kv
            .set(
                &refresh_key(&token_id),
                serde_json::to_vec(&record)?,
                Some(self.config.refresh_token_ttl),
            )
            .await?;
        self.add_family_member(&family_id, &token_id).await?;

        Ok(LoginResult {
            access_token,
            refresh_token_id: token_id,
            family_id,
            user_id,
            username: username.to_string(),
        })
    }

    /// Rotate a refresh token (§4.F `/refresh`, §8 property 3, scenario S5).
    /// Exactly one concurrent caller for a given token succeeds; every other
    /// caller — whether it lost the CAS race or read an already-used record
    /// — triggers family-wide revocation and a reuse error.
    pub async fn refresh(&self, token_id: &str) -> Result<RefreshResult> {
        let key = refresh_key(token_id);
        let Some(existing_bytes) = self.kv.get(&key).await? else {
            return Err(Error::InvalidToken);
        };
        let record: RefreshTokenRecord =
            serde_json::from_slice(&existing_bytes).map_err(|_| Error::InvalidToken)?;

        let now = chatcore_common::now_millis();
        if record.is_expired(now) {
            return Err(Error::InvalidToken);
        }

        if record.used_at_ms.is_some() {
            self.revoke_family(&record.family_id).await?;
            return Err(Error::RefreshReuseDetected);
        }

        let mut used = record.clone();
        used.used_at_ms = Some(now);
        let used_bytes = serde_json::to_vec(&used)?;
        let remaining_ttl = Duration::from_millis(record.expires_at_ms.saturating_sub(now));
        let swapped = self
            .kv
            .compare_and_swap(&key, Some(existing_bytes), used_bytes, Some(remaining_ttl))
            .await?;

        if !swapped {
            // Lost the race to another concurrent refresh of the same
            // token: whichever caller observes `used_at_ms` set is reuse
            // from its own point of view, and the whole family is revoked
            // regardless of which caller actually "won" (§8 property 3).
            self.revoke_family(&record.family_id).await?;
            return Err(Error::RefreshReuseDetected);
        }

        let new_token_id = Uuid::new_v4().to_string();
        let new_record = RefreshTokenRecord {
            token_id: new_token_id.clone(),
            family_id: record.family_id.clone(),
            user_id: record.user_id.clone(),
            username: record.username.clone(),
            issued_at_ms: now,
            expires_at_ms: now + self.config.refresh_token_ttl.as_millis() as u64,
            used_at_ms: None,
        };
        self.kv
            .set(
                &refresh_key(&new_token_id),
                serde_json::to_vec(&new_record)?,
                Some(self.config.refresh_token_ttl),
            )
            .await?;
        self.add_family_member(&record.family_id, &new_token_id).await?;

        let access_token = self
            .signer
            .issue(&record.user_id, &record.username, now, self.config.access_token_ttl)?;

        Ok(RefreshResult {
            access_token,
            refresh_token_id: new_token_id,
            family_id: record.family_id,
        })
    }

    /// Mark the current token used and revoke its whole family (§4.F
    /// logout).
    pub async fn logout(&self, token_id: &str) -> Result<()> {
        if let Some(bytes) = self.kv.get(&refresh_key(token_id)).await?
            && let Ok(record) = serde_json::from_slice::<RefreshTokenRecord>(&bytes)
        {
            self.revoke_family(&record.family_id).await?;
        }
        Ok(())
    }

    /// Verify an access token and return its claims (used by `GET
    /// /api/auth/me` and the auth middleware, §6).
    pub fn verify_access_token(&self, token: &str) -> Result<AccessClaims> {
        self.signer.verify(token, chatcore_common::now_millis())
    }

    async fn is_blocked(&self, ip: IpAddr) -> Result<bool> {
        Ok(self.kv.get(&blocked_key(ip)).await?.is_some())
    }

    async fn record_failed_login(&self, ip: IpAddr) -> Result<()> {
        if matches!(
            self.login_limiter.check(ip, EndpointClass::Login).await,
            RateDecision::Denied { .. }
        ) {
            self.kv
                .set(&blocked_key(ip), b"1".to_vec(), Some(self.config.block_duration))
                .await?;
        }
        Ok(())
    }

    async fn revoke_family(&self, family_id: &str) -> Result<()> {
        let index_key = family_key(family_id);
        let members = self.family_members(&index_key).await?;
        for token_id in members {
            self.kv.delete(&refresh_key(&token_id)).await?;
        }
        self.kv.delete(&index_key).await?;
        Ok(())
    }

    async fn add_family_member(&self, family_id: &str, token_id: &str) -> Result<()> {
        let index_key = family_key(family_id);
        for _ in 0..MAX_CAS_ATTEMPTS {
            let existing = self.kv.get(&index_key).await?;
            let mut members: Vec<String> = existing
                .as_deref()
                .and_then(|bytes| serde_json::from_slice(bytes).ok())
                .unwrap_or_default();
            if members.iter().any(|m| m == token_id) {
                return Ok(());
            }
            members.push(token_id.to_string());
            let encoded = serde_json::to_vec(&members)?;
            if self
                .kv
                .compare_and_swap(&index_key, existing, encoded, Some(self.config.refresh_token_ttl))
                .await?
            {
                return Ok(());
            }
        }
        Ok(())
    }

    async fn family_members(&self, index_key: &str) -> Result<Vec<String>> {
        let existing = self.kv.get(index_key).await?;
        Ok(existing
            .as_deref()
            .and_then(|bytes| serde_json::from_slice(bytes).ok())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use chatcore_kv::MemoryKv;
    use secrecy::SecretString;

    use super::*;

    struct FixedUser {
        user_id: String,
        username: String,
        password_hash: String,
    }

    #[async_trait]
    impl UserLookup for FixedUser {
        async fn find_by_username(&self, username: &str) -> Result<Option<(String, String)>> {
            if username == self.username {
                Ok(Some((self.user_id.clone(), self.password_hash.clone())))
            } else {
                Ok(None)
            }
        }
    }

    fn service() -> AuthService {
        AuthService::new(
            Arc::new(MemoryKv::new()),
            TokenSigner::new(SecretString::from("x".repeat(32))),
            AuthServiceConfig::default(),
        )
    }

    fn user() -> FixedUser {
        FixedUser {
            user_id: "u1".into(),
            username: "alice".into(),
            password_hash: hash_password("correct horse"),
        }
    }

    fn test_ip() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))
    }

    #[tokio::test]
    async fn login_succeeds_with_correct_password() {
        let service = service();
        let result = service.login(test_ip(), "alice", "correct horse", &user()).await.unwrap();
        assert_eq!(result.user_id, "u1");
        let claims = service.verify_access_token(&result.access_token).unwrap();
        assert_eq!(claims.user_id, "u1");
    }

    #[tokio::test]
    async fn login_fails_with_wrong_password() {
        let service = service();
        let err = service.login(test_ip(), "alice", "wrong", &user()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidCredentials));
    }

    #[tokio::test]
    async fn repeated_failures_trigger_block() {
        let mut config = AuthServiceConfig::default();
        config.max_login_failures = 2;
        let service = AuthService::new(
            Arc::new(MemoryKv::new()),
            TokenSigner::new(SecretString::from("x".repeat(32))),
            config,
        );
        let ip = test_ip();
        let _ = service.login(ip, "alice", "wrong", &user()).await;
        let _ = service.login(ip, "alice", "wrong", &user()).await;
        let err = service.login(ip, "alice", "correct horse", &user()).await.unwrap_err();
        assert!(matches!(err, Error::Blocked { .. }));
    }

    #[tokio::test]
    async fn refresh_rotates_to_a_new_token_in_the_same_family() {
        let service = service();
        let login = service.login(test_ip(), "alice", "correct horse", &user()).await.unwrap();
        let refreshed = service.refresh(&login.refresh_token_id).await.unwrap();
        assert_eq!(refreshed.family_id, login.family_id);
        assert_ne!(refreshed.refresh_token_id, login.refresh_token_id);
    }

    #[tokio::test]
    async fn reusing_a_rotated_token_is_rejected_and_revokes_the_family() {
        let service = service();
        let login = service.login(test_ip(), "alice", "correct horse", &user()).await.unwrap();
        let refreshed = service.refresh(&login.refresh_token_id).await.unwrap();

        let err = service.refresh(&login.refresh_token_id).await.unwrap_err();
        assert!(matches!(err, Error::RefreshReuseDetected));

        // The entire family, including the token issued by the legitimate
        // rotation, is gone (§3 invariant, §8 property 3).
        let err2 = service.refresh(&refreshed.refresh_token_id).await.unwrap_err();
        assert!(matches!(err2, Error::InvalidToken));
    }

    #[tokio::test]
    async fn logout_revokes_the_family() {
        let service = service();
        let login = service.login(test_ip(), "alice", "correct horse", &user()).await.unwrap();
        service.logout(&login.refresh_token_id).await.unwrap();
        let err = service.refresh(&login.refresh_token_id).await.unwrap_err();
        assert!(matches!(err, Error::InvalidToken));
    }

    #[tokio::test]
    async fn invalid_username_is_rejected_before_any_lookup() {
        let service = service();
        let err = service
            .login(test_ip(), "<script>alert(1)</script>", "whatever", &user())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidCredentials));
    }
}
