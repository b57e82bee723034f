//! Access token issuance and verification: HMAC-SHA256 over a compact JSON
//! payload (§4.F, §9 — deliberately not JWT: one algorithm, no header to
//! confuse a verifier into accepting `alg: none`).

use base64::Engine;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Claims carried by an access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub user_id: String,
    pub username: String,
    pub issued_at: u64,
    pub expires_at: u64,
}

impl AccessClaims {
    #[must_use]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at
    }
}

/// Signs and verifies access tokens with a single shared key.
pub struct TokenSigner {
    key: SecretString,
}

impl TokenSigner {
    #[must_use]
    pub fn new(key: SecretString) -> Self {
        Self { key }
    }

    /// Issue a signed access token valid for `ttl` from `now_ms`.
    pub fn issue(&self, user_id: &str, username: &str, now_ms: u64, ttl: std::time::Duration) -> Result<String> {
        let claims = AccessClaims {
            user_id: user_id.to_string(),
            username: username.to_string(),
            issued_at: now_ms,
            expires_at: now_ms + ttl.as_millis() as u64,
        };
        self.encode(&claims)
    }

    fn encode(&self, claims: &AccessClaims) -> Result<String> {
        let payload = serde_json::to_vec(claims)?;
        let payload_b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&payload);
        let signature = self.sign(payload_b64.as_bytes());
        let signature_b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(signature);
        Ok(format!("{payload_b64}.{signature_b64}"))
    }

    /// Verify a token's signature and expiry, returning its claims.
    pub fn verify(&self, token: &str, now_ms: u64) -> Result<AccessClaims> {
        let (payload_b64, signature_b64) = token.split_once('.').ok_or(Error::InvalidToken)?;

        let signature = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| Error::InvalidToken)?;

        let mut mac = self.mac();
        mac.update(payload_b64.as_bytes());
        mac.verify_slice(&signature).map_err(|_| Error::InvalidToken)?;

        let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| Error::InvalidToken)?;
        let claims: AccessClaims = serde_json::from_slice(&payload)?;

        if claims.is_expired(now_ms) {
            return Err(Error::InvalidToken);
        }
        Ok(claims)
    }

    fn sign(&self, payload: &[u8]) -> Vec<u8> {
        let mut mac = self.mac();
        mac.update(payload);
        mac.finalize().into_bytes().to_vec()
    }

    fn mac(&self) -> HmacSha256 {
        // The signing key is validated non-empty at config load (chatcore-config's
        // `validate`); a key this short could only reach here via a direct
        // construction that skipped validation.
        #[allow(clippy::expect_used)]
        HmacSha256::new_from_slice(self.key.expose_secret().as_bytes()).expect("HMAC accepts any key length")
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn signer() -> TokenSigner {
        TokenSigner::new(SecretString::from("x".repeat(32)))
    }

    #[test]
    fn issues_and_verifies_a_token() {
        let signer = signer();
        let token = signer.issue("u1", "alice", 1_000, Duration::from_secs(900)).unwrap();
        let claims = signer.verify(&token, 1_500).unwrap();
        assert_eq!(claims.user_id, "u1");
        assert_eq!(claims.username, "alice");
    }

    #[test]
    fn rejects_expired_token() {
        let signer = signer();
        let token = signer.issue("u1", "alice", 1_000, Duration::from_secs(1)).unwrap();
        let err = signer.verify(&token, 10_000_000).unwrap_err();
        assert!(matches!(err, Error::InvalidToken));
    }

    #[test]
    fn rejects_tampered_payload() {
        let signer = signer();
        let token = signer.issue("u1", "alice", 1_000, Duration::from_secs(900)).unwrap();
        let (_, sig) = token.split_once('.').unwrap();
        let tampered = format!("{}.{sig}", base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(b"{}"));
        assert!(signer.verify(&tampered, 1_500).is_err());
    }

    #[test]
    fn rejects_token_signed_with_a_different_key() {
        let signer_a = signer();
        let signer_b = TokenSigner::new(SecretString::from("y".repeat(32)));
        let token = signer_a.issue("u1", "alice", 1_000, Duration::from_secs(900)).unwrap();
        assert!(signer_b.verify(&token, 1_500).is_err());
    }
}
