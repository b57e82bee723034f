//! Password hashing (argon2id, §4.F).

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

/// Hash a plaintext password for storage. Uses argon2id with library defaults.
pub fn hash_password(password: &str) -> String {
    let salt = SaltString::generate(&mut OsRng);
    // Argon2::default() picks the argon2id variant; hashing known-UTF8 bytes
    // with a freshly generated salt cannot fail.
    #[allow(clippy::unwrap_used)]
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .unwrap()
        .to_string()
}

/// Verify a plaintext password against a stored argon2 hash. Returns `false`
/// for a malformed hash rather than propagating a parse error — callers
/// shouldn't distinguish "bad hash" from "bad password".
#[must_use]
pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let hash = hash_password("correct horse battery staple");
        assert!(verify_password("correct horse battery staple", &hash));
        assert!(!verify_password("wrong password", &hash));
    }

    #[test]
    fn malformed_hash_is_rejected_not_panicked() {
        assert!(!verify_password("anything", "not-a-hash"));
    }
}
