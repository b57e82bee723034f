//! `InputValidator` (§4.F): length bounds, control-character ban, and a
//! rudimentary script/SQL pattern check on login input. This is a coarse
//! first line of defense — it does not replace parameterized queries or
//! output encoding at the data layer, both out of scope for this crate.

use crate::error::{Error, Result};

const MIN_USERNAME_LEN: usize = 1;
const MAX_USERNAME_LEN: usize = 64;
const MIN_PASSWORD_LEN: usize = 1;
const MAX_PASSWORD_LEN: usize = 256;

const SUSPICIOUS_PATTERNS: &[&str] = &[
    "<script",
    "javascript:",
    "drop table",
    "union select",
    "; --",
    "' or '1'='1",
    "\" or \"1\"=\"1",
];

pub struct InputValidator;

impl InputValidator {
    pub fn validate_username(username: &str) -> Result<()> {
        if !(MIN_USERNAME_LEN..=MAX_USERNAME_LEN).contains(&username.len()) {
            return Err(Error::InvalidCredentials);
        }
        if has_control_char(username) || has_suspicious_pattern(username) {
            return Err(Error::InvalidCredentials);
        }
        Ok(())
    }

    pub fn validate_password(password: &str) -> Result<()> {
        if !(MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&password.len()) {
            return Err(Error::InvalidCredentials);
        }
        if has_control_char(password) {
            return Err(Error::InvalidCredentials);
        }
        Ok(())
    }
}

fn has_control_char(value: &str) -> bool {
    value.chars().any(|c| c.is_control())
}

fn has_suspicious_pattern(value: &str) -> bool {
    let lower = value.to_lowercase();
    SUSPICIOUS_PATTERNS.iter().any(|pattern| lower.contains(pattern))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_username() {
        assert!(InputValidator::validate_username("alice").is_ok());
    }

    #[test]
    fn rejects_empty_username() {
        assert!(InputValidator::validate_username("").is_err());
    }

    #[test]
    fn rejects_oversize_username() {
        let long = "a".repeat(MAX_USERNAME_LEN + 1);
        assert!(InputValidator::validate_username(&long).is_err());
    }

    #[test]
    fn rejects_control_characters() {
        assert!(InputValidator::validate_username("alice\u{0007}").is_err());
        assert!(InputValidator::validate_password("pw\u{0000}word").is_err());
    }

    #[test]
    fn rejects_script_and_sql_patterns() {
        assert!(InputValidator::validate_username("<script>alert(1)</script>").is_err());
        assert!(InputValidator::validate_username("admin' OR '1'='1").is_err());
        assert!(InputValidator::validate_username("x; DROP TABLE users; --").is_err());
    }
}
