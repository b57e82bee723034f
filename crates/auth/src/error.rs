use chatcore_protocol::ErrorBody;

/// Authentication/session errors (§4.F, §7 "Admission denied").
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("account temporarily blocked after repeated failures")]
    Blocked { retry_after_seconds: u64 },
    #[error("rate limited")]
    RateLimited { retry_after_seconds: u64 },
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("refresh token already used")]
    RefreshReuseDetected,
    #[error(transparent)]
    Kv(#[from] chatcore_kv::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// HTTP status code this error maps to on `/api/auth/*` (§6).
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidCredentials | Self::InvalidToken | Self::RefreshReuseDetected => 401,
            Self::Blocked { .. } => 423,
            Self::RateLimited { .. } => 429,
            Self::Kv(_) | Self::Serde(_) => 500,
        }
    }
}

impl From<Error> for ErrorBody {
    fn from(error: Error) -> Self {
        let body = ErrorBody::new(error.to_string());
        match error {
            Error::Blocked { retry_after_seconds } | Error::RateLimited { retry_after_seconds } => {
                body.with_retry_after(retry_after_seconds)
            },
            _ => body,
        }
    }
}
