//! Contract traits for the external dependencies the pipeline calls out to:
//! chat history persistence, vector search, embedding, and text generation.
//!
//! None of these are implemented here — each has a `Noop` implementation that
//! returns empty/unavailable responses, so the gateway can run standalone
//! before a real backend is wired in, and so tests can exercise the pipeline
//! without a live dependency.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error type returned by service methods.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{message}")]
    Message { message: String },
    #[error("{0}")]
    Serde(#[from] serde_json::Error),
}

impl ServiceError {
    #[must_use]
    pub fn message(message: impl std::fmt::Display) -> Self {
        Self::Message {
            message: message.to_string(),
        }
    }
}

impl From<String> for ServiceError {
    fn from(value: String) -> Self {
        Self::message(value)
    }
}

impl From<&str> for ServiceError {
    fn from(value: &str) -> Self {
        Self::message(value)
    }
}

impl From<ServiceError> for chatcore_protocol::ErrorBody {
    fn from(err: ServiceError) -> Self {
        Self::new(err.to_string())
    }
}

pub type ServiceResult<T = Value> = Result<T, ServiceError>;

// ── Chat history persistence ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: String,
    pub content: String,
    pub timestamp_ms: u64,
}

/// Durable chat history, keyed by session. Out of scope for this crate's
/// own persistence layer; the pipeline depends only on this contract.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn append(&self, session_id: &str, message: StoredMessage) -> ServiceResult<()>;
    async fn history(&self, session_id: &str, limit: usize) -> ServiceResult<Vec<StoredMessage>>;
    async fn clear(&self, session_id: &str) -> ServiceResult<()>;
}

pub struct NoopChatStore;

#[async_trait]
impl ChatStore for NoopChatStore {
    async fn append(&self, _session_id: &str, _message: StoredMessage) -> ServiceResult<()> {
        Ok(())
    }

    async fn history(&self, _session_id: &str, _limit: usize) -> ServiceResult<Vec<StoredMessage>> {
        Ok(Vec::new())
    }

    async fn clear(&self, _session_id: &str) -> ServiceResult<()> {
        Ok(())
    }
}

// ── Vector search ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorHit {
    pub id: String,
    pub score: f32,
    pub payload: Value,
}

/// Nearest-neighbor lookup over pre-embedded catalogue entries, backing stage
/// 3 of the matcher stack. Out of scope for this crate's own index.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn search(&self, embedding: &[f32], top_k: usize) -> ServiceResult<Vec<VectorHit>>;
    async fn upsert(&self, id: &str, embedding: &[f32], payload: Value) -> ServiceResult<()>;
}

pub struct NoopVectorIndex;

#[async_trait]
impl VectorIndex for NoopVectorIndex {
    async fn search(&self, _embedding: &[f32], _top_k: usize) -> ServiceResult<Vec<VectorHit>> {
        Ok(Vec::new())
    }

    async fn upsert(&self, _id: &str, _embedding: &[f32], _payload: Value) -> ServiceResult<()> {
        Err("vector index not configured".into())
    }
}

/// Turns free text into an embedding vector for `VectorIndex` lookups.
/// Out of scope: the embedding model itself lives outside this crate.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> ServiceResult<Vec<f32>>;
}

pub struct NoopEmbedder;

#[async_trait]
impl Embedder for NoopEmbedder {
    async fn embed(&self, _text: &str) -> ServiceResult<Vec<f32>> {
        Err("embedder not configured".into())
    }
}

// ── Generation fallback ───────────────────────────────────────────────────────

/// Last-resort free-form reply generation (stage 4 of the matcher stack),
/// guarded by a circuit breaker at the call site. Out of scope: the model
/// execution engine itself.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str, context: Value) -> ServiceResult<String>;

    /// Cheap reachability probe for the aggregated health endpoint (§4.K).
    /// Defaults to `true`; implementations backed by a remote model should
    /// override this with an actual ping.
    async fn health_check(&self) -> bool {
        true
    }
}

pub struct NoopGenerator;

#[async_trait]
impl Generator for NoopGenerator {
    async fn generate(&self, _prompt: &str, _context: Value) -> ServiceResult<String> {
        Err("generator not configured".into())
    }

    async fn health_check(&self) -> bool {
        false
    }
}
