//! Wire envelopes for the WebSocket frontend (§6) and the cross-worker
//! pub/sub bus (§4.D). All communication uses JSON; frames are tagged unions
//! discriminated on a `type` field.

use serde::{Deserialize, Serialize};

// ── Constants ────────────────────────────────────────────────────────────────

pub const MAX_FRAME_BYTES: usize = 65_536; // 64 KB, matches ws.max_frame_bytes default
pub const HANDSHAKE_TIMEOUT_MS: u64 = 10_000; // 10s

/// Discriminator on a reply indicating which pipeline stage produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    Static,
    Fuzzy,
    Semantic,
    Vector,
    Generator,
    Fallback,
}

impl std::fmt::Display for SourceTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Static => "static",
            Self::Fuzzy => "fuzzy",
            Self::Semantic => "semantic",
            Self::Vector => "vector",
            Self::Generator => "generator",
            Self::Fallback => "fallback",
        };
        f.write_str(s)
    }
}

// ── Inbound client frames ────────────────────────────────────────────────────

/// Client → server frame received on `/ws/{user_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Chat {
        body: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    Ping {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    Close {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
}

// ── Outbound server frames ───────────────────────────────────────────────────

/// Server → client frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    ChatReply {
        message: String,
        source_tag: SourceTag,
        confidence: f32,
        timestamp: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    RateLimited {
        retry_after: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    Timeout {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
}

impl ServerFrame {
    #[must_use]
    pub fn to_json(&self) -> String {
        // Frames are always constructed from values that serialize cleanly
        // (no NaN floats, no non-UTF8 keys), so this realistically cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","message":"internal encoding error"}"#.to_string()
        })
    }
}

/// WebSocket close codes used by the hub (§4.E, §7).
pub mod close_codes {
    pub const NORMAL: u16 = 1000;
    pub const PROTOCOL_ERROR: u16 = 1002;
    pub const BACKPRESSURE: u16 = 4001;
    pub const INTERNAL_ERROR: u16 = 4002;
}

// ── Cross-worker broker envelope (§4.D) ──────────────────────────────────────

/// Topic names used by the `MessageBroker`.
pub mod topics {
    #[must_use]
    pub fn user(user_id: &str) -> String {
        format!("ws:user:{user_id}")
    }

    #[must_use]
    pub fn session(session_id: &str) -> String {
        format!("ws:session:{session_id}")
    }

    pub const BROADCAST: &str = "ws:broadcast";
    pub const CONTROL: &str = "ws:control";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerEventType {
    ChatReply,
    WorkerUp,
    WorkerDown,
    Broadcast,
}

/// Self-describing envelope carried over the pub/sub bus. A subscriber must
/// ignore envelopes whose `origin_worker_id` equals its own, to prevent
/// self-echo (§4.D, §8 property 5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerEnvelope {
    #[serde(rename = "type")]
    pub event_type: BrokerEventType,
    pub origin_worker_id: String,
    pub target: String,
    pub message: serde_json::Value,
    pub issued_at: u64,
}

impl BrokerEnvelope {
    #[must_use]
    pub fn new(
        event_type: BrokerEventType,
        origin_worker_id: impl Into<String>,
        target: impl Into<String>,
        message: serde_json::Value,
        issued_at: u64,
    ) -> Self {
        Self {
            event_type,
            origin_worker_id: origin_worker_id.into(),
            target: target.into(),
            message,
            issued_at,
        }
    }

    /// True if this envelope originated from `worker_id` itself and should be
    /// dropped by the receiving worker to avoid delivering a message twice.
    #[must_use]
    pub fn is_self_origin(&self, worker_id: &str) -> bool {
        self.origin_worker_id == worker_id
    }
}

// ── HTTP error shape ─────────────────────────────────────────────────────────

/// Uniform JSON error body for HTTP endpoints (§7: user-visible errors never
/// expose internal details).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}

impl ErrorBody {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            retry_after_seconds: None,
        }
    }

    #[must_use]
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after_seconds = Some(seconds);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frame_chat_round_trips() {
        let frame = ClientFrame::Chat {
            body: "merhaba".into(),
            id: Some("req-1".into()),
        };
        let json = serde_json::to_string(&frame).unwrap();
        let decoded: ClientFrame = serde_json::from_str(&json).unwrap();
        match decoded {
            ClientFrame::Chat { body, id } => {
                assert_eq!(body, "merhaba");
                assert_eq!(id.as_deref(), Some("req-1"));
            },
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn client_frame_ping_has_no_body_field() {
        let json = r#"{"type":"ping","id":"p1"}"#;
        let decoded: ClientFrame = serde_json::from_str(json).unwrap();
        assert!(matches!(decoded, ClientFrame::Ping { id: Some(id) } if id == "p1"));
    }

    #[test]
    fn server_frame_chat_reply_serializes_with_snake_case_tag() {
        let frame = ServerFrame::ChatReply {
            message: "Merhaba!".into(),
            source_tag: SourceTag::Static,
            confidence: 0.9,
            timestamp: 12345,
            id: None,
        };
        let json = frame.to_json();
        assert!(json.contains("\"type\":\"chat_reply\""));
        assert!(json.contains("\"source_tag\":\"static\""));
    }

    #[test]
    fn broker_envelope_detects_self_origin() {
        let env = BrokerEnvelope::new(
            BrokerEventType::ChatReply,
            "worker-a",
            "ws:user:u1",
            serde_json::json!({}),
            0,
        );
        assert!(env.is_self_origin("worker-a"));
        assert!(!env.is_self_origin("worker-b"));
    }

    #[test]
    fn topic_helpers_format_as_expected() {
        assert_eq!(topics::user("u1"), "ws:user:u1");
        assert_eq!(topics::session("s1"), "ws:session:s1");
    }
}
