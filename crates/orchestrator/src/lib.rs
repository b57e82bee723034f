//! `ChatOrchestrator` (§4.J): the single entry point a chat message passes
//! through — rate-limit admission, cache lookup/compute via the matcher
//! stack, best-effort persistence, and cross-worker publish.
//!
//! State machine per request (§4.H): `Received → Normalized → CacheLookup →
//! (Hit→Respond) | (Miss→Stage1→…→Stage4→Respond) → Persist → Publish`.
//! Every path is terminal.

use std::{net::IpAddr, sync::Arc};

use chatcore_broker::MessageBroker;
use chatcore_cache::{ResponseCache, ResponseCacheEntry, fingerprint};
use chatcore_matcher::MatcherStack;
use chatcore_protocol::SourceTag;
use chatcore_ratelimit::{EndpointClass, RateDecision, RateLimiter};
use chatcore_service_traits::{ChatStore, StoredMessage};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("rate limited, retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },
}

pub type Result<T> = std::result::Result<T, Error>;

/// The reply envelope returned to the caller and published for fan-out
/// (§4.J step 4, §6 `chat_reply`).
#[derive(Debug, Clone)]
pub struct ChatReply {
    pub message: String,
    pub source_tag: SourceTag,
    pub confidence: f32,
    pub timestamp_ms: u64,
}

impl ChatReply {
    fn as_json(&self) -> serde_json::Value {
        json!({
            "type": "chat_reply",
            "message": self.message,
            "source_tag": self.source_tag,
            "confidence": self.confidence,
            "timestamp": self.timestamp_ms,
        })
    }
}

pub struct ChatOrchestrator {
    rate_limiter: Arc<RateLimiter>,
    cache: Arc<ResponseCache>,
    matcher: Arc<MatcherStack>,
    chat_store: Arc<dyn ChatStore>,
    broker: Arc<MessageBroker>,
    locale: String,
}

impl ChatOrchestrator {
    #[must_use]
    pub fn new(
        rate_limiter: Arc<RateLimiter>,
        cache: Arc<ResponseCache>,
        matcher: Arc<MatcherStack>,
        chat_store: Arc<dyn ChatStore>,
        broker: Arc<MessageBroker>,
        locale: impl Into<String>,
    ) -> Self {
        Self {
            rate_limiter,
            cache,
            matcher,
            chat_store,
            broker,
            locale: locale.into(),
        }
    }

    /// The matcher stack this orchestrator drives, for the aggregated health
    /// endpoint's generator probe (§4.K).
    #[must_use]
    pub fn matcher(&self) -> &Arc<MatcherStack> {
        &self.matcher
    }

    /// `handle(user_id, session_id, message)` (§4.J).
    pub async fn handle(
        &self,
        client_ip: IpAddr,
        user_id: &str,
        session_id: &str,
        user_role: &str,
        message: &str,
    ) -> Result<ChatReply> {
        if let RateDecision::Denied { retry_after } = self.rate_limiter.check(client_ip, EndpointClass::Chat).await {
            return Err(Error::RateLimited {
                retry_after_seconds: retry_after.as_secs(),
            });
        }

        let key = fingerprint(message, &self.locale, user_role);
        let matcher = Arc::clone(&self.matcher);
        let owned_message = message.to_string();
        let entry = self
            .cache
            .get_or_compute(&key, || async move {
                let candidate = matcher.handle(&owned_message).await;
                Ok(ResponseCacheEntry {
                    reply: candidate.reply,
                    source_tag: candidate.source_tag.to_string(),
                    confidence: candidate.confidence,
                    created_at_ms: chatcore_common::now_millis(),
                })
            })
            .await
            // `compute` above never returns `Err`, so a cache-level failure
            // can only be a `String` error from a future revision of the
            // compute closure; there is none today.
            .unwrap_or_else(|_| ResponseCacheEntry {
                reply: chatcore_matcher::POLITE_DECLINE.to_string(),
                source_tag: SourceTag::Fallback.to_string(),
                confidence: 0.0,
                created_at_ms: chatcore_common::now_millis(),
            });

        let reply = ChatReply {
            message: entry.reply.clone(),
            source_tag: parse_source_tag(&entry.source_tag),
            confidence: entry.confidence,
            timestamp_ms: chatcore_common::now_millis(),
        };

        if let Err(error) = self
            .chat_store
            .append(
                session_id,
                StoredMessage {
                    role: "user".to_string(),
                    content: message.to_string(),
                    timestamp_ms: chatcore_common::now_millis(),
                },
            )
            .await
        {
            tracing::warn!(%error, session_id, "chat history append failed, continuing without it");
        } else if let Err(error) = self
            .chat_store
            .append(
                session_id,
                StoredMessage {
                    role: "assistant".to_string(),
                    content: reply.message.clone(),
                    timestamp_ms: reply.timestamp_ms,
                },
            )
            .await
        {
            tracing::warn!(%error, session_id, "chat history append failed, continuing without it");
        }

        if let Err(error) = self.broker.publish_to_user(user_id, reply.as_json()).await {
            tracing::warn!(%error, user_id, "failed to publish chat reply for fan-out");
        }

        Ok(reply)
    }
}

fn parse_source_tag(raw: &str) -> SourceTag {
    match raw {
        "static" => SourceTag::Static,
        "fuzzy" => SourceTag::Fuzzy,
        "semantic" => SourceTag::Semantic,
        "vector" => SourceTag::Vector,
        "generator" => SourceTag::Generator,
        _ => SourceTag::Fallback,
    }
}

#[cfg(test)]
mod tests {
    use std::{net::Ipv4Addr, sync::Arc};

    use chatcore_cache::ResponseCacheConfig;
    use chatcore_kv::MemoryKv;
    use chatcore_matcher::{Catalogue, PipelineConfig, SynonymDictionary};
    use chatcore_ratelimit::{RateLimit, RateLimitConfig};
    use chatcore_service_traits::{NoopChatStore, NoopEmbedder, NoopGenerator, NoopVectorIndex};

    use super::*;

    fn test_ip() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    fn orchestrator() -> ChatOrchestrator {
        let kv = Arc::new(MemoryKv::new());
        let catalogue = Catalogue::from_json(
            r#"{"intents":[{"intent_id":"greeting","keywords":["hello"],"reply_template":"Hi!"}]}"#,
        )
        .unwrap();
        let synonyms = SynonymDictionary::from_json(r#"{"groups":[]}"#).unwrap();
        let matcher = Arc::new(MatcherStack::new(
            catalogue,
            synonyms,
            PipelineConfig::default(),
            Arc::new(NoopEmbedder),
            Arc::new(NoopVectorIndex),
            Arc::new(NoopGenerator),
        ));
        let rate_limiter = Arc::new(RateLimiter::new(Arc::clone(&kv), RateLimitConfig::default()));
        let cache = Arc::new(ResponseCache::new(ResponseCacheConfig::default(), None));
        let broker = Arc::new(MessageBroker::new(
            Arc::new(chatcore_kv::InProcessPubSub::new()),
            "worker-1",
        ));
        ChatOrchestrator::new(rate_limiter, cache, matcher, Arc::new(NoopChatStore), broker, "en")
    }

    #[tokio::test]
    async fn handle_returns_a_matched_reply() {
        let orchestrator = orchestrator();
        let reply = orchestrator
            .handle(test_ip(), "u1", "s1", "user", "hello")
            .await
            .unwrap();
        assert_eq!(reply.message, "Hi!");
        assert_eq!(reply.source_tag, SourceTag::Static);
        assert!(reply.confidence >= 0.6, "scenario S1 requires confidence >= 0.6, got {}", reply.confidence);
    }

    #[tokio::test]
    async fn repeated_identical_messages_hit_the_cache() {
        let orchestrator = orchestrator();
        let first = orchestrator.handle(test_ip(), "u1", "s1", "user", "hello").await.unwrap();
        let second = orchestrator.handle(test_ip(), "u1", "s1", "user", "hello").await.unwrap();
        assert_eq!(first.message, second.message);
    }

    #[tokio::test]
    async fn exceeding_the_chat_rate_limit_is_rejected() {
        let kv = Arc::new(MemoryKv::new());
        let catalogue = Catalogue::from_json(r#"{"intents":[]}"#).unwrap();
        let synonyms = SynonymDictionary::from_json(r#"{"groups":[]}"#).unwrap();
        let matcher = Arc::new(MatcherStack::new(
            catalogue,
            synonyms,
            PipelineConfig::default(),
            Arc::new(NoopEmbedder),
            Arc::new(NoopVectorIndex),
            Arc::new(NoopGenerator),
        ));
        let tight = RateLimit {
            max_requests: 1,
            window: std::time::Duration::from_secs(60),
        };
        let rate_limiter = Arc::new(RateLimiter::new(
            Arc::clone(&kv),
            RateLimitConfig {
                general: tight,
                chat: tight,
                login: tight,
                auth_api: tight,
            },
        ));
        let cache = Arc::new(ResponseCache::new(ResponseCacheConfig::default(), None));
        let broker = Arc::new(MessageBroker::new(
            Arc::new(chatcore_kv::InProcessPubSub::new()),
            "worker-1",
        ));
        let orchestrator =
            ChatOrchestrator::new(rate_limiter, cache, matcher, Arc::new(NoopChatStore), broker, "en");

        orchestrator.handle(test_ip(), "u1", "s1", "user", "hello").await.unwrap();
        let err = orchestrator
            .handle(test_ip(), "u1", "s1", "user", "different message")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RateLimited { .. }));
    }
}
