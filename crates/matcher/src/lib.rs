//! `MatcherStack` (§4.H): the fixed, ordered answer pipeline. Stage 1
//! (static intent catalogue) → stage 2 (fuzzy/synonym) → stage 3
//! (semantic/vector) → stage 4 (generator fallback). The first stage to
//! clear its threshold short-circuits the rest; a later stage can never
//! preempt an earlier hit even if it would score higher.

mod catalogue;
mod normalize;
mod score;

use std::sync::Arc;

pub use catalogue::{Catalogue, IntentEntry, SynonymDictionary};
use catalogue::keyword_token_set;
use chatcore_common::{CircuitBreaker, CircuitConfig};
use chatcore_protocol::SourceTag;
use chatcore_service_traits::{Embedder, Generator, VectorIndex};
use normalize::{char_bigrams, lemmatize, tokenize};
use score::{jaccard, token_set_ratio};
use serde_json::json;

/// The fallback reply returned when every stage declines and the generator
/// is unavailable (§4.H stage 4).
pub const POLITE_DECLINE: &str = "I'm not sure how to help with that yet. Could you rephrase?";

#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    pub stage1_threshold: f32,
    pub stage2_threshold: f32,
    pub stage2_alpha: f32,
    pub stage2_beta: f32,
    pub stage2_gamma: f32,
    pub stage3_cosine_min: f32,
    pub stage3_margin: f32,
    pub stage3_override: f32,
    pub stage3_top_k: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stage1_threshold: 0.6,
            stage2_threshold: 0.55,
            stage2_alpha: 0.5,
            stage2_beta: 0.3,
            stage2_gamma: 0.2,
            stage3_cosine_min: 0.72,
            stage3_margin: 0.05,
            stage3_override: 0.85,
            stage3_top_k: 5,
        }
    }
}

/// A candidate reply returned by one stage of the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct MatcherCandidate {
    pub reply: String,
    pub source_tag: SourceTag,
    pub confidence: f32,
}

pub struct MatcherStack {
    catalogue: Catalogue,
    synonyms: SynonymDictionary,
    config: PipelineConfig,
    embedder: Arc<dyn Embedder>,
    vector_index: Arc<dyn VectorIndex>,
    generator: Arc<dyn Generator>,
    generator_circuit: Arc<CircuitBreaker>,
    vector_circuit: Arc<CircuitBreaker>,
}

impl MatcherStack {
    #[must_use]
    pub fn new(
        catalogue: Catalogue,
        synonyms: SynonymDictionary,
        config: PipelineConfig,
        embedder: Arc<dyn Embedder>,
        vector_index: Arc<dyn VectorIndex>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self {
            catalogue,
            synonyms,
            config,
            embedder,
            vector_index,
            generator,
            generator_circuit: Arc::new(CircuitBreaker::new(CircuitConfig::default())),
            vector_circuit: Arc::new(CircuitBreaker::new(CircuitConfig::default())),
        }
    }

    /// Override the breaker thresholds guarding the stage-4 generator call
    /// (§6 `circuit.*`), replacing the default ones `new` installs.
    #[must_use]
    pub fn with_generator_circuit_config(mut self, circuit: CircuitConfig) -> Self {
        self.generator_circuit = Arc::new(CircuitBreaker::new(circuit));
        self
    }

    /// Override the breaker thresholds guarding the stage-3 vector index
    /// call (§6 `circuit.*`), replacing the default ones `new` installs.
    #[must_use]
    pub fn with_vector_circuit_config(mut self, circuit: CircuitConfig) -> Self {
        self.vector_circuit = Arc::new(CircuitBreaker::new(circuit));
        self
    }

    /// Stage 4's own reachability, for the aggregated health endpoint (§4.K).
    pub async fn generator_health(&self) -> bool {
        self.generator.health_check().await
    }

    /// Whether either dependency breaker (stage 3's vector index, stage 4's
    /// generator) is currently tripped, for the health endpoint's "degraded"
    /// signal.
    #[must_use]
    pub fn any_circuit_open(&self) -> bool {
        use chatcore_common::CircuitState;
        self.generator_circuit.state() == CircuitState::Open || self.vector_circuit.state() == CircuitState::Open
    }

    /// Run the message through every stage in order, stopping at the first
    /// hit. Always produces a candidate — stage 4's polite decline is the
    /// guaranteed final fallback.
    pub async fn handle(&self, message: &str) -> MatcherCandidate {
        let started = std::time::Instant::now();

        if let Some(candidate) = self.stage1_static(message) {
            record_stage("static", started.elapsed());
            return candidate;
        }
        if let Some(candidate) = self.stage2_fuzzy(message) {
            record_stage("fuzzy", started.elapsed());
            return candidate;
        }
        if let Some(candidate) = self.stage3_semantic(message).await {
            record_stage("semantic", started.elapsed());
            return candidate;
        }
        let candidate = self.stage4_generator(message).await;
        record_stage(&candidate.source_tag.to_string(), started.elapsed());
        if candidate.source_tag == SourceTag::Fallback {
            metrics::counter!(chatcore_metrics::pipeline::FALLBACK_TOTAL).increment(1);
        }
        candidate
    }

    fn stage1_static(&self, message: &str) -> Option<MatcherCandidate> {
        let message_tokens = tokenize(message);
        let mut best: Option<(&IntentEntry, f32)> = None;

        for intent in &self.catalogue.intents {
            let keyword_set = keyword_token_set(intent);
            let score = token_set_ratio(&message_tokens, &keyword_set);
            let threshold = intent.threshold.unwrap_or(self.config.stage1_threshold);
            if score < threshold {
                continue;
            }
            best = Some(match best {
                Some((current, current_score)) if !beats(score, &intent.intent_id, current_score, &current.intent_id) => {
                    (current, current_score)
                },
                _ => (intent, score),
            });
        }

        best.map(|(intent, score)| MatcherCandidate {
            reply: intent.reply_template.clone(),
            source_tag: SourceTag::Static,
            confidence: score,
        })
    }

    fn stage2_fuzzy(&self, message: &str) -> Option<MatcherCandidate> {
        let message_tokens = tokenize(message);
        let message_lemmas: std::collections::HashSet<String> = lemmatize(message).into_iter().collect();
        let message_bigrams = char_bigrams(message);
        let expanded_message = self.synonyms.expand_all(&message_tokens);

        let mut best: Option<(&IntentEntry, f32)> = None;

        for intent in &self.catalogue.intents {
            let keyword_tokens: Vec<String> = intent.keywords.iter().flat_map(|kw| tokenize(kw)).collect();
            let keyword_set = keyword_token_set(intent);
            let expanded_keywords = self.synonyms.expand_all(&keyword_tokens);
            let keyword_lemmas: std::collections::HashSet<String> =
                keyword_tokens.iter().flat_map(|t| lemmatize(t)).collect();
            let keyword_bigrams: std::collections::HashSet<String> =
                intent.keywords.iter().flat_map(|kw| char_bigrams(kw)).collect();

            let token_set_score = jaccard(&expanded_message, &expanded_keywords).max(token_set_ratio(&message_tokens, &keyword_set));
            let bigram_score = jaccard(&message_bigrams, &keyword_bigrams);
            let lemma_score = jaccard(&message_lemmas, &keyword_lemmas);

            let score = self.config.stage2_alpha * token_set_score
                + self.config.stage2_beta * bigram_score
                + self.config.stage2_gamma * lemma_score;

            if score < self.config.stage2_threshold {
                continue;
            }
            best = Some(match best {
                Some((current, current_score)) if !beats(score, &intent.intent_id, current_score, &current.intent_id) => {
                    (current, current_score)
                },
                _ => (intent, score),
            });
        }

        best.map(|(intent, score)| MatcherCandidate {
            reply: intent.reply_template.clone(),
            source_tag: SourceTag::Fuzzy,
            confidence: score,
        })
    }

    async fn stage3_semantic(&self, message: &str) -> Option<MatcherCandidate> {
        if !self.vector_circuit.is_call_permitted() {
            return None;
        }

        let embedding = match self.embedder.embed(message).await {
            Ok(embedding) => embedding,
            Err(_) => return None,
        };
        let hits = match self.vector_index.search(&embedding, self.config.stage3_top_k).await {
            Ok(hits) => {
                self.vector_circuit.record_success();
                hits
            },
            Err(error) => {
                self.vector_circuit.record_failure();
                tracing::warn!(%error, "vector index search failed, declining stage 3");
                return None;
            },
        };
        if hits.is_empty() {
            return None;
        }

        let top1 = hits[0].score;
        let top2 = hits.get(1).map_or(0.0, |hit| hit.score);

        if top1 < self.config.stage3_cosine_min {
            return None;
        }
        if (top1 - top2) < self.config.stage3_margin && top1 < self.config.stage3_override {
            return None;
        }

        let is_faq = hits[0]
            .payload
            .get("kind")
            .and_then(|v| v.as_str())
            .map(|kind| kind == "faq")
            .unwrap_or(false);
        let source_tag = if is_faq { SourceTag::Vector } else { SourceTag::Semantic };

        let reply = hits[0]
            .payload
            .get("reply")
            .and_then(|v| v.as_str())
            .unwrap_or(&hits[0].id)
            .to_string();

        Some(MatcherCandidate {
            reply,
            source_tag,
            confidence: top1,
        })
    }

    async fn stage4_generator(&self, message: &str) -> MatcherCandidate {
        if !self.generator_circuit.is_call_permitted() {
            return self.fallback_candidate();
        }

        match self.generator.generate(message, json!({})).await {
            Ok(reply) => {
                self.generator_circuit.record_success();
                MatcherCandidate {
                    reply,
                    source_tag: SourceTag::Generator,
                    confidence: 0.5,
                }
            },
            Err(error) => {
                self.generator_circuit.record_failure();
                tracing::warn!(%error, "generator call failed, returning fallback reply");
                self.fallback_candidate()
            },
        }
    }

    fn fallback_candidate(&self) -> MatcherCandidate {
        MatcherCandidate {
            reply: POLITE_DECLINE.to_string(),
            source_tag: SourceTag::Fallback,
            confidence: 0.0,
        }
    }
}

/// Tie-break rule for stages 1-2: higher score wins; equal scores are
/// broken by lexicographic `intent_id` (§4.H "Tie-breaking and ordering").
fn beats(score: f32, intent_id: &str, other_score: f32, other_intent_id: &str) -> bool {
    if score > other_score {
        return true;
    }
    if score < other_score {
        return false;
    }
    intent_id < other_intent_id
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chatcore_service_traits::{NoopEmbedder, NoopGenerator, NoopVectorIndex, ServiceResult, VectorHit};
    use serde_json::Value;

    use super::*;

    fn catalogue() -> Catalogue {
        Catalogue::from_json(
            r#"{"intents":[
                {"intent_id":"greeting","keywords":["merhaba","selam"],"reply_template":"Merhaba!"},
                {"intent_id":"farewell","keywords":["hoşça kal","görüşürüz"],"reply_template":"Görüşmek üzere!"}
            ]}"#,
        )
        .unwrap()
    }

    fn empty_synonyms() -> SynonymDictionary {
        SynonymDictionary::from_json(r#"{"groups":[]}"#).unwrap()
    }

    fn stack() -> MatcherStack {
        MatcherStack::new(
            catalogue(),
            empty_synonyms(),
            PipelineConfig::default(),
            Arc::new(NoopEmbedder),
            Arc::new(NoopVectorIndex),
            Arc::new(NoopGenerator),
        )
    }

    #[tokio::test]
    async fn stage1_matches_exact_keyword() {
        let candidate = stack().handle("merhaba").await;
        assert_eq!(candidate.source_tag, SourceTag::Static);
        assert_eq!(candidate.reply, "Merhaba!");
    }

    #[tokio::test]
    async fn stage1_matches_despite_turkish_diacritics_case() {
        let candidate = stack().handle("MERHABA").await;
        assert_eq!(candidate.source_tag, SourceTag::Static);
    }

    #[tokio::test]
    async fn unmatched_message_falls_through_to_fallback() {
        let candidate = stack().handle("zzz qqq xxx").await;
        assert_eq!(candidate.source_tag, SourceTag::Fallback);
        assert_eq!(candidate.reply, POLITE_DECLINE);
        assert_eq!(candidate.confidence, 0.0);
    }

    #[tokio::test]
    async fn stage2_catches_a_synonym_stage1_misses() {
        let synonyms = SynonymDictionary::from_json(r#"{"groups":[["merhaba","heya"]]}"#).unwrap();
        let stack = MatcherStack::new(
            catalogue(),
            synonyms,
            PipelineConfig::default(),
            Arc::new(NoopEmbedder),
            Arc::new(NoopVectorIndex),
            Arc::new(NoopGenerator),
        );
        let candidate = stack.handle("heya").await;
        assert_eq!(candidate.source_tag, SourceTag::Fuzzy);
    }

    struct FixedVectorIndex {
        hits: Vec<VectorHit>,
    }

    #[async_trait]
    impl VectorIndex for FixedVectorIndex {
        async fn search(&self, _embedding: &[f32], _top_k: usize) -> ServiceResult<Vec<VectorHit>> {
            Ok(self.hits.clone())
        }

        async fn upsert(&self, _id: &str, _embedding: &[f32], _payload: Value) -> ServiceResult<()> {
            Ok(())
        }
    }

    struct FixedEmbedder;

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, _text: &str) -> ServiceResult<Vec<f32>> {
            Ok(vec![0.1, 0.2])
        }
    }

    #[tokio::test]
    async fn stage3_matches_when_confident_and_well_separated() {
        let stack = MatcherStack::new(
            catalogue(),
            empty_synonyms(),
            PipelineConfig::default(),
            Arc::new(FixedEmbedder),
            Arc::new(FixedVectorIndex {
                hits: vec![
                    VectorHit {
                        id: "doc1".into(),
                        score: 0.9,
                        payload: json!({"reply": "Here's the answer.", "kind": "faq"}),
                    },
                    VectorHit {
                        id: "doc2".into(),
                        score: 0.5,
                        payload: json!({}),
                    },
                ],
            }),
            Arc::new(NoopGenerator),
        );
        let candidate = stack.handle("unrelated to catalogue").await;
        assert_eq!(candidate.source_tag, SourceTag::Vector);
        assert_eq!(candidate.reply, "Here's the answer.");
    }

    #[tokio::test]
    async fn stage3_declines_when_top_results_are_too_close() {
        let stack = MatcherStack::new(
            catalogue(),
            empty_synonyms(),
            PipelineConfig::default(),
            Arc::new(FixedEmbedder),
            Arc::new(FixedVectorIndex {
                hits: vec![
                    VectorHit {
                        id: "doc1".into(),
                        score: 0.74,
                        payload: json!({}),
                    },
                    VectorHit {
                        id: "doc2".into(),
                        score: 0.73,
                        payload: json!({}),
                    },
                ],
            }),
            Arc::new(NoopGenerator),
        );
        let candidate = stack.handle("unrelated to catalogue").await;
        assert_eq!(candidate.source_tag, SourceTag::Fallback);
    }

    #[tokio::test]
    async fn an_earlier_stage_always_wins_even_if_a_later_one_would_score_higher() {
        // Stage 1 matches "merhaba" at a modest score; a vector index primed
        // to return a near-perfect hit must never be consulted.
        let stack = MatcherStack::new(
            catalogue(),
            empty_synonyms(),
            PipelineConfig::default(),
            Arc::new(FixedEmbedder),
            Arc::new(FixedVectorIndex {
                hits: vec![VectorHit {
                    id: "doc1".into(),
                    score: 0.99,
                    payload: json!({"reply": "should never surface"}),
                }],
            }),
            Arc::new(NoopGenerator),
        );
        let candidate = stack.handle("merhaba").await;
        assert_eq!(candidate.source_tag, SourceTag::Static);
    }
}

fn record_stage(source_tag: &str, elapsed: std::time::Duration) {
    metrics::counter!(chatcore_metrics::pipeline::STAGE_MATCHES_TOTAL, "stage" => source_tag.to_string()).increment(1);
    metrics::histogram!(chatcore_metrics::pipeline::STAGE_DURATION_SECONDS, "stage" => source_tag.to_string())
        .record(elapsed.as_secs_f64());
}
