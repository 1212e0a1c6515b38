//! Hybrid local retrieval: Cypher + embedding + community fusion.
//!
//! ```text
//! User query ──┬─▶ Cypher subset (explicit, detected, or heuristic) ─▶ ids
//!              ├─▶ search_entities(query_vec)                       ─▶ ids
//!              └─▶ search_communities(query_vec) per level ─▶ member ids
//!                          │
//!                          ▼
//!              weighted reciprocal-rank fusion (k = 60)
//!                          │
//!                          ▼
//!        top_k entities + top_k/2 communities + context string
//! ```

use super::fusion::{RetrievalSource, WeightedRrf};
use crate::config::HybridQueryConfig;
use crate::cypher;
use crate::embedding::SharedEmbedder;
use crate::llm::{LlmProvider, TokenStream};
use crate::models::{Community, Entity, EntityType};
use crate::storage::GraphStore;
use crate::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::instrument;

/// A retrieval request.
#[derive(Debug, Clone)]
pub struct HybridQueryRequest {
    /// Natural-language query text.
    pub text: String,
    /// Explicit Cypher-subset query, when the caller has one.
    pub cypher: Option<String>,
    /// Restrict entity similarity search to one type.
    pub entity_type: Option<EntityType>,
}

impl HybridQueryRequest {
    /// Creates a request from query text.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            cypher: None,
            entity_type: None,
        }
    }

    /// Attaches an explicit Cypher query.
    #[must_use]
    pub fn with_cypher(mut self, cypher: impl Into<String>) -> Self {
        self.cypher = Some(cypher.into());
        self
    }

    /// Restricts the similarity search to one entity type.
    #[must_use]
    pub const fn with_entity_type(mut self, entity_type: EntityType) -> Self {
        self.entity_type = Some(entity_type);
        self
    }
}

/// An entity with its fused retrieval score.
#[derive(Debug, Clone)]
pub struct RankedEntity {
    /// The retrieved entity.
    pub entity: Entity,
    /// Fused RRF score.
    pub score: f32,
    /// The source that contributed most of the score.
    pub source: RetrievalSource,
}

/// A community retrieved as query context.
#[derive(Debug, Clone)]
pub struct RankedCommunity {
    /// The retrieved community.
    pub community: Community,
    /// Cosine similarity of its summary against the query.
    pub score: f32,
}

/// The retrieval result.
#[derive(Debug, Clone)]
pub struct HybridQueryResult {
    /// Fused entities, best first, at most `top_k`.
    pub entities: Vec<RankedEntity>,
    /// Community context, best first, at most `top_k / 2`.
    pub communities: Vec<RankedCommunity>,
    /// Human-readable context assembled from both.
    pub context: String,
    /// Grounded answer, when requested and an LLM is attached.
    pub answer: Option<String>,
}

/// Local retrieval engine fusing structural, vector, and community signals.
pub struct HybridQueryEngine {
    store: Arc<GraphStore>,
    embedder: SharedEmbedder,
    llm: Option<Arc<dyn LlmProvider>>,
    config: HybridQueryConfig,
}

impl HybridQueryEngine {
    /// Creates an engine without answer generation.
    #[must_use]
    pub const fn new(
        store: Arc<GraphStore>,
        embedder: SharedEmbedder,
        config: HybridQueryConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            llm: None,
            config,
        }
    }

    /// Attaches an LLM for grounded answer generation.
    #[must_use]
    pub fn with_llm(mut self, llm: Arc<dyn LlmProvider>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Runs retrieval without answer generation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Collaborator`] when embedding the query fails,
    /// [`Error::CypherParse`] when an explicitly supplied Cypher query is
    /// malformed, and store failures. Heuristic or detected Cypher that
    /// fails degrades to vector-only retrieval.
    #[instrument(skip(self, request), fields(query = %request.text))]
    pub fn query(&self, request: &HybridQueryRequest) -> Result<HybridQueryResult> {
        let query_vec = self.embedder.embed(&request.text)?;

        let cypher_ids = self.cypher_ids(request)?;
        let embedding_ids: Vec<String> = self
            .store
            .search_entities(
                &query_vec,
                self.config.top_k,
                self.config.similarity_threshold,
                request.entity_type,
            )?
            .into_iter()
            .map(|hit| hit.entity.id)
            .collect();

        let (communities, community_member_ids) = if self.config.include_community_context {
            self.community_signals(&query_vec)?
        } else {
            (Vec::new(), Vec::new())
        };

        let fused = WeightedRrf::new(self.config.rrf_k).fuse(&[
            (RetrievalSource::Cypher, self.config.cypher_weight, cypher_ids),
            (
                RetrievalSource::Embedding,
                self.config.embedding_weight,
                embedding_ids,
            ),
            (
                RetrievalSource::Community,
                self.config.community_weight,
                community_member_ids,
            ),
        ]);

        let mut entities = Vec::new();
        for ranked in fused {
            if entities.len() >= self.config.top_k {
                break;
            }
            if let Some(entity) = self.store.get_entity(&ranked.id)? {
                entities.push(RankedEntity {
                    entity,
                    score: ranked.score,
                    source: ranked.dominant_source,
                });
            }
        }

        let mut communities = communities;
        communities.truncate(self.config.top_k.div_ceil(2));

        let context = build_context(&entities, &communities);
        Ok(HybridQueryResult {
            entities,
            communities,
            context,
            answer: None,
        })
    }

    /// Runs retrieval and generates a grounded answer.
    ///
    /// # Errors
    ///
    /// As [`Self::query`], plus [`Error::Collaborator`] when generation
    /// fails.
    pub fn query_with_answer(&self, request: &HybridQueryRequest) -> Result<HybridQueryResult> {
        let mut result = self.query(request)?;
        if let Some(llm) = &self.llm {
            let prompt = answer_prompt(&request.text, &result.entities);
            let answer = llm
                .generate(&prompt)
                .map_err(|e| Error::Collaborator(format!("answer generation: {e}")))?;
            result.answer = Some(answer.trim().to_string());
        }
        Ok(result)
    }

    /// Runs retrieval and streams the grounded answer's tokens.
    ///
    /// # Errors
    ///
    /// As [`Self::query`]; also fails when no LLM is attached.
    pub fn query_with_answer_stream(
        &self,
        request: &HybridQueryRequest,
    ) -> Result<(HybridQueryResult, TokenStream)> {
        let result = self.query(request)?;
        let llm = self
            .llm
            .as_ref()
            .ok_or_else(|| Error::Collaborator("no LLM attached".to_string()))?;
        let prompt = answer_prompt(&request.text, &result.entities);
        let tokens = llm
            .generate_stream(&prompt)
            .map_err(|e| Error::Collaborator(format!("answer generation: {e}")))?;
        Ok((result, tokens))
    }

    /// Resolves the Cypher-side ranked list.
    fn cypher_ids(&self, request: &HybridQueryRequest) -> Result<Vec<String>> {
        // An explicit query is the caller's contract: parse errors surface.
        if let Some(text) = &request.cypher {
            let parsed = cypher::parse(text)?;
            return Ok(match cypher::execute(&self.store, &parsed) {
                Ok(rows) => cypher::collect_entity_ids(&rows),
                Err(err) => {
                    tracing::debug!(error = %err, "cypher execution failed, vector-only");
                    Vec::new()
                },
            });
        }

        // Detected or heuristic Cypher is best-effort all the way down.
        let candidate = detect_cypher(&request.text)
            .map(String::from)
            .or_else(|| natural_to_cypher(&request.text));
        let Some(candidate) = candidate else {
            return Ok(Vec::new());
        };
        let rows = cypher::run(&self.store, &candidate).unwrap_or_else(|err| {
            tracing::debug!(error = %err, "derived cypher failed, vector-only");
            Vec::new()
        });
        Ok(cypher::collect_entity_ids(&rows))
    }

    /// Community hits per level plus their member ids as weak signals.
    fn community_signals(
        &self,
        query_vec: &[f32],
    ) -> Result<(Vec<RankedCommunity>, Vec<String>)> {
        let per_level = (self.config.top_k / 2).max(1);
        let mut hits: Vec<RankedCommunity> = Vec::new();
        for level in 0..=self.config.max_community_level {
            for scored in self
                .store
                .search_communities(query_vec, per_level, Some(level))?
            {
                hits.push(RankedCommunity {
                    community: scored.community,
                    score: scored.score,
                });
            }
        }
        hits.sort_unstable_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let member_ids: Vec<String> = hits
            .iter()
            .flat_map(|hit| hit.community.member_ids.iter().cloned())
            .collect();
        Ok((hits, member_ids))
    }
}

/// Treats the text itself as Cypher when it plainly is.
fn detect_cypher(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    let upper = trimmed.to_uppercase();
    if upper.starts_with("MATCH ") || (upper.contains("MATCH ") && upper.contains(" WHERE ")) {
        Some(trimmed)
    } else {
        None
    }
}

static WHO_KNOWS_RE: Lazy<Regex> =
    Lazy::new(|| new_heuristic_regex(r"(?i)^who knows ([\w .'-]+?)\??$"));
static EVENTS_WITH_RE: Lazy<Regex> =
    Lazy::new(|| new_heuristic_regex(r"(?i)^(?:events|meetings) with ([\w .'-]+?)\??$"));
static PEOPLE_AT_RE: Lazy<Regex> =
    Lazy::new(|| new_heuristic_regex(r"(?i)^(?:people|who works) at ([\w .'-]+?)\??$"));
static ALL_OF_TYPE_RE: Lazy<Regex> =
    Lazy::new(|| new_heuristic_regex(r"(?i)^(?:all|list all|show all) (people|persons|events|organizations)\??$"));

#[allow(clippy::unwrap_used)]
fn new_heuristic_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap()
}

/// The canned natural-language → Cypher pattern table.
///
/// Used only when the caller supplies no Cypher; every produced query is
/// best-effort and failure falls back to vector retrieval.
#[must_use]
pub fn natural_to_cypher(text: &str) -> Option<String> {
    let text = text.trim();

    if let Some(capture) = WHO_KNOWS_RE.captures(text) {
        let name = capture[1].trim().replace('\'', " ");
        return Some(format!(
            "MATCH (p:PERSON)-[:KNOWS]-(q:PERSON {{name: '{name}'}}) RETURN p"
        ));
    }
    if let Some(capture) = EVENTS_WITH_RE.captures(text) {
        let name = capture[1].trim().replace('\'', " ");
        return Some(format!(
            "MATCH (p:PERSON {{name: '{name}'}})-[:ATTENDED_BY]-(e:EVENT) RETURN e"
        ));
    }
    if let Some(capture) = PEOPLE_AT_RE.captures(text) {
        let name = capture[1].trim().replace('\'', " ");
        return Some(format!(
            "MATCH (p:PERSON)-[:WORKS_AT]-(o:ORGANIZATION {{name: '{name}'}}) RETURN p"
        ));
    }
    if let Some(capture) = ALL_OF_TYPE_RE.captures(text) {
        let label = match capture[1].to_lowercase().as_str() {
            "events" => "EVENT",
            "organizations" => "ORGANIZATION",
            _ => "PERSON",
        };
        return Some(format!("MATCH (n:{label}) RETURN n"));
    }
    None
}

/// Assembles the "Relevant Entities" / "Community Context" sections.
fn build_context(entities: &[RankedEntity], communities: &[RankedCommunity]) -> String {
    let mut context = String::new();

    if !entities.is_empty() {
        context.push_str("Relevant Entities:\n");
        for ranked in entities {
            let entity = &ranked.entity;
            context.push_str(&format!(
                "- {} ({})",
                entity.name,
                entity.entity_type.as_str()
            ));
            if let Some(description) = &entity.description {
                context.push_str(&format!(": {description}"));
            }
            context.push('\n');
        }
    }

    if !communities.is_empty() {
        if !context.is_empty() {
            context.push('\n');
        }
        context.push_str("Community Context:\n");
        for ranked in communities {
            if ranked.community.summary.is_empty() {
                continue;
            }
            context.push_str(&format!("- {}\n", ranked.community.summary));
        }
    }

    context
}

/// A tight grounded prompt: top-3 entities, clipped descriptions, a short
/// query, and a single-sentence instruction.
fn answer_prompt(query: &str, entities: &[RankedEntity]) -> String {
    let facts: Vec<String> = entities
        .iter()
        .take(3)
        .map(|ranked| {
            let entity = &ranked.entity;
            let description: String = entity
                .description
                .as_deref()
                .unwrap_or("")
                .chars()
                .take(50)
                .collect();
            if description.is_empty() {
                format!("{} ({})", entity.name, entity.entity_type.as_str())
            } else {
                format!("{} ({}): {}", entity.name, entity.entity_type.as_str(), description)
            }
        })
        .collect();

    let short_query: String = query.chars().take(200).collect();
    format!(
        "Answer in one or two sentences using only these facts.\nFacts:\n{}\nQuestion: {short_query}",
        facts.join("\n")
    )
}
