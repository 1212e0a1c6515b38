//! Global query engine: map-reduce over community summaries.
//!
//! The map phase iterates communities at one level **sequentially** — the
//! LLM collaborator is not concurrent-safe — scoring each summary's
//! helpfulness for the question. The reduce phase synthesizes the highest
//! scoring partial answers, bounded by an answer cap and an approximate
//! token budget, into one response citing report numbers.

use crate::config::GlobalQueryConfig;
use crate::llm::{LlmProvider, TokenStream};
use crate::models::Community;
use crate::storage::GraphStore;
use crate::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::instrument;

/// Canonical answer when the graph holds nothing relevant.
pub const INSUFFICIENT_INFORMATION: &str =
    "I don't have enough indexed information to answer that question.";

/// One community's scored partial answer from the map phase.
#[derive(Debug, Clone)]
pub struct CommunityAnswer {
    /// Source community id.
    pub community_id: String,
    /// The community summary the answer was grounded in.
    pub summary: String,
    /// The partial answer text.
    pub answer: String,
    /// Helpfulness score, clamped to 0..=100.
    pub score: u32,
    /// The community's hierarchy level.
    pub level: u32,
}

/// The synthesized result.
#[derive(Debug, Clone)]
pub struct GlobalQueryResult {
    /// Final synthesized answer.
    pub answer: String,
    /// The community answers selected for the reduce phase.
    pub community_answers: Vec<CommunityAnswer>,
    /// Communities visited during the map phase.
    pub total_communities_processed: usize,
    /// Wall-clock duration of the map phase.
    pub map_duration: Duration,
    /// Wall-clock duration of the reduce phase.
    pub reduce_duration: Duration,
}

/// Map-reduce synthesis engine.
pub struct GlobalQueryEngine {
    store: Arc<GraphStore>,
    llm: Arc<dyn LlmProvider>,
    config: GlobalQueryConfig,
}

static SCORE_RE: Lazy<Regex> = Lazy::new(new_score_regex);

#[allow(clippy::unwrap_used)]
fn new_score_regex() -> Regex {
    Regex::new(r"(?im)^\s*SCORE\s*:\s*(\d+)\s*$").unwrap()
}

impl GlobalQueryEngine {
    /// Creates an engine over shared collaborators.
    #[must_use]
    pub const fn new(
        store: Arc<GraphStore>,
        llm: Arc<dyn LlmProvider>,
        config: GlobalQueryConfig,
    ) -> Self {
        Self { store, llm, config }
    }

    /// Answers a broad question over community summaries.
    ///
    /// An empty or un-indexed graph yields the canonical
    /// [`INSUFFICIENT_INFORMATION`] answer rather than an error.
    ///
    /// # Errors
    ///
    /// Propagates store failures and a reduce-phase LLM failure; map-phase
    /// failures on single communities are skipped.
    #[instrument(skip(self, question))]
    pub fn query(&self, question: &str) -> Result<GlobalQueryResult> {
        let map_start = Instant::now();
        let (answers, processed) = self.map_phase(question)?;
        let map_duration = map_start.elapsed();

        let reduce_start = Instant::now();
        let selected = self.select_for_reduce(answers);
        let answer = if selected.is_empty() {
            INSUFFICIENT_INFORMATION.to_string()
        } else {
            let prompt = reduce_prompt(question, &selected, &self.config.response_type);
            self.llm
                .generate(&prompt)
                .map_err(|e| Error::Collaborator(format!("synthesis: {e}")))?
                .trim()
                .to_string()
        };

        Ok(GlobalQueryResult {
            answer,
            community_answers: selected,
            total_communities_processed: processed,
            map_duration,
            reduce_duration: reduce_start.elapsed(),
        })
    }

    /// As [`Self::query`], but streams the synthesis tokens.
    ///
    /// The selected community answers are returned alongside the stream;
    /// an empty selection yields a single-chunk stream of the canonical
    /// insufficient-information answer.
    ///
    /// # Errors
    ///
    /// As [`Self::query`].
    pub fn query_stream(
        &self,
        question: &str,
    ) -> Result<(Vec<CommunityAnswer>, TokenStream)> {
        let (answers, _processed) = self.map_phase(question)?;
        let selected = self.select_for_reduce(answers);
        if selected.is_empty() {
            let single: TokenStream =
                Box::new(std::iter::once(Ok(INSUFFICIENT_INFORMATION.to_string())));
            return Ok((selected, single));
        }
        let prompt = reduce_prompt(question, &selected, &self.config.response_type);
        let tokens = self
            .llm
            .generate_stream(&prompt)
            .map_err(|e| Error::Collaborator(format!("synthesis: {e}")))?;
        Ok((selected, tokens))
    }

    /// Sequentially scores every summarized community at the chosen level.
    fn map_phase(&self, question: &str) -> Result<(Vec<CommunityAnswer>, usize)> {
        let level = self.select_level(question)?;
        let Some(level) = level else {
            return Ok((Vec::new(), 0));
        };

        let communities = self.store.communities_at_level(level)?;
        let mut answers = Vec::new();
        let mut processed = 0;

        for community in communities {
            if community.summary.is_empty() {
                continue;
            }
            processed += 1;
            match self.map_one(question, &community) {
                Ok(answer) => answers.push(answer),
                Err(err) => {
                    tracing::warn!(community_id = %community.id, error = %err,
                        "map phase skipped community");
                },
            }
        }

        Ok((answers, processed))
    }

    fn map_one(&self, question: &str, community: &Community) -> Result<CommunityAnswer> {
        let prompt = format!(
            "You are given one report about a group of related items from a personal \
             knowledge graph, and a question. Rate how helpful the report is for \
             answering the question on a 0-100 scale, then answer from the report \
             alone.\nRespond exactly as:\nSCORE: <0-100>\n<answer>\n\n\
             Report:\n{}\n\nQuestion: {question}",
            community.summary
        );
        let response = self
            .llm
            .generate(&prompt)
            .map_err(|e| Error::Collaborator(format!("map: {e}")))?;

        let (score, answer) = parse_scored_answer(&response);
        Ok(CommunityAnswer {
            community_id: community.id.clone(),
            summary: community.summary.clone(),
            answer,
            score,
            level: community.level,
        })
    }

    /// Filters by minimum score, sorts descending, then greedily selects
    /// under the answer cap and the approximate token budget.
    fn select_for_reduce(&self, mut answers: Vec<CommunityAnswer>) -> Vec<CommunityAnswer> {
        answers.retain(|a| a.score >= self.config.min_helpfulness_score);
        answers.sort_by(|a, b| b.score.cmp(&a.score));

        let mut selected = Vec::new();
        let mut token_budget_used = 0usize;
        for answer in answers {
            if selected.len() >= self.config.max_community_answers {
                break;
            }
            let cost = approximate_tokens(&answer.answer);
            if token_budget_used + cost > self.config.context_token_limit {
                break;
            }
            token_budget_used += cost;
            selected.push(answer);
        }
        selected
    }

    /// Explicit level from config, clamped; otherwise the keyword
    /// heuristic. `None` when the store holds no communities.
    fn select_level(&self, question: &str) -> Result<Option<u32>> {
        let Some(max_level) = self.store.stats()?.max_community_level else {
            return Ok(None);
        };
        let level = self.config.community_level.map_or_else(
            || heuristic_level(question, max_level),
            |explicit| explicit.min(max_level),
        );
        Ok(Some(level))
    }
}

/// Keyword table for level selection: broad questions map to level 0,
/// specific ones to the deepest level, thematic ones to the middle.
fn heuristic_level(question: &str, max_level: u32) -> u32 {
    let lower = question.to_lowercase();
    const BROAD: &[&str] = &["overall", "in general", "summarize", "everything", "all of"];
    const SPECIFIC: &[&str] = &["exactly", "specifically", "which one", "who is", "when did", "where did"];

    if BROAD.iter().any(|kw| lower.contains(kw)) {
        0
    } else if SPECIFIC.iter().any(|kw| lower.contains(kw)) {
        max_level
    } else {
        max_level / 2
    }
}

/// Parses `SCORE: <n>` (clamped to 0..=100) and the answer that follows.
/// A missing score reads as 0 with the whole response as answer.
fn parse_scored_answer(response: &str) -> (u32, String) {
    SCORE_RE.captures(response).map_or_else(
        || (0, response.trim().to_string()),
        |capture| {
            let score = capture[1].parse::<u32>().unwrap_or(0).min(100);
            let answer = SCORE_RE.replace(response, "").trim().to_string();
            (score, answer)
        },
    )
}

/// Approximate token count: `ceil(chars / 4)`.
fn approximate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

fn reduce_prompt(question: &str, selected: &[CommunityAnswer], response_type: &str) -> String {
    let reports: Vec<String> = selected
        .iter()
        .enumerate()
        .map(|(i, answer)| format!("Report {} (helpfulness {}):\n{}", i + 1, answer.score, answer.answer))
        .collect();
    format!(
        "Synthesize one answer to the question from the reports below. Respond as \
         {response_type}. Cite report numbers like [Report 2] where a claim comes \
         from a single report.\n\n{}\n\nQuestion: {question}",
        reports.join("\n\n")
    )
}
