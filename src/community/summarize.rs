//! LLM-driven community summaries with hierarchical roll-up.
//!
//! Levels are processed children-first (level 0 upward), so a parent
//! community can be summarized from its children's freshly written
//! summaries; when any child summary is missing the parent falls back to a
//! leaf-style prompt over its member entities.

use crate::embedding::SharedEmbedder;
use crate::llm::LlmProvider;
use crate::models::{Community, Entity};
use crate::storage::GraphStore;
use crate::{Error, Result};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::instrument;

/// Generates and persists community summaries.
pub struct CommunitySummarizer {
    store: Arc<GraphStore>,
    llm: Arc<dyn LlmProvider>,
    embedder: SharedEmbedder,
}

impl CommunitySummarizer {
    /// Creates a summarizer over shared collaborators.
    #[must_use]
    pub const fn new(
        store: Arc<GraphStore>,
        llm: Arc<dyn LlmProvider>,
        embedder: SharedEmbedder,
    ) -> Self {
        Self {
            store,
            llm,
            embedder,
        }
    }

    /// Summarizes every stored community, children before parents.
    ///
    /// The cancel flag is checked between communities and before every LLM
    /// call; on cancellation the summaries written so far remain. A failure
    /// on one community is logged and skipped. Returns how many summaries
    /// were written.
    ///
    /// # Errors
    ///
    /// Propagates store failures; collaborator failures are per-community
    /// skips.
    #[instrument(skip(self, cancel))]
    pub fn summarize_all(&self, cancel: &AtomicBool) -> Result<usize> {
        let Some(max_level) = self.store.stats()?.max_community_level else {
            return Ok(0);
        };

        let mut written: usize = 0;
        let mut summarized: HashSet<String> = HashSet::new();

        for level in 0..=max_level {
            for community in self.store.communities_at_level(level)? {
                if cancel.load(Ordering::SeqCst) {
                    tracing::info!(written, "summarization cancelled");
                    return Ok(written);
                }
                match self.summarize_community(&community, &summarized) {
                    Ok(()) => {
                        summarized.insert(community.id.clone());
                        written += 1;
                    },
                    Err(Error::Collaborator(cause)) => {
                        tracing::warn!(community_id = %community.id, %cause,
                            "skipping community summary");
                    },
                    Err(other) => return Err(other),
                }
            }
        }

        metrics::counter!("community_summaries_written_total").increment(written as u64);
        Ok(written)
    }

    /// Summarizes one community and persists the result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Collaborator`] when the LLM or embedder fails, and
    /// propagates store failures.
    fn summarize_community(
        &self,
        community: &Community,
        summarized: &HashSet<String>,
    ) -> Result<()> {
        let prompt = self.build_prompt(community, summarized)?;
        let summary = self
            .llm
            .generate(&prompt)
            .map_err(|e| Error::Collaborator(format!("summary generation: {e}")))?;
        let summary = summary.trim();
        if summary.is_empty() {
            return Err(Error::Collaborator("empty summary".to_string()));
        }

        let embedding = self.embedder.embed(summary)?;
        self.store
            .update_community_summary(&community.id, summary, &embedding)
    }

    /// Builds the hierarchical prompt when every child summary was written
    /// in this run, the leaf prompt otherwise.
    fn build_prompt(&self, community: &Community, summarized: &HashSet<String>) -> Result<String> {
        if !community.child_ids.is_empty()
            && community.child_ids.iter().all(|id| summarized.contains(id))
        {
            let mut child_summaries = Vec::new();
            for child_id in &community.child_ids {
                if let Some(child) = self.store.get_community(child_id)? {
                    if !child.summary.is_empty() {
                        child_summaries.push(child.summary);
                    }
                }
            }
            if !child_summaries.is_empty() {
                return Ok(hierarchical_prompt(&child_summaries));
            }
        }
        self.leaf_prompt(community)
    }

    fn leaf_prompt(&self, community: &Community) -> Result<String> {
        let mut members = Vec::new();
        let mut member_ids: HashSet<&str> = HashSet::new();
        for id in &community.member_ids {
            if let Some(entity) = self.store.get_entity(id)? {
                member_ids.insert(id.as_str());
                members.push(entity);
            }
        }

        let mut triples = Vec::new();
        let mut seen_edges: HashSet<String> = HashSet::new();
        for member in &members {
            for rel in self.store.relationships_for(&member.id)? {
                if member_ids.contains(rel.source_id.as_str())
                    && member_ids.contains(rel.target_id.as_str())
                    && seen_edges.insert(rel.id.clone())
                {
                    triples.push(format!(
                        "- {} {} {}",
                        display_name(&members, &rel.source_id),
                        rel.rel_type.as_str().to_lowercase().replace('_', " "),
                        display_name(&members, &rel.target_id),
                    ));
                }
            }
        }

        let entity_lines: Vec<String> = members
            .iter()
            .map(|e| {
                e.description.as_ref().map_or_else(
                    || format!("- {} ({})", e.name, e.entity_type),
                    |d| format!("- {} ({}): {}", e.name, e.entity_type, d),
                )
            })
            .collect();

        Ok(format!(
            "Summarize this group of connected items from a personal knowledge graph \
             in 2-3 paragraphs. Describe who and what the group is about and how its \
             members relate. Write plain prose, no headings.\n\n\
             Members:\n{}\n\nConnections:\n{}",
            entity_lines.join("\n"),
            if triples.is_empty() {
                "- (none recorded)".to_string()
            } else {
                triples.join("\n")
            }
        ))
    }
}

fn hierarchical_prompt(child_summaries: &[String]) -> String {
    let sections: Vec<String> = child_summaries
        .iter()
        .enumerate()
        .map(|(i, s)| format!("Subgroup {}:\n{s}", i + 1))
        .collect();
    format!(
        "The following are summaries of subgroups of one larger group in a personal \
         knowledge graph. Write a 2-3 paragraph summary of the larger group, \
         synthesizing the common threads across subgroups. Plain prose, no headings.\n\n{}",
        sections.join("\n\n")
    )
}

fn display_name(members: &[Entity], id: &str) -> String {
    members
        .iter()
        .find(|e| e.id == id)
        .map_or_else(|| id.to_string(), |e| e.name.clone())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::embedding::testing::HashEmbedder;
    use crate::llm::testing::ScriptedLlm;
    use crate::models::{EntityType, Relationship, RelationshipType};

    fn seeded_store() -> Arc<GraphStore> {
        let store = Arc::new(GraphStore::in_memory().unwrap());
        let ada = Entity::new(EntityType::Person, "Ada");
        let bob = Entity::new(EntityType::Person, "Bob");
        store.add_entity(&ada).unwrap();
        store.add_entity(&bob).unwrap();
        store
            .add_relationship(&Relationship::new(
                ada.id.clone(),
                RelationshipType::ColleagueOf,
                bob.id,
            ))
            .unwrap();
        store
    }

    fn summarizer(store: &Arc<GraphStore>, responses: Vec<&str>) -> CommunitySummarizer {
        CommunitySummarizer::new(
            Arc::clone(store),
            Arc::new(ScriptedLlm::new(responses)),
            SharedEmbedder::new(Box::new(HashEmbedder::new(4))),
        )
    }

    #[test]
    fn test_summarize_leaf_then_parent() {
        let store = seeded_store();
        let mut leaf = Community::new(0, 0, vec!["person_ada".to_string(), "person_bob".to_string()]);
        leaf.parent_id = Some("community_1_0".to_string());
        store.add_community(&leaf).unwrap();

        let mut parent =
            Community::new(1, 0, vec!["person_ada".to_string(), "person_bob".to_string()]);
        parent.child_ids = vec!["community_0_0".to_string()];
        store.add_community(&parent).unwrap();

        let summarizer = summarizer(&store, vec!["leaf summary", "parent summary"]);
        let written = summarizer.summarize_all(&AtomicBool::new(false)).unwrap();
        assert_eq!(written, 2);

        let leaf = store.get_community("community_0_0").unwrap().unwrap();
        assert_eq!(leaf.summary, "leaf summary");
        assert!(leaf.embedding.is_some());

        let parent = store.get_community("community_1_0").unwrap().unwrap();
        assert_eq!(parent.summary, "parent summary");
    }

    #[test]
    fn test_cancel_stops_between_communities() {
        let store = seeded_store();
        store
            .add_community(&Community::new(0, 0, vec!["person_ada".to_string()]))
            .unwrap();

        let summarizer = summarizer(&store, vec!["never used"]);
        let cancelled = AtomicBool::new(true);
        let written = summarizer.summarize_all(&cancelled).unwrap();
        assert_eq!(written, 0);

        let community = store.get_community("community_0_0").unwrap().unwrap();
        assert!(community.summary.is_empty());
    }

    #[test]
    fn test_llm_failure_skips_community() {
        let store = seeded_store();
        store
            .add_community(&Community::new(0, 0, vec!["person_ada".to_string()]))
            .unwrap();

        let summarizer = CommunitySummarizer::new(
            Arc::clone(&store),
            Arc::new(ScriptedLlm::failing()),
            SharedEmbedder::new(Box::new(HashEmbedder::new(4))),
        );
        let written = summarizer.summarize_all(&AtomicBool::new(false)).unwrap();
        assert_eq!(written, 0);
    }

    #[test]
    fn test_empty_store_is_noop() {
        let store = Arc::new(GraphStore::in_memory().unwrap());
        let summarizer = summarizer(&store, vec!["unused"]);
        assert_eq!(summarizer.summarize_all(&AtomicBool::new(false)).unwrap(), 0);
    }
}
