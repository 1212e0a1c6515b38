//! Communities produced by hierarchical detection.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A community of entities at one level of the detection hierarchy.
///
/// Level 0 is the finest partition; each aggregation pass adds one level.
/// A community's parent sits at `level + 1` and its children at `level - 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Community {
    /// Stable id: `community_<level>_<seed>`.
    pub id: String,
    /// Hierarchy level, 0 = finest.
    pub level: u32,
    /// Natural-language summary; empty until summarization runs.
    pub summary: String,
    /// Embedding of the summary, filled alongside it.
    pub embedding: Option<Vec<f32>>,
    /// Ordered member entity ids.
    pub member_ids: Vec<String>,
    /// Detection metadata (modularity and similar diagnostics).
    pub metadata: HashMap<String, serde_json::Value>,
    /// Absorbing community one level up, when known.
    pub parent_id: Option<String>,
    /// Absorbed communities one level down, when any.
    pub child_ids: Vec<String>,
}

impl Community {
    /// Creates an unsummarized community with a derived id.
    #[must_use]
    pub fn new(level: u32, seed: usize, member_ids: Vec<String>) -> Self {
        Self {
            id: community_id(level, seed),
            level,
            summary: String::new(),
            embedding: None,
            member_ids,
            metadata: HashMap::new(),
            parent_id: None,
            child_ids: Vec::new(),
        }
    }

    /// Records the run's modularity in the metadata map.
    #[must_use]
    pub fn with_modularity(mut self, modularity: f64) -> Self {
        self.metadata
            .insert("modularity".to_string(), serde_json::json!(modularity));
        self
    }

    /// Number of member entities.
    #[must_use]
    pub fn size(&self) -> usize {
        self.member_ids.len()
    }
}

/// Derives the stable community id for a level and seed ordinal.
#[must_use]
pub fn community_id(level: u32, seed: usize) -> String {
    format!("community_{level}_{seed}")
}
