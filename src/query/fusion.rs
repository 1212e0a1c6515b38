//! Weighted Reciprocal Rank Fusion for hybrid retrieval.
//!
//! Each ranked list contributes `weight / (k + rank)` per document, with
//! `rank` 1-indexed and `k` dampening the head of each list (default 60).
//! Scores accumulate across sources, which boosts documents that several
//! retrieval routes agree on without any score normalization.
//!
//! # References
//!
//! - Cormack, G. V., Clarke, C. L., & Buettcher, S. (2009). "Reciprocal Rank
//!   Fusion outperforms Condorcet and individual Rank Learning Methods"

use std::collections::HashMap;

/// Where a fused id came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetrievalSource {
    /// The Cypher-subset structural query.
    Cypher,
    /// Entity embedding similarity.
    Embedding,
    /// Community similarity (member ids as weak signals).
    Community,
}

impl RetrievalSource {
    /// Returns the tag used in result metadata.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Cypher => "cypher",
            Self::Embedding => "embedding",
            Self::Community => "community",
        }
    }
}

/// An id with its fused score and dominant source.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedId {
    /// The fused document (entity) id.
    pub id: String,
    /// Accumulated weighted RRF score.
    pub score: f32,
    /// The source that contributed the largest share of the score.
    pub dominant_source: RetrievalSource,
}

/// Weighted RRF combiner.
#[derive(Debug, Clone, Copy)]
pub struct WeightedRrf {
    /// Dampening constant; 60 is the standard value.
    pub k: f32,
}

impl Default for WeightedRrf {
    fn default() -> Self {
        Self { k: 60.0 }
    }
}

impl WeightedRrf {
    /// Creates a combiner with the given dampening constant.
    #[must_use]
    pub const fn new(k: f32) -> Self {
        Self { k }
    }

    /// Fuses ranked id lists, each scaled by its source weight.
    ///
    /// Returns ids ordered by descending fused score. Duplicate ids within
    /// one list only count at their best (first) rank.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fuse(&self, lists: &[(RetrievalSource, f32, Vec<String>)]) -> Vec<RankedId> {
        let capacity: usize = lists.iter().map(|(_, _, ids)| ids.len()).sum();
        let mut scores: HashMap<String, HashMap<RetrievalSource, f32>> =
            HashMap::with_capacity(capacity);

        for (source, weight, ids) in lists {
            let mut seen_in_list: std::collections::HashSet<&str> = std::collections::HashSet::new();
            for (rank, id) in ids.iter().enumerate() {
                if !seen_in_list.insert(id.as_str()) {
                    continue;
                }
                let rrf = weight / (self.k + rank as f32 + 1.0);
                *scores
                    .entry(id.clone())
                    .or_default()
                    .entry(*source)
                    .or_insert(0.0) += rrf;
            }
        }

        let mut ranked: Vec<RankedId> = scores
            .into_iter()
            .map(|(id, by_source)| {
                let score = by_source.values().sum();
                let dominant_source = by_source
                    .iter()
                    .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                    .map_or(RetrievalSource::Embedding, |(source, _)| *source);
                RankedId {
                    id,
                    score,
                    dominant_source,
                }
            })
            .collect();

        ranked.sort_unstable_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        ranked
    }
}
