//! Engine configuration: indexing, link prediction, and query tuning.

use std::time::Duration;

/// Configuration for the indexing pipeline.
#[derive(Debug, Clone)]
pub struct IndexingConfig {
    /// Items processed per batch.
    pub batch_size: usize,
    /// Yield between batches, bounding sustained CPU/IO.
    pub batch_delay: Duration,
    /// Whether to run community detection.
    pub detect_communities: bool,
    /// Louvain recursion cap.
    pub max_community_depth: u32,
    /// Whether to run LLM summarization after detection.
    pub generate_summaries: bool,
    /// Fetch only records newer than the previous run.
    pub incremental_indexing: bool,
    /// When set, the pipeline re-triggers itself at this interval.
    pub reindex_interval: Option<Duration>,
    /// Whether to run self/template/co-mention link prediction.
    pub enable_link_prediction: bool,
    /// Link-prediction tuning.
    pub link_prediction: LinkPredictionConfig,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_delay: Duration::from_millis(100),
            detect_communities: true,
            max_community_depth: 2,
            generate_summaries: true,
            incremental_indexing: true,
            reindex_interval: None,
            enable_link_prediction: true,
            link_prediction: LinkPredictionConfig::default(),
        }
    }
}

impl IndexingConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the inter-batch delay.
    #[must_use]
    pub const fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }

    /// Enables or disables community detection.
    #[must_use]
    pub const fn with_community_detection(mut self, enabled: bool) -> Self {
        self.detect_communities = enabled;
        self
    }

    /// Enables or disables summary generation.
    #[must_use]
    pub const fn with_summaries(mut self, enabled: bool) -> Self {
        self.generate_summaries = enabled;
        self
    }

    /// Sets the periodic reindex interval.
    #[must_use]
    pub const fn with_reindex_interval(mut self, interval: Duration) -> Self {
        self.reindex_interval = Some(interval);
        self
    }

    /// Enables or disables link prediction.
    #[must_use]
    pub const fn with_link_prediction(mut self, enabled: bool) -> Self {
        self.enable_link_prediction = enabled;
        self
    }
}

/// Configuration for the link predictor.
#[derive(Debug, Clone)]
pub struct LinkPredictionConfig {
    /// Window inside which two timestamped items count as proximate.
    pub temporal_window: Duration,
    /// Minimum co-occurrence count before a `MENTIONED_WITH` edge is emitted.
    pub min_co_occurrence_count: usize,
    /// Scale applied to co-occurrence confidence.
    pub co_occurrence_weight: f32,
    /// Weight assigned to template-derived edges.
    pub template_weight: f32,
    /// Enables Self linking.
    pub enable_self_links: bool,
    /// Enables per-family template inference.
    pub enable_templates: bool,
    /// Enables batch co-mention detection.
    pub enable_co_mentions: bool,
    /// Enables temporal-proximity linking.
    pub enable_temporal: bool,
    /// Enables colleague inference over shared employers.
    pub enable_colleagues: bool,
}

impl Default for LinkPredictionConfig {
    fn default() -> Self {
        Self {
            temporal_window: Duration::from_secs(2 * 60 * 60),
            min_co_occurrence_count: 2,
            co_occurrence_weight: 0.7,
            template_weight: 1.0,
            enable_self_links: true,
            enable_templates: true,
            enable_co_mentions: true,
            enable_temporal: true,
            enable_colleagues: true,
        }
    }
}

impl LinkPredictionConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the temporal-proximity window.
    #[must_use]
    pub const fn with_temporal_window(mut self, window: Duration) -> Self {
        self.temporal_window = window;
        self
    }

    /// Sets the co-occurrence threshold.
    #[must_use]
    pub const fn with_min_co_occurrence(mut self, count: usize) -> Self {
        self.min_co_occurrence_count = count;
        self
    }

    /// Sets the template weight.
    #[must_use]
    pub const fn with_template_weight(mut self, weight: f32) -> Self {
        self.template_weight = weight;
        self
    }
}

/// Configuration for the hybrid (local) query engine.
#[derive(Debug, Clone)]
pub struct HybridQueryConfig {
    /// RRF weight of the Cypher source.
    pub cypher_weight: f32,
    /// RRF weight of the embedding source.
    pub embedding_weight: f32,
    /// RRF weight of the community source.
    pub community_weight: f32,
    /// Entities returned.
    pub top_k: usize,
    /// Cosine threshold for entity similarity hits.
    pub similarity_threshold: f32,
    /// RRF dampening constant.
    pub rrf_k: f32,
    /// Whether community summaries join the retrieval mix.
    pub include_community_context: bool,
    /// Highest community level searched.
    pub max_community_level: u32,
}

impl Default for HybridQueryConfig {
    fn default() -> Self {
        Self {
            cypher_weight: 0.4,
            embedding_weight: 0.4,
            community_weight: 0.2,
            top_k: 10,
            similarity_threshold: 0.5,
            rrf_k: 60.0,
            include_community_context: true,
            max_community_level: 2,
        }
    }
}

impl HybridQueryConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the result count.
    #[must_use]
    pub const fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Sets the similarity threshold.
    #[must_use]
    pub const fn with_similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    /// Enables or disables community context.
    #[must_use]
    pub const fn with_community_context(mut self, enabled: bool) -> Self {
        self.include_community_context = enabled;
        self
    }

    /// Sets the per-source fusion weights.
    #[must_use]
    pub const fn with_weights(mut self, cypher: f32, embedding: f32, community: f32) -> Self {
        self.cypher_weight = cypher;
        self.embedding_weight = embedding;
        self.community_weight = community;
        self
    }
}

/// Configuration for the global (map-reduce) query engine.
#[derive(Debug, Clone)]
pub struct GlobalQueryConfig {
    /// Community level to map over; `None` selects heuristically.
    pub community_level: Option<u32>,
    /// Cap on community answers carried into the reduce phase.
    pub max_community_answers: usize,
    /// Minimum helpfulness score an answer must reach to survive.
    pub min_helpfulness_score: u32,
    /// Approximate token budget for the reduce context.
    pub context_token_limit: usize,
    /// Requested response shape, quoted in the synthesis prompt.
    pub response_type: String,
}

impl Default for GlobalQueryConfig {
    fn default() -> Self {
        Self {
            community_level: Some(1),
            max_community_answers: 10,
            min_helpfulness_score: 20,
            context_token_limit: 4000,
            response_type: "multiple paragraphs".to_string(),
        }
    }
}

impl GlobalQueryConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins the community level, bypassing the heuristic.
    #[must_use]
    pub const fn with_level(mut self, level: u32) -> Self {
        self.community_level = Some(level);
        self
    }

    /// Selects the level heuristically from the query wording.
    #[must_use]
    pub const fn with_heuristic_level(mut self) -> Self {
        self.community_level = None;
        self
    }

    /// Sets the answer cap.
    #[must_use]
    pub const fn with_max_answers(mut self, max: usize) -> Self {
        self.max_community_answers = max;
        self
    }

    /// Sets the minimum helpfulness score.
    #[must_use]
    pub const fn with_min_score(mut self, score: u32) -> Self {
        self.min_helpfulness_score = score;
        self
    }
}
