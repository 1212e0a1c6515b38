//! Community detection and summarization.

pub mod louvain;
pub mod summarize;

pub use louvain::{CommunityDetectionResult, LouvainConfig, LouvainDetector};
pub use summarize::CommunitySummarizer;
