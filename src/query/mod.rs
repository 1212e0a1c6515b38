//! Query engines: hybrid local retrieval and global map-reduce synthesis.

pub mod fusion;
pub mod global;
pub mod hybrid;

pub use fusion::{RankedId, RetrievalSource, WeightedRrf};
pub use global::{CommunityAnswer, GlobalQueryEngine, GlobalQueryResult, INSUFFICIENT_INFORMATION};
pub use hybrid::{
    HybridQueryEngine, HybridQueryRequest, HybridQueryResult, RankedCommunity, RankedEntity,
};
