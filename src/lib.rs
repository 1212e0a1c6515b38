//! # Mnema
//!
//! An on-device GraphRAG engine for personal data.
//!
//! Mnema ingests structured personal records (contacts, calendar events,
//! photos, call logs, documents, notes), distills them into a typed,
//! embedding-augmented knowledge graph in `SQLite`, organizes the graph into
//! a hierarchy of communities with natural-language summaries, and answers
//! queries by fusing graph traversal, vector similarity, and community-level
//! map-reduce synthesis.
//!
//! ## Subsystems
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`storage`] | Persistent typed property graph with vector attributes |
//! | [`extract`] | Deterministic field-based and LLM-prompted entity extraction |
//! | [`linking`] | Template, co-mention, temporal, and colleague link inference |
//! | [`community`] | Hierarchical Louvain detection and LLM summarization |
//! | [`pipeline`] | Staged indexing orchestration with pause/resume/cancel |
//! | [`query`] | Hybrid local retrieval and global map-reduce synthesis |
//! | [`cypher`] | Minimal Cypher-subset parser and executor |
//!
//! The LLM and embedding generators are host-provided collaborators behind
//! the [`llm::LlmProvider`] and [`embedding::Embedder`] traits; platform data
//! access sits behind [`platform::PersonalDataProvider`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use mnema::{GraphStore, IndexingConfig, IndexingPipeline};
//!
//! let store = Arc::new(GraphStore::open("graph.db")?);
//! let pipeline = IndexingPipeline::new(store, llm, embedder, data, IndexingConfig::default());
//! pipeline.run(true).await?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

use thiserror::Error as ThisError;

// Module declarations
pub mod community;
pub mod config;
pub mod cypher;
pub mod embedding;
pub mod extract;
pub mod linking;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod platform;
pub mod query;
pub mod storage;
pub mod vector;

// Re-exports for convenience
pub use config::{GlobalQueryConfig, HybridQueryConfig, IndexingConfig, LinkPredictionConfig};
pub use embedding::{Embedder, SharedEmbedder};
pub use llm::LlmProvider;
pub use models::{
    Community, DataFamily, Entity, EntityType, IndexingProgress, IndexingStatus, Relationship,
    RelationshipType, SourceItem,
};
pub use pipeline::IndexingPipeline;
pub use query::{GlobalQueryEngine, HybridQueryEngine};
pub use storage::GraphStore;

/// Error type for mnema operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait implementations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `NotInitialized` | Any store operation after `close()` |
/// | `DatabaseOpen` | The `SQLite` file cannot be opened or created |
/// | `TableCreation` | Schema bootstrap fails |
/// | `Insert` / `Update` / `Delete` / `Query` | A persistence statement fails |
/// | `DimensionMismatch` | An embedding's length conflicts with the store's detected dimension |
/// | `CypherParse` | The Cypher subset rejects a query |
/// | `PermissionDenied` | The platform refuses access to a data family |
/// | `Busy` | A second indexing run is requested while one is active |
/// | `Collaborator` | The LLM or embedder fails in an interactive path |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Operation called before `initialize` or after `close`.
    #[error("graph store is not initialized")]
    NotInitialized,

    /// The database could not be opened or created.
    #[error("failed to open database: {0}")]
    DatabaseOpen(String),

    /// Schema creation failed.
    #[error("failed to create table: {0}")]
    TableCreation(String),

    /// An insert statement failed.
    #[error("insert failed: {0}")]
    Insert(String),

    /// An update statement failed.
    #[error("update failed: {0}")]
    Update(String),

    /// A delete statement failed.
    #[error("delete failed: {0}")]
    Delete(String),

    /// A read query failed.
    #[error("query failed: {0}")]
    Query(String),

    /// Embedding dimension conflicts with the store's detected dimension.
    ///
    /// All embeddings in one store share a single dimension, auto-detected
    /// from the first vector written.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension the store detected on first insert.
        expected: usize,
        /// Dimension of the offending vector.
        actual: usize,
    },

    /// Cypher syntax failure, with the byte position of the offending token.
    #[error("cypher parse error at position {position}: {message}")]
    CypherParse {
        /// Byte offset into the query text.
        position: usize,
        /// Human-readable diagnosis.
        message: String,
    },

    /// The platform refused access to a personal-data family.
    #[error("permission denied for {0}")]
    PermissionDenied(models::DataFamily),

    /// A second indexing run was requested while one is active.
    #[error("an indexing run is already active")]
    Busy,

    /// The LLM or embedding collaborator failed.
    ///
    /// Surfaced only in interactive paths; inside the indexing pipeline a
    /// collaborator failure is logged and the current item is skipped.
    #[error("collaborator failure: {0}")]
    Collaborator(String),
}

/// Result type alias for mnema operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in milliseconds.
///
/// Centralized so every subsystem stamps entities and progress events from
/// the same clock. Falls back to 0 if the system clock is before the epoch.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn current_timestamp_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
