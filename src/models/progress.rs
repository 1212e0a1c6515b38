//! Indexing status and progress events.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of the indexing pipeline.
///
/// Transitions: `Idle → Running ↔ Paused → Completed | Failed | Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexingStatus {
    /// No run has started.
    Idle,
    /// A run is actively processing.
    Running,
    /// A run is suspended and will resume or cancel.
    Paused,
    /// The last run finished all phases.
    Completed,
    /// The last run aborted on an uncaught phase error.
    Failed,
    /// The last run was cancelled cooperatively.
    Cancelled,
}

impl IndexingStatus {
    /// True for `Completed`, `Failed`, and `Cancelled`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for IndexingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// The pipeline phase currently executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexingPhase {
    /// Ensuring the Self entity exists.
    Bootstrap,
    /// Fetching and extracting source items.
    Processing,
    /// Running link prediction across the batch.
    LinkPrediction,
    /// Running community detection.
    CommunityDetection,
    /// Generating community summaries.
    Summarization,
}

impl IndexingPhase {
    /// Returns the phase tag used in progress events and logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Bootstrap => "bootstrap",
            Self::Processing => "processing",
            Self::LinkPrediction => "link_prediction",
            Self::CommunityDetection => "community_detection",
            Self::Summarization => "summarization",
        }
    }
}

impl fmt::Display for IndexingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A snapshot of pipeline progress, broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexingProgress {
    /// Current lifecycle state.
    pub status: IndexingStatus,
    /// Phase the run is in, if any.
    pub phase: Option<IndexingPhase>,
    /// Items processed so far.
    pub processed_items: usize,
    /// Total items discovered for this run.
    pub total_items: usize,
    /// Entities written so far.
    pub extracted_entities: usize,
    /// Relationships written so far.
    pub extracted_relationships: usize,
    /// Links produced by prediction.
    pub predicted_links: usize,
    /// Communities persisted by detection.
    pub detected_communities: usize,
    /// Run start, ms epoch.
    pub start_time: i64,
    /// Run end, ms epoch; set on terminal states.
    pub end_time: Option<i64>,
    /// Error string when `status` is `Failed`.
    pub error: Option<String>,
}

impl IndexingProgress {
    /// A fresh idle snapshot.
    #[must_use]
    pub const fn idle() -> Self {
        Self {
            status: IndexingStatus::Idle,
            phase: None,
            processed_items: 0,
            total_items: 0,
            extracted_entities: 0,
            extracted_relationships: 0,
            predicted_links: 0,
            detected_communities: 0,
            start_time: 0,
            end_time: None,
            error: None,
        }
    }

    /// Completion ratio in `[0, 1]`; 0 when no items were discovered.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn progress(&self) -> f32 {
        if self.total_items == 0 {
            0.0
        } else {
            (self.processed_items as f32 / self.total_items as f32).min(1.0)
        }
    }
}
