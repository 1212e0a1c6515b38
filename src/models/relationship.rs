//! Graph relationships and their open type taxonomy.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Type of relationship between entities.
///
/// The taxonomy is open: the extractor normalizes unknown tags into
/// [`Self::Custom`] rather than dropping them. Core variants cover every
/// edge the direct extractors and the link predictor emit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    /// Person works at an organization.
    WorksAt,
    /// Self knows a person.
    Knows,
    /// Two people share an employer.
    ColleagueOf,
    /// Person attended an event.
    AttendedBy,
    /// Event or photo is situated in a location.
    LocatedIn,
    /// Entity is a component of another.
    PartOf,
    /// Document was authored by a person.
    CreatedBy,
    /// Entity is referenced inside a source item.
    MentionedIn,
    /// General association.
    RelatedTo,
    /// Two entities co-occur across source items.
    MentionedWith,
    /// Two items fall inside the temporal-proximity window.
    TemporallyProximate,
    /// Self owns a calendar event.
    HasEvent,
    /// Self owns a document.
    OwnsDocument,
    /// Self owns a photo.
    HasPhoto,
    /// Self placed or received a call.
    MadeCall,
    /// Self wrote a note.
    WroteNote,
    /// Photo was taken at a location.
    TakenAt,
    /// Photo was taken on a date.
    TakenOn,
    /// Person appears in a photo.
    PicturedIn,
    /// Document was shared with a person.
    SharedWith,
    /// Note carries a topic tag.
    TaggedWith,
    /// Any tag outside the core set, already upper-snake normalized.
    Custom(String),
}

impl RelationshipType {
    /// Returns the canonical uppercase tag.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::WorksAt => "WORKS_AT",
            Self::Knows => "KNOWS",
            Self::ColleagueOf => "COLLEAGUE_OF",
            Self::AttendedBy => "ATTENDED_BY",
            Self::LocatedIn => "LOCATED_IN",
            Self::PartOf => "PART_OF",
            Self::CreatedBy => "CREATED_BY",
            Self::MentionedIn => "MENTIONED_IN",
            Self::RelatedTo => "RELATED_TO",
            Self::MentionedWith => "MENTIONED_WITH",
            Self::TemporallyProximate => "TEMPORALLY_PROXIMATE",
            Self::HasEvent => "HAS_EVENT",
            Self::OwnsDocument => "OWNS_DOCUMENT",
            Self::HasPhoto => "HAS_PHOTO",
            Self::MadeCall => "MADE_CALL",
            Self::WroteNote => "WROTE_NOTE",
            Self::TakenAt => "TAKEN_AT",
            Self::TakenOn => "TAKEN_ON",
            Self::PicturedIn => "PICTURED_IN",
            Self::SharedWith => "SHARED_WITH",
            Self::TaggedWith => "TAGGED_WITH",
            Self::Custom(tag) => tag,
        }
    }

    /// Parses a relationship tag, normalizing case and separators.
    ///
    /// Never fails: tags outside the core set become [`Self::Custom`].
    #[must_use]
    pub fn parse(s: &str) -> Self {
        let normalized = normalize_tag(s);
        match normalized.as_str() {
            "WORKS_AT" | "WORKS_FOR" | "EMPLOYED_BY" => Self::WorksAt,
            "KNOWS" => Self::Knows,
            "COLLEAGUE_OF" => Self::ColleagueOf,
            "ATTENDED_BY" | "ATTENDED" => Self::AttendedBy,
            "LOCATED_IN" | "LOCATED_AT" => Self::LocatedIn,
            "PART_OF" | "BELONGS_TO" => Self::PartOf,
            "CREATED_BY" | "AUTHORED_BY" => Self::CreatedBy,
            "MENTIONED_IN" => Self::MentionedIn,
            "RELATED_TO" | "ASSOCIATED_WITH" => Self::RelatedTo,
            "MENTIONED_WITH" => Self::MentionedWith,
            "TEMPORALLY_PROXIMATE" => Self::TemporallyProximate,
            "HAS_EVENT" => Self::HasEvent,
            "OWNS_DOCUMENT" => Self::OwnsDocument,
            "HAS_PHOTO" => Self::HasPhoto,
            "MADE_CALL" => Self::MadeCall,
            "WROTE_NOTE" => Self::WroteNote,
            "TAKEN_AT" => Self::TakenAt,
            "TAKEN_ON" => Self::TakenOn,
            "PICTURED_IN" => Self::PicturedIn,
            "SHARED_WITH" => Self::SharedWith,
            "TAGGED_WITH" => Self::TaggedWith,
            _ => Self::Custom(normalized),
        }
    }
}

/// Uppercases a tag and collapses spaces and dashes into underscores.
fn normalize_tag(s: &str) -> String {
    s.trim().to_uppercase().replace([' ', '-'], "_")
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Derives the stable relationship id: `<source>_<type_lower>_<target>`.
#[must_use]
pub fn relationship_id(source_id: &str, rel_type: &RelationshipType, target_id: &str) -> String {
    format!(
        "{source_id}_{}_{target_id}",
        rel_type.as_str().to_lowercase()
    )
}

/// A directed, weighted relationship between two entities.
///
/// Community detection treats edges as undirected; everywhere else the
/// source→target ordering is preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// Stable id derived from endpoints and type.
    pub id: String,
    /// Source entity id.
    pub source_id: String,
    /// Target entity id.
    pub target_id: String,
    /// Relationship type tag.
    pub rel_type: RelationshipType,
    /// Non-negative edge weight; doubles as inference confidence.
    pub weight: f32,
    /// Optional metadata (evidence counts, sample source ids).
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Relationship {
    /// Creates a relationship with a derived id and weight 1.0.
    #[must_use]
    pub fn new(
        source_id: impl Into<String>,
        rel_type: RelationshipType,
        target_id: impl Into<String>,
    ) -> Self {
        let source_id = source_id.into();
        let target_id = target_id.into();
        Self {
            id: relationship_id(&source_id, &rel_type, &target_id),
            source_id,
            target_id,
            rel_type,
            weight: 1.0,
            metadata: HashMap::new(),
        }
    }

    /// Sets the weight, clamped to be non-negative.
    #[must_use]
    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight.max(0.0);
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Returns the endpoint opposite to `entity_id`, if incident.
    #[must_use]
    pub fn other_endpoint(&self, entity_id: &str) -> Option<&str> {
        if self.source_id == entity_id {
            Some(&self.target_id)
        } else if self.target_id == entity_id {
            Some(&self.source_id)
        } else {
            None
        }
    }
}
