//! Graph entities and the stable id derivation used across all stages.

use crate::current_timestamp_ms;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Fixed id of the singleton Self entity representing the device user.
pub const SELF_ENTITY_ID: &str = "you_central_node";

/// Type of entity in the knowledge graph.
///
/// The set is closed: the LLM extractor maps unrecognized tags to [`Self::Topic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    /// Named individual.
    Person,
    /// Company, team, or institution.
    Organization,
    /// Place, either named or coordinate-derived.
    Location,
    /// Calendar event or gathering.
    Event,
    /// Calendar date referenced by an item.
    Date,
    /// Photograph.
    Photo,
    /// File or document.
    Document,
    /// Free-text note.
    Note,
    /// Phone number without a known contact.
    Phone,
    /// Subject or theme.
    Topic,
    /// Ongoing body of work.
    Project,
    /// The device user's central node.
    #[serde(rename = "SELF")]
    SelfNode,
}

impl EntityType {
    /// Returns all entity type variants.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Person,
            Self::Organization,
            Self::Location,
            Self::Event,
            Self::Date,
            Self::Photo,
            Self::Document,
            Self::Note,
            Self::Phone,
            Self::Topic,
            Self::Project,
            Self::SelfNode,
        ]
    }

    /// Returns the canonical uppercase tag.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "PERSON",
            Self::Organization => "ORGANIZATION",
            Self::Location => "LOCATION",
            Self::Event => "EVENT",
            Self::Date => "DATE",
            Self::Photo => "PHOTO",
            Self::Document => "DOCUMENT",
            Self::Note => "NOTE",
            Self::Phone => "PHONE",
            Self::Topic => "TOPIC",
            Self::Project => "PROJECT",
            Self::SelfNode => "SELF",
        }
    }

    /// Parses an entity type tag, accepting any case and common synonyms.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().replace([' ', '-'], "_").as_str() {
            "PERSON" | "PEOPLE" | "CONTACT" => Some(Self::Person),
            "ORGANIZATION" | "ORG" | "COMPANY" => Some(Self::Organization),
            "LOCATION" | "PLACE" => Some(Self::Location),
            "EVENT" | "MEETING" => Some(Self::Event),
            "DATE" => Some(Self::Date),
            "PHOTO" | "IMAGE" => Some(Self::Photo),
            "DOCUMENT" | "FILE" => Some(Self::Document),
            "NOTE" => Some(Self::Note),
            "PHONE" | "PHONE_NUMBER" => Some(Self::Phone),
            "TOPIC" | "CONCEPT" => Some(Self::Topic),
            "PROJECT" => Some(Self::Project),
            "SELF" => Some(Self::SelfNode),
            _ => None,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown entity type: {s}"))
    }
}

/// Lowercases a name and maps every non-`[a-z0-9]` character to `_`.
#[must_use]
pub fn slugify(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Derives the stable entity id: `<type_lower>_<name_slug>`.
///
/// This id is the primary key across extraction, linking, detection, and
/// retrieval, so the same real-world entity seen in different source items
/// collapses into one node.
#[must_use]
pub fn entity_id(entity_type: EntityType, name: &str) -> String {
    format!("{}_{}", entity_type.as_str().to_lowercase(), slugify(name))
}

/// An entity in the knowledge graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Stable id derived from type and name.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Type tag.
    pub entity_type: EntityType,
    /// Optional free-text description.
    pub description: Option<String>,
    /// Optional attribute map (emails, job titles, coordinates).
    pub attributes: HashMap<String, String>,
    /// Dense embedding, dimension fixed per store.
    pub embedding: Option<Vec<f32>>,
    /// Last-modified timestamp, ms epoch. Timestamp-wins on upsert.
    pub last_modified: i64,
    /// Creation timestamp, ms epoch.
    pub created_at: i64,
}

impl Entity {
    /// Creates an entity with a derived id and current timestamps.
    #[must_use]
    pub fn new(entity_type: EntityType, name: impl Into<String>) -> Self {
        let name = name.into();
        let now = current_timestamp_ms();
        Self {
            id: entity_id(entity_type, &name),
            name,
            entity_type,
            description: None,
            attributes: HashMap::new(),
            embedding: None,
            last_modified: now,
            created_at: now,
        }
    }

    /// Creates the singleton Self entity.
    #[must_use]
    pub fn self_node() -> Self {
        let now = current_timestamp_ms();
        Self {
            id: SELF_ENTITY_ID.to_string(),
            name: "You".to_string(),
            entity_type: EntityType::SelfNode,
            description: Some("The device user, at the center of the personal graph".to_string()),
            attributes: HashMap::new(),
            embedding: None,
            last_modified: now,
            created_at: now,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Sets the embedding vector.
    #[must_use]
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Sets the last-modified timestamp.
    #[must_use]
    pub const fn with_last_modified(mut self, ts: i64) -> Self {
        self.last_modified = ts;
        self
    }

    /// The text embedded for this entity: `"<name> <description>"`.
    #[must_use]
    pub fn embedding_text(&self) -> String {
        match &self.description {
            Some(d) if !d.is_empty() => format!("{} {}", self.name, d),
            _ => self.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("Ada Lovelace", "ada_lovelace"; "spaces")]
    #[test_case("Analytical Engine Co", "analytical_engine_co"; "multiword")]
    #[test_case("Room 42", "room_42"; "digits")]
    #[test_case("O'Brien & Sons!", "o_brien___sons_"; "punctuation")]
    fn test_slugify(input: &str, expected: &str) {
        assert_eq!(slugify(input), expected);
    }

    #[test]
    fn test_entity_id_derivation() {
        assert_eq!(
            entity_id(EntityType::Person, "Ada Lovelace"),
            "person_ada_lovelace"
        );
        assert_eq!(
            entity_id(EntityType::Organization, "Analytical Engine Co"),
            "organization_analytical_engine_co"
        );
    }

    #[test]
    fn test_entity_type_parse() {
        assert_eq!(EntityType::parse("person"), Some(EntityType::Person));
        assert_eq!(EntityType::parse("PERSON"), Some(EntityType::Person));
        assert_eq!(EntityType::parse("org"), Some(EntityType::Organization));
        assert_eq!(EntityType::parse("phone number"), Some(EntityType::Phone));
        assert_eq!(EntityType::parse("widget"), None);
    }

    #[test]
    fn test_self_node() {
        let node = Entity::self_node();
        assert_eq!(node.id, SELF_ENTITY_ID);
        assert_eq!(node.entity_type, EntityType::SelfNode);
    }

    #[test]
    fn test_embedding_text() {
        let e = Entity::new(EntityType::Person, "Ada").with_description("Mathematician");
        assert_eq!(e.embedding_text(), "Ada Mathematician");

        let bare = Entity::new(EntityType::Person, "Ada");
        assert_eq!(bare.embedding_text(), "Ada");
    }

    #[test]
    fn test_builder() {
        let e = Entity::new(EntityType::Person, "Ada")
            .with_attribute("email", "ada@ae.co")
            .with_last_modified(42);
        assert_eq!(e.attributes.get("email"), Some(&"ada@ae.co".to_string()));
        assert_eq!(e.last_modified, 42);
    }
}
