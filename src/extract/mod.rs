//! Entity extraction from personal-data records.
//!
//! Two extractors sit behind one dispatch: [`direct`] emits entities and
//! relationships deterministically from named fields of structured records,
//! and [`llm`] prompts the language model over free text, with a repairing
//! parser ([`repair`]) for the model's unreliable JSON.

pub mod direct;
pub mod llm;
pub mod repair;

pub use direct::DirectExtractor;
pub use llm::{LlmExtractionConfig, LlmExtractor};

use crate::Result;
use crate::models::{DataFamily, Entity, EntityType, SourceItem, entity_id};
use crate::models::RelationshipType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An entity surfaced by extraction, keyed by name until id resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    /// Display name.
    pub name: String,
    /// Type tag.
    pub entity_type: EntityType,
    /// Optional free-text description.
    pub description: Option<String>,
    /// Field-derived attributes.
    pub attributes: HashMap<String, String>,
    /// Extraction confidence in `[0, 1]`.
    pub confidence: f32,
}

impl ExtractedEntity {
    /// Creates an extracted entity with confidence 1.0.
    #[must_use]
    pub fn new(entity_type: EntityType, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_type,
            description: None,
            attributes: HashMap::new(),
            confidence: 1.0,
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

    /// Sets the confidence, clamped to `[0, 1]`.
    #[must_use]
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// The id this entity will take in the store.
    #[must_use]
    pub fn derived_id(&self) -> String {
        entity_id(self.entity_type, &self.name)
    }

    /// Converts into a graph entity stamped with the source's timestamp.
    #[must_use]
    pub fn into_entity(self, last_modified: i64) -> Entity {
        let mut entity = Entity::new(self.entity_type, self.name).with_last_modified(last_modified);
        entity.description = self.description;
        entity.attributes = self.attributes;
        entity
    }
}

/// A relationship surfaced by extraction, endpoints still by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRelationship {
    /// Source entity name.
    pub source_name: String,
    /// Target entity name.
    pub target_name: String,
    /// Relationship type tag.
    pub rel_type: RelationshipType,
    /// Extraction confidence in `[0, 1]`.
    pub confidence: f32,
}

impl ExtractedRelationship {
    /// Creates an extracted relationship with confidence 1.0.
    #[must_use]
    pub fn new(
        source_name: impl Into<String>,
        rel_type: RelationshipType,
        target_name: impl Into<String>,
    ) -> Self {
        Self {
            source_name: source_name.into(),
            target_name: target_name.into(),
            rel_type,
            confidence: 1.0,
        }
    }

    /// Sets the confidence, clamped to `[0, 1]`.
    #[must_use]
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }
}

/// Everything extracted from one source item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Extracted entities.
    pub entities: Vec<ExtractedEntity>,
    /// Extracted relationships, endpoints by name.
    pub relationships: Vec<ExtractedRelationship>,
    /// Platform id of the source item.
    pub source_id: String,
    /// Family of the source item.
    pub source_family: DataFamily,
}

impl ExtractionResult {
    /// An empty result for a source.
    #[must_use]
    pub const fn empty(source_id: String, source_family: DataFamily) -> Self {
        Self {
            entities: Vec::new(),
            relationships: Vec::new(),
            source_id,
            source_family,
        }
    }

    /// Merges another result into this one, deduplicating entities by
    /// derived id and relationships by endpoint/type triple.
    pub fn merge(&mut self, other: Self) {
        for entity in other.entities {
            if !self
                .entities
                .iter()
                .any(|e| e.derived_id() == entity.derived_id())
            {
                self.entities.push(entity);
            }
        }
        for rel in other.relationships {
            let key = (
                rel.source_name.to_lowercase(),
                rel.target_name.to_lowercase(),
                rel.rel_type.as_str().to_lowercase(),
            );
            let exists = self.relationships.iter().any(|r| {
                (
                    r.source_name.to_lowercase(),
                    r.target_name.to_lowercase(),
                    r.rel_type.as_str().to_lowercase(),
                ) == key
            });
            if !exists {
                self.relationships.push(rel);
            }
        }
    }

    /// The entity the item is "about": the first extracted entity whose
    /// family-primary type matches, falling back to the first entity.
    #[must_use]
    pub fn primary_entity(&self) -> Option<&ExtractedEntity> {
        let primary_type = match self.source_family {
            DataFamily::Contacts => EntityType::Person,
            DataFamily::Calendar => EntityType::Event,
            DataFamily::Photos => EntityType::Photo,
            DataFamily::CallLog => EntityType::Person,
            DataFamily::Documents => EntityType::Document,
            DataFamily::Notes => EntityType::Note,
        };
        self.entities
            .iter()
            .find(|e| e.entity_type == primary_type)
            .or_else(|| self.entities.first())
    }
}

/// Dispatching extractor: deterministic field extraction for every family,
/// LLM extraction layered on top for document and note bodies.
pub struct Extractor {
    direct: DirectExtractor,
    llm: Option<LlmExtractor>,
}

impl Extractor {
    /// Creates an extractor without LLM support.
    #[must_use]
    pub const fn direct_only() -> Self {
        Self {
            direct: DirectExtractor::new(),
            llm: None,
        }
    }

    /// Creates an extractor that also prompts the LLM for free text.
    #[must_use]
    pub const fn with_llm(llm: LlmExtractor) -> Self {
        Self {
            direct: DirectExtractor::new(),
            llm: Some(llm),
        }
    }

    /// Extracts entities and relationships from one source item.
    ///
    /// Structured fields always go through the direct extractor; document
    /// and note bodies additionally go through the LLM when available. An
    /// LLM failure degrades to the direct result rather than erroring.
    pub fn extract(&self, item: &SourceItem) -> Result<ExtractionResult> {
        let mut result = self.direct.extract(item);

        if let Some(llm) = &self.llm {
            let body = match item {
                SourceItem::Document(d) => d.body.as_deref(),
                SourceItem::Note(n) => Some(n.body.as_str()),
                _ => None,
            };
            if let Some(text) = body.filter(|t| !t.trim().is_empty()) {
                match llm.extract(text, item.source_id(), item.family()) {
                    Ok(llm_result) => result.merge(llm_result),
                    Err(err) => {
                        tracing::warn!(source_id = item.source_id(), error = %err,
                            "llm extraction failed, keeping direct result");
                    },
                }
            }
        }

        Ok(result)
    }
}

/// Jaccard similarity over whitespace-tokenized lowercase forms.
#[allow(clippy::cast_precision_loss)]
fn jaccard(a: &str, b: &str) -> f32 {
    let tokens_a: std::collections::HashSet<String> =
        a.to_lowercase().split_whitespace().map(String::from).collect();
    let tokens_b: std::collections::HashSet<String> =
        b.to_lowercase().split_whitespace().map(String::from).collect();
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }
    let intersection = tokens_a.intersection(&tokens_b).count();
    let union = tokens_a.union(&tokens_b).count();
    intersection as f32 / union as f32
}

/// Returns whether two entity names refer to the same thing: exact match,
/// substring containment, or token Jaccard ≥ 0.8 (all case-insensitive).
#[must_use]
pub fn names_match(a: &str, b: &str) -> bool {
    let a_lower = a.to_lowercase();
    let b_lower = b.to_lowercase();
    if a_lower == b_lower {
        return true;
    }
    if a_lower.contains(&b_lower) || b_lower.contains(&a_lower) {
        return true;
    }
    jaccard(a, b) >= 0.8
}

/// Merges near-duplicate extracted entities, keeping the first-seen form of
/// each name and the higher confidence.
#[must_use]
pub fn dedup_entities(entities: Vec<ExtractedEntity>) -> Vec<ExtractedEntity> {
    let mut kept: Vec<ExtractedEntity> = Vec::with_capacity(entities.len());
    for candidate in entities {
        if let Some(existing) = kept.iter_mut().find(|e| {
            e.entity_type == candidate.entity_type && names_match(&e.name, &candidate.name)
        }) {
            existing.confidence = existing.confidence.max(candidate.confidence);
            for (key, value) in candidate.attributes {
                existing.attributes.entry(key).or_insert(value);
            }
        } else {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_match_exact_and_containment() {
        assert!(names_match("Ada Lovelace", "ada lovelace"));
        assert!(names_match("Ada", "Ada Lovelace"));
        assert!(!names_match("Ada", "Bob"));
    }

    #[test]
    fn test_names_match_jaccard() {
        // 4 shared tokens of 5 total: 0.8
        assert!(names_match("the analytical engine company ltd", "analytical engine company ltd"));
        assert!(!names_match("alpha beta", "gamma delta"));
    }

    #[test]
    fn test_dedup_entities_merges_attributes() {
        let deduped = dedup_entities(vec![
            ExtractedEntity::new(EntityType::Person, "Ada Lovelace").with_confidence(0.7),
            ExtractedEntity::new(EntityType::Person, "ada lovelace")
                .with_confidence(0.9)
                .with_attribute("email", "ada@ae.co"),
            ExtractedEntity::new(EntityType::Person, "Bob"),
        ]);
        assert_eq!(deduped.len(), 2);
        assert!((deduped[0].confidence - 0.9).abs() < f32::EPSILON);
        assert_eq!(deduped[0].attributes.get("email").map(String::as_str), Some("ada@ae.co"));
    }

    #[test]
    fn test_merge_dedups_relationships() {
        let mut base = ExtractionResult::empty("s1".to_string(), DataFamily::Notes);
        base.relationships
            .push(ExtractedRelationship::new("Ada", RelationshipType::Knows, "Bob"));

        let mut other = ExtractionResult::empty("s1".to_string(), DataFamily::Notes);
        other
            .relationships
            .push(ExtractedRelationship::new("ada", RelationshipType::Knows, "BOB"));
        other
            .relationships
            .push(ExtractedRelationship::new("Ada", RelationshipType::WorksAt, "Acme"));

        base.merge(other);
        assert_eq!(base.relationships.len(), 2);
    }

    #[test]
    fn test_primary_entity_prefers_family_type() {
        let mut result = ExtractionResult::empty("e1".to_string(), DataFamily::Calendar);
        result.entities.push(ExtractedEntity::new(EntityType::Person, "Ada"));
        result.entities.push(ExtractedEntity::new(EntityType::Event, "Kickoff"));
        assert_eq!(
            result.primary_entity().map(|e| e.name.as_str()),
            Some("Kickoff")
        );
    }
}
