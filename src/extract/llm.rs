//! LLM-prompted extraction for free text.

use super::repair::parse_llm_json;
use super::{ExtractedEntity, ExtractedRelationship, ExtractionResult, dedup_entities};
use crate::llm::LlmProvider;
use crate::models::{DataFamily, EntityType, RelationshipType};
use crate::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// Accepted keys for an entity's name.
const NAME_KEYS: &[&str] = &["name", "entity", "label", "entity_name"];
/// Accepted keys for an entity's type tag.
const TYPE_KEYS: &[&str] = &["type", "entity_type", "category"];
/// Accepted keys for a relationship's source.
const SOURCE_KEYS: &[&str] = &["source", "sourceEntity", "source_entity", "entity1", "from", "subject"];
/// Accepted keys for a relationship's target.
const TARGET_KEYS: &[&str] = &["target", "targetEntity", "target_entity", "entity2", "to", "object"];
/// Accepted keys for a relationship's type tag.
const REL_KEYS: &[&str] = &["relationship", "relation", "relationship_type", "type"];

/// Last-resort pattern for entity objects in unparseable output.
#[allow(clippy::unwrap_used)]
static ENTITY_FALLBACK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\{\s*"name"\s*:\s*"([^"]+)"\s*,\s*"type"\s*:\s*"([^"]+)""#).unwrap()
});

/// Last-resort pattern for relationship objects in unparseable output.
#[allow(clippy::unwrap_used)]
static RELATIONSHIP_FALLBACK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"\{[^{}]*?"(?:source|from|entity1)"\s*:\s*"([^"]+)"[^{}]*?"(?:target|to|entity2)"\s*:\s*"([^"]+)"[^{}]*?"(?:relationship|relation|relationship_type)"\s*:\s*"([^"]+)"[^{}]*\}"#,
    )
    .unwrap()
});

/// Tuning for the LLM extractor.
#[derive(Debug, Clone)]
pub struct LlmExtractionConfig {
    /// Entities below this confidence are dropped.
    pub min_entity_confidence: f32,
    /// Relationships below this confidence are dropped.
    pub min_relationship_confidence: f32,
    /// Cap on entities kept per item.
    pub max_entities: usize,
    /// Cap on relationships kept per item.
    pub max_relationships: usize,
}

impl Default for LlmExtractionConfig {
    fn default() -> Self {
        Self {
            min_entity_confidence: 0.7,
            min_relationship_confidence: 0.6,
            max_entities: 50,
            max_relationships: 50,
        }
    }
}

/// Prompts the LLM with a closed set of acceptable entity types and parses
/// the JSON it returns, however damaged.
pub struct LlmExtractor {
    llm: Arc<dyn LlmProvider>,
    config: LlmExtractionConfig,
}

impl LlmExtractor {
    /// Creates an extractor over a shared LLM handle.
    #[must_use]
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            llm,
            config: LlmExtractionConfig::default(),
        }
    }

    /// Overrides the default thresholds and caps.
    #[must_use]
    pub fn with_config(mut self, config: LlmExtractionConfig) -> Self {
        self.config = config;
        self
    }

    /// Extracts entities and relationships from free text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Collaborator`] only when the LLM call itself fails;
    /// unparseable output degrades through repair and regex fallbacks to a
    /// possibly empty result instead of erroring.
    pub fn extract(
        &self,
        text: &str,
        source_id: &str,
        family: DataFamily,
    ) -> Result<ExtractionResult> {
        if text.trim().is_empty() {
            return Ok(ExtractionResult::empty(source_id.to_string(), family));
        }

        let prompt = build_extraction_prompt(text);
        let response = self
            .llm
            .generate(&prompt)
            .map_err(|e| Error::Collaborator(format!("extraction: {e}")))?;

        Ok(self.parse_response(&response, source_id, family))
    }

    /// Parses an LLM response into an extraction result.
    #[must_use]
    pub fn parse_response(
        &self,
        response: &str,
        source_id: &str,
        family: DataFamily,
    ) -> ExtractionResult {
        // A structural parse can succeed on a stray fragment (a lone entity
        // object ahead of the payload); an empty normalization falls through
        // to the regex scrape as well.
        let mut result = match parse_llm_json(response) {
            Some(value) => {
                let normalized = normalize_payload(&value, source_id, family);
                if normalized.entities.is_empty() {
                    let scraped = regex_fallback(response, source_id, family);
                    if scraped.entities.is_empty() {
                        normalized
                    } else {
                        scraped
                    }
                } else {
                    normalized
                }
            },
            None => regex_fallback(response, source_id, family),
        };

        result.entities = dedup_entities(result.entities);
        result
            .entities
            .retain(|e| e.confidence >= self.config.min_entity_confidence);
        result.entities.truncate(self.config.max_entities);

        // Dedup by lowercase endpoint/type triple, preserving first-seen order.
        let mut seen: HashSet<(String, String, String)> = HashSet::new();
        result.relationships.retain(|r| {
            r.confidence >= self.config.min_relationship_confidence
                && seen.insert((
                    r.source_name.to_lowercase(),
                    r.target_name.to_lowercase(),
                    r.rel_type.as_str().to_lowercase(),
                ))
        });
        result.relationships.truncate(self.config.max_relationships);

        result
    }
}

/// Builds the single-shot extraction prompt.
fn build_extraction_prompt(text: &str) -> String {
    let type_list = EntityType::all()
        .iter()
        .filter(|t| **t != EntityType::SelfNode)
        .map(EntityType::as_str)
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "Extract entities and relationships from the text below.\n\
         Respond with a single JSON object and nothing else:\n\
         {{\"entities\": [{{\"name\": \"...\", \"type\": \"...\", \"description\": \"...\", \"confidence\": 0.9}}],\n \
         \"relationships\": [{{\"source\": \"...\", \"target\": \"...\", \"relationship\": \"...\", \"confidence\": 0.8}}]}}\n\
         Allowed entity types: {type_list}.\n\
         Relationship tags are UPPER_SNAKE_CASE verbs such as WORKS_AT or RELATED_TO.\n\
         \n\
         Text:\n{text}"
    )
}

/// Reads the first string value present under any of the given keys.
fn get_str<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| value.get(*key)?.as_str())
}

/// Reads a confidence number, defaulting to 1.0.
#[allow(clippy::cast_possible_truncation)]
fn get_confidence(value: &Value) -> f32 {
    value
        .get("confidence")
        .or_else(|| value.get("score"))
        .and_then(Value::as_f64)
        .map_or(1.0, |c| c as f32)
}

/// Converts a parsed payload into typed extraction records, applying key
/// synonyms and tag normalization. No raw maps survive past this point.
fn normalize_payload(value: &Value, source_id: &str, family: DataFamily) -> ExtractionResult {
    let mut result = ExtractionResult::empty(source_id.to_string(), family);

    if let Some(entities) = value.get("entities").and_then(Value::as_array) {
        for raw in entities {
            let Some(name) = get_str(raw, NAME_KEYS).map(str::trim).filter(|n| !n.is_empty())
            else {
                continue;
            };
            let entity_type = get_str(raw, TYPE_KEYS)
                .and_then(EntityType::parse)
                .unwrap_or(EntityType::Topic);
            let mut entity = ExtractedEntity::new(entity_type, name)
                .with_confidence(get_confidence(raw));
            if let Some(description) = raw.get("description").and_then(Value::as_str) {
                if !description.trim().is_empty() {
                    entity = entity.with_description(description.trim());
                }
            }
            result.entities.push(entity);
        }
    }

    if let Some(relationships) = value.get("relationships").and_then(Value::as_array) {
        for raw in relationships {
            let Some(source) = get_str(raw, SOURCE_KEYS).map(str::trim).filter(|s| !s.is_empty())
            else {
                continue;
            };
            let Some(target) = get_str(raw, TARGET_KEYS).map(str::trim).filter(|s| !s.is_empty())
            else {
                continue;
            };
            let rel_type = get_str(raw, REL_KEYS)
                .map_or(RelationshipType::RelatedTo, RelationshipType::parse);
            result.relationships.push(
                ExtractedRelationship::new(source, rel_type, target)
                    .with_confidence(get_confidence(raw)),
            );
        }
    }

    result
}

/// Regex scrape for output too damaged for the repairing parser.
///
/// Relationships are kept only when both endpoint names were themselves
/// scraped as entities, so no orphan edges enter the result.
fn regex_fallback(response: &str, source_id: &str, family: DataFamily) -> ExtractionResult {
    let mut result = ExtractionResult::empty(source_id.to_string(), family);

    let mut known_names: HashSet<String> = HashSet::new();
    for capture in ENTITY_FALLBACK_RE.captures_iter(response) {
        let name = capture[1].trim().to_string();
        let entity_type = EntityType::parse(&capture[2]).unwrap_or(EntityType::Topic);
        known_names.insert(name.to_lowercase());
        result
            .entities
            .push(ExtractedEntity::new(entity_type, name));
    }

    for capture in RELATIONSHIP_FALLBACK_RE.captures_iter(response) {
        let source = capture[1].trim();
        let target = capture[2].trim();
        if !known_names.contains(&source.to_lowercase())
            || !known_names.contains(&target.to_lowercase())
        {
            continue;
        }
        result.relationships.push(ExtractedRelationship::new(
            source,
            RelationshipType::parse(&capture[3]),
            target,
        ));
    }

    if !result.entities.is_empty() {
        tracing::debug!(
            source_id,
            entities = result.entities.len(),
            "regex fallback recovered extraction"
        );
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedLlm;

    fn extractor_with(response: &str) -> LlmExtractor {
        LlmExtractor::new(Arc::new(ScriptedLlm::new(vec![response])))
    }

    #[test]
    fn test_clean_payload() {
        let response = r#"{"entities": [
            {"name": "Ada", "type": "PERSON", "confidence": 0.9},
            {"name": "Engine Co", "type": "ORGANIZATION", "confidence": 0.8}
        ], "relationships": [
            {"source": "Ada", "target": "Engine Co", "relationship": "WORKS_AT", "confidence": 0.85}
        ]}"#;

        let result = extractor_with(response)
            .extract("some text", "n1", DataFamily::Notes)
            .unwrap_or_else(|_| ExtractionResult::empty("n1".to_string(), DataFamily::Notes));

        assert_eq!(result.entities.len(), 2);
        assert_eq!(result.relationships.len(), 1);
        assert_eq!(result.relationships[0].rel_type, RelationshipType::WorksAt);
    }

    #[test]
    fn test_key_synonyms() {
        let response = r#"{"entities": [
            {"entity": "Ada", "entity_type": "person"},
            {"label": "Bob", "type": "PERSON"}
        ], "relationships": [
            {"entity1": "Ada", "entity2": "Bob", "relation": "knows"}
        ]}"#;

        let result =
            extractor_with(response).parse_response(response, "n1", DataFamily::Notes);
        assert_eq!(result.entities.len(), 2);
        assert_eq!(result.relationships.len(), 1);
        assert_eq!(result.relationships[0].rel_type, RelationshipType::Knows);
    }

    #[test]
    fn test_fenced_and_truncated() {
        let response = "```json\n{\"entities\": [{\"name\": \"Ada\", \"type\": \"PERSON\"}], \"relationships\": [";
        let result = extractor_with(response).parse_response(response, "n1", DataFamily::Notes);
        assert_eq!(result.entities.len(), 1);
        assert!(result.relationships.is_empty());
    }

    #[test]
    fn test_regex_fallback_drops_orphans() {
        // Damaged beyond structural repair: bare fragments, no containing object.
        let response = r#"garbage {"name": "Ada", "type": "PERSON"} more garbage
            {"source": "Ada", "target": "Ada", "relationship": "RELATED_TO"}
            {"source": "Ghost", "target": "Ada", "relationship": "KNOWS"}"#;

        let result = extractor_with(response).parse_response(response, "n1", DataFamily::Notes);
        assert_eq!(result.entities.len(), 1);
        // The Ghost edge is dropped; the Ada self-edge survives the name check.
        assert_eq!(result.relationships.len(), 1);
        assert_eq!(result.relationships[0].source_name, "Ada");
    }

    #[test]
    fn test_confidence_filter_and_caps() {
        let response = r#"{"entities": [
            {"name": "Sure", "type": "PERSON", "confidence": 0.95},
            {"name": "Unsure", "type": "PERSON", "confidence": 0.3}
        ], "relationships": [
            {"source": "Sure", "target": "Unsure", "relationship": "KNOWS", "confidence": 0.2}
        ]}"#;

        let result = extractor_with(response).parse_response(response, "n1", DataFamily::Notes);
        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.entities[0].name, "Sure");
        assert!(result.relationships.is_empty());
    }

    #[test]
    fn test_relationship_triple_dedup() {
        let response = r#"{"entities": [
            {"name": "Ada", "type": "PERSON"},
            {"name": "Bob", "type": "PERSON"}
        ], "relationships": [
            {"source": "Ada", "target": "Bob", "relationship": "KNOWS"},
            {"source": "ada", "target": "BOB", "relationship": "knows"}
        ]}"#;

        let result = extractor_with(response).parse_response(response, "n1", DataFamily::Notes);
        assert_eq!(result.relationships.len(), 1);
    }

    #[test]
    fn test_garbage_never_panics() {
        let result = extractor_with("complete nonsense, no braces")
            .parse_response("complete nonsense, no braces", "n1", DataFamily::Notes);
        assert!(result.entities.is_empty());
        assert!(result.relationships.is_empty());
    }

    #[test]
    fn test_unknown_type_becomes_topic() {
        let response = r#"{"entities": [{"name": "Quantum", "type": "WIDGET"}]}"#;
        let result = extractor_with(response).parse_response(response, "n1", DataFamily::Notes);
        assert_eq!(result.entities[0].entity_type, EntityType::Topic);
    }
}
