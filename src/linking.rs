//! Link prediction: edges the extractors do not directly produce.
//!
//! Five strategies run over extraction batches and the stored graph:
//! Self linking, per-family template inference, batch co-mention counting,
//! temporal proximity, and colleague inference. Predicted links are stored
//! only when both endpoints exist; duplicate ids upsert.

use crate::config::LinkPredictionConfig;
use crate::embedding::SharedEmbedder;
use crate::extract::ExtractionResult;
use crate::models::{
    DataFamily, Entity, EntityType, Relationship, RelationshipType, SELF_ENTITY_ID,
};
use crate::storage::GraphStore;
use crate::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Descriptor text embedded for the Self entity on first creation.
const SELF_DESCRIPTOR: &str =
    "The device user: the person whose contacts, calendar, photos, calls, documents and notes make up this graph";

/// Infers and stores relationships the extractors leave implicit.
pub struct LinkPredictor {
    store: Arc<GraphStore>,
    config: LinkPredictionConfig,
}

impl LinkPredictor {
    /// Creates a predictor over a shared store.
    #[must_use]
    pub const fn new(store: Arc<GraphStore>, config: LinkPredictionConfig) -> Self {
        Self { store, config }
    }

    // ========================================================================
    // Self linking
    // ========================================================================

    /// Ensures the Self entity exists, embedding its fixed descriptor when
    /// an embedder is available.
    ///
    /// # Errors
    ///
    /// Propagates store failures; an embedder failure degrades to an
    /// unembedded Self node.
    pub fn ensure_self_entity(&self, embedder: Option<&SharedEmbedder>) -> Result<()> {
        if self.store.get_entity(SELF_ENTITY_ID)?.is_some() {
            return Ok(());
        }

        let mut node = Entity::self_node();
        if let Some(embedder) = embedder {
            match embedder.embed(SELF_DESCRIPTOR) {
                Ok(vector) => node.embedding = Some(vector),
                Err(err) => {
                    tracing::warn!(error = %err, "self descriptor embedding failed");
                },
            }
        }
        self.store.add_entity(&node)
    }

    /// The Self relation representing first-person ownership of a family.
    #[must_use]
    pub const fn self_relation(family: DataFamily) -> RelationshipType {
        match family {
            DataFamily::Contacts | DataFamily::CallLog => RelationshipType::Knows,
            DataFamily::Calendar => RelationshipType::HasEvent,
            DataFamily::Photos => RelationshipType::HasPhoto,
            DataFamily::Documents => RelationshipType::OwnsDocument,
            DataFamily::Notes => RelationshipType::WroteNote,
        }
    }

    /// Links the Self node to an item's primary entity.
    ///
    /// Call records link `MADE_CALL` to phone entities and `KNOWS` to
    /// resolved people.
    ///
    /// # Errors
    ///
    /// Propagates store failures other than missing endpoints, which are
    /// skipped.
    pub fn link_self(&self, family: DataFamily, primary_id: &str) -> Result<bool> {
        let relation = if family == DataFamily::CallLog && primary_id.starts_with("phone_") {
            RelationshipType::MadeCall
        } else {
            Self::self_relation(family)
        };
        let link = Relationship::new(SELF_ENTITY_ID, relation, primary_id)
            .with_weight(self.config.template_weight);
        self.store_link(&link)
    }

    // ========================================================================
    // Template inference
    // ========================================================================

    /// Deterministic per-family rules over one item's typed entities.
    ///
    /// Produces edges such as PERSON→ORG `WORKS_AT` and EVENT→LOCATION
    /// `LOCATED_IN` when an item surfaced both endpoint types, each with
    /// weight `template_weight`.
    #[must_use]
    pub fn infer_templates(&self, extraction: &ExtractionResult) -> Vec<Relationship> {
        let mut by_type: HashMap<EntityType, Vec<String>> = HashMap::new();
        for entity in &extraction.entities {
            by_type
                .entry(entity.entity_type)
                .or_default()
                .push(entity.derived_id());
        }

        let rules: &[(EntityType, RelationshipType, EntityType)] = &[
            (EntityType::Person, RelationshipType::WorksAt, EntityType::Organization),
            (EntityType::Event, RelationshipType::LocatedIn, EntityType::Location),
            (EntityType::Person, RelationshipType::AttendedBy, EntityType::Event),
            (EntityType::Document, RelationshipType::CreatedBy, EntityType::Person),
            (EntityType::Document, RelationshipType::PartOf, EntityType::Project),
            (EntityType::Note, RelationshipType::TaggedWith, EntityType::Topic),
        ];

        let mut links = Vec::new();
        for (source_type, rel_type, target_type) in rules {
            let (Some(sources), Some(targets)) = (by_type.get(source_type), by_type.get(target_type))
            else {
                continue;
            };
            for source in sources {
                for target in targets {
                    links.push(
                        Relationship::new(source.clone(), rel_type.clone(), target.clone())
                            .with_weight(self.config.template_weight),
                    );
                }
            }
        }
        links
    }

    // ========================================================================
    // Co-mention detection
    // ========================================================================

    /// Counts unordered entity pairs across a batch of extraction results
    /// and emits `MENTIONED_WITH` edges for pairs that co-occur in at least
    /// `min_co_occurrence_count` source items.
    ///
    /// Confidence is `clamp(count / extraction_count, 0, 1) ·
    /// co_occurrence_weight`; evidence metadata records the count and up to
    /// three sample source ids.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn infer_co_mentions(&self, extractions: &[ExtractionResult]) -> Vec<Relationship> {
        if extractions.is_empty() {
            return Vec::new();
        }

        let mut pair_counts: HashMap<(String, String), (usize, Vec<String>)> = HashMap::new();
        for extraction in extractions {
            let ids: HashSet<String> = extraction
                .entities
                .iter()
                .map(crate::extract::ExtractedEntity::derived_id)
                .collect();
            let mut sorted: Vec<&String> = ids.iter().collect();
            sorted.sort();
            for (i, a) in sorted.iter().enumerate() {
                for b in &sorted[i + 1..] {
                    let entry = pair_counts
                        .entry(((*a).clone(), (*b).clone()))
                        .or_insert_with(|| (0, Vec::new()));
                    entry.0 += 1;
                    if entry.1.len() < 3 {
                        entry.1.push(extraction.source_id.clone());
                    }
                }
            }
        }

        let total = extractions.len() as f32;
        let mut links = Vec::new();
        for ((a, b), (count, samples)) in pair_counts {
            if count < self.config.min_co_occurrence_count {
                continue;
            }
            let confidence =
                (count as f32 / total).clamp(0.0, 1.0) * self.config.co_occurrence_weight;
            links.push(
                Relationship::new(a, RelationshipType::MentionedWith, b)
                    .with_weight(confidence)
                    .with_metadata("co_occurrence_count", count)
                    .with_metadata("sample_sources", serde_json::json!(samples)),
            );
        }
        links
    }

    // ========================================================================
    // Temporal proximity
    // ========================================================================

    /// Links primary entities of items whose timestamps fall within the
    /// configured window. Confidence decays linearly with the gap.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn infer_temporal(&self, timestamped: &[(String, i64)]) -> Vec<Relationship> {
        let window_ms = self.config.temporal_window.as_millis() as i64;
        if window_ms == 0 {
            return Vec::new();
        }

        let mut links = Vec::new();
        for (i, (a, time_a)) in timestamped.iter().enumerate() {
            for (b, time_b) in &timestamped[i + 1..] {
                if a == b {
                    continue;
                }
                let gap = (time_a - time_b).abs();
                if gap > window_ms {
                    continue;
                }
                let confidence = 1.0 - (gap as f32 / window_ms as f32);
                links.push(
                    Relationship::new(a.clone(), RelationshipType::TemporallyProximate, b.clone())
                        .with_weight(confidence)
                        .with_metadata("gap_ms", gap),
                );
            }
        }
        links
    }

    // ========================================================================
    // Colleague inference
    // ========================================================================

    /// Emits `COLLEAGUE_OF` between every pair of people employed by the
    /// same organization, weight `0.8 · template_weight`.
    ///
    /// # Errors
    ///
    /// Propagates store read failures.
    pub fn infer_colleagues(&self) -> Result<Vec<Relationship>> {
        let mut links = Vec::new();
        for org in self.store.list_by_type(EntityType::Organization)? {
            let mut employees: Vec<String> = self
                .store
                .relationships_for(&org.id)?
                .into_iter()
                .filter(|rel| rel.rel_type == RelationshipType::WorksAt)
                .filter_map(|rel| {
                    rel.other_endpoint(&org.id)
                        .filter(|id| id.starts_with("person_"))
                        .map(String::from)
                })
                .collect();
            employees.sort();
            employees.dedup();

            if employees.len() < 2 {
                continue;
            }
            for (i, a) in employees.iter().enumerate() {
                for b in &employees[i + 1..] {
                    links.push(
                        Relationship::new(a.clone(), RelationshipType::ColleagueOf, b.clone())
                            .with_weight(0.8 * self.config.template_weight)
                            .with_metadata("via_organization", org.id.clone()),
                    );
                }
            }
        }
        Ok(links)
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Stores one predicted link if both endpoints exist. Returns whether a
    /// write happened.
    ///
    /// # Errors
    ///
    /// Propagates store failures other than endpoint checks.
    pub fn store_link(&self, link: &Relationship) -> Result<bool> {
        if self.store.get_entity(&link.source_id)?.is_none()
            || self.store.get_entity(&link.target_id)?.is_none()
        {
            tracing::debug!(link_id = %link.id, "skipping link with missing endpoint");
            return Ok(false);
        }
        match self.store.add_relationship(link) {
            Ok(()) => Ok(true),
            // Insert races ("already exists" under FK churn) are par for the
            // course here; they surface only in aggregate counters.
            Err(Error::Insert(cause)) => {
                tracing::debug!(link_id = %link.id, %cause, "link insert skipped");
                Ok(false)
            },
            Err(other) => Err(other),
        }
    }

    /// Stores a batch of predicted links, returning how many were written.
    ///
    /// # Errors
    ///
    /// Propagates non-insert store failures.
    pub fn store_links(&self, links: &[Relationship]) -> Result<usize> {
        let mut stored = 0;
        for link in links {
            if self.store_link(link)? {
                stored += 1;
            }
        }
        metrics::counter!("predicted_links_stored_total").increment(stored as u64);
        Ok(stored)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::extract::{ExtractedEntity, ExtractionResult};
    use std::time::Duration;

    fn store_with_people() -> Arc<GraphStore> {
        let store = Arc::new(GraphStore::in_memory().unwrap());
        for name in ["Ada", "Bob"] {
            store
                .add_entity(&Entity::new(EntityType::Person, name))
                .unwrap();
        }
        store
            .add_entity(&Entity::new(EntityType::Organization, "Engine Co"))
            .unwrap();
        store
    }

    fn predictor(store: &Arc<GraphStore>) -> LinkPredictor {
        LinkPredictor::new(Arc::clone(store), LinkPredictionConfig::default())
    }

    #[test]
    fn test_ensure_self_entity_idempotent() {
        let store = Arc::new(GraphStore::in_memory().unwrap());
        let predictor = predictor(&store);
        predictor.ensure_self_entity(None).unwrap();
        predictor.ensure_self_entity(None).unwrap();
        assert!(store.get_entity(SELF_ENTITY_ID).unwrap().is_some());
        assert_eq!(store.stats().unwrap().entity_count, 1);
    }

    #[test]
    fn test_self_relation_per_family() {
        assert_eq!(
            LinkPredictor::self_relation(DataFamily::Contacts),
            RelationshipType::Knows
        );
        assert_eq!(
            LinkPredictor::self_relation(DataFamily::Calendar),
            RelationshipType::HasEvent
        );
        assert_eq!(
            LinkPredictor::self_relation(DataFamily::Notes),
            RelationshipType::WroteNote
        );
    }

    #[test]
    fn test_link_self_to_contact() {
        let store = store_with_people();
        let predictor = predictor(&store);
        predictor.ensure_self_entity(None).unwrap();

        assert!(predictor
            .link_self(DataFamily::Contacts, "person_ada")
            .unwrap());
        let rels = store.relationships_for(SELF_ENTITY_ID).unwrap();
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].rel_type, RelationshipType::Knows);
        assert_eq!(rels[0].target_id, "person_ada");
    }

    #[test]
    fn test_colleague_inference_single_edge() {
        let store = store_with_people();
        let predictor = predictor(&store);
        for person in ["person_ada", "person_bob"] {
            store
                .add_relationship(&Relationship::new(
                    person,
                    RelationshipType::WorksAt,
                    "organization_engine_co",
                ))
                .unwrap();
        }

        let links = predictor.infer_colleagues().unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].rel_type, RelationshipType::ColleagueOf);
        assert!((links[0].weight - 0.8).abs() < f32::EPSILON);

        assert_eq!(predictor.store_links(&links).unwrap(), 1);
    }

    #[test]
    fn test_co_mention_threshold_and_confidence() {
        let store = store_with_people();
        let predictor = predictor(&store);

        let mut extractions = Vec::new();
        for source in ["s1", "s2", "s3"] {
            let mut extraction =
                ExtractionResult::empty(source.to_string(), DataFamily::Notes);
            extraction
                .entities
                .push(ExtractedEntity::new(EntityType::Person, "Ada"));
            extraction
                .entities
                .push(ExtractedEntity::new(EntityType::Person, "Bob"));
            extractions.push(extraction);
        }
        // A pair that appears only once stays below the threshold.
        let mut lone = ExtractionResult::empty("s4".to_string(), DataFamily::Notes);
        lone.entities
            .push(ExtractedEntity::new(EntityType::Person, "Ada"));
        lone.entities
            .push(ExtractedEntity::new(EntityType::Person, "Carol"));
        extractions.push(lone);

        let links = predictor.infer_co_mentions(&extractions);
        assert_eq!(links.len(), 1);
        let link = &links[0];
        assert_eq!(link.rel_type, RelationshipType::MentionedWith);
        // 3 co-occurrences over 4 extractions, scaled by 0.7.
        assert!((link.weight - 0.75 * 0.7).abs() < 1e-6);
        assert_eq!(
            link.metadata.get("co_occurrence_count").and_then(serde_json::Value::as_u64),
            Some(3)
        );
    }

    #[test]
    fn test_temporal_proximity_decay() {
        let store = store_with_people();
        let config = LinkPredictionConfig::default().with_temporal_window(Duration::from_secs(100));
        let predictor = LinkPredictor::new(Arc::clone(&store), config);

        let links = predictor.infer_temporal(&[
            ("person_ada".to_string(), 0),
            ("person_bob".to_string(), 50_000),
            ("organization_engine_co".to_string(), 500_000),
        ]);

        assert_eq!(links.len(), 1);
        assert_eq!(links[0].rel_type, RelationshipType::TemporallyProximate);
        // Half the window gone: confidence 0.5.
        assert!((links[0].weight - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_template_inference() {
        let store = store_with_people();
        let predictor = predictor(&store);

        let mut extraction = ExtractionResult::empty("c1".to_string(), DataFamily::Contacts);
        extraction
            .entities
            .push(ExtractedEntity::new(EntityType::Person, "Ada"));
        extraction
            .entities
            .push(ExtractedEntity::new(EntityType::Organization, "Engine Co"));

        let links = predictor.infer_templates(&extraction);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].rel_type, RelationshipType::WorksAt);
        assert_eq!(links[0].source_id, "person_ada");
        assert_eq!(links[0].target_id, "organization_engine_co");
    }

    #[test]
    fn test_store_link_skips_missing_endpoint() {
        let store = store_with_people();
        let predictor = predictor(&store);
        let ghost = Relationship::new("person_ada", RelationshipType::Knows, "person_ghost");
        assert!(!predictor.store_link(&ghost).unwrap());
    }
}
