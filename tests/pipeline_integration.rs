//! End-to-end indexing pipeline tests with mock collaborators.

// Integration tests use unwrap/expect for brevity - panics are test failures.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use mnema::embedding::{Embedder, SharedEmbedder};
use mnema::llm::LlmProvider;
use mnema::models::{
    CalendarEvent, Contact, DataFamily, EntityType, IndexingStatus, Note, RelationshipType,
    SELF_ENTITY_ID, SourceItem,
};
use mnema::platform::PersonalDataProvider;
use mnema::{GraphStore, IndexingConfig, IndexingPipeline, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Mock collaborators
// ============================================================================

/// Deterministic embedder: a tiny rolling-hash vector per text.
struct TestEmbedder;

impl Embedder for TestEmbedder {
    fn dimensions(&self) -> usize {
        8
    }

    #[allow(clippy::cast_precision_loss)]
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.1f32; 8];
        for (i, byte) in text.bytes().enumerate() {
            vector[i % 8] += f32::from(byte) / 255.0;
        }
        Ok(vector)
    }
}

/// LLM double that returns one fixed extraction payload and a fixed
/// summary for everything else.
struct TestLlm {
    extraction_json: String,
}

impl LlmProvider for TestLlm {
    fn generate(&self, prompt: &str) -> Result<String> {
        if prompt.contains("Extract entities") {
            Ok(self.extraction_json.clone())
        } else {
            Ok("A tight-knit group around the user.".to_string())
        }
    }
}

/// In-memory data provider serving fixed items per family.
struct TestData {
    items: Mutex<HashMap<DataFamily, Vec<SourceItem>>>,
}

impl TestData {
    fn new(items: Vec<SourceItem>) -> Self {
        let mut map: HashMap<DataFamily, Vec<SourceItem>> = HashMap::new();
        for item in items {
            map.entry(item.family()).or_default().push(item);
        }
        Self {
            items: Mutex::new(map),
        }
    }
}

impl PersonalDataProvider for TestData {
    fn check_permission(&self, _family: DataFamily) -> bool {
        true
    }

    fn fetch_since(
        &self,
        family: DataFamily,
        since: Option<i64>,
        _limit: Option<usize>,
    ) -> Result<Vec<SourceItem>> {
        Ok(self
            .items
            .lock()
            .unwrap()
            .get(&family)
            .map(|items| {
                items
                    .iter()
                    .filter(|item| since.is_none_or(|ts| item.last_modified() > ts))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

fn contact(id: &str, name: &str, org: Option<&str>) -> SourceItem {
    SourceItem::Contact(Contact {
        id: id.to_string(),
        full_name: name.to_string(),
        organization_name: org.map(String::from),
        job_title: None,
        emails: vec![],
        phone_numbers: vec![],
        last_modified: 1_000,
    })
}

fn build_pipeline(items: Vec<SourceItem>) -> (Arc<GraphStore>, Arc<IndexingPipeline>) {
    let store = Arc::new(GraphStore::in_memory().unwrap());
    let config = IndexingConfig::new()
        .with_batch_delay(Duration::from_millis(1))
        .with_summaries(false);
    let pipeline = IndexingPipeline::new(Arc::clone(&store), Arc::new(TestData::new(items)), config)
        .with_embedder(SharedEmbedder::new(Box::new(TestEmbedder)));
    (store, Arc::new(pipeline))
}

// ============================================================================
// Scenario: contact extraction
// ============================================================================

#[tokio::test]
async fn test_contact_yields_person_org_and_self_link() {
    let (store, pipeline) = build_pipeline(vec![contact(
        "c1",
        "Ada Lovelace",
        Some("Analytical Engine Co"),
    )]);

    let terminal = pipeline.run(true).await.unwrap();
    assert_eq!(terminal, IndexingStatus::Completed);

    let ada = store.get_entity("person_ada_lovelace").unwrap().unwrap();
    assert_eq!(ada.entity_type, EntityType::Person);
    assert!(ada.embedding.is_some());

    let org = store
        .get_entity("organization_analytical_engine_co")
        .unwrap()
        .unwrap();
    assert_eq!(org.entity_type, EntityType::Organization);

    let ada_rels = store.relationships_for("person_ada_lovelace").unwrap();
    assert!(ada_rels.iter().any(|r| {
        r.source_id == "person_ada_lovelace"
            && r.rel_type == RelationshipType::WorksAt
            && r.target_id == "organization_analytical_engine_co"
    }));
    assert!(ada_rels.iter().any(|r| {
        r.source_id == SELF_ENTITY_ID && r.rel_type == RelationshipType::Knows
    }));
}

// ============================================================================
// Scenario: event with attendees and location
// ============================================================================

#[tokio::test]
async fn test_event_attendees_and_location() {
    let (store, pipeline) = build_pipeline(vec![SourceItem::Calendar(CalendarEvent {
        id: "e1".to_string(),
        title: "Project Kickoff".to_string(),
        description: None,
        location: Some("Room 42".to_string()),
        attendees: vec!["Ada".to_string(), "Bob".to_string()],
        start_time: Some(1_000),
        end_time: None,
        last_modified: 1_000,
    })]);

    pipeline.run(true).await.unwrap();

    for id in [
        "event_project_kickoff",
        "location_room_42",
        "person_ada",
        "person_bob",
    ] {
        assert!(store.get_entity(id).unwrap().is_some(), "missing {id}");
    }

    let event_rels = store.relationships_for("event_project_kickoff").unwrap();
    assert!(event_rels.iter().any(|r| {
        r.source_id == "event_project_kickoff"
            && r.rel_type == RelationshipType::LocatedIn
            && r.target_id == "location_room_42"
    }));
    for person in ["person_ada", "person_bob"] {
        assert!(event_rels.iter().any(|r| {
            r.source_id == person
                && r.rel_type == RelationshipType::AttendedBy
                && r.target_id == "event_project_kickoff"
        }));
    }
}

// ============================================================================
// Scenario: colleague inference
// ============================================================================

#[tokio::test]
async fn test_shared_employer_yields_single_colleague_edge() {
    let (store, pipeline) = build_pipeline(vec![
        contact("c1", "Ada", Some("Acme")),
        contact("c2", "Bob", Some("Acme")),
    ]);

    pipeline.run(true).await.unwrap();

    let colleague_edges: Vec<_> = store
        .relationships_for("person_ada")
        .unwrap()
        .into_iter()
        .filter(|r| r.rel_type == RelationshipType::ColleagueOf)
        .collect();
    assert_eq!(colleague_edges.len(), 1);
    // 0.8 · template_weight (1.0 default).
    assert!((colleague_edges[0].weight - 0.8).abs() < f32::EPSILON);

    // Re-running yields the same single edge (upsert semantics).
    pipeline.run(true).await.unwrap();
    let again: Vec<_> = store
        .relationships_for("person_ada")
        .unwrap()
        .into_iter()
        .filter(|r| r.rel_type == RelationshipType::ColleagueOf)
        .collect();
    assert_eq!(again.len(), 1);
}

// ============================================================================
// LLM extraction of note bodies
// ============================================================================

#[tokio::test]
async fn test_note_body_goes_through_llm() {
    let store = Arc::new(GraphStore::in_memory().unwrap());
    let items = vec![SourceItem::Note(Note {
        id: "n1".to_string(),
        title: Some("Trip plan".to_string()),
        body: "Planning the Lisbon trip with Carol".to_string(),
        tags: vec![],
        last_modified: 1_000,
    })];
    let llm = TestLlm {
        extraction_json: r#"{"entities": [
            {"name": "Carol", "type": "PERSON", "confidence": 0.9},
            {"name": "Lisbon", "type": "LOCATION", "confidence": 0.9}
        ], "relationships": [
            {"source": "Carol", "target": "Lisbon", "relationship": "RELATED_TO", "confidence": 0.8}
        ]}"#
            .to_string(),
    };
    let config = IndexingConfig::new()
        .with_batch_delay(Duration::from_millis(1))
        .with_summaries(false)
        .with_community_detection(false);
    let pipeline = IndexingPipeline::new(Arc::clone(&store), Arc::new(TestData::new(items)), config)
        .with_embedder(SharedEmbedder::new(Box::new(TestEmbedder)))
        .with_llm(Arc::new(llm));

    pipeline.run(true).await.unwrap();

    assert!(store.get_entity("person_carol").unwrap().is_some());
    assert!(store.get_entity("location_lisbon").unwrap().is_some());
    let carol_rels = store.relationships_for("person_carol").unwrap();
    assert!(carol_rels.iter().any(|r| {
        r.rel_type == RelationshipType::RelatedTo && r.target_id == "location_lisbon"
    }));
}

// ============================================================================
// Communities and summaries
// ============================================================================

#[tokio::test]
async fn test_full_run_detects_and_summarizes_communities() {
    let store = Arc::new(GraphStore::in_memory().unwrap());
    let items = vec![
        contact("c1", "Ada", Some("Acme")),
        contact("c2", "Bob", Some("Acme")),
        contact("c3", "Carol", Some("Initech")),
        contact("c4", "Dan", Some("Initech")),
    ];
    let llm = TestLlm {
        extraction_json: "{}".to_string(),
    };
    let config = IndexingConfig::new().with_batch_delay(Duration::from_millis(1));
    let pipeline = IndexingPipeline::new(Arc::clone(&store), Arc::new(TestData::new(items)), config)
        .with_embedder(SharedEmbedder::new(Box::new(TestEmbedder)))
        .with_llm(Arc::new(llm));

    pipeline.run(true).await.unwrap();

    let stats = store.stats().unwrap();
    assert!(stats.community_count > 0);
    assert!(stats.max_community_level.is_some());

    // Every stored community's members resolve, and level-0 summaries are
    // filled in.
    for level in 0..=stats.max_community_level.unwrap() {
        for community in store.communities_at_level(level).unwrap() {
            assert!(!community.member_ids.is_empty());
            for member in &community.member_ids {
                assert!(store.get_entity(member).unwrap().is_some());
            }
        }
    }
    assert!(store
        .communities_at_level(0)
        .unwrap()
        .iter()
        .all(|c| !c.summary.is_empty() && c.embedding.is_some()));

    let progress = pipeline.snapshot();
    assert!(progress.detected_communities > 0);
}

// ============================================================================
// Control flow: pause, cancel, busy, incremental
// ============================================================================

/// A pipeline whose batches take long enough to pause and cancel into.
fn slow_pipeline(item_count: usize) -> (Arc<GraphStore>, Arc<IndexingPipeline>) {
    let items: Vec<SourceItem> = (0..item_count)
        .map(|i| contact(&format!("c{i}"), &format!("Person {i}"), None))
        .collect();
    let store = Arc::new(GraphStore::in_memory().unwrap());
    let config = IndexingConfig::new()
        .with_batch_delay(Duration::from_millis(60))
        .with_summaries(false)
        .with_community_detection(false)
        .with_link_prediction(false);
    let pipeline =
        IndexingPipeline::new(Arc::clone(&store), Arc::new(TestData::new(items)), config)
            .with_embedder(SharedEmbedder::new(Box::new(TestEmbedder)));
    (store, Arc::new(pipeline))
}

#[tokio::test]
async fn test_pause_blocks_progress_until_resume() {
    // 30 items in batches of 10: the run spans at least three batch delays.
    let (_store, pipeline) = slow_pipeline(30);

    let runner = {
        let p = Arc::clone(&pipeline);
        tokio::spawn(async move { p.run(true).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    pipeline.pause();

    tokio::time::sleep(Duration::from_millis(150)).await;
    let frozen = pipeline.snapshot().processed_items;
    assert_eq!(pipeline.status(), IndexingStatus::Paused);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(pipeline.snapshot().processed_items, frozen);

    pipeline.resume();
    let terminal = runner.await.unwrap().unwrap();
    assert_eq!(terminal, IndexingStatus::Completed);
    assert_eq!(pipeline.snapshot().processed_items, 30);
}

#[tokio::test]
async fn test_cancel_during_pause_ends_cancelled() {
    let (store, pipeline) = slow_pipeline(30);

    let runner = {
        let p = Arc::clone(&pipeline);
        tokio::spawn(async move { p.run(true).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    pipeline.pause();
    tokio::time::sleep(Duration::from_millis(100)).await;
    pipeline.cancel();

    let terminal = runner.await.unwrap().unwrap();
    assert_eq!(terminal, IndexingStatus::Cancelled);
    assert_eq!(pipeline.snapshot().status, IndexingStatus::Cancelled);
    // Writes from before the cancellation stay intact.
    assert!(store.get_entity(SELF_ENTITY_ID).unwrap().is_some());
}

#[tokio::test]
async fn test_second_run_is_rejected_while_active() {
    let (_store, pipeline) = slow_pipeline(50);

    let runner = {
        let p = Arc::clone(&pipeline);
        tokio::spawn(async move { p.run(true).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert!(matches!(pipeline.run(false).await, Err(mnema::Error::Busy)));

    runner.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_incremental_rerun_is_stable() {
    let (store, pipeline) = build_pipeline(vec![
        contact("c1", "Ada", Some("Acme")),
        contact("c2", "Bob", Some("Acme")),
    ]);

    pipeline.run(true).await.unwrap();
    let first = store.stats().unwrap();

    // No new data arrived: entity and relationship sets are unchanged.
    pipeline.run(false).await.unwrap();
    let second = store.stats().unwrap();
    assert_eq!(first.entity_count, second.entity_count);
    assert_eq!(first.relationship_count, second.relationship_count);
    assert_eq!(first.community_count, second.community_count);
}

// ============================================================================
// Progress stream invariants
// ============================================================================

#[tokio::test]
async fn test_progress_monotone_and_terminal_observed() {
    let items: Vec<SourceItem> = (0..15)
        .map(|i| contact(&format!("c{i}"), &format!("Person {i}"), None))
        .collect();
    let (_store, pipeline) = build_pipeline(items);

    let mut receiver = pipeline.subscribe();
    pipeline.run(true).await.unwrap();

    let mut last_processed = 0;
    let mut saw_terminal = false;
    while let Ok(progress) = receiver.try_recv() {
        assert!(progress.processed_items >= last_processed, "progress went backwards");
        if progress.total_items > 0 {
            assert!(progress.processed_items <= progress.total_items);
        }
        last_processed = progress.processed_items;
        if progress.status.is_terminal() {
            saw_terminal = true;
        }
    }
    assert!(saw_terminal, "subscriber must observe the terminal state");
    assert!((pipeline.snapshot().progress() - 1.0).abs() < f32::EPSILON);
}
