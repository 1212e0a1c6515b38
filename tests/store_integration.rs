//! Graph store integration tests: persistence invariants, cascades, and
//! on-disk round trips.

// Integration tests use unwrap/expect for brevity - panics are test failures.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use mnema::models::{Community, Entity, EntityType, Relationship, RelationshipType};
use mnema::storage::EntityPatch;
use mnema::{Error, GraphStore};

fn person(name: &str) -> Entity {
    Entity::new(EntityType::Person, name)
}

// ============================================================================
// On-disk round trips
// ============================================================================

#[test]
fn test_reopen_preserves_graph_and_dimension() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph.db");

    {
        let store = GraphStore::open(&path).unwrap();
        store
            .add_entity(
                &person("Ada Lovelace")
                    .with_description("Mathematician")
                    .with_attribute("emails", "ada@ae.co")
                    .with_embedding(vec![0.25, -1.5, 3.75]),
            )
            .unwrap();
        store
            .add_entity(&Entity::new(EntityType::Organization, "Analytical Engine Co"))
            .unwrap();
        store
            .add_relationship(&Relationship::new(
                "person_ada_lovelace",
                RelationshipType::WorksAt,
                "organization_analytical_engine_co",
            ))
            .unwrap();
        store.close();
    }

    let store = GraphStore::open(&path).unwrap();
    assert_eq!(store.dimension(), Some(3));

    let ada = store.get_entity("person_ada_lovelace").unwrap().unwrap();
    assert_eq!(ada.description.as_deref(), Some("Mathematician"));
    assert_eq!(ada.attributes.get("emails").map(String::as_str), Some("ada@ae.co"));
    // Little-endian f32 blob round-trips exactly.
    assert_eq!(ada.embedding, Some(vec![0.25, -1.5, 3.75]));

    let rels = store.relationships_for("person_ada_lovelace").unwrap();
    assert_eq!(rels.len(), 1);
    assert_eq!(rels[0].rel_type, RelationshipType::WorksAt);
}

#[test]
fn test_initialize_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph.db");

    let first = GraphStore::open(&path).unwrap();
    first.add_entity(&person("Ada")).unwrap();
    first.close();

    // A second open re-runs schema bootstrap against existing tables.
    let second = GraphStore::open(&path).unwrap();
    assert_eq!(second.stats().unwrap().entity_count, 1);
}

// ============================================================================
// Upsert and idempotence invariants
// ============================================================================

#[test]
fn test_double_add_indistinguishable_from_single() {
    let store = GraphStore::in_memory().unwrap();
    let ada = person("Ada").with_description("first");

    store.add_entity(&ada).unwrap();
    let after_one = store.get_entity(&ada.id).unwrap().unwrap();
    store.add_entity(&ada).unwrap();
    let after_two = store.get_entity(&ada.id).unwrap().unwrap();

    assert_eq!(after_one, after_two);
    assert_eq!(store.stats().unwrap().entity_count, 1);
}

#[test]
fn test_relationship_unique_per_triple() {
    let store = GraphStore::in_memory().unwrap();
    store.add_entity(&person("Ada")).unwrap();
    store.add_entity(&person("Bob")).unwrap();

    let rel = Relationship::new("person_ada", RelationshipType::Knows, "person_bob");
    store.add_relationship(&rel).unwrap();
    store.add_relationship(&rel).unwrap();

    assert_eq!(store.stats().unwrap().relationship_count, 1);
}

#[test]
fn test_community_membership_replaced_atomically() {
    let store = GraphStore::in_memory().unwrap();
    for name in ["A", "B", "C"] {
        store.add_entity(&person(name)).unwrap();
    }

    store
        .add_community(&Community::new(
            0,
            0,
            vec!["person_a".to_string(), "person_b".to_string()],
        ))
        .unwrap();
    store
        .add_community(&Community::new(
            0,
            0,
            vec!["person_b".to_string(), "person_c".to_string()],
        ))
        .unwrap();

    let community = store.get_community("community_0_0").unwrap().unwrap();
    assert_eq!(
        community.member_ids,
        vec!["person_b".to_string(), "person_c".to_string()]
    );
}

// ============================================================================
// Cascade delete
// ============================================================================

#[test]
fn test_delete_entity_removes_edges_and_memberships() {
    let store = GraphStore::in_memory().unwrap();
    for name in ["A", "B"] {
        store.add_entity(&person(name)).unwrap();
    }
    store
        .add_relationship(&Relationship::new(
            "person_a",
            RelationshipType::Knows,
            "person_b",
        ))
        .unwrap();
    store
        .add_relationship(&Relationship::new(
            "person_b",
            RelationshipType::ColleagueOf,
            "person_a",
        ))
        .unwrap();
    store
        .add_community(&Community::new(
            0,
            0,
            vec!["person_a".to_string(), "person_b".to_string()],
        ))
        .unwrap();

    assert!(store.delete_entity("person_a").unwrap());

    // Both incident edges gone, regardless of direction.
    assert!(store.relationships_for("person_b").unwrap().is_empty());
    assert_eq!(store.stats().unwrap().relationship_count, 0);
    // No membership row survives.
    let community = store.get_community("community_0_0").unwrap().unwrap();
    assert_eq!(community.member_ids, vec!["person_b".to_string()]);
    // Deleting again reports absence.
    assert!(!store.delete_entity("person_a").unwrap());
}

// ============================================================================
// Dimension enforcement
// ============================================================================

#[test]
fn test_all_embeddings_share_detected_dimension() {
    let store = GraphStore::in_memory().unwrap();
    store
        .add_entity(&person("A").with_embedding(vec![1.0, 0.0, 0.0, 0.0]))
        .unwrap();

    let mismatched = person("B").with_embedding(vec![1.0, 0.0]);
    match store.add_entity(&mismatched) {
        Err(Error::DimensionMismatch { expected, actual }) => {
            assert_eq!(expected, 4);
            assert_eq!(actual, 2);
        },
        other => panic!("expected dimension mismatch, got {other:?}"),
    }

    // Community embeddings obey the same dimension.
    store
        .add_community(&Community::new(0, 0, vec!["person_a".to_string()]))
        .unwrap();
    assert!(matches!(
        store.update_community_summary("community_0_0", "text", &[1.0, 0.0]),
        Err(Error::DimensionMismatch { .. })
    ));
}

#[test]
fn test_zero_norm_vector_scores_zero_and_filters_out() {
    let store = GraphStore::in_memory().unwrap();
    store
        .add_entity(&person("Zero").with_embedding(vec![0.0, 0.0]))
        .unwrap();
    store
        .add_entity(&person("One").with_embedding(vec![1.0, 0.0]))
        .unwrap();

    let hits = store.search_entities(&[1.0, 0.0], 10, 0.1, None).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].entity.name, "One");

    // With no threshold the zero-norm entity scores exactly 0.
    let all = store.search_entities(&[1.0, 0.0], 10, 0.0, None).unwrap();
    let zero = all.iter().find(|h| h.entity.name == "Zero").unwrap();
    assert!(zero.score.abs() < f32::EPSILON);
}

// ============================================================================
// Traversal
// ============================================================================

#[test]
fn test_neighbors_depth_and_direction_blindness() {
    let store = GraphStore::in_memory().unwrap();
    for name in ["A", "B", "C", "D"] {
        store.add_entity(&person(name)).unwrap();
    }
    // Chain with mixed directions: A -> B, C -> B, C -> D.
    store
        .add_relationship(&Relationship::new("person_a", RelationshipType::Knows, "person_b"))
        .unwrap();
    store
        .add_relationship(&Relationship::new("person_c", RelationshipType::Knows, "person_b"))
        .unwrap();
    store
        .add_relationship(&Relationship::new("person_c", RelationshipType::Knows, "person_d"))
        .unwrap();

    let hop1: Vec<String> = store
        .neighbors("person_a", 1, None)
        .unwrap()
        .into_iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(hop1, vec!["person_b".to_string()]);

    let hop3: Vec<String> = store
        .neighbors("person_a", 3, None)
        .unwrap()
        .into_iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(hop3.len(), 3);
    assert!(!hop3.contains(&"person_a".to_string()));
}

// ============================================================================
// Update, clear, close
// ============================================================================

#[test]
fn test_partial_update() {
    let store = GraphStore::in_memory().unwrap();
    store.add_entity(&person("Ada")).unwrap();

    store
        .update_entity(
            "person_ada",
            &EntityPatch {
                description: Some("Mathematician".to_string()),
                last_modified: Some(42),
                ..EntityPatch::default()
            },
        )
        .unwrap();

    let ada = store.get_entity("person_ada").unwrap().unwrap();
    assert_eq!(ada.description.as_deref(), Some("Mathematician"));
    assert_eq!(ada.last_modified, 42);
    assert_eq!(ada.name, "Ada");

    assert!(store.update_entity("person_ghost", &EntityPatch {
        name: Some("Ghost".to_string()),
        ..EntityPatch::default()
    }).is_err());
}

#[test]
fn test_clear_then_reuse() {
    let store = GraphStore::in_memory().unwrap();
    store
        .add_entity(&person("Ada").with_embedding(vec![1.0]))
        .unwrap();
    store
        .add_community(&Community::new(0, 0, vec!["person_ada".to_string()]))
        .unwrap();

    store.clear().unwrap();
    let stats = store.stats().unwrap();
    assert_eq!(stats.entity_count, 0);
    assert_eq!(stats.community_count, 0);
    assert_eq!(stats.max_community_level, None);
    assert_eq!(stats.dimension, None);

    // The store stays usable with a fresh dimension.
    store
        .add_entity(&person("Bob").with_embedding(vec![1.0, 2.0]))
        .unwrap();
    assert_eq!(store.dimension(), Some(2));
}

#[test]
fn test_close_is_terminal() {
    let store = GraphStore::in_memory().unwrap();
    store.add_entity(&person("Ada")).unwrap();
    store.close();

    assert!(matches!(store.get_entity("person_ada"), Err(Error::NotInitialized)));
    assert!(matches!(store.clear(), Err(Error::NotInitialized)));
    assert!(matches!(
        store.add_entity(&person("Bob")),
        Err(Error::NotInitialized)
    ));
}
