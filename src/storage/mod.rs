//! `SQLite` graph store for the personal knowledge graph.
//!
//! Four tables hold the graph: `entities`, `relationships`, `communities`,
//! and `entity_communities`. Embeddings are packed little-endian f32 blobs
//! (see [`crate::vector`]); the embedding dimension is detected from the
//! first vector written and enforced on every later write and search.

// Allow cast_possible_truncation and cast_sign_loss for SQLite i64 to usize/u32 conversions.
// SQLite returns i64, but row counts and levels are inherently non-negative and small.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
// Allow missing_const_for_fn - some methods use f32 operations not yet const-stable.
#![allow(clippy::missing_const_for_fn)]
// Allow cast_possible_wrap - usize to i64 casts for SQLite parameters won't wrap here.
#![allow(clippy::cast_possible_wrap)]

use crate::models::{
    Community, Entity, EntityType, Relationship, RelationshipType,
};
use crate::vector::{blob_to_embedding, cosine_similarity, embedding_to_blob};
use crate::{Error, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::instrument;

/// An entity paired with its cosine score from a similarity search.
#[derive(Debug, Clone)]
pub struct ScoredEntity {
    /// The matching entity.
    pub entity: Entity,
    /// Cosine similarity against the query vector.
    pub score: f32,
}

/// A community paired with its cosine score from a similarity search.
#[derive(Debug, Clone)]
pub struct ScoredCommunity {
    /// The matching community.
    pub community: Community,
    /// Cosine similarity against the query vector.
    pub score: f32,
}

/// Partial entity update; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct EntityPatch {
    /// New display name.
    pub name: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// Replacement attribute map.
    pub attributes: Option<HashMap<String, String>>,
    /// New embedding vector.
    pub embedding: Option<Vec<f32>>,
    /// New last-modified timestamp.
    pub last_modified: Option<i64>,
}

/// Aggregate store statistics.
#[derive(Debug, Clone)]
pub struct StoreStats {
    /// Total entities.
    pub entity_count: usize,
    /// Entities broken down by type.
    pub entities_by_type: HashMap<EntityType, usize>,
    /// Total relationships.
    pub relationship_count: usize,
    /// Total communities.
    pub community_count: usize,
    /// Highest community level present, if any communities exist.
    pub max_community_level: Option<u32>,
    /// Detected embedding dimension, if any vector has been written.
    pub dimension: Option<usize>,
}

struct StoreState {
    conn: Option<Connection>,
    dimension: Option<usize>,
}

/// Helper to acquire the store mutex with poison recovery.
fn acquire_lock(mutex: &Mutex<StoreState>) -> MutexGuard<'_, StoreState> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("graph store mutex was poisoned, recovering");
            metrics::counter!("graph_store_mutex_poison_recovery_total").increment(1);
            poisoned.into_inner()
        },
    }
}

/// Persistent typed property graph with vector attributes.
///
/// # Concurrency model
///
/// One logical writer: all access funnels through an internal mutex, so
/// writes are serialized and reads never observe a partial write. WAL mode
/// and `busy_timeout` keep concurrent opens of the same file graceful.
pub struct GraphStore {
    state: Mutex<StoreState>,
    db_path: Option<PathBuf>,
}

impl GraphStore {
    /// Opens or creates a store at the given path.
    ///
    /// Schema creation is idempotent; referential integrity is enabled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DatabaseOpen`] if the file cannot be opened and
    /// [`Error::TableCreation`] if schema bootstrap fails.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        let conn = Connection::open(&db_path).map_err(|e| Error::DatabaseOpen(e.to_string()))?;
        Self::from_connection(conn, Some(db_path))
    }

    /// Creates an in-memory store (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns [`Error::TableCreation`] if schema bootstrap fails.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::DatabaseOpen(e.to_string()))?;
        Self::from_connection(conn, None)
    }

    fn from_connection(conn: Connection, db_path: Option<PathBuf>) -> Result<Self> {
        let store = Self {
            state: Mutex::new(StoreState {
                conn: Some(conn),
                dimension: None,
            }),
            db_path,
        };
        store.initialize()?;
        Ok(store)
    }

    /// Returns the database path, if file-backed.
    #[must_use]
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Returns the detected embedding dimension, if any vector is stored.
    #[must_use]
    pub fn dimension(&self) -> Option<usize> {
        acquire_lock(&self.state).dimension
    }

    fn initialize(&self) -> Result<()> {
        let mut state = acquire_lock(&self.state);
        let conn = state.conn.as_mut().ok_or(Error::NotInitialized)?;

        // WAL for concurrent-read friendliness, FKs for referential integrity
        let _ = conn.pragma_update(None, "journal_mode", "WAL");
        let _ = conn.pragma_update(None, "synchronous", "NORMAL");
        let _ = conn.pragma_update(None, "busy_timeout", "5000");
        let _ = conn.pragma_update(None, "foreign_keys", "ON");

        conn.execute(
            "CREATE TABLE IF NOT EXISTS entities (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                description TEXT,
                attributes TEXT,
                embedding BLOB,
                last_modified INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            )",
            [],
        )
        .map_err(|e| Error::TableCreation(format!("entities: {e}")))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS relationships (
                id TEXT PRIMARY KEY,
                source_id TEXT NOT NULL,
                target_id TEXT NOT NULL,
                rel_type TEXT NOT NULL,
                weight REAL NOT NULL DEFAULT 1.0,
                metadata TEXT,
                FOREIGN KEY (source_id) REFERENCES entities(id) ON DELETE CASCADE,
                FOREIGN KEY (target_id) REFERENCES entities(id) ON DELETE CASCADE
            )",
            [],
        )
        .map_err(|e| Error::TableCreation(format!("relationships: {e}")))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS communities (
                id TEXT PRIMARY KEY,
                level INTEGER NOT NULL,
                summary TEXT NOT NULL DEFAULT '',
                embedding BLOB,
                metadata TEXT,
                parent_id TEXT,
                child_ids TEXT
            )",
            [],
        )
        .map_err(|e| Error::TableCreation(format!("communities: {e}")))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS entity_communities (
                entity_id TEXT NOT NULL,
                community_id TEXT NOT NULL,
                position INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (entity_id, community_id),
                FOREIGN KEY (entity_id) REFERENCES entities(id) ON DELETE CASCADE,
                FOREIGN KEY (community_id) REFERENCES communities(id) ON DELETE CASCADE
            )",
            [],
        )
        .map_err(|e| Error::TableCreation(format!("entity_communities: {e}")))?;

        Self::create_indexes(conn);

        // Recover the dimension from whichever table holds a vector.
        state.dimension = Self::detect_dimension(state.conn.as_ref().ok_or(Error::NotInitialized)?);

        Ok(())
    }

    fn create_indexes(conn: &Connection) {
        let _ = conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_entities_type ON entities(entity_type)",
            [],
        );
        let _ = conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_entities_last_modified ON entities(last_modified)",
            [],
        );
        let _ = conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_relationships_source ON relationships(source_id)",
            [],
        );
        let _ = conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_relationships_target ON relationships(target_id)",
            [],
        );
        let _ = conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_relationships_type ON relationships(rel_type)",
            [],
        );
        let _ = conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_communities_level ON communities(level)",
            [],
        );
        let _ = conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_entity_communities_community
             ON entity_communities(community_id)",
            [],
        );
    }

    fn detect_dimension(conn: &Connection) -> Option<usize> {
        let from_entities: Option<i64> = conn
            .query_row(
                "SELECT length(embedding) FROM entities WHERE embedding IS NOT NULL LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .ok()
            .flatten();
        let bytes = from_entities.or_else(|| {
            conn.query_row(
                "SELECT length(embedding) FROM communities WHERE embedding IS NOT NULL LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .ok()
            .flatten()
        })?;
        Some(bytes as usize / 4)
    }

    /// Validates a vector against the detected dimension, adopting it when
    /// the store has none yet.
    fn check_dimension(state: &mut StoreState, vector: &[f32]) -> Result<()> {
        match state.dimension {
            Some(expected) if expected != vector.len() => Err(Error::DimensionMismatch {
                expected,
                actual: vector.len(),
            }),
            Some(_) => Ok(()),
            None => {
                state.dimension = Some(vector.len());
                Ok(())
            },
        }
    }

    fn parse_entity_row(row: &Row<'_>) -> rusqlite::Result<Entity> {
        let entity_type_str: String = row.get("entity_type")?;
        let attributes_json: Option<String> = row.get("attributes")?;
        let embedding_blob: Option<Vec<u8>> = row.get("embedding")?;

        let attributes: HashMap<String, String> = attributes_json
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();

        Ok(Entity {
            id: row.get("id")?,
            name: row.get("name")?,
            entity_type: EntityType::parse(&entity_type_str).unwrap_or(EntityType::Topic),
            description: row.get("description")?,
            attributes,
            embedding: embedding_blob.map(|b| blob_to_embedding(&b)),
            last_modified: row.get("last_modified")?,
            created_at: row.get("created_at")?,
        })
    }

    fn parse_relationship_row(row: &Row<'_>) -> rusqlite::Result<Relationship> {
        let rel_type_str: String = row.get("rel_type")?;
        let metadata_json: Option<String> = row.get("metadata")?;

        let metadata: HashMap<String, serde_json::Value> = metadata_json
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();

        Ok(Relationship {
            id: row.get("id")?,
            source_id: row.get("source_id")?,
            target_id: row.get("target_id")?,
            rel_type: RelationshipType::parse(&rel_type_str),
            weight: row.get("weight")?,
            metadata,
        })
    }

    fn parse_community_row(row: &Row<'_>) -> rusqlite::Result<Community> {
        let metadata_json: Option<String> = row.get("metadata")?;
        let child_ids_json: Option<String> = row.get("child_ids")?;
        let embedding_blob: Option<Vec<u8>> = row.get("embedding")?;

        Ok(Community {
            id: row.get("id")?,
            level: row.get::<_, i64>("level")? as u32,
            summary: row.get("summary")?,
            embedding: embedding_blob.map(|b| blob_to_embedding(&b)),
            member_ids: Vec::new(),
            metadata: metadata_json
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default(),
            parent_id: row.get("parent_id")?,
            child_ids: child_ids_json
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default(),
        })
    }

    fn load_member_ids(conn: &Connection, community_id: &str) -> rusqlite::Result<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT entity_id FROM entity_communities
             WHERE community_id = ?1 ORDER BY position",
        )?;
        let ids = stmt
            .query_map(params![community_id], |row| row.get(0))?
            .filter_map(std::result::Result::ok)
            .collect();
        Ok(ids)
    }

    // ========================================================================
    // Entity operations
    // ========================================================================

    /// Inserts or overwrites an entity (upsert by id).
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] if the embedding's length
    /// conflicts with the store, or [`Error::Insert`] on statement failure.
    #[instrument(skip(self, entity), fields(entity_id = %entity.id))]
    pub fn add_entity(&self, entity: &Entity) -> Result<()> {
        let mut state = acquire_lock(&self.state);
        if let Some(embedding) = &entity.embedding {
            Self::check_dimension(&mut state, embedding)?;
        }
        let conn = state.conn.as_ref().ok_or(Error::NotInitialized)?;

        let attributes_json =
            serde_json::to_string(&entity.attributes).unwrap_or_else(|_| "{}".to_string());
        let embedding_blob = entity.embedding.as_ref().map(|e| embedding_to_blob(e));

        conn.execute(
            "INSERT INTO entities (
                id, name, entity_type, description, attributes, embedding,
                last_modified, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                entity_type = excluded.entity_type,
                description = excluded.description,
                attributes = excluded.attributes,
                embedding = excluded.embedding,
                last_modified = excluded.last_modified",
            params![
                entity.id,
                entity.name,
                entity.entity_type.as_str(),
                entity.description,
                attributes_json,
                embedding_blob,
                entity.last_modified,
                entity.created_at,
            ],
        )
        .map_err(|e| Error::Insert(format!("entity {}: {e}", entity.id)))?;

        metrics::counter!("graph_entities_stored_total").increment(1);
        Ok(())
    }

    /// Upserts under timestamp-wins rules: an existing row is overwritten
    /// only when the incoming `last_modified` strictly exceeds the stored
    /// one. Returns whether a write happened.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Self::add_entity`].
    #[instrument(skip(self, entity), fields(entity_id = %entity.id))]
    pub fn add_entity_if_newer(&self, entity: &Entity) -> Result<bool> {
        let mut state = acquire_lock(&self.state);
        if let Some(embedding) = &entity.embedding {
            Self::check_dimension(&mut state, embedding)?;
        }
        let conn = state.conn.as_ref().ok_or(Error::NotInitialized)?;

        let attributes_json =
            serde_json::to_string(&entity.attributes).unwrap_or_else(|_| "{}".to_string());
        let embedding_blob = entity.embedding.as_ref().map(|e| embedding_to_blob(e));

        let rows = conn
            .execute(
                "INSERT INTO entities (
                    id, name, entity_type, description, attributes, embedding,
                    last_modified, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    entity_type = excluded.entity_type,
                    description = excluded.description,
                    attributes = excluded.attributes,
                    embedding = excluded.embedding,
                    last_modified = excluded.last_modified
                WHERE excluded.last_modified > entities.last_modified",
                params![
                    entity.id,
                    entity.name,
                    entity.entity_type.as_str(),
                    entity.description,
                    attributes_json,
                    embedding_blob,
                    entity.last_modified,
                    entity.created_at,
                ],
            )
            .map_err(|e| Error::Insert(format!("entity {}: {e}", entity.id)))?;

        if rows > 0 {
            metrics::counter!("graph_entities_stored_total").increment(1);
        }
        Ok(rows > 0)
    }

    /// Applies a partial update to an entity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Update`] when the entity does not exist or the
    /// statement fails.
    #[instrument(skip(self, patch), fields(entity_id = %id))]
    pub fn update_entity(&self, id: &str, patch: &EntityPatch) -> Result<()> {
        let mut state = acquire_lock(&self.state);
        if let Some(embedding) = &patch.embedding {
            Self::check_dimension(&mut state, embedding)?;
        }
        let conn = state.conn.as_ref().ok_or(Error::NotInitialized)?;

        let mut sets = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(name) = &patch.name {
            sets.push(format!("name = ?{}", values.len() + 1));
            values.push(Box::new(name.clone()));
        }
        if let Some(description) = &patch.description {
            sets.push(format!("description = ?{}", values.len() + 1));
            values.push(Box::new(description.clone()));
        }
        if let Some(attributes) = &patch.attributes {
            sets.push(format!("attributes = ?{}", values.len() + 1));
            values.push(Box::new(
                serde_json::to_string(attributes).unwrap_or_else(|_| "{}".to_string()),
            ));
        }
        if let Some(embedding) = &patch.embedding {
            sets.push(format!("embedding = ?{}", values.len() + 1));
            values.push(Box::new(embedding_to_blob(embedding)));
        }
        if let Some(last_modified) = patch.last_modified {
            sets.push(format!("last_modified = ?{}", values.len() + 1));
            values.push(Box::new(last_modified));
        }

        if sets.is_empty() {
            return Ok(());
        }

        let sql = format!(
            "UPDATE entities SET {} WHERE id = ?{}",
            sets.join(", "),
            values.len() + 1
        );
        values.push(Box::new(id.to_string()));

        let value_refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|p| p.as_ref()).collect();
        let rows = conn
            .execute(&sql, value_refs.as_slice())
            .map_err(|e| Error::Update(format!("entity {id}: {e}")))?;

        if rows == 0 {
            return Err(Error::Update(format!("entity not found: {id}")));
        }
        Ok(())
    }

    /// Deletes an entity, cascading to its community memberships and to
    /// every relationship incident on it, in one transaction.
    ///
    /// Returns whether the entity existed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Delete`] on statement failure; the transaction
    /// rolls back and nothing is partially removed.
    #[instrument(skip(self), fields(entity_id = %id))]
    pub fn delete_entity(&self, id: &str) -> Result<bool> {
        let mut state = acquire_lock(&self.state);
        let conn = state.conn.as_mut().ok_or(Error::NotInitialized)?;

        let tx = conn
            .transaction()
            .map_err(|e| Error::Delete(format!("begin: {e}")))?;

        tx.execute(
            "DELETE FROM entity_communities WHERE entity_id = ?1",
            params![id],
        )
        .map_err(|e| Error::Delete(format!("memberships of {id}: {e}")))?;

        tx.execute(
            "DELETE FROM relationships WHERE source_id = ?1 OR target_id = ?1",
            params![id],
        )
        .map_err(|e| Error::Delete(format!("edges of {id}: {e}")))?;

        let rows = tx
            .execute("DELETE FROM entities WHERE id = ?1", params![id])
            .map_err(|e| Error::Delete(format!("entity {id}: {e}")))?;

        tx.commit().map_err(|e| Error::Delete(format!("commit: {e}")))?;

        if rows > 0 {
            metrics::counter!("graph_entities_deleted_total").increment(1);
        }
        Ok(rows > 0)
    }

    /// Fetches an entity by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Query`] on statement failure.
    #[instrument(skip(self), fields(entity_id = %id))]
    pub fn get_entity(&self, id: &str) -> Result<Option<Entity>> {
        let state = acquire_lock(&self.state);
        let conn = state.conn.as_ref().ok_or(Error::NotInitialized)?;

        conn.query_row(
            "SELECT * FROM entities WHERE id = ?1",
            params![id],
            Self::parse_entity_row,
        )
        .optional()
        .map_err(|e| Error::Query(format!("get entity {id}: {e}")))
    }

    /// Lists all entities of one type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Query`] on statement failure.
    #[instrument(skip(self))]
    pub fn list_by_type(&self, entity_type: EntityType) -> Result<Vec<Entity>> {
        self.list_entities_where(
            "entity_type = ?1",
            params![entity_type.as_str()],
        )
    }

    /// Lists entities of one type that carry an embedding.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Query`] on statement failure.
    #[instrument(skip(self))]
    pub fn list_by_type_with_embeddings(&self, entity_type: EntityType) -> Result<Vec<Entity>> {
        self.list_entities_where(
            "entity_type = ?1 AND embedding IS NOT NULL",
            params![entity_type.as_str()],
        )
    }

    /// Lists every entity in the store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Query`] on statement failure.
    #[instrument(skip(self))]
    pub fn list_entities(&self) -> Result<Vec<Entity>> {
        self.list_entities_where("1=1", params![])
    }

    fn list_entities_where(
        &self,
        condition: &str,
        parameters: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<Entity>> {
        let state = acquire_lock(&self.state);
        let conn = state.conn.as_ref().ok_or(Error::NotInitialized)?;

        let sql = format!("SELECT * FROM entities WHERE {condition} ORDER BY last_modified DESC");
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| Error::Query(format!("list entities: {e}")))?;

        let entities = stmt
            .query_map(parameters, Self::parse_entity_row)
            .map_err(|e| Error::Query(format!("list entities: {e}")))?
            .filter_map(std::result::Result::ok)
            .collect();
        Ok(entities)
    }

    /// Finds entities whose name contains `name` (case-insensitive LIKE),
    /// optionally restricted to one type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Query`] on statement failure.
    #[instrument(skip(self))]
    pub fn find_by_name(&self, name: &str, entity_type: Option<EntityType>) -> Result<Vec<Entity>> {
        let state = acquire_lock(&self.state);
        let conn = state.conn.as_ref().ok_or(Error::NotInitialized)?;

        let pattern = format!("%{name}%");
        let mut stmt;
        let rows = if let Some(et) = entity_type {
            stmt = conn
                .prepare(
                    "SELECT * FROM entities WHERE name LIKE ?1 AND entity_type = ?2
                     ORDER BY last_modified DESC",
                )
                .map_err(|e| Error::Query(format!("find by name: {e}")))?;
            stmt.query_map(params![pattern, et.as_str()], Self::parse_entity_row)
        } else {
            stmt = conn
                .prepare("SELECT * FROM entities WHERE name LIKE ?1 ORDER BY last_modified DESC")
                .map_err(|e| Error::Query(format!("find by name: {e}")))?;
            stmt.query_map(params![pattern], Self::parse_entity_row)
        };

        let entities = rows
            .map_err(|e| Error::Query(format!("find by name: {e}")))?
            .filter_map(std::result::Result::ok)
            .collect();
        Ok(entities)
    }

    // ========================================================================
    // Relationship operations
    // ========================================================================

    /// Inserts or overwrites a relationship (upsert by id).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Insert`] on statement failure, including when an
    /// endpoint does not exist (foreign keys are enforced).
    #[instrument(skip(self, rel), fields(rel_id = %rel.id))]
    pub fn add_relationship(&self, rel: &Relationship) -> Result<()> {
        let state = acquire_lock(&self.state);
        let conn = state.conn.as_ref().ok_or(Error::NotInitialized)?;

        let metadata_json =
            serde_json::to_string(&rel.metadata).unwrap_or_else(|_| "{}".to_string());

        conn.execute(
            "INSERT INTO relationships (id, source_id, target_id, rel_type, weight, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                weight = excluded.weight,
                metadata = excluded.metadata",
            params![
                rel.id,
                rel.source_id,
                rel.target_id,
                rel.rel_type.as_str(),
                f64::from(rel.weight),
                metadata_json,
            ],
        )
        .map_err(|e| Error::Insert(format!("relationship {}: {e}", rel.id)))?;

        metrics::counter!("graph_relationships_stored_total").increment(1);
        Ok(())
    }

    /// Deletes a relationship by id. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Delete`] on statement failure.
    #[instrument(skip(self), fields(rel_id = %id))]
    pub fn delete_relationship(&self, id: &str) -> Result<bool> {
        let state = acquire_lock(&self.state);
        let conn = state.conn.as_ref().ok_or(Error::NotInitialized)?;

        let rows = conn
            .execute("DELETE FROM relationships WHERE id = ?1", params![id])
            .map_err(|e| Error::Delete(format!("relationship {id}: {e}")))?;
        Ok(rows > 0)
    }

    /// Returns all relationships incident to an entity, in either direction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Query`] on statement failure.
    #[instrument(skip(self), fields(entity_id = %id))]
    pub fn relationships_for(&self, id: &str) -> Result<Vec<Relationship>> {
        let state = acquire_lock(&self.state);
        let conn = state.conn.as_ref().ok_or(Error::NotInitialized)?;

        let mut stmt = conn
            .prepare("SELECT * FROM relationships WHERE source_id = ?1 OR target_id = ?1")
            .map_err(|e| Error::Query(format!("relationships for {id}: {e}")))?;

        let rels = stmt
            .query_map(params![id], Self::parse_relationship_row)
            .map_err(|e| Error::Query(format!("relationships for {id}: {e}")))?
            .filter_map(std::result::Result::ok)
            .collect();
        Ok(rels)
    }

    /// Lists every relationship in the store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Query`] on statement failure.
    #[instrument(skip(self))]
    pub fn list_relationships(&self) -> Result<Vec<Relationship>> {
        let state = acquire_lock(&self.state);
        let conn = state.conn.as_ref().ok_or(Error::NotInitialized)?;

        let mut stmt = conn
            .prepare("SELECT * FROM relationships")
            .map_err(|e| Error::Query(format!("list relationships: {e}")))?;

        let rels = stmt
            .query_map([], Self::parse_relationship_row)
            .map_err(|e| Error::Query(format!("list relationships: {e}")))?
            .filter_map(std::result::Result::ok)
            .collect();
        Ok(rels)
    }

    // ========================================================================
    // Community operations
    // ========================================================================

    /// Inserts or replaces a community and its memberships atomically.
    ///
    /// A second `add_community` with the same id replaces the previous
    /// member set wholesale.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] for a conflicting embedding or
    /// [`Error::Insert`] on statement failure.
    #[instrument(skip(self, community), fields(community_id = %community.id))]
    pub fn add_community(&self, community: &Community) -> Result<()> {
        let mut state = acquire_lock(&self.state);
        if let Some(embedding) = &community.embedding {
            Self::check_dimension(&mut state, embedding)?;
        }
        let conn = state.conn.as_mut().ok_or(Error::NotInitialized)?;

        let metadata_json =
            serde_json::to_string(&community.metadata).unwrap_or_else(|_| "{}".to_string());
        let child_ids_json =
            serde_json::to_string(&community.child_ids).unwrap_or_else(|_| "[]".to_string());
        let embedding_blob = community.embedding.as_ref().map(|e| embedding_to_blob(e));

        let tx = conn
            .transaction()
            .map_err(|e| Error::Insert(format!("begin: {e}")))?;

        tx.execute(
            "INSERT INTO communities (id, level, summary, embedding, metadata, parent_id, child_ids)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                level = excluded.level,
                summary = excluded.summary,
                embedding = excluded.embedding,
                metadata = excluded.metadata,
                parent_id = excluded.parent_id,
                child_ids = excluded.child_ids",
            params![
                community.id,
                i64::from(community.level),
                community.summary,
                embedding_blob,
                metadata_json,
                community.parent_id,
                child_ids_json,
            ],
        )
        .map_err(|e| Error::Insert(format!("community {}: {e}", community.id)))?;

        tx.execute(
            "DELETE FROM entity_communities WHERE community_id = ?1",
            params![community.id],
        )
        .map_err(|e| Error::Insert(format!("membership reset {}: {e}", community.id)))?;

        for (position, entity_id) in community.member_ids.iter().enumerate() {
            tx.execute(
                "INSERT OR IGNORE INTO entity_communities (entity_id, community_id, position)
                 VALUES (?1, ?2, ?3)",
                params![entity_id, community.id, position as i64],
            )
            .map_err(|e| Error::Insert(format!("membership {entity_id}: {e}")))?;
        }

        tx.commit().map_err(|e| Error::Insert(format!("commit: {e}")))?;

        metrics::counter!("graph_communities_stored_total").increment(1);
        Ok(())
    }

    /// Writes a community's summary and its embedding.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Update`] when the community does not exist and
    /// [`Error::DimensionMismatch`] for a conflicting embedding.
    #[instrument(skip(self, summary, embedding), fields(community_id = %id))]
    pub fn update_community_summary(
        &self,
        id: &str,
        summary: &str,
        embedding: &[f32],
    ) -> Result<()> {
        let mut state = acquire_lock(&self.state);
        Self::check_dimension(&mut state, embedding)?;
        let conn = state.conn.as_ref().ok_or(Error::NotInitialized)?;

        let rows = conn
            .execute(
                "UPDATE communities SET summary = ?1, embedding = ?2 WHERE id = ?3",
                params![summary, embedding_to_blob(embedding), id],
            )
            .map_err(|e| Error::Update(format!("community summary {id}: {e}")))?;

        if rows == 0 {
            return Err(Error::Update(format!("community not found: {id}")));
        }
        Ok(())
    }

    /// Fetches a community by id, members included.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Query`] on statement failure.
    #[instrument(skip(self), fields(community_id = %id))]
    pub fn get_community(&self, id: &str) -> Result<Option<Community>> {
        let state = acquire_lock(&self.state);
        let conn = state.conn.as_ref().ok_or(Error::NotInitialized)?;

        let community = conn
            .query_row(
                "SELECT * FROM communities WHERE id = ?1",
                params![id],
                Self::parse_community_row,
            )
            .optional()
            .map_err(|e| Error::Query(format!("get community {id}: {e}")))?;

        match community {
            Some(mut c) => {
                c.member_ids = Self::load_member_ids(conn, id)
                    .map_err(|e| Error::Query(format!("members of {id}: {e}")))?;
                Ok(Some(c))
            },
            None => Ok(None),
        }
    }

    /// Lists communities at one hierarchy level, members included.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Query`] on statement failure.
    #[instrument(skip(self))]
    pub fn communities_at_level(&self, level: u32) -> Result<Vec<Community>> {
        let state = acquire_lock(&self.state);
        let conn = state.conn.as_ref().ok_or(Error::NotInitialized)?;

        let mut stmt = conn
            .prepare("SELECT * FROM communities WHERE level = ?1 ORDER BY id")
            .map_err(|e| Error::Query(format!("communities at level {level}: {e}")))?;

        let mut communities: Vec<Community> = stmt
            .query_map(params![i64::from(level)], Self::parse_community_row)
            .map_err(|e| Error::Query(format!("communities at level {level}: {e}")))?
            .filter_map(std::result::Result::ok)
            .collect();

        for community in &mut communities {
            community.member_ids = Self::load_member_ids(conn, &community.id)
                .map_err(|e| Error::Query(format!("members of {}: {e}", community.id)))?;
        }
        Ok(communities)
    }

    // ========================================================================
    // Traversal and similarity search
    // ========================================================================

    /// BFS expansion over the undirected edge view.
    ///
    /// The visited set is seeded with the start id, so the start is excluded
    /// from results; on cycles only the first encounter of a node is
    /// emitted. `rel_type` restricts which edges are followed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Query`] on statement failure.
    #[instrument(skip(self), fields(entity_id = %start_id))]
    pub fn neighbors(
        &self,
        start_id: &str,
        depth: u32,
        rel_type: Option<&RelationshipType>,
    ) -> Result<Vec<Entity>> {
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(start_id.to_string());

        let mut frontier: VecDeque<(String, u32)> = VecDeque::new();
        frontier.push_back((start_id.to_string(), 0));

        let mut found: Vec<String> = Vec::new();

        while let Some((current, hops)) = frontier.pop_front() {
            if hops >= depth {
                continue;
            }
            for rel in self.relationships_for(&current)? {
                if let Some(filter) = rel_type {
                    if rel.rel_type != *filter {
                        continue;
                    }
                }
                let Some(next) = rel.other_endpoint(&current) else {
                    continue;
                };
                if visited.insert(next.to_string()) {
                    found.push(next.to_string());
                    frontier.push_back((next.to_string(), hops + 1));
                }
            }
        }

        let mut entities = Vec::with_capacity(found.len());
        for id in found {
            if let Some(entity) = self.get_entity(&id)? {
                entities.push(entity);
            }
        }
        Ok(entities)
    }

    /// Exhaustive cosine scan over entities, optionally restricted to one
    /// type. Results are filtered by `threshold`, ordered descending, and
    /// truncated to `top_k`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] when the query vector's length
    /// conflicts with the detected dimension.
    #[instrument(skip(self, query_vec))]
    pub fn search_entities(
        &self,
        query_vec: &[f32],
        top_k: usize,
        threshold: f32,
        entity_type: Option<EntityType>,
    ) -> Result<Vec<ScoredEntity>> {
        self.ensure_query_dimension(query_vec)?;

        let candidates = match entity_type {
            Some(et) => self.list_by_type_with_embeddings(et)?,
            None => self
                .list_entities()?
                .into_iter()
                .filter(|e| e.embedding.is_some())
                .collect(),
        };

        let mut scored: Vec<ScoredEntity> = candidates
            .into_iter()
            .filter_map(|entity| {
                let score = entity
                    .embedding
                    .as_ref()
                    .map(|e| cosine_similarity(query_vec, e))?;
                (score >= threshold).then_some(ScoredEntity { entity, score })
            })
            .collect();

        scored.sort_unstable_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    /// Exhaustive cosine scan over community summaries, optionally at one
    /// level.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] when the query vector's length
    /// conflicts with the detected dimension.
    #[instrument(skip(self, query_vec))]
    pub fn search_communities(
        &self,
        query_vec: &[f32],
        top_k: usize,
        level: Option<u32>,
    ) -> Result<Vec<ScoredCommunity>> {
        self.ensure_query_dimension(query_vec)?;

        let candidates: Vec<Community> = match level {
            Some(l) => self.communities_at_level(l)?,
            None => {
                let mut all = Vec::new();
                if let Some(max) = self.stats()?.max_community_level {
                    for l in 0..=max {
                        all.extend(self.communities_at_level(l)?);
                    }
                }
                all
            },
        };

        let mut scored: Vec<ScoredCommunity> = candidates
            .into_iter()
            .filter_map(|community| {
                let score = community
                    .embedding
                    .as_ref()
                    .map(|e| cosine_similarity(query_vec, e))?;
                Some(ScoredCommunity { community, score })
            })
            .collect();

        scored.sort_unstable_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    fn ensure_query_dimension(&self, query_vec: &[f32]) -> Result<()> {
        if let Some(expected) = self.dimension() {
            if expected != query_vec.len() {
                return Err(Error::DimensionMismatch {
                    expected,
                    actual: query_vec.len(),
                });
            }
        }
        Ok(())
    }

    // ========================================================================
    // Stats and lifecycle
    // ========================================================================

    /// Returns aggregate counts, the maximum community level, and the
    /// detected dimension.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Query`] on statement failure.
    #[instrument(skip(self))]
    pub fn stats(&self) -> Result<StoreStats> {
        let state = acquire_lock(&self.state);
        let conn = state.conn.as_ref().ok_or(Error::NotInitialized)?;

        let entity_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM entities", [], |row| row.get(0))
            .unwrap_or(0);
        let relationship_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM relationships", [], |row| row.get(0))
            .unwrap_or(0);
        let community_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM communities", [], |row| row.get(0))
            .unwrap_or(0);
        let max_level: Option<i64> = conn
            .query_row("SELECT MAX(level) FROM communities", [], |row| row.get(0))
            .unwrap_or(None);

        let mut entities_by_type = HashMap::new();
        let mut stmt = conn
            .prepare("SELECT entity_type, COUNT(*) FROM entities GROUP BY entity_type")
            .map_err(|e| Error::Query(format!("stats by type: {e}")))?;
        let type_counts = stmt
            .query_map([], |row| {
                let type_str: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                Ok((type_str, count))
            })
            .map_err(|e| Error::Query(format!("stats by type: {e}")))?;
        for result in type_counts.flatten() {
            if let Some(entity_type) = EntityType::parse(&result.0) {
                entities_by_type.insert(entity_type, result.1 as usize);
            }
        }

        Ok(StoreStats {
            entity_count: entity_count as usize,
            entities_by_type,
            relationship_count: relationship_count as usize,
            community_count: community_count as usize,
            max_community_level: max_level.map(|l| l as u32),
            dimension: state.dimension,
        })
    }

    /// Deletes every row (memberships → communities → relationships →
    /// entities) and resets the detected dimension.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Delete`] on statement failure.
    #[instrument(skip(self))]
    pub fn clear(&self) -> Result<()> {
        let mut state = acquire_lock(&self.state);
        let conn = state.conn.as_ref().ok_or(Error::NotInitialized)?;

        conn.execute("DELETE FROM entity_communities", [])
            .map_err(|e| Error::Delete(format!("clear memberships: {e}")))?;
        conn.execute("DELETE FROM communities", [])
            .map_err(|e| Error::Delete(format!("clear communities: {e}")))?;
        conn.execute("DELETE FROM relationships", [])
            .map_err(|e| Error::Delete(format!("clear relationships: {e}")))?;
        conn.execute("DELETE FROM entities", [])
            .map_err(|e| Error::Delete(format!("clear entities: {e}")))?;

        state.dimension = None;
        metrics::counter!("graph_store_cleared_total").increment(1);
        Ok(())
    }

    /// Releases the connection. Every later call fails with
    /// [`Error::NotInitialized`].
    #[instrument(skip(self))]
    pub fn close(&self) {
        let mut state = acquire_lock(&self.state);
        state.conn = None;
    }
}
