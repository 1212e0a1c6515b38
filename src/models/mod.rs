//! Core data model: entities, relationships, communities, source records,
//! and indexing progress.

mod community;
mod entity;
mod progress;
mod relationship;
mod source;

pub use community::{Community, community_id};
pub use entity::{Entity, EntityType, SELF_ENTITY_ID, entity_id, slugify};
pub use progress::{IndexingPhase, IndexingProgress, IndexingStatus};
pub use relationship::{Relationship, RelationshipType, relationship_id};
pub use source::{
    CalendarEvent, CallRecord, Contact, DataFamily, Document, Note, Photo, SourceItem,
};
