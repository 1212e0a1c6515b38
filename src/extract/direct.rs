//! Deterministic field-based extraction for structured records.

use super::{ExtractedEntity, ExtractedRelationship, ExtractionResult};
use crate::models::{
    CalendarEvent, CallRecord, Contact, Document, EntityType, Note, Photo, RelationshipType,
    SourceItem,
};
use chrono::{TimeZone, Utc};

/// Dispatches on the source family and emits entities and edges from named
/// fields. No LLM involved; the output is stable for a given record.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectExtractor;

impl DirectExtractor {
    /// Creates a direct extractor.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Extracts from one source item.
    #[must_use]
    pub fn extract(&self, item: &SourceItem) -> ExtractionResult {
        match item {
            SourceItem::Contact(c) => Self::extract_contact(c),
            SourceItem::Calendar(e) => Self::extract_event(e),
            SourceItem::Photo(p) => Self::extract_photo(p),
            SourceItem::Call(c) => Self::extract_call(c),
            SourceItem::Document(d) => Self::extract_document(d),
            SourceItem::Note(n) => Self::extract_note(n),
        }
    }

    fn extract_contact(contact: &Contact) -> ExtractionResult {
        let mut result = ExtractionResult::empty(contact.id.clone(), SourceItem::Contact(contact.clone()).family());
        if contact.full_name.trim().is_empty() {
            return result;
        }

        let mut person = ExtractedEntity::new(EntityType::Person, contact.full_name.trim());
        if let Some(job_title) = &contact.job_title {
            person = person
                .with_attribute("job_title", job_title)
                .with_description(job_title.clone());
        }
        if !contact.emails.is_empty() {
            person = person.with_attribute("emails", contact.emails.join(", "));
        }
        if !contact.phone_numbers.is_empty() {
            person = person.with_attribute("phones", contact.phone_numbers.join(", "));
        }

        if let Some(org_name) = contact
            .organization_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            result
                .entities
                .push(ExtractedEntity::new(EntityType::Organization, org_name));
            result.relationships.push(ExtractedRelationship::new(
                contact.full_name.trim(),
                RelationshipType::WorksAt,
                org_name,
            ));
        }

        result.entities.insert(0, person);
        result
    }

    fn extract_event(event: &CalendarEvent) -> ExtractionResult {
        let mut result =
            ExtractionResult::empty(event.id.clone(), SourceItem::Calendar(event.clone()).family());
        if event.title.trim().is_empty() {
            return result;
        }

        let mut ev = ExtractedEntity::new(EntityType::Event, event.title.trim());
        if let Some(description) = &event.description {
            ev = ev.with_description(description.clone());
        }
        result.entities.push(ev);

        if let Some(location) = event
            .location
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            result
                .entities
                .push(ExtractedEntity::new(EntityType::Location, location));
            result.relationships.push(ExtractedRelationship::new(
                event.title.trim(),
                RelationshipType::LocatedIn,
                location,
            ));
        }

        for attendee in &event.attendees {
            let attendee = attendee.trim();
            if attendee.is_empty() {
                continue;
            }
            result
                .entities
                .push(ExtractedEntity::new(EntityType::Person, attendee));
            result.relationships.push(ExtractedRelationship::new(
                attendee,
                RelationshipType::AttendedBy,
                event.title.trim(),
            ));
        }

        result
    }

    fn extract_photo(photo: &Photo) -> ExtractionResult {
        let mut result =
            ExtractionResult::empty(photo.id.clone(), SourceItem::Photo(photo.clone()).family());

        let photo_name = photo
            .title
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map_or_else(|| format!("Photo {}", photo.id), String::from);
        result
            .entities
            .push(ExtractedEntity::new(EntityType::Photo, photo_name.clone()));

        let location_name = photo
            .place_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map_or_else(
                || match (photo.latitude, photo.longitude) {
                    (Some(lat), Some(lon)) => Some(format!("Location ({lat}, {lon})")),
                    _ => None,
                },
                |name| Some(name.to_string()),
            );
        if let Some(location) = location_name {
            result
                .entities
                .push(ExtractedEntity::new(EntityType::Location, location.clone()));
            result.relationships.push(ExtractedRelationship::new(
                photo_name.clone(),
                RelationshipType::TakenAt,
                location,
            ));
        }

        if let Some(taken_at) = photo.taken_at {
            let date_name = format_date(taken_at);
            result
                .entities
                .push(ExtractedEntity::new(EntityType::Date, date_name.clone()));
            result.relationships.push(ExtractedRelationship::new(
                photo_name.clone(),
                RelationshipType::TakenOn,
                date_name,
            ));
        }

        for person in &photo.detected_people {
            let person = person.trim();
            if person.is_empty() {
                continue;
            }
            result
                .entities
                .push(ExtractedEntity::new(EntityType::Person, person));
            result.relationships.push(ExtractedRelationship::new(
                person,
                RelationshipType::PicturedIn,
                photo_name.clone(),
            ));
        }

        result
    }

    fn extract_call(call: &CallRecord) -> ExtractionResult {
        let mut result =
            ExtractionResult::empty(call.id.clone(), SourceItem::Call(call.clone()).family());

        let caller = call.contact_name.as_deref().map(str::trim).filter(|s| !s.is_empty());
        match caller {
            Some(name) => {
                result.entities.push(
                    ExtractedEntity::new(EntityType::Person, name)
                        .with_attribute("phone", call.number.clone()),
                );
            },
            None => {
                result
                    .entities
                    .push(ExtractedEntity::new(EntityType::Phone, call.number.trim()));
            },
        }

        let date_name = format_date(call.timestamp);
        result
            .entities
            .push(ExtractedEntity::new(EntityType::Date, date_name));

        result
    }

    fn extract_document(document: &Document) -> ExtractionResult {
        let mut result = ExtractionResult::empty(
            document.id.clone(),
            SourceItem::Document(document.clone()).family(),
        );
        if document.title.trim().is_empty() {
            return result;
        }

        let title = document.title.trim();
        result
            .entities
            .push(ExtractedEntity::new(EntityType::Document, title));

        if let Some(author) = document
            .author
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            result
                .entities
                .push(ExtractedEntity::new(EntityType::Person, author));
            result.relationships.push(ExtractedRelationship::new(
                title,
                RelationshipType::CreatedBy,
                author,
            ));
        }

        for person in &document.shared_with {
            let person = person.trim();
            if person.is_empty() {
                continue;
            }
            result
                .entities
                .push(ExtractedEntity::new(EntityType::Person, person));
            result.relationships.push(ExtractedRelationship::new(
                title,
                RelationshipType::SharedWith,
                person,
            ));
        }

        if let Some(project) = document
            .project
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            result
                .entities
                .push(ExtractedEntity::new(EntityType::Project, project));
            result.relationships.push(ExtractedRelationship::new(
                title,
                RelationshipType::PartOf,
                project,
            ));
        }

        result
    }

    fn extract_note(note: &Note) -> ExtractionResult {
        let mut result =
            ExtractionResult::empty(note.id.clone(), SourceItem::Note(note.clone()).family());

        let note_name = note
            .title
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map_or_else(|| format!("Note {}", note.id), String::from);

        let mut entity = ExtractedEntity::new(EntityType::Note, note_name.clone());
        if !note.body.is_empty() {
            let preview: String = note.body.chars().take(200).collect();
            entity = entity.with_description(preview);
        }
        result.entities.push(entity);

        for tag in &note.tags {
            let tag = tag.trim();
            if tag.is_empty() {
                continue;
            }
            result
                .entities
                .push(ExtractedEntity::new(EntityType::Topic, tag));
            result.relationships.push(ExtractedRelationship::new(
                note_name.clone(),
                RelationshipType::TaggedWith,
                tag,
            ));
        }

        result
    }
}

/// Formats a ms-epoch timestamp as the `YYYY-MM-DD` date entity name.
fn format_date(timestamp_ms: i64) -> String {
    Utc.timestamp_millis_opt(timestamp_ms)
        .single()
        .map_or_else(|| "Unknown Date".to_string(), |dt| dt.format("%Y-%m-%d").to_string())
}
