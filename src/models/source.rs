//! Structured personal-data records handed to the extractors.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Families of personal data the pipeline can index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFamily {
    /// Address-book contacts.
    Contacts,
    /// Calendar events.
    Calendar,
    /// Photo library metadata.
    Photos,
    /// Call history.
    CallLog,
    /// Files and documents.
    Documents,
    /// Free-text notes.
    Notes,
}

impl DataFamily {
    /// Returns all families in pipeline processing order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Contacts,
            Self::Calendar,
            Self::Photos,
            Self::CallLog,
            Self::Documents,
            Self::Notes,
        ]
    }

    /// Returns the family tag used in logs and progress events.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Contacts => "contacts",
            Self::Calendar => "calendar",
            Self::Photos => "photos",
            Self::CallLog => "call_log",
            Self::Documents => "documents",
            Self::Notes => "notes",
        }
    }
}

impl fmt::Display for DataFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An address-book contact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    /// Platform record id.
    pub id: String,
    /// Full display name.
    pub full_name: String,
    /// Employer name, if known.
    pub organization_name: Option<String>,
    /// Job title, if known.
    pub job_title: Option<String>,
    /// Email addresses.
    pub emails: Vec<String>,
    /// Phone numbers.
    pub phone_numbers: Vec<String>,
    /// Last-modified timestamp, ms epoch.
    pub last_modified: i64,
}

/// A calendar event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    /// Platform record id.
    pub id: String,
    /// Event title.
    pub title: String,
    /// Free-text description.
    pub description: Option<String>,
    /// Venue name.
    pub location: Option<String>,
    /// Attendee display names.
    pub attendees: Vec<String>,
    /// Start time, ms epoch.
    pub start_time: Option<i64>,
    /// End time, ms epoch.
    pub end_time: Option<i64>,
    /// Last-modified timestamp, ms epoch.
    pub last_modified: i64,
}

/// Photo library metadata for one picture.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    /// Platform record id.
    pub id: String,
    /// File or album title, if any.
    pub title: Option<String>,
    /// Named place, if the platform resolved one.
    pub place_name: Option<String>,
    /// GPS latitude.
    pub latitude: Option<f64>,
    /// GPS longitude.
    pub longitude: Option<f64>,
    /// Capture timestamp, ms epoch.
    pub taken_at: Option<i64>,
    /// Display names of people detected in the photo.
    pub detected_people: Vec<String>,
    /// Last-modified timestamp, ms epoch.
    pub last_modified: i64,
}

/// One entry from the call history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    /// Platform record id.
    pub id: String,
    /// Remote phone number.
    pub number: String,
    /// Resolved contact name, when the number is known.
    pub contact_name: Option<String>,
    /// Call timestamp, ms epoch.
    pub timestamp: i64,
    /// Call duration in seconds.
    pub duration_secs: u32,
    /// Last-modified timestamp, ms epoch.
    pub last_modified: i64,
}

/// A file or document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Platform record id.
    pub id: String,
    /// Document title or file name.
    pub title: String,
    /// Author display name, if known.
    pub author: Option<String>,
    /// People the document was shared with.
    pub shared_with: Vec<String>,
    /// Project the document belongs to, if known.
    pub project: Option<String>,
    /// Extracted body text, if available.
    pub body: Option<String>,
    /// Last-modified timestamp, ms epoch.
    pub last_modified: i64,
}

/// A free-text note.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Note {
    /// Platform record id.
    pub id: String,
    /// Note title, if any.
    pub title: Option<String>,
    /// Note body.
    pub body: String,
    /// User-assigned topic tags.
    pub tags: Vec<String>,
    /// Last-modified timestamp, ms epoch.
    pub last_modified: i64,
}

/// A structured record from one data family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum SourceItem {
    /// An address-book contact.
    Contact(Contact),
    /// A calendar event.
    Calendar(CalendarEvent),
    /// A photo.
    Photo(Photo),
    /// A call-history entry.
    Call(CallRecord),
    /// A document.
    Document(Document),
    /// A note.
    Note(Note),
}

impl SourceItem {
    /// The family this record belongs to.
    #[must_use]
    pub const fn family(&self) -> DataFamily {
        match self {
            Self::Contact(_) => DataFamily::Contacts,
            Self::Calendar(_) => DataFamily::Calendar,
            Self::Photo(_) => DataFamily::Photos,
            Self::Call(_) => DataFamily::CallLog,
            Self::Document(_) => DataFamily::Documents,
            Self::Note(_) => DataFamily::Notes,
        }
    }

    /// The platform record id.
    #[must_use]
    pub fn source_id(&self) -> &str {
        match self {
            Self::Contact(c) => &c.id,
            Self::Calendar(e) => &e.id,
            Self::Photo(p) => &p.id,
            Self::Call(c) => &c.id,
            Self::Document(d) => &d.id,
            Self::Note(n) => &n.id,
        }
    }

    /// The record's last-modified timestamp, ms epoch.
    #[must_use]
    pub const fn last_modified(&self) -> i64 {
        match self {
            Self::Contact(c) => c.last_modified,
            Self::Calendar(e) => e.last_modified,
            Self::Photo(p) => p.last_modified,
            Self::Call(c) => c.last_modified,
            Self::Document(d) => d.last_modified,
            Self::Note(n) => n.last_modified,
        }
    }

    /// A representative timestamp for temporal-proximity linking.
    ///
    /// Calendar events use their start, photos their capture time, calls
    /// their call time; other families have no meaningful instant.
    #[must_use]
    pub const fn event_time(&self) -> Option<i64> {
        match self {
            Self::Calendar(e) => e.start_time,
            Self::Photo(p) => p.taken_at,
            Self::Call(c) => Some(c.timestamp),
            Self::Contact(_) | Self::Document(_) | Self::Note(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_dispatch() {
        let item = SourceItem::Contact(Contact {
            id: "c1".to_string(),
            full_name: "Ada".to_string(),
            last_modified: 7,
            ..Contact::default()
        });
        assert_eq!(item.family(), DataFamily::Contacts);
        assert_eq!(item.source_id(), "c1");
        assert_eq!(item.last_modified(), 7);
        assert_eq!(item.event_time(), None);
    }

    #[test]
    fn test_event_time() {
        let item = SourceItem::Call(CallRecord {
            id: "k1".to_string(),
            number: "+1555".to_string(),
            timestamp: 99,
            ..CallRecord::default()
        });
        assert_eq!(item.event_time(), Some(99));
    }
}
