//! Platform collaborator boundaries: personal-data access and the
//! foreground-service notifier.

use crate::Result;
use crate::models::{DataFamily, SourceItem};

/// Trait for host-provided access to on-device personal data.
///
/// The pipeline treats a denied permission as an empty fetch rather than a
/// failure, so one revoked family never blocks the rest of a run.
pub trait PersonalDataProvider: Send + Sync {
    /// Returns whether the family is currently readable.
    fn check_permission(&self, family: DataFamily) -> bool;

    /// Asks the platform to prompt for access; returns the resulting state.
    fn request_permission(&self, family: DataFamily) -> bool {
        self.check_permission(family)
    }

    /// Fetches records of one family, optionally restricted to those
    /// modified after `since` (ms epoch) and capped at `limit`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::PermissionDenied`] when access is refused,
    /// or [`crate::Error::Query`] on platform I/O failure.
    fn fetch_since(
        &self,
        family: DataFamily,
        since: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<SourceItem>>;
}

/// Trait for the optional foreground-service notification surface.
///
/// Every method is best-effort: implementations should swallow their own
/// errors, and the pipeline ignores any that escape.
pub trait ForegroundNotifier: Send + Sync {
    /// Brings up the foreground notification.
    fn start(&self) {}

    /// Tears down the foreground notification.
    fn stop(&self) {}

    /// Pushes a progress update.
    fn update(&self, _progress: f32, _phase: &str, _entities: usize, _relationships: usize) {}
}

/// A notifier that does nothing; used when the host supplies none.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl ForegroundNotifier for NoopNotifier {}


#[cfg(test)]
mod tests {
    use super::testing::FixtureDataProvider;
    use super::*;
    use crate::models::Contact;

    #[test]
    fn test_fixture_provider_incremental() {
        let provider = FixtureDataProvider::new().with_items(
            DataFamily::Contacts,
            vec![
                SourceItem::Contact(Contact {
                    id: "old".to_string(),
                    full_name: "Old".to_string(),
                    last_modified: 100,
                    ..Contact::default()
                }),
                SourceItem::Contact(Contact {
                    id: "new".to_string(),
                    full_name: "New".to_string(),
                    last_modified: 200,
                    ..Contact::default()
                }),
            ],
        );

        let all = provider
            .fetch_since(DataFamily::Contacts, None, None)
            .unwrap_or_default();
        assert_eq!(all.len(), 2);

        let recent = provider
            .fetch_since(DataFamily::Contacts, Some(150), None)
            .unwrap_or_default();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].source_id(), "new");
    }

    #[test]
    fn test_denied_family() {
        let provider = FixtureDataProvider::new().deny(DataFamily::Photos);
        assert!(!provider.check_permission(DataFamily::Photos));
        assert!(provider.check_permission(DataFamily::Contacts));
        assert!(provider.fetch_since(DataFamily::Photos, None, None).is_err());
    }

    #[test]
    fn test_noop_notifier() {
        let notifier = NoopNotifier;
        notifier.start();
        notifier.update(0.5, "processing", 3, 2);
        notifier.stop();
    }
}
