//! Flat, older-style entry points kept for callers that predate the repository API.
//!
//! Every method is total: failures turn into empty results or `false`.

use std::sync::{MutexGuard, PoisonError};

use serde_json::Value;

use crate::common::Message;
use crate::error::BoardResult;
use crate::repository::{MessageRepository, SharedRepository};
use crate::storage::{KeyValueStore, RawMessage};

pub struct LegacyFacade<B> {
    repo: SharedRepository<B>,
}

impl<B: KeyValueStore> LegacyFacade<B> {
    pub fn new(repo: SharedRepository<B>) -> Self {
        Self { repo }
    }

    /// Collection in insertion order, newest first.
    pub fn get_messages(&self) -> Vec<Message> {
        self.repo().list(None, false)
    }

    pub fn save_message(&self, message: Value) -> BoardResult<Message> {
        let raw = RawMessage::from_value(message)?;
        self.repo().add(raw)
    }

    pub fn generate_id(&self) -> String {
        self.repo().stamper().next_id()
    }

    pub fn get_current_time(&self) -> String {
        self.repo().stamper().now()
    }

    pub fn clear_messages(&self) -> bool {
        match self.repo().clear(false) {
            Ok(report) => report.after == 0,
            Err(err) => {
                log::error!("Legacy clear failed: {err}");
                false
            }
        }
    }

    pub fn refresh_from_storage(&self) -> bool {
        let provenance = self.repo().refresh();
        log::debug!("Legacy refresh served from {provenance}");
        true
    }

    // Repository operations never panic mid-mutation, so a poisoned lock still holds
    // consistent state.
    fn repo(&self) -> MutexGuard<'_, MessageRepository<B>> {
        self.repo.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::testing::FixedStamper;
    use crate::common::MessageStatus;
    use crate::config::{SeedConfig, StorageKeys};
    use crate::error::ErrorKind;
    use crate::storage::backend::testing::{FaultSwitch, FlakyStore};
    use crate::storage::{LayeredStore, MemoryStore};
    use serde_json::json;

    fn facade() -> (LegacyFacade<FlakyStore>, FaultSwitch) {
        let (flaky, switch) = FlakyStore::new(MemoryStore::new());
        let store = LayeredStore::new(flaky, StorageKeys::default(), SeedConfig::default());
        let repo = MessageRepository::with_stamper(store, Box::new(FixedStamper::default()));
        (LegacyFacade::new(repo.into_shared()), switch)
    }

    #[test]
    fn save_then_get_uses_either_naming() {
        let (facade, _) = facade();
        facade
            .save_message(json!({"name": "Li Lei", "subject": "Q1", "message": "first"}))
            .unwrap();
        facade
            .save_message(json!({"studentName": "Han", "content": "second"}))
            .unwrap();

        let messages = facade.get_messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "second");
        assert_eq!(messages[1].student_name, "Li Lei");
        assert_eq!(messages[1].title, "Q1");
        assert_eq!(messages[1].status(), MessageStatus::Pending);
    }

    #[test]
    fn invalid_record_is_rejected() {
        let (facade, _) = facade();
        let err = facade.save_message(json!({"name": "Li Lei"})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = facade.save_message(json!("just text")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(facade.get_messages().is_empty());
    }

    #[test]
    fn clear_reports_success_and_failure() {
        let (facade, switch) = facade();
        facade.save_message(json!({"content": "x"})).unwrap();

        switch.fail_writes(true);
        assert!(!facade.clear_messages());
        assert_eq!(facade.get_messages().len(), 1);

        switch.fail_writes(false);
        assert!(facade.clear_messages());
        assert!(facade.get_messages().is_empty());
        assert!(facade.refresh_from_storage());
        assert!(facade.get_messages().is_empty());
    }

    #[test]
    fn id_and_time_come_from_the_stamper() {
        let (facade, _) = facade();
        assert_eq!(facade.get_current_time(), "2024-03-01 09:30:00");
        assert_ne!(facade.generate_id(), facade.generate_id());
    }
}
