//! Message repository.
//!
//! Owns the canonical in-memory collection. Every mutation is applied in memory
//! first, then persisted; when the save fails the change is undone before the
//! error is returned, so callers never observe memory ahead of durable state.

use std::cmp::Ordering;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};
use tokio::sync::watch;

use crate::clock::{Stamper, SystemStamper, parse_timestamp};
use crate::common::{Message, MessageStatus, Provenance};
use crate::config::AppConfig;
use crate::error::{BoardError, BoardResult};
use crate::normalize::{
    UNASSIGNED_CLASS, UNKNOWN_STUDENT, UNKNOWN_STUDENT_ID, UNTITLED, normalize_message,
    normalize_reply, text,
};
use crate::storage::{KeyValueStore, LayeredStore, MessageUpdate, RawMessage, RawReply};

pub type SharedRepository<B> = Arc<Mutex<MessageRepository<B>>>;

/// Counts reported by `clear`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearReport {
    pub before: usize,
    pub after: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoardStatus {
    pub initialized: bool,
    pub storage_available: bool,
    pub message_count: usize,
    pub last_sync: Option<DateTime<Local>>,
    pub provenance: Option<Provenance>,
}

pub struct MessageRepository<B> {
    store: LayeredStore<B>,
    messages: Vec<Message>,
    stamper: Box<dyn Stamper>,
    initialized: bool,
    /// Bumped after every committed change or reload.
    revision: watch::Sender<u64>,
}

impl<B: KeyValueStore> MessageRepository<B> {
    /// Builds the layered store over `backend` and loads the collection.
    pub fn open(backend: B, config: &AppConfig) -> Self {
        let store = LayeredStore::new(backend, config.keys.clone(), config.seed.clone());
        Self::with_stamper(store, Box::new(SystemStamper))
    }

    pub fn with_stamper(store: LayeredStore<B>, stamper: Box<dyn Stamper>) -> Self {
        let mut repo = Self {
            store,
            messages: Vec::new(),
            stamper,
            initialized: false,
            revision: watch::Sender::new(0),
        };
        repo.refresh();
        repo.initialized = true;
        repo
    }

    pub fn into_shared(self) -> SharedRepository<B> {
        Arc::new(Mutex::new(self))
    }

    pub fn stamper(&self) -> &dyn Stamper {
        self.stamper.as_ref()
    }

    pub fn store(&self) -> &LayeredStore<B> {
        &self.store
    }

    /// Change feed for views that redraw when the board changes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Copies of the collection, optionally filtered by status and time-sorted.
    pub fn list(&self, filter: Option<MessageStatus>, sort_by_time: bool) -> Vec<Message> {
        let mut messages: Vec<Message> = self
            .messages
            .iter()
            .filter(|message| filter.is_none_or(|status| message.status() == status))
            .cloned()
            .collect();
        if sort_by_time {
            messages.sort_by(newest_first);
        }
        messages
    }

    pub fn find(&self, id: &str) -> Option<Message> {
        self.messages.iter().find(|message| message.id == id).cloned()
    }

    pub fn count(&self) -> usize {
        self.messages.len()
    }

    pub fn add(&mut self, data: RawMessage) -> BoardResult<Message> {
        let data = RawMessage {
            id: None,
            replies: None,
            ..data
        };
        let mut message = normalize_message(&data, self.stamper.as_ref())?;
        while self.index_of(&message.id).is_some() {
            message.id = self.stamper.next_id();
        }

        self.messages.insert(0, message.clone());
        self.persist(|messages| {
            messages.remove(0);
        })?;

        log::info!("Added message {}", message.id);
        self.notify();
        Ok(message)
    }

    /// Applies allow-listed field edits to one message.
    pub fn update(&mut self, id: &str, fields: MessageUpdate) -> BoardResult<Message> {
        if fields.is_empty() {
            return Err(BoardError::Validation("no updatable fields given".to_string()));
        }
        let index = self.require(id)?;
        let original = self.messages[index].clone();
        let updated = apply_update(original.clone(), &fields)?;

        self.messages[index] = updated.clone();
        self.persist(move |messages| messages[index] = original)?;

        log::info!("Updated message {id}");
        self.notify();
        Ok(updated)
    }

    /// Appends a reply and marks the message answered, as one change.
    pub fn add_reply(&mut self, id: &str, reply: RawReply) -> BoardResult<Message> {
        let index = self.require(id)?;
        let reply = RawReply { id: None, ..reply };
        let reply = normalize_reply(&reply, self.stamper.as_ref())?;
        let original = self.messages[index].clone();

        self.messages[index].push_reply(reply);
        self.persist(move |messages| messages[index] = original)?;

        log::info!("Added reply to message {id}");
        self.notify();
        Ok(self.messages[index].clone())
    }

    pub fn delete(&mut self, id: &str) -> BoardResult<Message> {
        let index = self.require(id)?;
        let removed = self.messages.remove(index);
        let restore = removed.clone();

        self.persist(move |messages| messages.insert(index, restore))?;

        log::info!("Deleted message {id}");
        self.notify();
        Ok(removed)
    }

    /// Empties the board, or resets it to the seed records, and sets the seed guard.
    pub fn clear(&mut self, keep_seed: bool) -> BoardResult<ClearReport> {
        let before = self.messages.len();
        let replacement = if keep_seed {
            self.store.seed_messages(self.stamper.as_ref())
        } else {
            Vec::new()
        };
        let previous = std::mem::replace(&mut self.messages, replacement);

        self.persist(move |messages| *messages = previous)?;
        self.store.mark_seed_guard();

        let after = self.messages.len();
        log::info!("Cleared board: {before} -> {after} messages");
        self.notify();
        Ok(ClearReport { before, after })
    }

    /// Re-commits the current collection so backup and primary both hold it.
    pub fn backup(&mut self) -> BoardResult<()> {
        self.store.save(&self.messages)
    }

    /// Replaces the collection with whatever the storage tiers hold now.
    ///
    /// A memory-only store re-probes the backend first.
    pub fn refresh(&mut self) -> Provenance {
        if !self.store.is_available() {
            self.recheck_storage();
        }
        let outcome = self.store.load(self.stamper.as_ref());
        self.messages = outcome.messages;
        self.notify();
        outcome.provenance
    }

    /// Adopts the backup generation as current.
    pub fn restore_from_backup(&mut self) -> BoardResult<usize> {
        let restored = self.store.read_backup(self.stamper.as_ref())?;
        let count = restored.len();
        let previous = std::mem::replace(&mut self.messages, restored);
        self.persist(move |messages| *messages = previous)?;
        log::info!("Restored {count} messages from backup");
        self.notify();
        Ok(count)
    }

    /// Re-probes the backend. On recovery the in-memory collection is written through
    /// so nothing added while memory-only is lost.
    pub fn recheck_storage(&mut self) -> bool {
        let was_available = self.store.is_available();
        let available = self.store.recheck();
        if available && !was_available && self.initialized {
            if let Err(err) = self.store.save(&self.messages) {
                log::error!("Failed to flush memory-only messages after recovery: {err}");
            }
        }
        available
    }

    pub fn status(&self) -> BoardStatus {
        let store = self.store.status();
        BoardStatus {
            initialized: self.initialized,
            storage_available: store.storage_available,
            message_count: self.messages.len(),
            last_sync: store.last_sync,
            provenance: store.last_provenance,
        }
    }

    fn notify(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }

    fn index_of(&self, id: &str) -> Option<usize> {
        self.messages.iter().position(|message| message.id == id)
    }

    fn require(&self, id: &str) -> BoardResult<usize> {
        let id = id.trim();
        if id.is_empty() {
            return Err(BoardError::Validation("message id is empty".to_string()));
        }
        self.index_of(id)
            .ok_or_else(|| BoardError::NotFound(id.to_string()))
    }

    /// Saves the collection; on failure runs `undo` so memory matches storage again.
    fn persist<F>(&mut self, undo: F) -> BoardResult<()>
    where
        F: FnOnce(&mut Vec<Message>),
    {
        if let Err(err) = self.store.save(&self.messages) {
            undo(&mut self.messages);
            log::error!("Rolled back in-memory change: {err}");
            return Err(err);
        }
        Ok(())
    }
}

fn apply_update(mut message: Message, fields: &MessageUpdate) -> BoardResult<Message> {
    if let Some(value) = &fields.content {
        message.content = text(Some(value))
            .ok_or_else(|| BoardError::Validation("content cannot be empty".to_string()))?;
    }
    if let Some(value) = &fields.timestamp {
        message.timestamp = text(Some(value))
            .ok_or_else(|| BoardError::Validation("timestamp cannot be empty".to_string()))?;
    }
    if let Some(value) = &fields.title {
        message.title = text(Some(value)).unwrap_or_else(|| UNTITLED.to_string());
    }
    if let Some(value) = &fields.student_name {
        message.student_name = text(Some(value)).unwrap_or_else(|| UNKNOWN_STUDENT.to_string());
    }
    if let Some(value) = &fields.student_id {
        message.student_id = text(Some(value)).unwrap_or_else(|| UNKNOWN_STUDENT_ID.to_string());
    }
    if let Some(value) = &fields.class_name {
        message.class_name = text(Some(value)).unwrap_or_else(|| UNASSIGNED_CLASS.to_string());
    }
    if let Some(value) = &fields.status {
        let requested = text(Some(value))
            .as_deref()
            .and_then(MessageStatus::parse)
            .ok_or_else(|| BoardError::Validation(format!("unknown status {value}")))?;
        if requested != message.status() {
            return Err(BoardError::Validation(format!(
                "status must stay {} while the message has {} replies",
                message.status(),
                message.replies().len()
            )));
        }
    }
    Ok(message)
}

/// Newest first; unparsable timestamps after every parsable one.
fn newest_first(a: &Message, b: &Message) -> Ordering {
    match (parse_timestamp(&a.timestamp), parse_timestamp(&b.timestamp)) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
