//! Primary -> backup -> memory persistence chain.
//!
//! Saves run as a guarded two-step write: the current primary is copied into the
//! backup slot before the primary is overwritten. A crash mid-save therefore leaves
//! the backup exactly one committed generation behind, which is what a later load
//! falls back to.

use chrono::{DateTime, Local};
use serde_json::Value;

use super::backend::KeyValueStore;
use super::probe;
use crate::clock::Stamper;
use crate::common::{Message, Provenance};
use crate::config::{SeedConfig, StorageKeys};
use crate::error::{BackendError, BoardError, BoardResult};
use crate::normalize::normalize_all;

const TRANSACTION_MARK: &str = "in_progress";

/// Result of a load: the normalized collection plus the tier it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOutcome {
    pub messages: Vec<Message>,
    pub provenance: Provenance,
}

/// Snapshot of the store's health for status reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreStatus {
    pub storage_available: bool,
    pub last_provenance: Option<Provenance>,
    pub last_sync: Option<DateTime<Local>>,
}

pub struct LayeredStore<B> {
    backend: B,
    keys: StorageKeys,
    seed: SeedConfig,
    available: bool,
    /// Last committed collection; the only tier left when the backend is unusable.
    memory: Option<Vec<Message>>,
    last_provenance: Option<Provenance>,
    last_sync: Option<DateTime<Local>>,
}

impl<B: KeyValueStore> LayeredStore<B> {
    pub fn new(mut backend: B, keys: StorageKeys, seed: SeedConfig) -> Self {
        let available = probe::is_available(&mut backend);
        Self {
            backend,
            keys,
            seed,
            available,
            memory: None,
            last_provenance: None,
            last_sync: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Re-runs the availability probe, logging only when the answer changes.
    pub fn recheck(&mut self) -> bool {
        let now = probe::is_available(&mut self.backend);
        if now != self.available {
            log::info!(
                "Durable storage is now {}",
                if now { "available" } else { "unavailable" }
            );
            self.available = now;
        }
        now
    }

    pub fn status(&self) -> StoreStatus {
        StoreStatus {
            storage_available: self.available,
            last_provenance: self.last_provenance,
            last_sync: self.last_sync,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Loads the collection from the first tier holding a well-formed array.
    pub fn load(&mut self, stamper: &dyn Stamper) -> LoadOutcome {
        if !self.available {
            let outcome = match self.memory.clone() {
                Some(messages) => LoadOutcome {
                    messages,
                    provenance: Provenance::Memory,
                },
                None => {
                    let messages = self.baseline(stamper, true);
                    self.memory = Some(messages.clone());
                    LoadOutcome {
                        messages,
                        provenance: Provenance::Default,
                    }
                }
            };
            return self.finish_load(outcome);
        }

        self.clear_stale_transaction();

        // An empty primary only counts as "cleared on purpose" once the guard is set;
        // otherwise a populated backup wins.
        let guarded = self.seed_guard_set();
        let primary_key = self.keys.primary.clone();
        let backup_key = self.keys.backup.clone();
        let primary = self
            .read_array(&primary_key)
            .filter(|entries| guarded || !entries.is_empty());
        let outcome = if let Some(entries) = primary {
            log::info!("Loaded {} records from primary storage", entries.len());
            LoadOutcome {
                messages: normalize_all(&entries, stamper),
                provenance: Provenance::Primary,
            }
        } else if let Some(entries) = self
            .read_array(&backup_key)
            .filter(|entries| !entries.is_empty())
        {
            log::warn!(
                "Primary storage empty or corrupt; loaded {} records from backup",
                entries.len()
            );
            LoadOutcome {
                messages: normalize_all(&entries, stamper),
                provenance: Provenance::Backup,
            }
        } else {
            let messages = self.baseline(stamper, !guarded);
            log::info!("No stored messages; starting from a baseline of {}", messages.len());
            if let Err(err) = self.save(&messages) {
                log::error!("Failed to persist baseline collection: {err}");
            }
            self.mark_seed_guard();
            LoadOutcome {
                messages,
                provenance: Provenance::Default,
            }
        };

        self.memory = Some(outcome.messages.clone());
        self.finish_load(outcome)
    }

    /// Commits `messages` as the new current generation.
    ///
    /// On error nothing is retried beyond a single space-freeing attempt; callers
    /// roll back their own in-memory change.
    pub fn save(&mut self, messages: &[Message]) -> BoardResult<()> {
        let payload = serde_json::to_string(messages)?;

        if !self.available {
            self.memory = Some(messages.to_vec());
            self.last_sync = Some(Local::now());
            return Ok(());
        }

        let previous_backup = match self.backend.get_item(&self.keys.backup) {
            Ok(previous) => previous,
            Err(err) => {
                log::error!("Save failed before writing: {err}");
                return Err(BoardError::PersistenceFailure(err.to_string()));
            }
        };

        if let Err(first) = self.commit(&payload) {
            self.abort_transaction();
            let result = if self.backup_covers_shortfall(&first) {
                log::warn!("Save failed ({first}); dropping backup to free space and retrying");
                self.retry_without_backup(&payload)
            } else {
                Err(first)
            };
            if let Err(err) = result {
                self.abort_transaction();
                self.restore_backup(previous_backup.as_deref());
                log::error!("Save failed: {err}");
                return Err(BoardError::PersistenceFailure(err.to_string()));
            }
        }

        log::info!("Committed {} messages", messages.len());
        self.memory = Some(messages.to_vec());
        self.last_sync = Some(Local::now());
        Ok(())
    }

    /// Reads and normalizes the backup generation without adopting it.
    pub fn read_backup(&self, stamper: &dyn Stamper) -> BoardResult<Vec<Message>> {
        if !self.available {
            return Err(BoardError::StorageUnavailable(
                "no durable backup in memory-only mode".to_string(),
            ));
        }
        let stored = self
            .backend
            .get_item(&self.keys.backup)?
            .ok_or_else(|| BoardError::Serialization("no backup generation stored".to_string()))?;
        match serde_json::from_str::<Value>(&stored)? {
            Value::Array(entries) => Ok(normalize_all(&entries, stamper)),
            _ => Err(BoardError::Serialization(
                "backup is not a JSON array".to_string(),
            )),
        }
    }

    /// Records that the current (possibly empty) state is intentional.
    pub fn mark_seed_guard(&mut self) {
        if !self.available {
            return;
        }
        if let Err(err) = self.backend.set_item(&self.keys.seed_guard, "true") {
            log::warn!("Failed to record seed guard: {err}");
        }
    }

    pub fn seed_guard_set(&self) -> bool {
        matches!(self.backend.get_item(&self.keys.seed_guard), Ok(Some(_)))
    }

    /// Normalized seed records, or nothing when seeding is off.
    pub fn seed_messages(&self, stamper: &dyn Stamper) -> Vec<Message> {
        if self.seed.enabled {
            normalize_all(&self.seed.messages, stamper)
        } else {
            Vec::new()
        }
    }

    fn baseline(&self, stamper: &dyn Stamper, seed_allowed: bool) -> Vec<Message> {
        if seed_allowed {
            self.seed_messages(stamper)
        } else {
            Vec::new()
        }
    }

    fn finish_load(&mut self, outcome: LoadOutcome) -> LoadOutcome {
        self.last_provenance = Some(outcome.provenance);
        self.last_sync = Some(Local::now());
        outcome
    }

    fn read_array(&self, key: &str) -> Option<Vec<Value>> {
        let stored = match self.backend.get_item(key) {
            Ok(Some(stored)) => stored,
            Ok(None) => return None,
            Err(err) => {
                log::error!("Failed to read `{key}`: {err}");
                return None;
            }
        };
        match serde_json::from_str::<Value>(&stored) {
            Ok(Value::Array(entries)) => Some(entries),
            Ok(_) => {
                log::error!("Stored `{key}` is not a JSON array");
                None
            }
            Err(err) => {
                log::error!("Failed to parse `{key}`: {err}");
                None
            }
        }
    }

    fn clear_stale_transaction(&mut self) {
        if let Ok(Some(_)) = self.backend.get_item(&self.keys.transaction) {
            log::warn!("Found an interrupted save; falling back through the tier chain");
            self.abort_transaction();
        }
    }

    fn commit(&mut self, payload: &str) -> Result<(), BackendError> {
        let keys = &self.keys;
        self.backend.set_item(&keys.transaction, TRANSACTION_MARK)?;
        if let Some(current) = self.backend.get_item(&keys.primary)? {
            self.backend.set_item(&keys.backup, &current)?;
        }
        self.backend.set_item(&keys.primary, payload)?;
        self.backend.remove_item(&keys.transaction)?;
        Ok(())
    }

    /// Only a quota failure the backup slot is big enough to absorb is worth a retry.
    fn backup_covers_shortfall(&self, err: &BackendError) -> bool {
        let BackendError::QuotaExceeded { needed, limit } = err else {
            return false;
        };
        let backup_bytes = match self.backend.get_item(&self.keys.backup) {
            Ok(Some(stored)) => self.keys.backup.len() + stored.len(),
            _ => return false,
        };
        needed.saturating_sub(*limit) <= backup_bytes
    }

    /// Puts the backup slot back the way it was before a failed save.
    fn restore_backup(&mut self, previous: Option<&str>) {
        let key = &self.keys.backup;
        let restored = match previous {
            Some(value) => self.backend.set_item(key, value),
            None => self.backend.remove_item(key),
        };
        if let Err(err) = restored {
            log::error!("Failed to restore backup generation: {err}");
        }
    }

    fn retry_without_backup(&mut self, payload: &str) -> Result<(), BackendError> {
        let keys = &self.keys;
        self.backend.remove_item(&keys.backup)?;
        self.backend.set_item(&keys.transaction, TRANSACTION_MARK)?;
        self.backend.set_item(&keys.primary, payload)?;
        self.backend.remove_item(&keys.transaction)?;
        Ok(())
    }

    fn abort_transaction(&mut self) {
        if let Err(err) = self.backend.remove_item(&self.keys.transaction) {
            log::warn!("Failed to clear transaction guard: {err}");
        }
    }
}
