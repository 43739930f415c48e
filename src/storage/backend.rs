use std::collections::HashMap;

use crate::error::BackendError;

/// Origin-scoped string key-value store, shaped like browser `localStorage`.
///
/// Every call can fail: quota, disabled storage, I/O.
pub trait KeyValueStore: Send {
    fn get_item(&self, key: &str) -> Result<Option<String>, BackendError>;
    fn set_item(&mut self, key: &str, value: &str) -> Result<(), BackendError>;
    fn remove_item(&mut self, key: &str) -> Result<(), BackendError>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Box<T> {
    fn get_item(&self, key: &str) -> Result<Option<String>, BackendError> {
        (**self).get_item(key)
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<(), BackendError> {
        (**self).set_item(key, value)
    }

    fn remove_item(&mut self, key: &str) -> Result<(), BackendError> {
        (**self).remove_item(key)
    }
}

/// Process-local store with an optional byte quota (keys plus values).
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    items: HashMap<String, String>,
    quota_bytes: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            items: HashMap::new(),
            quota_bytes: Some(quota_bytes),
        }
    }

    pub fn used_bytes(&self) -> usize {
        self.items.iter().map(|(k, v)| k.len() + v.len()).sum()
    }
}

impl KeyValueStore for MemoryStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, BackendError> {
        Ok(self.items.get(key).cloned())
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<(), BackendError> {
        if let Some(limit) = self.quota_bytes {
            let existing = self.items.get(key).map_or(0, |v| key.len() + v.len());
            let needed = self.used_bytes() - existing + key.len() + value.len();
            if needed > limit {
                return Err(BackendError::QuotaExceeded { needed, limit });
            }
        }
        self.items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&mut self, key: &str) -> Result<(), BackendError> {
        self.items.remove(key);
        Ok(())
    }
}
