use std::collections::BTreeMap;
use std::sync::Mutex;

use thiserror::Error;

/// Failure reported by a [`ConfigStore`] backend.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct StoreError(pub String);

/// Persistence boundary for settings: `(transformer id, param) -> string`.
///
/// `put` is an idempotent upsert.
pub trait ConfigStore: Send + Sync {
    fn get(&self, transformer_id: &str, param: &str) -> Result<Option<String>, StoreError>;
    fn put(&self, transformer_id: &str, param: &str, value: &str) -> Result<(), StoreError>;
}

/// In-memory store used by tests and throwaway sessions.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    values: Mutex<BTreeMap<(String, String), String>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ConfigStore for MemoryConfigStore {
    fn get(&self, transformer_id: &str, param: &str) -> Result<Option<String>, StoreError> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        Ok(values.get(&(transformer_id.to_string(), param.to_string())).cloned())
    }

    fn put(&self, transformer_id: &str, param: &str, value: &str) -> Result<(), StoreError> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.insert((transformer_id.to_string(), param.to_string()), value.to_string());
        Ok(())
    }
}
