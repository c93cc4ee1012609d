//! In-process object store used for tests and ephemeral warehouses.
//!
//! Objects are keyed by their `/`-separated relative path. Cloning a
//! [`MemoryStore`] shares the underlying map, so several catalogs or table
//! handles can observe (and race on) the same objects.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;

use crate::storage::error::BackendError;

/// Shared in-memory object map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    objects: Arc<RwLock<BTreeMap<String, Bytes>>>,
}

impl MemoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<String, Bytes>>, BackendError> {
        self.objects
            .read()
            .map_err(|_| BackendError::Memory("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<String, Bytes>>, BackendError> {
        self.objects
            .write()
            .map_err(|_| BackendError::Memory("lock poisoned".to_string()))
    }

    pub(crate) fn get(&self, key: &str) -> Result<Option<Bytes>, BackendError> {
        Ok(self.read()?.get(key).cloned())
    }

    pub(crate) fn put(&self, key: &str, data: Bytes) -> Result<(), BackendError> {
        self.write()?.insert(key.to_string(), data);
        Ok(())
    }

    /// Insert only when `key` is absent. Returns `false` if the key already exists.
    pub(crate) fn put_if_absent(&self, key: &str, data: Bytes) -> Result<bool, BackendError> {
        let mut objects = self.write()?;
        if objects.contains_key(key) {
            return Ok(false);
        }
        objects.insert(key.to_string(), data);
        Ok(true)
    }

    pub(crate) fn list(&self, prefix: &str) -> Result<Vec<String>, BackendError> {
        Ok(self
            .read()?
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    pub(crate) fn remove_prefix(&self, prefix: &str) -> Result<usize, BackendError> {
        let mut objects = self.write()?;
        let doomed: Vec<String> = objects
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            objects.remove(key);
        }
        Ok(doomed.len())
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.read().map(|o| o.len()).unwrap_or(0)
    }

    /// Returns true if the store holds no objects.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
