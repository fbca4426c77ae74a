use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use thiserror::Error;

/// Errors produced by secure storage implementations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SecureStoreError {
    /// Backend cannot be reached or refused access.
    #[error("secure store unavailable: {reason}")]
    Unavailable { reason: String },
    /// Underlying read/write failure or a corrupt record.
    #[error("storage failure: {reason}")]
    Storage { reason: String },
}

/// Durable label -> bytes persistence consumed by the key generator.
///
/// Implementations must make `put_if_absent` atomic with respect to other
/// callers of the same store; that conditional write is what keeps two
/// racing generators from persisting different keys under one label.
pub trait SecureStore: Send + Sync {
    /// Read the bytes stored under `label`, `None` when the label is unknown.
    fn get(&self, label: &str) -> Result<Option<Vec<u8>>, SecureStoreError>;

    /// Persist bytes under `label`, overwriting any existing entry.
    fn put(&self, label: &str, value: &[u8]) -> Result<(), SecureStoreError>;

    /// Persist bytes under `label` only if nothing is stored there yet.
    ///
    /// Returns whatever is stored after the call: `value` when this caller
    /// won, the pre-existing bytes otherwise.
    fn put_if_absent(&self, label: &str, value: &[u8]) -> Result<Vec<u8>, SecureStoreError>;

    /// Remove a label and its value (idempotent).
    fn delete(&self, label: &str) -> Result<(), SecureStoreError>;

    /// Remove every entry owned by this store (idempotent).
    fn remove_all(&self) -> Result<(), SecureStoreError>;
}

impl<S: SecureStore + ?Sized> SecureStore for Arc<S> {
    fn get(&self, label: &str) -> Result<Option<Vec<u8>>, SecureStoreError> {
        (**self).get(label)
    }

    fn put(&self, label: &str, value: &[u8]) -> Result<(), SecureStoreError> {
        (**self).put(label, value)
    }

    fn put_if_absent(&self, label: &str, value: &[u8]) -> Result<Vec<u8>, SecureStoreError> {
        (**self).put_if_absent(label, value)
    }

    fn delete(&self, label: &str) -> Result<(), SecureStoreError> {
        (**self).delete(label)
    }

    fn remove_all(&self) -> Result<(), SecureStoreError> {
        (**self).remove_all()
    }
}

/// Process-local store for tests and ephemeral sessions.
/// Clones share the same underlying map.
#[derive(Debug, Default, Clone)]
pub struct InMemorySecureStore {
    inner: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl InMemorySecureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> Result<usize, SecureStoreError> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, SecureStoreError> {
        Ok(self.lock()?.is_empty())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>, SecureStoreError> {
        self.inner.lock().map_err(|err| SecureStoreError::Storage {
            reason: format!("lock poisoned: {err}"),
        })
    }
}

impl SecureStore for InMemorySecureStore {
    fn get(&self, label: &str) -> Result<Option<Vec<u8>>, SecureStoreError> {
        Ok(self.lock()?.get(label).cloned())
    }

    fn put(&self, label: &str, value: &[u8]) -> Result<(), SecureStoreError> {
        self.lock()?.insert(label.to_string(), value.to_vec());
        Ok(())
    }

    fn put_if_absent(&self, label: &str, value: &[u8]) -> Result<Vec<u8>, SecureStoreError> {
        let mut map = self.lock()?;
        Ok(map
            .entry(label.to_string())
            .or_insert_with(|| value.to_vec())
            .clone())
    }

    fn delete(&self, label: &str) -> Result<(), SecureStoreError> {
        self.lock()?.remove(label);
        Ok(())
    }

    fn remove_all(&self) -> Result<(), SecureStoreError> {
        self.lock()?.clear();
        Ok(())
    }
}
