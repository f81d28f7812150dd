use async_trait::async_trait;
use quiz_core::model::SessionKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Device-local key-value persistence.
///
/// Holds the per-session deadline and the already-submitted marker. Values are
/// opaque strings; callers own the encoding.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Insert or overwrite a value.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the value cannot be stored.
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete a value. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be written.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Store `value` only if `key` is unset, atomically.
    ///
    /// Returns whichever value is stored after the call: `value` if this call
    /// won, the earlier value otherwise.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read or written.
    async fn set_if_absent(&self, key: &str, value: &str) -> Result<String, StorageError>;
}

/// Simple in-memory store for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let guard = self
            .entries
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.remove(key);
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> Result<String, StorageError> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard
            .entry(key.to_owned())
            .or_insert_with(|| value.to_owned())
            .clone())
    }
}

/// Wraps the key-value backend behind a trait object for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub state: Arc<dyn KeyValueStore>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let state: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::new());
        Self { state }
    }

    /// Drop both the deadline and the submitted marker for a session.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if either key cannot be removed.
    pub async fn clear_session(&self, key: &SessionKey) -> Result<(), StorageError> {
        self.state.remove(&key.deadline_key()).await?;
        self.state.remove(&key.submitted_key()).await?;
        tracing::debug!(session = %key, "cleared persisted session state");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiz_core::model::{TestCode, UserId};

    #[tokio::test]
    async fn set_get_remove() {
        let store = InMemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);

        store.set("k", "1").await.unwrap();
        store.set("k", "2").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("2"));

        store.remove("k").await.unwrap();
        store.remove("k").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn set_if_absent_keeps_first_writer() {
        let store = InMemoryStore::new();
        assert_eq!(store.set_if_absent("d", "100").await.unwrap(), "100");
        assert_eq!(store.set_if_absent("d", "50").await.unwrap(), "100");
        assert_eq!(store.get("d").await.unwrap().as_deref(), Some("100"));
    }

    #[tokio::test]
    async fn clear_session_removes_both_keys() {
        let storage = Storage::in_memory();
        let key = SessionKey::new(TestCode::new("T").unwrap(), Some(UserId::new(1)));
        storage.state.set(&key.deadline_key(), "1").await.unwrap();
        storage.state.set(&key.submitted_key(), "{}").await.unwrap();
        storage.state.set("unrelated", "x").await.unwrap();

        storage.clear_session(&key).await.unwrap();

        assert_eq!(storage.state.get(&key.deadline_key()).await.unwrap(), None);
        assert_eq!(storage.state.get(&key.submitted_key()).await.unwrap(), None);
        assert!(storage.state.get("unrelated").await.unwrap().is_some());
    }
}
