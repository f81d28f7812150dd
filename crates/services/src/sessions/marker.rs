use quiz_core::model::{SessionKey, StoredResult};
use storage::repository::{KeyValueStore, StorageError};

/// Read the already-submitted marker for a session.
pub(crate) async fn read(
    store: &dyn KeyValueStore,
    key: &SessionKey,
) -> Result<Option<StoredResult>, StorageError> {
    let Some(raw) = store.get(&key.submitted_key()).await? else {
        return Ok(None);
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|err| StorageError::Serialization(err.to_string()))
}

/// Persist the already-submitted marker for a session.
pub(crate) async fn write(
    store: &dyn KeyValueStore,
    key: &SessionKey,
    result: &StoredResult,
) -> Result<(), StorageError> {
    let raw =
        serde_json::to_string(result).map_err(|err| StorageError::Serialization(err.to_string()))?;
    store.set(&key.submitted_key(), &raw).await
}
