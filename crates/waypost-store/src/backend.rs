use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("backend failure: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Key/value contract for one persistence tier.
///
/// The session layer never assumes a medium: a backend may be process memory,
/// a file, or a host-provided cookie/local-storage bridge.
pub trait StorageBackend: Send + Sync {
    fn get(&self, key: &str) -> StoreResult<Option<Value>>;

    fn set(&self, key: &str, value: Value) -> StoreResult<()>;

    fn remove(&self, key: &str) -> StoreResult<()>;

    fn clear(&self) -> StoreResult<()>;
}

impl<T> StorageBackend for Arc<T>
where
    T: StorageBackend + ?Sized,
{
    fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: Value) -> StoreResult<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        (**self).remove(key)
    }

    fn clear(&self) -> StoreResult<()> {
        (**self).clear()
    }
}
