use crate::backend::{StorageBackend, StoreError, StoreResult};
use crate::memory::{MemoryState, MemoryStorage};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

const STATE_FILE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    version: u32,
    #[serde(default)]
    entries: MemoryState,
}

/// JSON-file backed storage tier. Every write rewrites the whole file through a
/// temp file + rename so a crash never leaves a torn record behind.
#[derive(Clone, Debug)]
pub struct FsStorage {
    state_file: PathBuf,
    inner: MemoryStorage,
}

impl FsStorage {
    /// Opens (or creates) `<root>/waypost-<scope>.json`.
    pub fn new<P: AsRef<Path>>(root: P, scope: &str) -> StoreResult<Self> {
        fs::create_dir_all(root.as_ref())
            .map_err(|err| StoreError::Backend(format!("create storage root failed: {err}")))?;
        let state_file = root.as_ref().join(format!("waypost-{scope}.json"));
        let state = if state_file.exists() {
            let raw = fs::read(&state_file)
                .map_err(|err| StoreError::Backend(format!("read state file failed: {err}")))?;
            let file = serde_json::from_slice::<StateFile>(&raw)
                .map_err(|err| StoreError::Serialization(err.to_string()))?;
            if file.version != STATE_FILE_VERSION {
                return Err(StoreError::Serialization(format!(
                    "unsupported state file version {}",
                    file.version
                )));
            }
            file.entries
        } else {
            MemoryState::default()
        };

        Ok(Self {
            state_file,
            inner: MemoryStorage::from_state(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.state_file
    }

    fn persist(&self) -> StoreResult<()> {
        let file = StateFile {
            version: STATE_FILE_VERSION,
            entries: self.inner.snapshot()?,
        };
        let raw = serde_json::to_vec_pretty(&file)
            .map_err(|err| StoreError::Serialization(err.to_string()))?;
        let tmp = self.state_file.with_extension("json.tmp");
        fs::write(&tmp, raw)
            .map_err(|err| StoreError::Backend(format!("write state file failed: {err}")))?;
        fs::rename(&tmp, &self.state_file)
            .map_err(|err| StoreError::Backend(format!("rename state file failed: {err}")))?;
        Ok(())
    }
}

impl StorageBackend for FsStorage {
    fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: Value) -> StoreResult<()> {
        self.inner.set(key, value)?;
        self.persist()
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        self.inner.remove(key)?;
        self.persist()
    }

    fn clear(&self) -> StoreResult<()> {
        self.inner.clear()?;
        self.persist()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fs_storage_reopen_restores_previous_values() {
        let tmp = tempfile::tempdir().expect("tempdir should be created");
        let storage = FsStorage::new(tmp.path(), "durable").expect("fs storage should open");
        storage
            .set("waypost_session_first", json!({"identity_id": "42"}))
            .expect("set should succeed");
        drop(storage);

        let reopened = FsStorage::new(tmp.path(), "durable").expect("fs storage should reopen");
        assert_eq!(
            reopened
                .get("waypost_session_first")
                .expect("get should succeed"),
            Some(json!({"identity_id": "42"}))
        );
    }

    #[test]
    fn fs_storage_scopes_use_separate_files() {
        let tmp = tempfile::tempdir().expect("tempdir should be created");
        let durable = FsStorage::new(tmp.path(), "durable").expect("durable should open");
        let ephemeral = FsStorage::new(tmp.path(), "ephemeral").expect("ephemeral should open");
        durable.set("k", json!(1)).expect("set should succeed");

        assert_ne!(durable.path(), ephemeral.path());
        assert_eq!(ephemeral.get("k").expect("get should succeed"), None);
    }

    #[test]
    fn fs_storage_corrupt_file_expected_serialization_error() {
        let tmp = tempfile::tempdir().expect("tempdir should be created");
        std::fs::write(tmp.path().join("waypost-durable.json"), b"not json")
            .expect("write should succeed");

        let error = FsStorage::new(tmp.path(), "durable").expect_err("open should fail");
        assert!(matches!(error, StoreError::Serialization(_)));
    }

    #[test]
    fn fs_storage_unknown_version_expected_serialization_error() {
        let tmp = tempfile::tempdir().expect("tempdir should be created");
        std::fs::write(
            tmp.path().join("waypost-durable.json"),
            br#"{"version": 9, "entries": {}}"#,
        )
        .expect("write should succeed");

        let error = FsStorage::new(tmp.path(), "durable").expect_err("open should fail");
        assert!(matches!(error, StoreError::Serialization(message) if message.contains("version 9")));
    }
}
