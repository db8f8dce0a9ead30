//! Two-scope session record.
//!
//! The ephemeral scope lives as long as the host session (current session id,
//! link-click id, referring data). The durable scope survives across sessions
//! (fingerprint id, first-touch identity, first click id). Write paths take an
//! explicit [`WriteTarget`] so no caller ever guesses which tier it touches.

use crate::backend::{StorageBackend, StoreError, StoreResult};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, MutexGuard};

pub type SessionRecord = Map<String, Value>;

pub const SESSION_KEY: &str = "waypost_session";
pub const FIRST_SESSION_KEY: &str = "waypost_session_first";
pub const CLICK_ID_KEY: &str = "click_id";
pub const CALLBACK_CHANNEL_KEY: &str = "use_callback_channel";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    Ephemeral,
    Durable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteTarget {
    Ephemeral,
    EphemeralAndDurable,
}

impl WriteTarget {
    pub fn from_durable(also_durable: bool) -> Self {
        if also_durable {
            Self::EphemeralAndDurable
        } else {
            Self::Ephemeral
        }
    }

    fn includes_durable(self) -> bool {
        matches!(self, Self::EphemeralAndDurable)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NullFields {
    Keep,
    Remove,
}

#[derive(Clone)]
pub struct SessionStore {
    ephemeral: Arc<dyn StorageBackend>,
    durable: Arc<dyn StorageBackend>,
    writes: Arc<Mutex<()>>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore").finish_non_exhaustive()
    }
}

impl SessionStore {
    pub fn new(ephemeral: Arc<dyn StorageBackend>, durable: Arc<dyn StorageBackend>) -> Self {
        Self {
            ephemeral,
            durable,
            writes: Arc::new(Mutex::new(())),
        }
    }

    /// Convenience constructor over two fresh in-memory tiers.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(crate::MemoryStorage::new()),
            Arc::new(crate::MemoryStorage::new()),
        )
    }

    /// Reads the record of one scope; an absent record reads as empty.
    pub fn get(&self, scope: Scope) -> StoreResult<SessionRecord> {
        let (backend, key) = self.tier(scope);
        match backend.get(key)? {
            None | Some(Value::Null) => Ok(SessionRecord::new()),
            Some(Value::Object(record)) => Ok(record),
            Some(Value::String(raw)) if raw.trim().is_empty() => Ok(SessionRecord::new()),
            Some(Value::String(raw)) => match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Object(record)) => Ok(record),
                Ok(_) => Ok(SessionRecord::new()),
                Err(err) => Err(StoreError::Serialization(format!(
                    "stored {key} is not a JSON object: {err}"
                ))),
            },
            Some(other) => Err(StoreError::Serialization(format!(
                "stored {key} has unexpected shape: {other}"
            ))),
        }
    }

    /// Replaces the ephemeral record and, when targeted, the durable one.
    pub fn set(&self, record: SessionRecord, target: WriteTarget) -> StoreResult<()> {
        let _guard = self.lock_writes()?;
        if target.includes_durable() {
            self.durable
                .set(FIRST_SESSION_KEY, Value::Object(record.clone()))?;
        }
        self.ephemeral.set(SESSION_KEY, Value::Object(record))
    }

    /// Shallow-merges `partial` into the ephemeral record.
    pub fn update(&self, partial: SessionRecord) -> StoreResult<()> {
        let _guard = self.lock_writes()?;
        let current = self.get(Scope::Ephemeral)?;
        let merged = merge_record(current, &partial, NullFields::Keep);
        self.ephemeral.set(SESSION_KEY, Value::Object(merged))
    }

    /// Merges `partial` into the ephemeral record and, when targeted, the durable one.
    ///
    /// With [`NullFields::Remove`] a null in `partial` deletes the key instead of
    /// storing an explicit null.
    pub fn patch(
        &self,
        partial: SessionRecord,
        target: WriteTarget,
        nulls: NullFields,
    ) -> StoreResult<()> {
        let _guard = self.lock_writes()?;
        let ephemeral = merge_record(self.get(Scope::Ephemeral)?, &partial, nulls);
        if target.includes_durable() {
            let durable = merge_record(self.get(Scope::Durable)?, &partial, nulls);
            self.durable.set(FIRST_SESSION_KEY, Value::Object(durable))?;
        }
        self.ephemeral.set(SESSION_KEY, Value::Object(ephemeral))
    }

    /// Empties both records together. Transport flags survive a reset.
    pub fn reset(&self) -> StoreResult<()> {
        let _guard = self.lock_writes()?;
        self.ephemeral
            .set(SESSION_KEY, Value::Object(SessionRecord::new()))?;
        self.durable
            .set(FIRST_SESSION_KEY, Value::Object(SessionRecord::new()))?;
        self.ephemeral.remove(CLICK_ID_KEY)?;
        tracing::debug!("session store reset");
        Ok(())
    }

    pub fn flag(&self, key: &str) -> StoreResult<Option<Value>> {
        self.ephemeral.get(key)
    }

    pub fn set_flag(&self, key: &str, value: Value) -> StoreResult<()> {
        self.ephemeral.set(key, value)
    }

    pub fn remove_flag(&self, key: &str) -> StoreResult<()> {
        self.ephemeral.remove(key)
    }

    /// Transport channel switch. Anything other than a stored `true` means direct.
    pub fn use_callback_channel(&self) -> bool {
        matches!(self.flag(CALLBACK_CHANNEL_KEY), Ok(Some(Value::Bool(true))))
    }

    pub fn set_use_callback_channel(&self, enabled: bool) -> StoreResult<()> {
        self.set_flag(CALLBACK_CHANNEL_KEY, Value::Bool(enabled))
    }

    fn tier(&self, scope: Scope) -> (&dyn StorageBackend, &'static str) {
        match scope {
            Scope::Ephemeral => (self.ephemeral.as_ref(), SESSION_KEY),
            Scope::Durable => (self.durable.as_ref(), FIRST_SESSION_KEY),
        }
    }

    fn lock_writes(&self) -> StoreResult<MutexGuard<'_, ()>> {
        self.writes
            .lock()
            .map_err(|_| StoreError::Backend("session write lock poisoned".to_string()))
    }
}

/// Shallow merge of `partial` over `base`.
pub fn merge_record(
    mut base: SessionRecord,
    partial: &SessionRecord,
    nulls: NullFields,
) -> SessionRecord {
    for (key, value) in partial {
        if value.is_null() && nulls == NullFields::Remove {
            base.remove(key);
        } else {
            base.insert(key.clone(), value.clone());
        }
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStorage;
    use serde_json::json;

    fn record(value: Value) -> SessionRecord {
        match value {
            Value::Object(map) => map,
            _ => panic!("record fixture must be an object"),
        }
    }

    #[test]
    fn get_absent_record_expected_empty() {
        let store = SessionStore::in_memory();
        assert!(store.get(Scope::Ephemeral).expect("get").is_empty());
        assert!(store.get(Scope::Durable).expect("get").is_empty());
    }

    #[test]
    fn get_string_encoded_record_expected_parsed() {
        let ephemeral = Arc::new(MemoryStorage::new());
        ephemeral
            .set(SESSION_KEY, json!("{\"session_id\":\"s1\"}"))
            .expect("set");
        let store = SessionStore::new(ephemeral, Arc::new(MemoryStorage::new()));

        let current = store.get(Scope::Ephemeral).expect("get");
        assert_eq!(current.get("session_id"), Some(&json!("s1")));
    }

    #[test]
    fn set_ephemeral_only_leaves_durable_untouched() {
        let store = SessionStore::in_memory();
        store
            .set(record(json!({"session_id": "s1"})), WriteTarget::Ephemeral)
            .expect("set");

        assert_eq!(
            store.get(Scope::Ephemeral).expect("get").get("session_id"),
            Some(&json!("s1"))
        );
        assert!(store.get(Scope::Durable).expect("get").is_empty());
    }

    #[test]
    fn patch_remove_nulls_deletes_keys_in_both_scopes() {
        let store = SessionStore::in_memory();
        store
            .set(
                record(json!({"identity": "alice", "session_id": "s1"})),
                WriteTarget::EphemeralAndDurable,
            )
            .expect("set");

        store
            .patch(
                record(json!({"identity": null, "session_id": "s2"})),
                WriteTarget::EphemeralAndDurable,
                NullFields::Remove,
            )
            .expect("patch");

        for scope in [Scope::Ephemeral, Scope::Durable] {
            let current = store.get(scope).expect("get");
            assert!(!current.contains_key("identity"));
            assert_eq!(current.get("session_id"), Some(&json!("s2")));
        }
    }

    #[test]
    fn update_keeps_explicit_nulls() {
        let store = SessionStore::in_memory();
        store
            .update(record(json!({"referring_link": null})))
            .expect("update");

        let current = store.get(Scope::Ephemeral).expect("get");
        assert_eq!(current.get("referring_link"), Some(&Value::Null));
    }

    #[test]
    fn reset_clears_records_but_keeps_channel_flag() {
        let store = SessionStore::in_memory();
        store.set_use_callback_channel(true).expect("flag");
        store.set_flag(CLICK_ID_KEY, json!("c1")).expect("flag");
        store
            .set(record(json!({"session_id": "s1"})), WriteTarget::EphemeralAndDurable)
            .expect("set");

        store.reset().expect("reset");

        assert!(store.get(Scope::Ephemeral).expect("get").is_empty());
        assert!(store.get(Scope::Durable).expect("get").is_empty());
        assert_eq!(store.flag(CLICK_ID_KEY).expect("flag"), None);
        assert!(store.use_callback_channel());
    }
}
