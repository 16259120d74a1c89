//! Namespaced, failure-tolerant persistence for JSON values.
//!
//! `PersistentStore` is the durability backstop for both stores. Reads fall
//! back to a caller-supplied default and writes swallow storage failures, so
//! the in-memory state stays authoritative for the running session.

mod file;
mod memory;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::Result;

pub use file::FileStorage;
pub use memory::MemoryStorage;

/// Prefix applied to every key written by the application.
pub const STORAGE_PREFIX: &str = "notesapp_v1";

/// Raw string storage underneath `PersistentStore`.
pub trait StorageBackend: Send + Sync {
    /// Read the raw value stored under `key`, if any.
    fn read(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    fn write(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`. Removing a missing key is not an error.
    fn delete(&self, key: &str) -> Result<()>;
}

/// JSON key-value store with a fixed namespace prefix.
#[derive(Clone)]
pub struct PersistentStore {
    backend: Arc<dyn StorageBackend>,
    prefix: String,
}

impl PersistentStore {
    /// Wrap a backend using the application prefix.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self::with_prefix(backend, STORAGE_PREFIX)
    }

    pub fn with_prefix(backend: Arc<dyn StorageBackend>, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
        }
    }

    /// In-memory store, mostly for tests and ephemeral sessions.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    /// Fully qualified key as written to the backend.
    pub fn namespaced_key(&self, key: &str) -> String {
        format!("{}:{key}", self.prefix)
    }

    /// Read and decode `key`, returning `fallback` when the key is missing,
    /// the stored value is not valid JSON for `T`, or the backend fails.
    pub fn get<T: DeserializeOwned>(&self, key: &str, fallback: T) -> T {
        let full_key = self.namespaced_key(key);
        let raw = match self.backend.read(&full_key) {
            Ok(Some(raw)) if !raw.is_empty() => raw,
            Ok(_) => return fallback,
            Err(error) => {
                tracing::warn!("Failed to read {}: {}", full_key, error);
                return fallback;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!("Ignoring unreadable value at {}: {}", full_key, error);
                fallback
            }
        }
    }

    /// Encode and store `value`. Failures are logged and otherwise ignored.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        let full_key = self.namespaced_key(key);
        let serialized = match serde_json::to_string(value) {
            Ok(serialized) => serialized,
            Err(error) => {
                tracing::warn!("Failed to serialize value for {}: {}", full_key, error);
                return;
            }
        };

        if let Err(error) = self.backend.write(&full_key, &serialized) {
            tracing::warn!("Failed to persist {}: {}", full_key, error);
        }
    }

    /// Remove `key`. Failures are logged and otherwise ignored.
    pub fn remove(&self, key: &str) {
        let full_key = self.namespaced_key(key);
        if let Err(error) = self.backend.delete(&full_key) {
            tracing::warn!("Failed to remove {}: {}", full_key, error);
        }
    }
}

impl std::fmt::Debug for PersistentStore {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("PersistentStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn store_with(backend: &Arc<MemoryStorage>) -> PersistentStore {
        PersistentStore::new(backend.clone())
    }

    #[test]
    fn get_returns_fallback_for_missing_key() {
        let store = PersistentStore::in_memory();
        let value: Vec<String> = store.get("missing", vec!["default".to_string()]);
        assert_eq!(value, vec!["default".to_string()]);
    }

    #[test]
    fn set_then_get_round_trips_under_prefix() {
        let backend = Arc::new(MemoryStorage::new());
        let store = store_with(&backend);
        store.set("notes:data", &vec![1, 2, 3]);

        assert_eq!(store.get::<Vec<i32>>("notes:data", Vec::new()), vec![1, 2, 3]);
        assert_eq!(
            backend.raw("notesapp_v1:notes:data").as_deref(),
            Some("[1,2,3]")
        );
    }

    #[test]
    fn corrupt_value_yields_fallback() {
        let backend = Arc::new(MemoryStorage::new());
        backend
            .write("notesapp_v1:auth:user", "{not json")
            .expect("memory write");
        let store = store_with(&backend);

        let value: Option<String> = store.get("auth:user", None);
        assert_eq!(value, None);
    }

    #[test]
    fn backend_failures_are_swallowed() {
        let backend = Arc::new(MemoryStorage::new());
        let store = store_with(&backend);
        store.set("key", &"kept");

        backend.set_failing(true);
        store.set("key", &"lost");
        store.remove("key");
        assert_eq!(store.get("key", "fallback".to_string()), "fallback");

        backend.set_failing(false);
        assert_eq!(store.get("key", String::new()), "kept");
    }

    #[test]
    fn remove_deletes_value() {
        let store = PersistentStore::in_memory();
        store.set("auth:user", &"someone");
        store.remove("auth:user");
        assert_eq!(store.get::<Option<String>>("auth:user", None), None);
    }
}
