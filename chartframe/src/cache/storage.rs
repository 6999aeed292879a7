//! Key-value storage seam for the persisted snapshot.
//!
//! Deliberately synchronous and string-valued: the snapshot is one JSON blob
//! under one slot key, and hosts plug in whatever durable KV they have.
//! Write failures must be catchable; the engine treats them as degraded
//! durability, never as fatal.

use crate::error::EngineError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;

/// Durable string key-value slot consumed by frame persistence.
pub trait SnapshotStore: Send + Sync {
    fn get_item(&self, key: &str) -> Option<String>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), EngineError>;
    fn remove_item(&self, key: &str);
}

/// In-memory store, the default for tests and ephemeral hosts.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemoryStore {
    fn get_item(&self, key: &str) -> Option<String> {
        self.items.lock().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), EngineError> {
        self.items.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) {
        self.items.lock().remove(key);
    }
}

/// File-backed store: one file per key under a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Slot keys are engine-controlled, but keep the mapping safe for
        // arbitrary callers anyway.
        let file_name: String = key
            .chars()
            .map(|ch| {
                if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') {
                    ch
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(file_name)
    }
}

impl SnapshotStore for FileStore {
    fn get_item(&self, key: &str) -> Option<String> {
        std::fs::read_to_string(self.path_for(key)).ok()
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), EngineError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|err| EngineError::Storage(err.to_string()))?;
        std::fs::write(self.path_for(key), value)
            .map_err(|err| EngineError::Storage(err.to_string()))
    }

    fn remove_item(&self, key: &str) {
        let _ = std::fs::remove_file(self.path_for(key));
    }
}
