//! Durable snapshot of the shared history cache.
//!
//! The whole cache serializes into one versioned JSON document written to a
//! single storage slot. Hydration is best-effort: a missing, corrupt or
//! version-mismatched snapshot yields an empty entry set and one warning,
//! never an error past this boundary, because the cache is always
//! reconstructible from the provider.

use crate::cache::CacheEntry;
use crate::cache::storage::SnapshotStore;
use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Storage slot the snapshot lives under.
pub const SNAPSHOT_SLOT_KEY: &str = "chartframe.history_snapshot";

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// On-disk snapshot document.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PersistedSnapshot {
    pub version: u32,
    pub saved_at_ms: i64,
    pub entries: Vec<CacheEntry>,
}

/// Serialize cache entries into a snapshot document.
pub fn serialize(entries: Vec<CacheEntry>, saved_at_ms: i64) -> PersistedSnapshot {
    PersistedSnapshot {
        version: SNAPSHOT_VERSION,
        saved_at_ms,
        entries,
    }
}

/// Read and decode the persisted snapshot, best-effort.
pub fn hydrate(store: &dyn SnapshotStore) -> Vec<CacheEntry> {
    let Some(raw) = store.get_item(SNAPSHOT_SLOT_KEY) else {
        debug!("no persisted history snapshot found");
        return Vec::new();
    };

    let snapshot: PersistedSnapshot = match serde_json::from_str(&raw) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            warn!(%err, "persisted history snapshot is corrupt, starting cold");
            return Vec::new();
        }
    };

    if snapshot.version != SNAPSHOT_VERSION {
        warn!(
            found = snapshot.version,
            expected = SNAPSHOT_VERSION,
            "persisted history snapshot version mismatch, starting cold"
        );
        return Vec::new();
    }

    debug!(
        entries = snapshot.entries.len(),
        saved_at_ms = snapshot.saved_at_ms,
        "hydrated history snapshot"
    );
    snapshot.entries
}

/// Write the snapshot to its storage slot.
pub fn flush(store: &dyn SnapshotStore, snapshot: &PersistedSnapshot) -> Result<(), EngineError> {
    let encoded = serde_json::to_string(snapshot)?;
    store.set_item(SNAPSHOT_SLOT_KEY, &encoded)
}

/// Remove the durable snapshot entirely.
pub fn clear(store: &dyn SnapshotStore) {
    store.remove_item(SNAPSHOT_SLOT_KEY);
}
