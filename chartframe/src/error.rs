use crate::engine::session::SessionId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors generated in `chartframe`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Error)]
pub enum EngineError {
    #[error("history fetch failed: {0}")]
    Fetch(String),

    #[error("history fetch timed out after {timeout_ms}ms")]
    FetchTimeout { timeout_ms: u64 },

    #[error("snapshot storage failed: {0}")]
    Storage(String),

    #[error("persisted snapshot could not be decoded: {0}")]
    SnapshotCodec(String),

    #[error("unsupported timeframe token: {0}")]
    InvalidTimeframe(String),

    #[error("unknown session: {0}")]
    UnknownSession(SessionId),
}

impl EngineError {
    /// Determine if an error only degrades durability, leaving the in-memory
    /// engine fully usable.
    pub fn is_durability_only(&self) -> bool {
        matches!(self, EngineError::Storage(_) | EngineError::SnapshotCodec(_))
    }

    /// Determine if an error should surface on a session's health instead of
    /// propagating to the caller.
    pub fn is_fetch(&self) -> bool {
        matches!(
            self,
            EngineError::Fetch(_) | EngineError::FetchTimeout { .. }
        )
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(value: serde_json::Error) -> Self {
        Self::SnapshotCodec(value.to_string())
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(value: reqwest::Error) -> Self {
        Self::Fetch(value.to_string())
    }
}
