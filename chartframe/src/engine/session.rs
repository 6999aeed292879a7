//! Session state for one (symbol, timeframe) subscription.
//!
//! Sessions are plain structs owned exclusively by the engine; all mutation
//! flows through engine methods after a fetch merges, and readers only ever
//! see cloned snapshots.

use crate::bar::{self, Bar};
use crate::cache::CacheEntry;
use crate::provider::PartitionKey;
use crate::timeframe::Timeframe;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Opaque session handle.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Deserialize,
    Serialize,
    derive_more::Display,
    derive_more::Constructor,
)]
pub struct SessionId(u64);

/// Where a session's current bars came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthSource {
    /// Served from the shared history cache, no network call.
    Cache,
    /// Served by a successful provider fetch.
    Network,
    /// Last fetch failed; bars (if any) are stale-but-present.
    Error,
}

/// Session health surfaced to the host so it can render staleness instead of
/// blanking the chart.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SessionHealth {
    pub source: HealthSource,
    /// Message of the most recent fetch failure, if any.
    pub last_error: Option<String>,
}

impl SessionHealth {
    pub fn cache() -> Self {
        Self {
            source: HealthSource::Cache,
            last_error: None,
        }
    }

    pub fn network() -> Self {
        Self {
            source: HealthSource::Network,
            last_error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            source: HealthSource::Error,
            last_error: Some(message.into()),
        }
    }
}

/// One actively tracked (symbol, timeframe) bar series.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    /// Normalized symbol key.
    pub symbol: SmolStr,
    /// Normalized timeframe token.
    pub timeframe: Timeframe,
    /// Isolation key of the broker/account the bars were fetched under.
    pub partition: PartitionKey,
    /// How many bars the session asks for on a full fetch.
    pub backfill_bars: usize,
    /// Ordered oldest-first, capped at the engine's `max_bars`.
    pub bars: Vec<Bar>,
    pub last_history_fetch_at_ms: Option<i64>,
    pub last_full_history_fetch_at_ms: Option<i64>,
    pub health: SessionHealth,
}

impl Session {
    /// Hydrate fetch bookkeeping and bars from a cached entry.
    pub fn hydrate_from(&mut self, entry: &CacheEntry, max_bars: usize) {
        self.bars = bar::last_n(&entry.bars, max_bars).to_vec();
        self.last_history_fetch_at_ms = entry.last_history_fetch_at_ms;
        self.last_full_history_fetch_at_ms = entry.last_full_history_fetch_at_ms;
        self.health = SessionHealth::cache();
    }

    /// Project this session into its shared-cache entry.
    pub fn to_cache_entry(&self, updated_at_ms: i64) -> CacheEntry {
        CacheEntry {
            partition: self.partition.clone(),
            symbol: self.symbol.clone(),
            timeframe: self.timeframe.clone(),
            bars: self.bars.clone(),
            updated_at_ms,
            last_history_fetch_at_ms: self.last_history_fetch_at_ms,
            last_full_history_fetch_at_ms: self.last_full_history_fetch_at_ms,
        }
    }

    /// Read-only view of the most recent `bars_limit` bars.
    pub fn snapshot(&self, bars_limit: usize) -> SessionSnapshot {
        SessionSnapshot {
            bar_count: self.bars.len(),
            bars_tail: bar::last_n(&self.bars, bars_limit).to_vec(),
            health: self.health.clone(),
        }
    }
}

/// Point-in-time view of a session handed to readers.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SessionSnapshot {
    /// Total bars currently held (may exceed the returned tail).
    pub bar_count: usize,
    /// The most recent bars, oldest first.
    pub bars_tail: Vec<Bar>,
    pub health: SessionHealth,
}
