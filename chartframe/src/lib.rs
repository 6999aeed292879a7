//! Session and cache engine for live OHLC chart frames.
//!
//! `chartframe` keeps a set of (symbol, timeframe) bar sessions refreshed
//! from a pluggable broker-history provider. It layers:
//! - a partitioned, freshness-aware shared history cache so overlapping
//!   charts never re-fetch the same range
//! - a merge step reconciling full and incremental fetch results into one
//!   ordered series
//! - a durable, debounce-flushed snapshot that survives process restarts
//! - a bounded, deduplicated pattern detection pass over newly closed bars
//! - read-only telemetry for operational dashboards
//!
//! The engine owns all session state; hosts interact through
//! [`ChartEngine`]'s operations and read-only snapshots.

pub mod bar;
pub mod cache;
pub mod engine;
pub mod error;
pub mod merge;
pub mod patterns;
pub mod provider;
pub mod telemetry;
pub mod timeframe;

// Re-export commonly used types for convenience
pub use bar::Bar;
pub use engine::session::{HealthSource, SessionHealth, SessionId, SessionSnapshot};
pub use engine::{ChartEngine, ClearOutcome, EngineConfig};
pub use error::EngineError;

pub use cache::storage::{FileStore, MemoryStore, SnapshotStore};
pub use cache::{CacheEntry, CacheKey, CacheLookup, CoverageRequest, SharedHistoryCache};

pub use merge::{FetchKind, MergeOutcome};

pub use provider::{
    BridgeHttpConfig, BridgeHttpProvider, BrokerContext, HistoryProvider, HistoryRequest,
    HistorySeries, PartitionKey,
};

pub use patterns::{
    DetectContext, DetectionSource, PatternDetectionPipeline, PatternDetector, PatternDirection,
    PatternEvent, RawPatternEvent,
};

pub use telemetry::{FrameCacheTelemetry, TelemetryCollector};

pub use timeframe::{Timeframe, normalize_symbol};
