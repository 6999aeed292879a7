//! Operational counters for the frame cache and detection pipeline.
//!
//! The collector is shared across the engine's tasks; every counter update is
//! a short lock-and-bump so it is safe to call from inside refresh paths.
//! `FrameCacheTelemetry` is the read-only snapshot handed to dashboards.

use crate::patterns::DetectionSource;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Read-only telemetry snapshot, serializable for operational dashboards.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct FrameCacheTelemetry {
    pub hydrate: HydrateTelemetry,
    pub persist: PersistTelemetry,
    pub fetch_mix: FetchMixTelemetry,
    /// Number of entries currently held by the shared cache.
    pub entries: usize,
    /// Sorted, de-duplicated partition inventory.
    pub partitions: Vec<String>,
    pub pattern_detection: PatternDetectionTelemetry,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct HydrateTelemetry {
    pub attempts: u64,
    pub hits: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct PersistTelemetry {
    pub flush_failures: u64,
    /// Message of the most recent flush failure, verbatim.
    pub last_flush_error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct FetchMixTelemetry {
    pub full: u64,
    pub incremental: u64,
    /// Successful fetches that returned no bars (no-op merges).
    pub empty: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct PatternDetectionTelemetry {
    pub from_live: u64,
    pub from_refresh: u64,
    pub from_startup_backfill: u64,
    pub dedupe_suppressed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hydrate: HydrateTelemetry,
    persist: PersistTelemetry,
    fetch_mix: FetchMixTelemetry,
    pattern_detection: PatternDetectionTelemetry,
}

/// Shared counter sink for every engine component.
#[derive(Debug, Default)]
pub struct TelemetryCollector {
    counters: Mutex<Counters>,
}

impl TelemetryCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a cache hydration attempt and whether it was served from cache.
    pub fn record_hydrate(&self, hit: bool) {
        let mut counters = self.counters.lock();
        counters.hydrate.attempts += 1;
        if hit {
            counters.hydrate.hits += 1;
        }
    }

    /// Record a full history fetch.
    pub fn record_full_fetch(&self) {
        self.counters.lock().fetch_mix.full += 1;
    }

    /// Record an incremental history fetch.
    pub fn record_incremental_fetch(&self) {
        self.counters.lock().fetch_mix.incremental += 1;
    }

    /// Record a successful fetch that carried no bars.
    pub fn record_empty_fetch(&self) {
        self.counters.lock().fetch_mix.empty += 1;
    }

    /// Record a failed persistence flush, keeping the message verbatim.
    pub fn record_flush_failure(&self, error: &str) {
        let mut counters = self.counters.lock();
        counters.persist.flush_failures += 1;
        counters.persist.last_flush_error = Some(error.to_string());
    }

    /// Record a completed detection pass by provenance.
    pub fn record_detection_pass(&self, source: DetectionSource) {
        let mut counters = self.counters.lock();
        match source {
            DetectionSource::Live => counters.pattern_detection.from_live += 1,
            DetectionSource::Refresh => counters.pattern_detection.from_refresh += 1,
            DetectionSource::StartupBackfill => {
                counters.pattern_detection.from_startup_backfill += 1
            }
        }
    }

    /// Record a pattern event suppressed by the dedupe cache.
    pub fn record_dedupe_suppressed(&self) {
        self.counters.lock().pattern_detection.dedupe_suppressed += 1;
    }

    /// Reset hydrate and persist counters after the durable cache is cleared.
    pub fn reset_persistence_counters(&self) {
        let mut counters = self.counters.lock();
        counters.hydrate = HydrateTelemetry::default();
        counters.persist = PersistTelemetry::default();
    }

    /// Snapshot the counters together with the cache inventory.
    pub fn snapshot(&self, entries: usize, partitions: Vec<String>) -> FrameCacheTelemetry {
        let counters = self.counters.lock();
        FrameCacheTelemetry {
            hydrate: counters.hydrate,
            persist: counters.persist.clone(),
            fetch_mix: counters.fetch_mix,
            entries,
            partitions,
            pattern_detection: counters.pattern_detection,
        }
    }
}
