//! Partitioned, freshness-aware shared history cache.
//!
//! One entry per `(partition, symbol, timeframe)`. Lookups answer both halves
//! of "can I skip the network": range/length coverage and entry freshness.
//! Stores are upserts that never shrink an entry's covered range; `clear` is
//! the only destructive operation.

pub mod persistence;
pub mod storage;

use crate::bar::{self, Bar};
use crate::provider::PartitionKey;
use crate::telemetry::TelemetryCollector;
use crate::timeframe::Timeframe;
use fnv::FnvHashMap;
use itertools::Itertools;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Composite cache key: partition + normalized symbol + normalized timeframe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct CacheKey {
    pub partition: PartitionKey,
    pub symbol: SmolStr,
    pub timeframe: Timeframe,
}

impl CacheKey {
    pub fn new(partition: PartitionKey, symbol: SmolStr, timeframe: Timeframe) -> Self {
        Self {
            partition,
            symbol,
            timeframe,
        }
    }
}

/// One cached bar series with its fetch bookkeeping.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CacheEntry {
    pub partition: PartitionKey,
    pub symbol: SmolStr,
    pub timeframe: Timeframe,
    /// Ordered oldest-first, strictly increasing timestamps.
    pub bars: Vec<Bar>,
    /// Last time this entry was written, epoch ms. Drives freshness.
    pub updated_at_ms: i64,
    pub last_history_fetch_at_ms: Option<i64>,
    pub last_full_history_fetch_at_ms: Option<i64>,
}

impl CacheEntry {
    pub fn key(&self) -> CacheKey {
        CacheKey::new(
            self.partition.clone(),
            self.symbol.clone(),
            self.timeframe.clone(),
        )
    }
}

/// What a caller needs covered to be served from cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverageRequest {
    /// The cached `[min_t, max_t]` must contain `[from_ms, to_ms]`.
    Range { from_ms: i64, to_ms: i64 },
    /// The cached series must already hold at least this many bars.
    LastBars(usize),
}

/// Result of a cache lookup.
#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub entry: Option<CacheEntry>,
    pub covers: bool,
    pub fresh: bool,
}

impl CacheLookup {
    /// A request is served from cache only when both conditions hold.
    pub fn is_hit(&self) -> bool {
        self.covers && self.fresh
    }
}

/// Shared store of fetched bar ranges, safe to consult from any task.
#[derive(Debug)]
pub struct SharedHistoryCache {
    entries: RwLock<FnvHashMap<CacheKey, CacheEntry>>,
    telemetry: Arc<TelemetryCollector>,
}

impl SharedHistoryCache {
    pub fn new(telemetry: Arc<TelemetryCollector>) -> Self {
        Self {
            entries: RwLock::new(FnvHashMap::default()),
            telemetry,
        }
    }

    /// Answer whether `want` can be served from cache within `max_age_ms`.
    pub fn lookup(
        &self,
        key: &CacheKey,
        want: CoverageRequest,
        max_age_ms: i64,
        now_ms: i64,
    ) -> CacheLookup {
        let entries = self.entries.read();
        let lookup = match entries.get(key) {
            None => CacheLookup {
                entry: None,
                covers: false,
                fresh: false,
            },
            Some(entry) => {
                let covers = match want {
                    CoverageRequest::Range { from_ms, to_ms } => bar::coverage(&entry.bars)
                        .is_some_and(|(min_t, max_t)| min_t <= from_ms && max_t >= to_ms),
                    CoverageRequest::LastBars(count) => entry.bars.len() >= count,
                };
                let fresh = now_ms.saturating_sub(entry.updated_at_ms) <= max_age_ms;
                CacheLookup {
                    entry: Some(entry.clone()),
                    covers,
                    fresh,
                }
            }
        };
        drop(entries);

        self.telemetry.record_hydrate(lookup.is_hit());
        lookup
    }

    /// Upsert an entry, advancing `updated_at_ms` to `now_ms`.
    ///
    /// The stored series is the timestamp-union of the previous and incoming
    /// bars (incoming wins on conflict), so an entry's covered range can only
    /// grow here.
    pub fn store(&self, mut entry: CacheEntry, now_ms: i64) {
        let key = entry.key();
        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(&key) {
            if !existing.bars.is_empty() {
                let mut by_timestamp: BTreeMap<i64, Bar> =
                    existing.bars.iter().map(|bar| (bar.t, *bar)).collect();
                for bar in &entry.bars {
                    by_timestamp.insert(bar.t, *bar);
                }
                entry.bars = by_timestamp.into_values().collect();
            }
        }
        entry.updated_at_ms = now_ms;
        debug!(
            partition = %entry.partition,
            symbol = %entry.symbol,
            timeframe = %entry.timeframe,
            bars = entry.bars.len(),
            "stored history cache entry"
        );
        entries.insert(key, entry);
    }

    /// Remove all entries, or only those under one partition.
    ///
    /// The only operation allowed to shrink cached coverage.
    pub fn clear(&self, partition: Option<&PartitionKey>) -> usize {
        let mut entries = self.entries.write();
        match partition {
            None => {
                let removed = entries.len();
                entries.clear();
                removed
            }
            Some(partition) => {
                let before = entries.len();
                entries.retain(|key, _| &key.partition != partition);
                before - entries.len()
            }
        }
    }

    /// Entry count and sorted partition inventory, for telemetry snapshots.
    pub fn inventory(&self) -> (usize, Vec<String>) {
        let entries = self.entries.read();
        let partitions = entries
            .keys()
            .map(|key| key.partition.as_str().to_string())
            .sorted()
            .dedup()
            .collect();
        (entries.len(), partitions)
    }

    /// All entries, cloned, for snapshot serialization.
    pub fn export_entries(&self) -> Vec<CacheEntry> {
        self.entries.read().values().cloned().collect()
    }

    /// Seed the cache from hydrated snapshot entries. Existing keys win.
    pub fn seed(&self, hydrated: Vec<CacheEntry>) {
        let mut entries = self.entries.write();
        for entry in hydrated {
            entries.entry(entry.key()).or_insert(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smol_str::SmolStr;

    fn bar(t: i64, c: f64) -> Bar {
        Bar::new(t, c, c, c, c, 1.0)
    }

    fn test_key(partition: &str) -> CacheKey {
        CacheKey::new(
            PartitionKey::from_context(&crate::provider::BrokerContext::new(
                SmolStr::new(partition),
                SmolStr::new("acct"),
            )),
            SmolStr::new("EURUSD"),
            Timeframe::parse("1h").unwrap(),
        )
    }

    fn entry_for(key: &CacheKey, bars: Vec<Bar>) -> CacheEntry {
        CacheEntry {
            partition: key.partition.clone(),
            symbol: key.symbol.clone(),
            timeframe: key.timeframe.clone(),
            bars,
            updated_at_ms: 0,
            last_history_fetch_at_ms: Some(1),
            last_full_history_fetch_at_ms: Some(1),
        }
    }

    fn new_cache() -> SharedHistoryCache {
        SharedHistoryCache::new(Arc::new(TelemetryCollector::new()))
    }

    #[test]
    fn test_lookup_miss_then_hit() {
        let cache = new_cache();
        let key = test_key("mt5");

        let miss = cache.lookup(
            &key,
            CoverageRequest::Range { from_ms: 100, to_ms: 200 },
            60_000,
            1_000,
        );
        assert!(!miss.is_hit());
        assert!(miss.entry.is_none());

        cache.store(entry_for(&key, vec![bar(50, 1.0), bar(250, 2.0)]), 1_000);

        let hit = cache.lookup(
            &key,
            CoverageRequest::Range { from_ms: 100, to_ms: 200 },
            60_000,
            2_000,
        );
        assert!(hit.covers);
        assert!(hit.fresh);
        assert!(hit.is_hit());
    }

    #[test]
    fn test_stale_entry_covers_but_not_fresh() {
        let cache = new_cache();
        let key = test_key("mt5");
        cache.store(entry_for(&key, vec![bar(0, 1.0), bar(1_000, 2.0)]), 1_000);

        let lookup = cache.lookup(
            &key,
            CoverageRequest::LastBars(2),
            5_000,
            10_000,
        );
        assert!(lookup.covers);
        assert!(!lookup.fresh);
        assert!(!lookup.is_hit());
    }

    #[test]
    fn test_store_never_shrinks_coverage() {
        let cache = new_cache();
        let key = test_key("mt5");
        cache.store(entry_for(&key, vec![bar(0, 1.0), bar(100, 2.0), bar(200, 3.0)]), 1_000);
        // A narrower write (e.g. a short incremental tail) must not drop the
        // earlier bars.
        cache.store(entry_for(&key, vec![bar(200, 3.5), bar(300, 4.0)]), 2_000);

        let lookup = cache.lookup(&key, CoverageRequest::LastBars(4), 60_000, 2_500);
        let entry = lookup.entry.unwrap();
        assert_eq!(entry.bars.len(), 4);
        assert_eq!(bar::coverage(&entry.bars), Some((0, 300)));
        // Conflicting timestamp takes the newly stored value.
        assert!((entry.bars[2].c - 3.5).abs() < f64::EPSILON);
        assert_eq!(entry.updated_at_ms, 2_000);
    }

    #[test]
    fn test_clear_by_partition() {
        let cache = new_cache();
        let key_a = test_key("broker-a");
        let key_b = test_key("broker-b");
        cache.store(entry_for(&key_a, vec![bar(0, 1.0)]), 1);
        cache.store(entry_for(&key_b, vec![bar(0, 1.0)]), 1);

        assert_eq!(cache.clear(Some(&key_a.partition)), 1);
        let (count, partitions) = cache.inventory();
        assert_eq!(count, 1);
        assert_eq!(partitions, vec!["broker-b|acct".to_string()]);

        assert_eq!(cache.clear(None), 1);
        assert_eq!(cache.inventory().0, 0);
    }

    #[test]
    fn test_lookup_reports_telemetry() {
        let telemetry = Arc::new(TelemetryCollector::new());
        let cache = SharedHistoryCache::new(Arc::clone(&telemetry));
        let key = test_key("mt5");

        cache.lookup(&key, CoverageRequest::LastBars(1), 1_000, 0);
        cache.store(entry_for(&key, vec![bar(0, 1.0)]), 0);
        cache.lookup(&key, CoverageRequest::LastBars(1), 1_000, 100);

        let snapshot = telemetry.snapshot(0, vec![]);
        assert_eq!(snapshot.hydrate.attempts, 2);
        assert_eq!(snapshot.hydrate.hits, 1);
    }
}
