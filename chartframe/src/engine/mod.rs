//! The chart engine: session ownership and refresh orchestration.
//!
//! Owns every live (symbol, timeframe) session, consults the shared history
//! cache before touching the network, folds fetch results in through the
//! merge layer, keeps the durable snapshot flushed on a debounce timer, and
//! feeds newly closed bars to the pattern pipeline.
//!
//! Concurrency model: per-session refreshes are serialized by an in-flight
//! guard (an overlapping refresh request is a no-op, not queued); refreshes
//! for different sessions run fully concurrently. Locks are short-held and
//! never span an await point.

pub mod session;

use crate::cache::persistence;
use crate::cache::storage::SnapshotStore;
use crate::cache::{CacheKey, CoverageRequest, SharedHistoryCache};
use crate::error::EngineError;
use crate::merge::{self, FetchKind};
use crate::patterns::{DetectContext, DetectionSource, PatternDetectionPipeline, PatternEvent};
use crate::provider::{BrokerContext, HistoryProvider, HistoryRequest, PartitionKey};
use crate::telemetry::{FrameCacheTelemetry, TelemetryCollector};
use crate::timeframe::{Timeframe, normalize_symbol};
use chrono::Utc;
use fnv::FnvHashMap;
use futures::future::join_all;
use indexmap::IndexSet;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use session::{Session, SessionHealth, SessionId, SessionSnapshot};
use smol_str::SmolStr;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default cap on bars held per session and cache entry.
pub const DEFAULT_MAX_BARS: usize = 5_000;

/// Default freshness tolerance for serving a request from cache.
pub const DEFAULT_CACHE_MAX_AGE_MS: i64 = 60_000;

/// Default provider call timeout, enforced by the engine.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(12);

/// Default debounce window that coalesces snapshot flushes.
pub const DEFAULT_FLUSH_DEBOUNCE: Duration = Duration::from_millis(250);

/// Default scheduled refresh cadence for watched symbols.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(20);

/// Bars re-requested behind the session tail so providers can revise a
/// still-forming bar.
pub const DEFAULT_REFRESH_OVERLAP_BARS: usize = 4;

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_bars: usize,
    pub cache_max_age_ms: i64,
    pub fetch_timeout: Duration,
    pub flush_debounce: Duration,
    pub refresh_interval: Duration,
    pub refresh_overlap_bars: usize,
    pub pattern_window_bars: usize,
    pub pattern_key_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_bars: DEFAULT_MAX_BARS,
            cache_max_age_ms: DEFAULT_CACHE_MAX_AGE_MS,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            flush_debounce: DEFAULT_FLUSH_DEBOUNCE,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            refresh_overlap_bars: DEFAULT_REFRESH_OVERLAP_BARS,
            pattern_window_bars: crate::patterns::PATTERN_REFRESH_BACKFILL_BARS,
            pattern_key_capacity: crate::patterns::PATTERN_KEY_CACHE_CAPACITY,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_bars(mut self, max_bars: usize) -> Self {
        self.max_bars = max_bars;
        self
    }

    pub fn with_cache_max_age_ms(mut self, max_age_ms: i64) -> Self {
        self.cache_max_age_ms = max_age_ms;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_flush_debounce(mut self, debounce: Duration) -> Self {
        self.flush_debounce = debounce;
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn with_refresh_overlap_bars(mut self, bars: usize) -> Self {
        self.refresh_overlap_bars = bars;
        self
    }

    pub fn with_pattern_window_bars(mut self, bars: usize) -> Self {
        self.pattern_window_bars = bars;
        self
    }

    pub fn with_pattern_key_capacity(mut self, capacity: usize) -> Self {
        self.pattern_key_capacity = capacity;
        self
    }
}

/// Result of clearing the persisted frame cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct ClearOutcome {
    pub ok: bool,
    pub entries_cleared: usize,
}

struct EngineInner {
    config: EngineConfig,
    provider: Arc<dyn HistoryProvider>,
    store: Arc<dyn SnapshotStore>,
    cache: SharedHistoryCache,
    telemetry: Arc<TelemetryCollector>,
    patterns: PatternDetectionPipeline,
    sessions: RwLock<FnvHashMap<SessionId, Session>>,
    in_flight: Mutex<HashSet<SessionId>>,
    watches: Mutex<IndexSet<(SmolStr, Timeframe)>>,
    next_session_id: AtomicU64,
    flush_notify: Notify,
    events_tx: broadcast::Sender<PatternEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Removes the session from the in-flight set when the refresh finishes,
/// whatever path it takes out.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<SessionId>>,
    id: SessionId,
}

impl<'a> InFlightGuard<'a> {
    fn try_begin(set: &'a Mutex<HashSet<SessionId>>, id: SessionId) -> Option<Self> {
        if !set.lock().insert(id) {
            return None;
        }
        Some(Self { set, id })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.id);
    }
}

/// Fields cloned out of a session before awaiting the provider.
struct RefreshContext {
    symbol: SmolStr,
    timeframe: Timeframe,
    partition: PartitionKey,
    backfill_bars: usize,
    tail_timestamp: Option<i64>,
}

impl RefreshContext {
    fn cache_key(&self) -> CacheKey {
        CacheKey::new(
            self.partition.clone(),
            self.symbol.clone(),
            self.timeframe.clone(),
        )
    }
}

/// Session and cache engine for live chart frames.
///
/// Cheap to clone; clones share all state. Construct inside a Tokio runtime:
/// the engine owns a background debounced-flush task from birth.
#[derive(Clone)]
pub struct ChartEngine {
    inner: Arc<EngineInner>,
}

impl ChartEngine {
    pub fn new(
        provider: Arc<dyn HistoryProvider>,
        store: Arc<dyn SnapshotStore>,
        config: EngineConfig,
    ) -> Self {
        let telemetry = Arc::new(TelemetryCollector::new());
        let cache = SharedHistoryCache::new(Arc::clone(&telemetry));

        // Hydrate the shared cache once, before any session can start.
        let hydrated = persistence::hydrate(store.as_ref());
        if !hydrated.is_empty() {
            info!(entries = hydrated.len(), "seeded history cache from snapshot");
        }
        cache.seed(hydrated);

        let patterns = PatternDetectionPipeline::new(
            crate::patterns::detectors::default_detectors(),
            Arc::clone(&telemetry),
            config.pattern_window_bars,
            config.pattern_key_capacity,
        );
        let (events_tx, _) = broadcast::channel(256);

        let engine = Self {
            inner: Arc::new(EngineInner {
                config,
                provider,
                store,
                cache,
                telemetry,
                patterns,
                sessions: RwLock::new(FnvHashMap::default()),
                in_flight: Mutex::new(HashSet::new()),
                watches: Mutex::new(IndexSet::new()),
                next_session_id: AtomicU64::new(1),
                flush_notify: Notify::new(),
                events_tx,
                tasks: Mutex::new(Vec::new()),
            }),
        };
        engine.spawn_flush_task();
        engine
    }

    /// Engine with default configuration.
    pub fn with_defaults(provider: Arc<dyn HistoryProvider>, store: Arc<dyn SnapshotStore>) -> Self {
        Self::new(provider, store, EngineConfig::default())
    }

    /// Start tracking a (symbol, timeframe) pair.
    ///
    /// Hydrates synchronously from the shared cache when coverage and
    /// freshness allow (no network call); otherwise seeds whatever stale
    /// bars exist and schedules an asynchronous refresh.
    pub fn start_session(
        &self,
        symbol: &str,
        timeframe: &str,
        backfill_bars: usize,
    ) -> Result<SessionId, EngineError> {
        let timeframe = Timeframe::parse(timeframe)?;
        let symbol = normalize_symbol(symbol);
        let partition = PartitionKey::from_context(&self.inner.provider.broker_context());
        let id = SessionId::new(self.inner.next_session_id.fetch_add(1, Ordering::Relaxed));

        let mut session = Session {
            id,
            symbol: symbol.clone(),
            timeframe: timeframe.clone(),
            partition: partition.clone(),
            backfill_bars,
            bars: Vec::new(),
            last_history_fetch_at_ms: None,
            last_full_history_fetch_at_ms: None,
            health: SessionHealth::network(),
        };

        let now = now_ms();
        let key = CacheKey::new(partition, symbol.clone(), timeframe.clone());
        let lookup = self.inner.cache.lookup(
            &key,
            CoverageRequest::LastBars(backfill_bars),
            self.inner.config.cache_max_age_ms,
            now,
        );
        let hit = lookup.is_hit();
        if let Some(entry) = lookup.entry {
            // Stale-but-present bars still seed the session; an empty chart
            // is worse than an old one.
            if !entry.bars.is_empty() {
                session.hydrate_from(&entry, self.inner.config.max_bars);
            }
        }

        self.inner.sessions.write().insert(id, session);
        debug!(%id, %symbol, %timeframe, cache_hit = hit, "started session");

        if !hit {
            let engine = self.clone();
            tokio::spawn(async move {
                engine.refresh_session(id, false).await;
            });
        }
        Ok(id)
    }

    /// Read-only snapshot of a session. Never blocks on I/O.
    pub fn get_snapshot(
        &self,
        id: SessionId,
        bars_limit: usize,
    ) -> Result<SessionSnapshot, EngineError> {
        self.inner
            .sessions
            .read()
            .get(&id)
            .map(|session| session.snapshot(bars_limit))
            .ok_or(EngineError::UnknownSession(id))
    }

    /// Refresh every session matching `symbol` and, when non-empty, the
    /// given timeframes. Sessions with a refresh already in flight are
    /// skipped, not queued.
    pub async fn refresh_sessions_for_symbol(
        &self,
        symbol: &str,
        timeframes: &[&str],
        force: bool,
    ) -> Result<(), EngineError> {
        let symbol = normalize_symbol(symbol);
        let timeframes = timeframes
            .iter()
            .map(|raw| Timeframe::parse(raw))
            .collect::<Result<Vec<_>, _>>()?;

        let matching: Vec<SessionId> = {
            let sessions = self.inner.sessions.read();
            sessions
                .values()
                .filter(|session| {
                    session.symbol == symbol
                        && (timeframes.is_empty() || timeframes.contains(&session.timeframe))
                })
                .map(|session| session.id)
                .collect()
        };

        join_all(
            matching
                .into_iter()
                .map(|id| self.refresh_session(id, force)),
        )
        .await;
        Ok(())
    }

    /// Register a (symbol, timeframe) for the scheduled refresh loop.
    /// Idempotent.
    pub fn add_watch(&self, symbol: &str, timeframe: &str) -> Result<(), EngineError> {
        let timeframe = Timeframe::parse(timeframe)?;
        let symbol = normalize_symbol(symbol);
        self.inner.watches.lock().insert((symbol, timeframe));
        Ok(())
    }

    /// Spawn the periodic refresh driver over registered watches.
    /// The task is owned by the engine and cancelled on [`Self::shutdown`].
    pub fn start_refresh_scheduler(&self) {
        let engine = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(engine.inner.config.refresh_interval);
            // First tick fires immediately; skip it so start_session owns the
            // initial fetch.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let watches: Vec<(SmolStr, Timeframe)> =
                    engine.inner.watches.lock().iter().cloned().collect();
                for (symbol, timeframe) in watches {
                    if let Err(err) = engine
                        .refresh_sessions_for_symbol(symbol.as_str(), &[timeframe.as_str()], false)
                        .await
                    {
                        warn!(%err, %symbol, "scheduled refresh failed");
                    }
                }
            }
        });
        self.inner.tasks.lock().push(handle);
    }

    /// Run a pattern pass over a session's bars in response to a push tick.
    pub fn trigger_live_detection(
        &self,
        id: SessionId,
    ) -> Result<Vec<PatternEvent>, EngineError> {
        let (bars, context) = {
            let sessions = self.inner.sessions.read();
            let session = sessions.get(&id).ok_or(EngineError::UnknownSession(id))?;
            (
                session.bars.clone(),
                DetectContext {
                    symbol: session.symbol.clone(),
                    timeframe: session.timeframe.clone(),
                },
            )
        };

        let events = self
            .inner
            .patterns
            .detect(&bars, &context, DetectionSource::Live, now_ms());
        self.publish_events(&events);
        Ok(events)
    }

    /// Clear the shared cache and its durable snapshot; optionally empty the
    /// in-memory bars of every live session. Manual-recovery escape hatch.
    pub fn clear_persisted_frame_cache(&self, drop_session_bars: bool) -> ClearOutcome {
        let entries_cleared = self.inner.cache.clear(None);
        persistence::clear(self.inner.store.as_ref());
        self.inner.telemetry.reset_persistence_counters();

        if drop_session_bars {
            let mut sessions = self.inner.sessions.write();
            for session in sessions.values_mut() {
                session.bars.clear();
            }
        }

        info!(entries_cleared, drop_session_bars, "cleared persisted frame cache");
        ClearOutcome {
            ok: true,
            entries_cleared,
        }
    }

    /// Read-only telemetry aggregate for operational dashboards.
    pub fn get_frame_cache_telemetry(&self) -> FrameCacheTelemetry {
        let (entries, partitions) = self.inner.cache.inventory();
        self.inner.telemetry.snapshot(entries, partitions)
    }

    /// Subscribe to deduplicated pattern events as they are detected.
    pub fn subscribe_pattern_events(&self) -> broadcast::Receiver<PatternEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Flush once more, then cancel the engine's background tasks.
    pub fn shutdown(&self) {
        self.flush_now();
        for handle in self.inner.tasks.lock().drain(..) {
            handle.abort();
        }
    }

    async fn refresh_session(&self, id: SessionId, force: bool) {
        let Some(_guard) = InFlightGuard::try_begin(&self.inner.in_flight, id) else {
            debug!(%id, "refresh already in flight, skipping");
            return;
        };

        let Some(context) = self.refresh_context(id) else {
            return;
        };
        let now = now_ms();

        if !force {
            let lookup = self.inner.cache.lookup(
                &context.cache_key(),
                CoverageRequest::LastBars(context.backfill_bars),
                self.inner.config.cache_max_age_ms,
                now,
            );
            if lookup.is_hit() {
                if let Some(entry) = lookup.entry {
                    let mut sessions = self.inner.sessions.write();
                    if let Some(session) = sessions.get_mut(&id) {
                        session.hydrate_from(&entry, self.inner.config.max_bars);
                    }
                }
                debug!(%id, "refresh served from cache");
                return;
            }
        }

        let bar_duration = context.timeframe.bar_duration_ms();
        let from_ms = match context.tail_timestamp {
            Some(tail) => {
                tail - bar_duration * self.inner.config.refresh_overlap_bars as i64
            }
            None => now - bar_duration * context.backfill_bars as i64,
        };
        let request = HistoryRequest {
            symbol: context.symbol.clone(),
            timeframe: context.timeframe.clone(),
            from_ms,
            to_ms: now,
            limit: context.backfill_bars.max(self.inner.config.refresh_overlap_bars + 1),
        };

        let timeout = self.inner.config.fetch_timeout;
        let series =
            match tokio::time::timeout(timeout, self.inner.provider.history_series(&request)).await
            {
                Err(_elapsed) => {
                    // A timed-out call is an ordinary fetch error; retrying
                    // here would stack a second stall on top of the first.
                    self.mark_fetch_error(
                        id,
                        &EngineError::FetchTimeout {
                            timeout_ms: timeout.as_millis() as u64,
                        },
                    );
                    return;
                }
                Ok(Err(err)) => {
                    self.mark_fetch_error(id, &err);
                    return;
                }
                Ok(Ok(series)) => series,
            };

        if series.bars.is_empty() {
            self.inner.telemetry.record_empty_fetch();
            let mut sessions = self.inner.sessions.write();
            if let Some(session) = sessions.get_mut(&id) {
                session.health = SessionHealth::network();
            }
            debug!(%id, "fetch returned no bars, no-op merge");
            return;
        }

        let partition = PartitionKey::from_context(&BrokerContext::new(
            series.broker_id.clone(),
            series.account_id.clone(),
        ));

        let merged = {
            let mut sessions = self.inner.sessions.write();
            let Some(session) = sessions.get_mut(&id) else {
                return;
            };
            let had_bars_before = !session.bars.is_empty();
            let outcome = merge::merge(
                &session.bars,
                &series.bars,
                self.inner.config.max_bars,
                session.last_history_fetch_at_ms,
            );
            match outcome.kind {
                FetchKind::Full => {
                    self.inner.telemetry.record_full_fetch();
                    session.last_full_history_fetch_at_ms = Some(series.fetched_at_ms);
                }
                FetchKind::Incremental => self.inner.telemetry.record_incremental_fetch(),
            }
            debug!(
                %id,
                kind = ?outcome.kind,
                appended = outcome.appended,
                revised = outcome.revised,
                "merged fetch result"
            );
            session.bars = outcome.bars;
            session.last_history_fetch_at_ms = Some(series.fetched_at_ms);
            session.partition = partition;
            session.health = SessionHealth::network();

            // Detection provenance is its own signal: it keys off whether the
            // session held bars before this merge, not off the fetch
            // classification above.
            let source = if had_bars_before {
                DetectionSource::Refresh
            } else {
                DetectionSource::StartupBackfill
            };
            (session.bars.clone(), session.to_cache_entry(now), source)
        };
        let (bars, entry, source) = merged;

        self.inner.cache.store(entry, now);
        self.schedule_flush();

        let detect_context = DetectContext {
            symbol: context.symbol,
            timeframe: context.timeframe,
        };
        let events = self.inner.patterns.detect(&bars, &detect_context, source, now);
        self.publish_events(&events);
    }

    fn refresh_context(&self, id: SessionId) -> Option<RefreshContext> {
        let sessions = self.inner.sessions.read();
        sessions.get(&id).map(|session| RefreshContext {
            symbol: session.symbol.clone(),
            timeframe: session.timeframe.clone(),
            partition: session.partition.clone(),
            backfill_bars: session.backfill_bars,
            tail_timestamp: crate::bar::tail_timestamp(&session.bars),
        })
    }

    /// A failing fetch never clears existing bars; stale-but-present data
    /// beats an empty chart.
    fn mark_fetch_error(&self, id: SessionId, err: &EngineError) {
        warn!(%id, %err, "history fetch failed");
        let mut sessions = self.inner.sessions.write();
        if let Some(session) = sessions.get_mut(&id) {
            session.health = SessionHealth::error(err.to_string());
        }
    }

    fn publish_events(&self, events: &[PatternEvent]) {
        for event in events {
            let _ = self.inner.events_tx.send(event.clone());
        }
    }

    fn schedule_flush(&self) {
        self.inner.flush_notify.notify_one();
    }

    fn spawn_flush_task(&self) {
        let engine = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                engine.inner.flush_notify.notified().await;
                tokio::time::sleep(engine.inner.config.flush_debounce).await;
                engine.flush_now();
            }
        });
        self.inner.tasks.lock().push(handle);
    }

    /// Serialize the shared cache and write it to the storage slot.
    /// Failures degrade durability only: counted, logged, never propagated.
    fn flush_now(&self) {
        let entries = self.inner.cache.export_entries();
        let snapshot = persistence::serialize(entries, now_ms());
        if let Err(err) = persistence::flush(self.inner.store.as_ref(), &snapshot) {
            self.inner.telemetry.record_flush_failure(&err.to_string());
            warn!(%err, "failed to flush history snapshot");
        }
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
