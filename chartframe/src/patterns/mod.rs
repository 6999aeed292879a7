//! Bounded, deduplicated pattern detection over newly closed bars.
//!
//! Detectors are pure plug-ins: they see a window of closed bars and return
//! raw candidates. The pipeline owns everything else - windowing (the
//! trailing bar is still forming and excluded), key derivation, process-wide
//! deduplication and provenance tagging.

pub mod detectors;
pub mod key;

use crate::bar::Bar;
use crate::telemetry::TelemetryCollector;
use crate::timeframe::Timeframe;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::sync::Arc;
use tracing::debug;

pub use key::{BoundedKeyCache, pattern_key};

/// Default trailing window of closed bars scanned per pass.
pub const PATTERN_REFRESH_BACKFILL_BARS: usize = 6;

/// Default capacity of the process-global dedupe key cache.
pub const PATTERN_KEY_CACHE_CAPACITY: usize = 20_000;

/// Provenance of a detection pass, for telemetry/analytics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionSource {
    /// Triggered by a push tick.
    Live,
    /// Session already held history before this fetch.
    Refresh,
    /// First successful fetch for a session.
    StartupBackfill,
}

/// Direction of a detected pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternDirection {
    Bullish,
    Bearish,
}

/// Candidate emitted by a detector, before dedupe and tagging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPatternEvent {
    /// Pattern family, e.g. `engulfing`.
    pub family: SmolStr,
    pub direction: PatternDirection,
    /// Timestamps of the bars anchoring the pattern, oldest first.
    pub anchors: Vec<i64>,
}

/// A deduplicated, provenance-tagged pattern event.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PatternEvent {
    /// Stable anchor-derived fingerprint; identical across re-detections.
    pub pattern_key: String,
    pub family: SmolStr,
    pub direction: PatternDirection,
    pub anchors: Vec<i64>,
    pub detected_at_ms: i64,
    pub source: DetectionSource,
}

/// Read-only context handed to detectors alongside the bar window.
#[derive(Debug, Clone)]
pub struct DetectContext {
    pub symbol: SmolStr,
    pub timeframe: Timeframe,
}

/// A pure pattern detector. Windowing and dedupe are the pipeline's job.
pub trait PatternDetector: Send + Sync {
    /// Pattern family this detector emits, used in keys and diagnostics.
    fn family(&self) -> &'static str;

    fn detect(&self, bars: &[Bar], context: &DetectContext) -> Vec<RawPatternEvent>;
}

/// Runs the detector set over newly closed bars and deduplicates results.
pub struct PatternDetectionPipeline {
    detectors: Vec<Box<dyn PatternDetector>>,
    /// Process-global so overlapping ranges across sessions or partition
    /// switches cannot re-report the same structure.
    seen_keys: Mutex<BoundedKeyCache>,
    telemetry: Arc<TelemetryCollector>,
    window_bars: usize,
}

impl PatternDetectionPipeline {
    pub fn new(
        detectors: Vec<Box<dyn PatternDetector>>,
        telemetry: Arc<TelemetryCollector>,
        window_bars: usize,
        key_cache_capacity: usize,
    ) -> Self {
        Self {
            detectors,
            seen_keys: Mutex::new(BoundedKeyCache::new(key_cache_capacity)),
            telemetry,
            window_bars,
        }
    }

    /// Pipeline with the stock detector set and default bounds.
    pub fn with_default_detectors(telemetry: Arc<TelemetryCollector>) -> Self {
        Self::new(
            detectors::default_detectors(),
            telemetry,
            PATTERN_REFRESH_BACKFILL_BARS,
            PATTERN_KEY_CACHE_CAPACITY,
        )
    }

    /// Scan the trailing closed-bar window of `bars` and emit fresh events.
    ///
    /// The last bar of the series is treated as still-forming and never
    /// participates. Already-seen keys are suppressed and counted.
    pub fn detect(
        &self,
        bars: &[Bar],
        context: &DetectContext,
        source: DetectionSource,
        detected_at_ms: i64,
    ) -> Vec<PatternEvent> {
        self.telemetry.record_detection_pass(source);

        // Closed bars end one before the still-forming tail.
        let closed = match bars.len() {
            0 | 1 => return Vec::new(),
            len => &bars[..len - 1],
        };
        let window_start = closed.len().saturating_sub(self.window_bars);
        let window = &closed[window_start..];
        if window.is_empty() {
            return Vec::new();
        }

        let mut events = Vec::new();
        for detector in &self.detectors {
            for raw in detector.detect(window, context) {
                let key = pattern_key(&raw);
                let fresh = self.seen_keys.lock().insert(&key);
                if !fresh {
                    self.telemetry.record_dedupe_suppressed();
                    continue;
                }
                debug!(
                    symbol = %context.symbol,
                    timeframe = %context.timeframe,
                    pattern = %key,
                    ?source,
                    "detected pattern"
                );
                events.push(PatternEvent {
                    pattern_key: key,
                    family: raw.family,
                    direction: raw.direction,
                    anchors: raw.anchors,
                    detected_at_ms,
                    source,
                });
            }
        }
        events
    }

    /// Forget all seen keys (used when the host clears cached state).
    pub fn reset_seen_keys(&self) {
        self.seen_keys.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Emits one event anchored at the window's last bar.
    struct LastBarDetector;

    impl PatternDetector for LastBarDetector {
        fn family(&self) -> &'static str {
            "last_bar"
        }

        fn detect(&self, bars: &[Bar], _context: &DetectContext) -> Vec<RawPatternEvent> {
            bars.last()
                .map(|bar| RawPatternEvent {
                    family: SmolStr::new(self.family()),
                    direction: PatternDirection::Bullish,
                    anchors: vec![bar.t],
                })
                .into_iter()
                .collect()
        }
    }

    fn bar(t: i64) -> Bar {
        Bar::new(t, 1.0, 1.0, 1.0, 1.0, 1.0)
    }

    fn context() -> DetectContext {
        DetectContext {
            symbol: SmolStr::new("EURUSD"),
            timeframe: Timeframe::parse("1h").unwrap(),
        }
    }

    fn pipeline(telemetry: Arc<TelemetryCollector>) -> PatternDetectionPipeline {
        PatternDetectionPipeline::new(vec![Box::new(LastBarDetector)], telemetry, 6, 100)
    }

    #[test]
    fn test_forming_bar_is_excluded() {
        let telemetry = Arc::new(TelemetryCollector::new());
        let pipeline = pipeline(Arc::clone(&telemetry));
        let bars: Vec<Bar> = (0..5).map(|i| bar(i * 1_000)).collect();

        let events = pipeline.detect(&bars, &context(), DetectionSource::Refresh, 99);
        assert_eq!(events.len(), 1);
        // Last closed bar is at index len-2, never the forming tail.
        assert_eq!(events[0].anchors, vec![3_000]);
    }

    #[test]
    fn test_too_short_series_yields_nothing() {
        let telemetry = Arc::new(TelemetryCollector::new());
        let pipeline = pipeline(telemetry);
        assert!(pipeline.detect(&[], &context(), DetectionSource::Live, 0).is_empty());
        assert!(
            pipeline
                .detect(&[bar(1_000)], &context(), DetectionSource::Live, 0)
                .is_empty()
        );
    }

    #[test]
    fn test_repeat_detection_is_suppressed_and_counted() {
        let telemetry = Arc::new(TelemetryCollector::new());
        let pipeline = pipeline(Arc::clone(&telemetry));
        let bars: Vec<Bar> = (0..5).map(|i| bar(i * 1_000)).collect();

        let first = pipeline.detect(&bars, &context(), DetectionSource::StartupBackfill, 1);
        let second = pipeline.detect(&bars, &context(), DetectionSource::Refresh, 2);

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());

        let snapshot = telemetry.snapshot(0, vec![]);
        assert_eq!(snapshot.pattern_detection.dedupe_suppressed, 1);
        assert_eq!(snapshot.pattern_detection.from_startup_backfill, 1);
        assert_eq!(snapshot.pattern_detection.from_refresh, 1);
    }

    #[test]
    fn test_source_tag_is_stamped() {
        let telemetry = Arc::new(TelemetryCollector::new());
        let pipeline = pipeline(telemetry);
        let bars: Vec<Bar> = (0..3).map(|i| bar(i * 1_000)).collect();

        let events = pipeline.detect(&bars, &context(), DetectionSource::Live, 42);
        assert_eq!(events[0].source, DetectionSource::Live);
        assert_eq!(events[0].detected_at_ms, 42);
    }
}
