//! Pattern fingerprints and the bounded dedupe cache.
//!
//! A pattern's key derives only from its anchor bar timestamps (rounded to
//! the second) plus family and direction, so re-detecting the same structure
//! on a later pass over overlapping bars produces an identical key.

use crate::patterns::{PatternDirection, RawPatternEvent};
use std::collections::{HashSet, VecDeque};

/// Build the stable dedupe key for a detected pattern.
pub fn pattern_key(event: &RawPatternEvent) -> String {
    let direction = match event.direction {
        PatternDirection::Bullish => "bullish",
        PatternDirection::Bearish => "bearish",
    };
    let anchors = event
        .anchors
        .iter()
        .map(|ts| (ts / 1_000).to_string())
        .collect::<Vec<_>>()
        .join("-");
    format!("{}:{}:{}", event.family, direction, anchors)
}

/// Fixed-capacity set of already-seen pattern keys.
///
/// Eviction is deterministic: once full, the oldest inserted key leaves
/// first. Insertion order doubles as the eviction order; a re-seen key does
/// not refresh its position.
#[derive(Debug)]
pub struct BoundedKeyCache {
    order: VecDeque<String>,
    seen: HashSet<String>,
    capacity: usize,
}

impl BoundedKeyCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity.min(4_096)),
            seen: HashSet::with_capacity(capacity.min(4_096)),
            capacity: capacity.max(1),
        }
    }

    /// Insert a key; returns `false` if it was already present (suppressed).
    pub fn insert(&mut self, key: &str) -> bool {
        if self.seen.contains(key) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        self.order.push_back(key.to_string());
        self.seen.insert(key.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smol_str::SmolStr;

    #[test]
    fn test_pattern_key_is_stable_across_passes() {
        let event = RawPatternEvent {
            family: SmolStr::new("engulfing"),
            direction: PatternDirection::Bullish,
            anchors: vec![1_700_000_000_123, 1_700_003_600_456],
        };
        // Sub-second jitter in anchor timestamps must not change the key.
        let jittered = RawPatternEvent {
            anchors: vec![1_700_000_000_900, 1_700_003_600_001],
            ..event.clone()
        };
        assert_eq!(pattern_key(&event), pattern_key(&jittered));
        assert_eq!(
            pattern_key(&event),
            "engulfing:bullish:1700000000-1700003600"
        );
    }

    #[test]
    fn test_direction_distinguishes_keys() {
        let bullish = RawPatternEvent {
            family: SmolStr::new("pin_bar"),
            direction: PatternDirection::Bullish,
            anchors: vec![1_000_000],
        };
        let bearish = RawPatternEvent {
            direction: PatternDirection::Bearish,
            ..bullish.clone()
        };
        assert_ne!(pattern_key(&bullish), pattern_key(&bearish));
    }

    #[test]
    fn test_cache_suppresses_repeats() {
        let mut cache = BoundedKeyCache::new(10);
        assert!(cache.insert("a"));
        assert!(cache.insert("b"));
        assert!(!cache.insert("a"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_cache_evicts_oldest_first() {
        let mut cache = BoundedKeyCache::new(2);
        assert!(cache.insert("a"));
        assert!(cache.insert("b"));
        assert!(cache.insert("c")); // evicts "a"
        assert_eq!(cache.len(), 2);
        assert!(cache.insert("a")); // no longer remembered
        assert!(!cache.insert("c"));
    }
}
