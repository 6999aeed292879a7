//! Reconciliation of fetch results into a session's bar series.
//!
//! A provider may resend bars the session already holds (including a revised
//! still-forming bar) alongside genuinely new ones. The merge folds both
//! cases into a single ordered series: conflicting timestamps take the newly
//! fetched value, the result is re-sorted ascending and capped to the most
//! recent `max_bars`.

use crate::bar::Bar;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Classification of a completed history fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum FetchKind {
    /// First-ever successful fetch for the session.
    Full,
    /// Any subsequent fetch; mostly extends, occasionally revises the tail.
    Incremental,
}

/// Outcome of merging one fetch result into an existing series.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub bars: Vec<Bar>,
    pub kind: FetchKind,
    /// Bars whose timestamp was not present before the merge.
    pub appended: usize,
    /// Bars whose timestamp existed and whose value was overwritten.
    pub revised: usize,
}

/// Classify a fetch from the session's fetch history.
///
/// The session is the unit of classification: a cache-hydrated session that
/// has never fetched still classifies its first fetch as [`FetchKind::Full`].
pub fn classify(last_history_fetch_at_ms: Option<i64>) -> FetchKind {
    match last_history_fetch_at_ms {
        None => FetchKind::Full,
        Some(_) => FetchKind::Incremental,
    }
}

/// Merge `fetched` into `existing`, preferring fetched values on conflict.
///
/// Timestamps are compared as signed 64-bit milliseconds; no timezone
/// handling happens at this layer. An empty `fetched` is a no-op merge.
pub fn merge(
    existing: &[Bar],
    fetched: &[Bar],
    max_bars: usize,
    last_history_fetch_at_ms: Option<i64>,
) -> MergeOutcome {
    let kind = classify(last_history_fetch_at_ms);

    let mut by_timestamp: BTreeMap<i64, Bar> =
        existing.iter().map(|bar| (bar.t, *bar)).collect();

    let mut appended = 0;
    let mut revised = 0;
    for bar in fetched {
        match by_timestamp.insert(bar.t, *bar) {
            None => appended += 1,
            Some(_) => revised += 1,
        }
    }

    let mut bars: Vec<Bar> = by_timestamp.into_values().collect();
    if bars.len() > max_bars {
        bars.drain(..bars.len() - max_bars);
    }

    MergeOutcome {
        bars,
        kind,
        appended,
        revised,
    }
}
