//! OHLCV bar primitives shared by every layer of the engine.
//!
//! Bars carry epoch-millisecond timestamps and are stored oldest-first.
//! Within any series the timestamp is strictly increasing and unique; OHLC
//! sanity (`h >= max(o, c)`, `l <= min(o, c)`) is the provider's contract
//! and is not re-validated here.

use serde::{Deserialize, Serialize};

/// A single OHLCV bar.
///
/// Field names match the broker bridge wire format (`{t,o,h,l,c,v}`) so the
/// same type deserializes straight off the fetch response and into the
/// persisted snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Bar {
    /// Bar open time in epoch milliseconds.
    pub t: i64,
    /// Open price.
    pub o: f64,
    /// High price.
    pub h: f64,
    /// Low price.
    pub l: f64,
    /// Close price.
    pub c: f64,
    /// Volume (tick volume for brokers that report no real volume).
    pub v: f64,
}

impl Bar {
    pub fn new(t: i64, o: f64, h: f64, l: f64, c: f64, v: f64) -> Self {
        Self { t, o, h, l, c, v }
    }

    /// True if this bar closed higher than it opened.
    pub fn is_bullish(&self) -> bool {
        self.c > self.o
    }

    /// Absolute size of the candle body.
    pub fn body(&self) -> f64 {
        (self.c - self.o).abs()
    }

    /// Full high-to-low range of the bar.
    pub fn range(&self) -> f64 {
        self.h - self.l
    }
}

/// Timestamp of the last bar in a series, if any.
pub fn tail_timestamp(bars: &[Bar]) -> Option<i64> {
    bars.last().map(|bar| bar.t)
}

/// Covered time range `[min_t, max_t]` of an ordered series, if non-empty.
pub fn coverage(bars: &[Bar]) -> Option<(i64, i64)> {
    match (bars.first(), bars.last()) {
        (Some(first), Some(last)) => Some((first.t, last.t)),
        _ => None,
    }
}

/// The most recent `n` bars of a series as a slice.
pub fn last_n(bars: &[Bar], n: usize) -> &[Bar] {
    let start = bars.len().saturating_sub(n);
    &bars[start..]
}
