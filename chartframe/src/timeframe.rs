//! Symbol and timeframe normalization.
//!
//! Every key the engine derives (sessions, cache entries, persisted snapshot
//! entries) is built from normalized tokens, so the same instrument never
//! splits across multiple cache entries because of input spelling.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Canonical timeframe tokens accepted by the broker bridge.
pub const SUPPORTED_TIMEFRAMES: [&str; 7] = ["1m", "5m", "15m", "30m", "1h", "4h", "1d"];

/// A normalized timeframe token such as `1h` or `15m`.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize, derive_more::Display,
)]
pub struct Timeframe(SmolStr);

impl Timeframe {
    /// Normalize a user-facing timeframe spelling into its canonical token.
    ///
    /// Accepts the canonical tokens themselves, letter-first spellings
    /// (`M15` -> `15m`, `H1` -> `1h`), and bare minute counts (`60` -> `1h`,
    /// `15` -> `15m`), mirroring what the bridge resolves server-side.
    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        let lowered = raw.trim().to_lowercase();
        if lowered.is_empty() {
            return Err(EngineError::InvalidTimeframe(raw.to_string()));
        }

        if SUPPORTED_TIMEFRAMES.contains(&lowered.as_str()) {
            return Ok(Self(SmolStr::new(&lowered)));
        }

        // Letter-first spellings: m15, h4, d1.
        let mut chars = lowered.chars();
        if let Some(unit @ ('m' | 'h' | 'd')) = chars.next() {
            let digits = chars.as_str();
            if !digits.is_empty() && digits.chars().all(|ch| ch.is_ascii_digit()) {
                let flipped = format!("{digits}{unit}");
                if SUPPORTED_TIMEFRAMES.contains(&flipped.as_str()) {
                    return Ok(Self(SmolStr::new(&flipped)));
                }
            }
        }

        // Bare minute counts.
        if lowered.chars().all(|ch| ch.is_ascii_digit()) {
            let token = match lowered.as_str() {
                "60" => SmolStr::new("1h"),
                "1" | "5" | "15" | "30" => SmolStr::new(format!("{lowered}m")),
                _ => return Err(EngineError::InvalidTimeframe(raw.to_string())),
            };
            return Ok(Self(token));
        }

        Err(EngineError::InvalidTimeframe(raw.to_string()))
    }

    /// The canonical token, e.g. `"1h"`.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Duration of one bar of this timeframe, in milliseconds.
    pub fn bar_duration_ms(&self) -> i64 {
        const MINUTE_MS: i64 = 60_000;
        match self.0.as_str() {
            "1m" => MINUTE_MS,
            "5m" => 5 * MINUTE_MS,
            "15m" => 15 * MINUTE_MS,
            "30m" => 30 * MINUTE_MS,
            "1h" => 60 * MINUTE_MS,
            "4h" => 240 * MINUTE_MS,
            "1d" => 1_440 * MINUTE_MS,
            _ => unreachable!("constructed only from SUPPORTED_TIMEFRAMES"),
        }
    }
}

/// Normalize a symbol to its canonical uppercase alphanumeric form.
///
/// `eur/usd` and `EURUSD` key the same session and cache entry.
pub fn normalize_symbol(raw: &str) -> SmolStr {
    raw.chars()
        .filter(|ch| ch.is_ascii_alphanumeric())
        .map(|ch| ch.to_ascii_uppercase())
        .collect::<String>()
        .into()
}
