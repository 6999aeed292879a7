//! Stock candle-shape detectors.
//!
//! These are deliberately small: the engine's contract is the detector seam,
//! not a technical-analysis library. Hosts register their own detectors for
//! anything beyond these two shapes.

use crate::bar::Bar;
use crate::patterns::{DetectContext, PatternDetector, PatternDirection, RawPatternEvent};
use smol_str::SmolStr;

/// Minimum body-to-body ratio for a bar to engulf its predecessor.
const ENGULFING_BODY_RATIO: f64 = 1.0;

/// Two-bar engulfing: a body that fully wraps the prior bar's body in the
/// opposite direction.
pub struct EngulfingDetector;

impl PatternDetector for EngulfingDetector {
    fn family(&self) -> &'static str {
        "engulfing"
    }

    fn detect(&self, bars: &[Bar], _context: &DetectContext) -> Vec<RawPatternEvent> {
        let mut events = Vec::new();
        for pair in bars.windows(2) {
            let (prev, cur) = (&pair[0], &pair[1]);
            if prev.body() <= f64::EPSILON {
                continue;
            }
            if cur.body() / prev.body() < ENGULFING_BODY_RATIO {
                continue;
            }

            let bullish = cur.is_bullish()
                && !prev.is_bullish()
                && cur.o <= prev.c
                && cur.c >= prev.o;
            let bearish = !cur.is_bullish()
                && prev.is_bullish()
                && cur.o >= prev.c
                && cur.c <= prev.o;

            if bullish || bearish {
                events.push(RawPatternEvent {
                    family: SmolStr::new(self.family()),
                    direction: if bullish {
                        PatternDirection::Bullish
                    } else {
                        PatternDirection::Bearish
                    },
                    anchors: vec![prev.t, cur.t],
                });
            }
        }
        events
    }
}

/// Maximum body share of the bar range for a pin bar.
const PIN_BAR_MAX_BODY_SHARE: f64 = 0.34;

/// Minimum tail share of the bar range for a pin bar.
const PIN_BAR_MIN_TAIL_SHARE: f64 = 0.6;

/// Single-bar rejection wick: small body, one dominant tail.
pub struct PinBarDetector;

impl PatternDetector for PinBarDetector {
    fn family(&self) -> &'static str {
        "pin_bar"
    }

    fn detect(&self, bars: &[Bar], _context: &DetectContext) -> Vec<RawPatternEvent> {
        let mut events = Vec::new();
        for bar in bars {
            let range = bar.range();
            if range <= f64::EPSILON {
                continue;
            }
            if bar.body() / range > PIN_BAR_MAX_BODY_SHARE {
                continue;
            }

            let body_high = bar.o.max(bar.c);
            let body_low = bar.o.min(bar.c);
            let lower_tail = (body_low - bar.l) / range;
            let upper_tail = (bar.h - body_high) / range;

            let direction = if lower_tail >= PIN_BAR_MIN_TAIL_SHARE {
                Some(PatternDirection::Bullish)
            } else if upper_tail >= PIN_BAR_MIN_TAIL_SHARE {
                Some(PatternDirection::Bearish)
            } else {
                None
            };

            if let Some(direction) = direction {
                events.push(RawPatternEvent {
                    family: SmolStr::new(self.family()),
                    direction,
                    anchors: vec![bar.t],
                });
            }
        }
        events
    }
}

/// The detector set the engine registers out of the box.
pub fn default_detectors() -> Vec<Box<dyn PatternDetector>> {
    vec![Box::new(EngulfingDetector), Box::new(PinBarDetector)]
}
