//! Broker history provider seam.
//!
//! The engine never talks to a broker directly; it consumes this trait and
//! leaves transport details (HTTP, IPC, test doubles) to implementations.
//! The provider also exposes the broker/account context the engine derives
//! cache partition keys from.

pub mod http;

use crate::bar::Bar;
use crate::error::EngineError;
use crate::timeframe::Timeframe;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

pub use http::{BridgeHttpProvider, BridgeHttpConfig};

/// Active broker/account identity, the input to partition derivation.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Constructor)]
pub struct BrokerContext {
    pub broker_id: SmolStr,
    pub account_id: SmolStr,
}

/// Cache isolation key derived from the active broker/account context.
///
/// Changing broker or account changes the key, so history fetched under one
/// account can never serve a chart opened under another.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize, derive_more::Display,
)]
pub struct PartitionKey(SmolStr);

impl PartitionKey {
    pub fn from_context(context: &BrokerContext) -> Self {
        let joined = format!(
            "{}|{}",
            context.broker_id.to_lowercase(),
            context.account_id.to_lowercase()
        );
        Self(SmolStr::new(joined))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

/// One history request against the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRequest {
    /// Normalized symbol, e.g. `EURUSD`.
    pub symbol: SmolStr,
    /// Normalized timeframe token.
    pub timeframe: Timeframe,
    /// Inclusive range start, epoch ms.
    pub from_ms: i64,
    /// Inclusive range end, epoch ms.
    pub to_ms: i64,
    /// Upper bound on returned bars; the provider keeps the most recent.
    pub limit: usize,
}

/// Successful provider response.
#[derive(Debug, Clone, PartialEq)]
pub struct HistorySeries {
    /// Bars ordered oldest-first. May be empty (a valid no-op result).
    pub bars: Vec<Bar>,
    /// Provider-side fetch completion time, epoch ms.
    pub fetched_at_ms: i64,
    pub broker_id: SmolStr,
    pub account_id: SmolStr,
}

/// Pluggable source of historical bar series.
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    /// Fetch a bar series. Cancellation/timeout is enforced by the caller.
    async fn history_series(&self, request: &HistoryRequest) -> Result<HistorySeries, EngineError>;

    /// The broker/account identity requests will execute under.
    fn broker_context(&self) -> BrokerContext;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_key_lowercases_and_joins() {
        let context = BrokerContext::new(SmolStr::new("MT5-Demo"), SmolStr::new("1034"));
        assert_eq!(PartitionKey::from_context(&context).as_str(), "mt5-demo|1034");
    }

    #[test]
    fn test_partition_key_isolates_accounts() {
        let demo = BrokerContext::new(SmolStr::new("mt5"), SmolStr::new("demo-1"));
        let live = BrokerContext::new(SmolStr::new("mt5"), SmolStr::new("live-1"));
        assert_ne!(
            PartitionKey::from_context(&demo),
            PartitionKey::from_context(&live)
        );
    }
}
