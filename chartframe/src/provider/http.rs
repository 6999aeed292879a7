//! HTTP provider for the broker bridge REST API.
//!
//! Speaks the bridge's `/history/series` endpoint: a JSON POST carrying
//! symbol/resolution/range, answered with `{ok, bars: [{t,o,h,l,c,v}],
//! fetchedAtMs}`. The engine wraps calls in its own timeout, so this client
//! issues a single attempt with no retry of its own.

use crate::bar::Bar;
use crate::error::EngineError;
use crate::provider::{BrokerContext, HistoryProvider, HistoryRequest, HistorySeries};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use tracing::debug;
use url::Url;

/// Configuration for [`BridgeHttpProvider`].
#[derive(Debug, Clone)]
pub struct BridgeHttpConfig {
    /// Bridge base URL, e.g. `http://127.0.0.1:8001`.
    pub base_url: Url,
    /// Broker identity stamped on every response.
    pub broker_id: SmolStr,
    /// Account identity stamped on every response.
    pub account_id: SmolStr,
}

impl BridgeHttpConfig {
    pub fn new(base_url: Url, broker_id: impl Into<SmolStr>, account_id: impl Into<SmolStr>) -> Self {
        Self {
            base_url,
            broker_id: broker_id.into(),
            account_id: account_id.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SeriesRequestBody<'a> {
    symbol: &'a str,
    resolution: &'a str,
    from: i64,
    to: i64,
    limit: usize,
}

#[derive(Debug, Deserialize)]
struct SeriesResponseBody {
    ok: bool,
    #[serde(default)]
    bars: Vec<Bar>,
    #[serde(default, rename = "fetchedAtMs")]
    fetched_at_ms: Option<i64>,
    #[serde(default)]
    error: Option<String>,
}

/// History provider backed by the broker bridge HTTP API.
#[derive(Debug, Clone)]
pub struct BridgeHttpProvider {
    client: Client,
    config: BridgeHttpConfig,
}

impl BridgeHttpProvider {
    pub fn new(config: BridgeHttpConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn series_url(&self) -> Result<Url, EngineError> {
        self.config
            .base_url
            .join("history/series")
            .map_err(|err| EngineError::Fetch(err.to_string()))
    }
}

#[async_trait]
impl HistoryProvider for BridgeHttpProvider {
    async fn history_series(&self, request: &HistoryRequest) -> Result<HistorySeries, EngineError> {
        let url = self.series_url()?;
        let body = SeriesRequestBody {
            symbol: request.symbol.as_str(),
            resolution: request.timeframe.as_str(),
            // The bridge expects epoch seconds in its range fields.
            from: request.from_ms / 1_000,
            to: request.to_ms / 1_000,
            limit: request.limit,
        };

        debug!(
            symbol = %request.symbol,
            timeframe = %request.timeframe,
            limit = request.limit,
            "requesting history series from bridge"
        );

        let response = self.client.post(url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Fetch(format!(
                "bridge returned HTTP {status}"
            )));
        }

        let payload: SeriesResponseBody = response.json().await?;
        if !payload.ok {
            return Err(EngineError::Fetch(
                payload
                    .error
                    .unwrap_or_else(|| "bridge reported ok=false".to_string()),
            ));
        }

        Ok(HistorySeries {
            bars: payload.bars,
            fetched_at_ms: payload
                .fetched_at_ms
                .unwrap_or_else(|| Utc::now().timestamp_millis()),
            broker_id: self.config.broker_id.clone(),
            account_id: self.config.account_id.clone(),
        })
    }

    fn broker_context(&self) -> BrokerContext {
        BrokerContext::new(self.config.broker_id.clone(), self.config.account_id.clone())
    }
}
