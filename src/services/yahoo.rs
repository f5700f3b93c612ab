use crate::models::{CanonicalInterval, Lookback, OhlcvBar};
use crate::services::provider::{MarketDataProvider, ProviderError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use isahc::{config::Configurable, prelude::*, HttpClient};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const BASE_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

// Yahoo rejects requests without a browser-looking user agent
const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Client for the Yahoo Finance v8 chart API
#[derive(Clone)]
pub struct YahooClient {
    client: HttpClient,
    base_url: String,
}

impl YahooClient {
    pub fn new(timeout: Duration) -> Result<Self, ProviderError> {
        let client = HttpClient::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: BASE_URL.to_string(),
        })
    }

    fn chart_url(&self, symbol: &str, interval: CanonicalInterval, lookback: Lookback) -> String {
        format!(
            "{}/{}?range={}&interval={}&includePrePost=false",
            self.base_url,
            symbol,
            lookback.to_range_string(),
            interval.as_str()
        )
    }

    /// Pull bars out of the chart payload. Rows with null prices (halted
    /// sessions, padding at the range edge) are skipped.
    fn parse_chart_response(symbol: &str, payload: &Value) -> Result<Vec<OhlcvBar>, ProviderError> {
        let chart = payload
            .get("chart")
            .ok_or_else(|| ProviderError::InvalidResponse("missing 'chart' object".to_string()))?;

        if let Some(error) = chart.get("error").filter(|e| !e.is_null()) {
            let description = error
                .get("description")
                .and_then(|d| d.as_str())
                .unwrap_or("unknown");
            return Err(ProviderError::Rejected(description.to_string()));
        }

        let result = chart
            .get("result")
            .and_then(|r| r.as_array())
            .and_then(|r| r.first())
            .ok_or_else(|| ProviderError::InvalidResponse("empty 'result' array".to_string()))?;

        // A symbol with no data in the range has no timestamp array at all
        let timestamps = match result.get("timestamp").and_then(|t| t.as_array()) {
            Some(ts) => ts,
            None => {
                debug!(symbol, "chart response carries no timestamps");
                return Ok(Vec::new());
            }
        };

        let quote = result
            .pointer("/indicators/quote/0")
            .ok_or_else(|| ProviderError::InvalidResponse("missing quote indicators".to_string()))?;

        let series = |key: &str| -> Result<&Vec<Value>, ProviderError> {
            quote
                .get(key)
                .and_then(|v| v.as_array())
                .ok_or_else(|| ProviderError::InvalidResponse(format!("missing '{}' series", key)))
        };

        let opens = series("open")?;
        let highs = series("high")?;
        let lows = series("low")?;
        let closes = series("close")?;
        let volumes = series("volume")?;

        let length = timestamps.len();
        if [opens.len(), highs.len(), lows.len(), closes.len(), volumes.len()]
            .iter()
            .any(|&len| len != length)
        {
            return Err(ProviderError::InvalidResponse(
                "inconsistent series lengths".to_string(),
            ));
        }

        let mut bars = Vec::with_capacity(length);
        for i in 0..length {
            let timestamp = match timestamps[i].as_i64() {
                Some(ts) => ts,
                None => continue,
            };
            let time = match DateTime::<Utc>::from_timestamp(timestamp, 0) {
                Some(t) => t,
                None => continue,
            };
            let (open, high, low, close) = match (
                opens[i].as_f64(),
                highs[i].as_f64(),
                lows[i].as_f64(),
                closes[i].as_f64(),
            ) {
                (Some(o), Some(h), Some(l), Some(c)) => (o, h, l, c),
                _ => continue,
            };
            let volume = volumes[i].as_f64().unwrap_or(0.0);

            bars.push(OhlcvBar::new(time, open, high, low, close, volume));
        }

        bars.sort_by_key(|bar| bar.time);
        bars.dedup_by_key(|bar| bar.time);

        Ok(bars)
    }
}

#[async_trait]
impl MarketDataProvider for YahooClient {
    async fn fetch(
        &self,
        symbol: &str,
        interval: CanonicalInterval,
        lookback: Lookback,
    ) -> Result<Vec<OhlcvBar>, ProviderError> {
        let url = self.chart_url(symbol, interval, lookback);
        debug!(symbol, interval = %interval, %lookback, "fetching upstream chart data");

        let request = isahc::Request::builder()
            .uri(&url)
            .method("GET")
            .header("Accept", "application/json, text/plain, */*")
            .header("User-Agent", USER_AGENT)
            .body(())
            .map_err(|e| ProviderError::InvalidResponse(format!("request build error: {}", e)))?;

        let mut response = self.client.send_async(request).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Rejected(format!("HTTP {}", status)));
        }

        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("body read error: {}", e)))?;
        let payload: Value = serde_json::from_str(&text)?;

        let bars = Self::parse_chart_response(symbol, &payload)?;
        debug!(symbol, interval = %interval, bars = bars.len(), "upstream fetch complete");
        Ok(bars)
    }
}
