//! Yahoo Finance chart client.
//!
//! Serves index symbols (`^GSPC`, `^NDX`) that the brokerage data feed
//! does not carry. Only daily closes and the latest price are used.

use common::Error;
use serde::Deserialize;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com";

/// Yahoo Finance chart API client.
#[derive(Debug, Clone)]
pub struct YahooClient {
    client: reqwest::Client,
    base_url: String,
}

/// Response from `/v8/finance/chart/{symbol}`.
#[derive(Debug, Deserialize)]
pub struct ChartResponse {
    pub chart: Chart,
}

#[derive(Debug, Deserialize)]
pub struct Chart {
    #[serde(default)]
    pub result: Option<Vec<ChartResult>>,
    #[serde(default)]
    pub error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
pub struct ChartError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct ChartResult {
    pub meta: ChartMeta,
    pub indicators: Indicators,
}

#[derive(Debug, Deserialize)]
pub struct ChartMeta {
    #[serde(rename = "regularMarketPrice", default)]
    pub regular_market_price: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct Indicators {
    #[serde(default)]
    pub quote: Vec<Quote>,
}

#[derive(Debug, Deserialize)]
pub struct Quote {
    /// Closes may contain nulls for halted or partial sessions.
    #[serde(default)]
    pub close: Vec<Option<f64>>,
}

/// Smallest chart range that covers `days` trading sessions.
fn range_for(days: usize) -> &'static str {
    match days {
        0..=240 => "1y",
        241..=480 => "2y",
        481..=1200 => "5y",
        _ => "max",
    }
}

fn encode_symbol(symbol: &str) -> String {
    symbol.replace('^', "%5E")
}

impl YahooClient {
    pub fn new() -> Result<Self, Error> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .user_agent("leveraged-etf-bot/0.1")
            .pool_max_idle_per_host(4)
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Http(format!("failed to build Yahoo HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn fetch_chart(&self, symbol: &str, range: &str) -> Result<ChartResult, Error> {
        let url = format!("{}/v8/finance/chart/{}", self.base_url, encode_symbol(symbol));
        debug!("Fetching Yahoo chart: {} range={}", url, range);

        let resp = self
            .client
            .get(&url)
            .query(&[("range", range), ("interval", "1d")])
            .send()
            .await
            .map_err(|e| Error::Http(format!("Yahoo HTTP error for {symbol}: {e}")))?;

        let status = resp.status().as_u16();
        if status != 200 {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: body.chars().take(500).collect(),
            });
        }

        let payload: ChartResponse = resp
            .json()
            .await
            .map_err(|e| Error::Http(format!("Yahoo JSON parse error for {symbol}: {e}")))?;

        first_result(symbol, payload)
    }

    /// Up to `days` most recent daily closes, oldest first.
    pub async fn daily_closes(&self, symbol: &str, days: usize) -> Result<Vec<f64>, Error> {
        let result = self.fetch_chart(symbol, range_for(days)).await?;
        let mut closes = extract_closes(&result);
        if closes.len() > days {
            closes.drain(..closes.len() - days);
        }
        Ok(closes)
    }

    /// Latest regular-market price, falling back to the last daily close.
    pub async fn latest_price(&self, symbol: &str) -> Result<f64, Error> {
        let result = self.fetch_chart(symbol, "5d").await?;
        result
            .meta
            .regular_market_price
            .or_else(|| extract_closes(&result).last().copied())
            .ok_or_else(|| Error::data_unavailable(symbol, "no price in chart response"))
    }
}

fn first_result(symbol: &str, payload: ChartResponse) -> Result<ChartResult, Error> {
    if let Some(err) = payload.chart.error {
        return Err(Error::data_unavailable(
            symbol,
            format!("{}: {}", err.code, err.description),
        ));
    }
    payload
        .chart
        .result
        .and_then(|mut r| if r.is_empty() { None } else { Some(r.swap_remove(0)) })
        .ok_or_else(|| Error::data_unavailable(symbol, "empty chart result"))
}

fn extract_closes(result: &ChartResult) -> Vec<f64> {
    result
        .indicators
        .quote
        .first()
        .map(|q| q.close.iter().flatten().copied().collect())
        .unwrap_or_default()
}
