//! REST client for the Alpaca API.
//!
//! Covers: account and position queries, latest trades, daily bars,
//! order submission and lookup, market clock and trading calendar.
//! All methods are rate-limited and authenticated with key headers.

use std::error::Error as StdError;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use common::{Account, Error, MarketClock, Order, OrderStatus, Position, Side};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::AlpacaCredentials;
use crate::rate_limit::RateLimiter;

/// IEX is the feed available on the free data plan.
const DATA_FEED: &str = "iex";
const MAX_BARS_PER_PAGE: u32 = 10_000;

fn format_reqwest_error(err: &reqwest::Error) -> String {
    // Keep chained causes so network failures (DNS/TLS/socket) are visible.
    let mut message = err.to_string();
    let mut source = err.source();

    while let Some(cause) = source {
        let cause_msg = cause.to_string();
        if !cause_msg.is_empty() && !message.contains(&cause_msg) {
            message.push_str(": ");
            message.push_str(&cause_msg);
        }
        source = cause.source();
    }

    message
}

fn summarize_response_body(raw: &str) -> String {
    const MAX_CHARS: usize = 800;
    let compact = raw.replace(['\n', '\r'], " ");
    if compact.chars().count() > MAX_CHARS {
        let cut: String = compact.chars().take(MAX_CHARS).collect();
        format!("{}…", cut)
    } else {
        compact
    }
}

/// Alpaca encodes most numeric fields as decimal strings.
fn parse_decimal(field: &str, raw: &str) -> Result<f64, Error> {
    raw.trim()
        .parse::<f64>()
        .map_err(|e| Error::Other(format!("invalid decimal in {}: {:?} ({})", field, raw, e)))
}

fn parse_optional_decimal(field: &str, raw: Option<&str>) -> Result<Option<f64>, Error> {
    match raw {
        Some(s) if !s.trim().is_empty() => parse_decimal(field, s).map(Some),
        _ => Ok(None),
    }
}

// ── Wire types ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AccountWire {
    cash: String,
    equity: String,
    portfolio_value: String,
    #[serde(default)]
    maintenance_margin: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PositionWire {
    symbol: String,
    qty: String,
    market_value: String,
}

#[derive(Debug, Deserialize)]
struct OrderWire {
    id: String,
    symbol: String,
    #[serde(default)]
    qty: Option<String>,
    side: Side,
    status: OrderStatus,
    #[serde(default)]
    filled_avg_price: Option<String>,
    #[serde(default)]
    filled_qty: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateOrderRequest<'a> {
    symbol: &'a str,
    qty: String,
    side: Side,
    #[serde(rename = "type")]
    order_type: &'static str,
    time_in_force: &'static str,
    client_order_id: String,
}

#[derive(Debug, Deserialize)]
struct LatestTradeResponse {
    trade: TradeWire,
}

#[derive(Debug, Deserialize)]
struct TradeWire {
    #[serde(rename = "p")]
    price: f64,
}

#[derive(Debug, Deserialize)]
struct BarsResponse {
    #[serde(default)]
    bars: Option<Vec<BarWire>>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BarWire {
    #[serde(rename = "c")]
    close: f64,
}

#[derive(Debug, Deserialize)]
struct ClockWire {
    timestamp: DateTime<FixedOffset>,
    is_open: bool,
    next_close: DateTime<FixedOffset>,
}

#[derive(Debug, Deserialize)]
struct CalendarDayWire {
    date: NaiveDate,
}

impl TryFrom<AccountWire> for Account {
    type Error = Error;

    fn try_from(w: AccountWire) -> Result<Self, Error> {
        Ok(Account {
            cash: parse_decimal("cash", &w.cash)?,
            equity: parse_decimal("equity", &w.equity)?,
            portfolio_value: parse_decimal("portfolio_value", &w.portfolio_value)?,
            maintenance_margin: parse_optional_decimal(
                "maintenance_margin",
                w.maintenance_margin.as_deref(),
            )?
            .unwrap_or(0.0),
        })
    }
}

impl TryFrom<PositionWire> for Position {
    type Error = Error;

    fn try_from(w: PositionWire) -> Result<Self, Error> {
        Ok(Position {
            qty: parse_decimal("qty", &w.qty)?,
            market_value: parse_decimal("market_value", &w.market_value)?,
            symbol: w.symbol,
        })
    }
}

impl TryFrom<OrderWire> for Order {
    type Error = Error;

    fn try_from(w: OrderWire) -> Result<Self, Error> {
        Ok(Order {
            qty: parse_optional_decimal("qty", w.qty.as_deref())?.unwrap_or(0.0),
            filled_avg_price: parse_optional_decimal(
                "filled_avg_price",
                w.filled_avg_price.as_deref(),
            )?,
            filled_qty: parse_optional_decimal("filled_qty", w.filled_qty.as_deref())?
                .unwrap_or(0.0),
            id: w.id,
            symbol: w.symbol,
            side: w.side,
            status: w.status,
        })
    }
}

// ── Client ────────────────────────────────────────────────────────────

/// Async REST client for the Alpaca trading and data APIs.
#[derive(Debug, Clone)]
pub struct AlpacaRestClient {
    client: reqwest::Client,
    creds: AlpacaCredentials,
    limiter: RateLimiter,
}

impl AlpacaRestClient {
    pub fn new(creds: AlpacaCredentials, requests_per_minute: u32, timeout_secs: u64) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .tcp_keepalive(std::time::Duration::from_secs(30))
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Error::Http(format_reqwest_error(&e)))?;

        Ok(Self {
            client,
            creds,
            limiter: RateLimiter::per_minute(requests_per_minute),
        })
    }

    fn trading_url(&self, path: &str) -> String {
        format!("{}{}", self.creds.base_url, path)
    }

    fn data_url(&self, path: &str) -> String {
        format!("{}{}", self.creds.data_url, path)
    }

    /// Send a prepared request and decode a JSON body, mapping non-2xx to `Error::Api`.
    async fn send_json<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<T, Error> {
        self.limiter.wait().await;

        let resp = req
            .headers(self.creds.headers())
            .send()
            .await
            .map_err(|e| Error::Http(format_reqwest_error(&e)))?;

        let status_code = resp.status().as_u16();
        if status_code == 429 {
            warn!("Rate limited by Alpaca");
            return Err(Error::RateLimited {
                retry_after_ms: 60_000,
            });
        }

        let raw_body = resp.text().await.unwrap_or_default();
        if !(200..300).contains(&status_code) {
            return Err(Error::Api {
                status: status_code,
                message: summarize_response_body(&raw_body),
            });
        }

        serde_json::from_str(&raw_body).map_err(|e| {
            Error::Http(format!(
                "Error decoding response: {}; body={}",
                e,
                summarize_response_body(&raw_body)
            ))
        })
    }

    // ── Read endpoints ────────────────────────────────────────────────

    /// Account balances.
    pub async fn get_account(&self) -> Result<Account, Error> {
        let wire: AccountWire = self
            .send_json(self.client.get(self.trading_url("/v2/account")))
            .await?;
        Account::try_from(wire)
    }

    /// All open positions.
    pub async fn list_positions(&self) -> Result<Vec<Position>, Error> {
        let wire: Vec<PositionWire> = self
            .send_json(self.client.get(self.trading_url("/v2/positions")))
            .await?;
        let positions = wire
            .into_iter()
            .map(Position::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        debug!("Fetched {} positions", positions.len());
        Ok(positions)
    }

    /// Last traded price for a stock symbol.
    pub async fn get_latest_trade(&self, symbol: &str) -> Result<f64, Error> {
        let path = format!("/v2/stocks/{}/trades/latest", symbol);
        let body: LatestTradeResponse = self
            .send_json(
                self.client
                    .get(self.data_url(&path))
                    .query(&[("feed", DATA_FEED)]),
            )
            .await?;
        Ok(body.trade.price)
    }

    /// Up to `days` most recent daily closes, oldest first.
    ///
    /// Handles pagination automatically.
    pub async fn get_daily_closes(&self, symbol: &str, days: usize) -> Result<Vec<f64>, Error> {
        // Trading days are ~70% of calendar days; pad for holidays.
        let lookback = Duration::days((days as i64) * 3 / 2 + 10);
        let start = (Utc::now() - lookback).format("%Y-%m-%d").to_string();
        let path = format!("/v2/stocks/{}/bars", symbol);

        let mut closes = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut req = self.client.get(self.data_url(&path)).query(&[
                ("timeframe", "1Day"),
                ("start", start.as_str()),
                ("adjustment", "all"),
                ("feed", DATA_FEED),
            ]);
            req = req.query(&[("limit", MAX_BARS_PER_PAGE.to_string())]);
            if let Some(ref t) = page_token {
                req = req.query(&[("page_token", t.as_str())]);
            }

            let body: BarsResponse = self.send_json(req).await?;
            let page = body.bars.unwrap_or_default();
            closes.extend(page.into_iter().map(|b| b.close));

            match body.next_page_token {
                Some(t) if !t.is_empty() => page_token = Some(t),
                _ => break,
            }
        }

        debug!("Fetched {} daily bars for {}", closes.len(), symbol);

        if closes.len() > days {
            closes.drain(..closes.len() - days);
        }
        Ok(closes)
    }

    /// Look up one order by id.
    pub async fn get_order(&self, order_id: &str) -> Result<Order, Error> {
        let path = format!("/v2/orders/{}", order_id);
        let wire: OrderWire = self
            .send_json(self.client.get(self.trading_url(&path)))
            .await?;
        Order::try_from(wire)
    }

    /// Current market session.
    pub async fn get_clock(&self) -> Result<MarketClock, Error> {
        let wire: ClockWire = self
            .send_json(self.client.get(self.trading_url("/v2/clock")))
            .await?;
        Ok(MarketClock {
            timestamp: wire.timestamp,
            is_open: wire.is_open,
            next_close: wire.next_close,
        })
    }

    /// Trading days between `start` and `end` inclusive.
    pub async fn get_calendar(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<NaiveDate>, Error> {
        let wire: Vec<CalendarDayWire> = self
            .send_json(self.client.get(self.trading_url("/v2/calendar")).query(&[
                ("start", start.format("%Y-%m-%d").to_string()),
                ("end", end.format("%Y-%m-%d").to_string()),
            ]))
            .await?;
        Ok(wire.into_iter().map(|d| d.date).collect())
    }

    // ── Write endpoints ───────────────────────────────────────────────

    /// Submit a fractional market day order.
    pub async fn submit_order(&self, symbol: &str, qty: f64, side: Side) -> Result<Order, Error> {
        if !(qty.is_finite() && qty > 0.0) {
            return Err(Error::Other(format!(
                "refusing to submit {} order for {} with qty={}",
                side, symbol, qty
            )));
        }

        let body = CreateOrderRequest {
            symbol,
            qty: format!("{:.6}", qty),
            side,
            order_type: "market",
            time_in_force: "day",
            client_order_id: Uuid::new_v4().to_string(),
        };

        debug!("Creating order: {} {} x{}", side, symbol, body.qty);

        let wire: OrderWire = self
            .send_json(self.client.post(self.trading_url("/v2/orders")).json(&body))
            .await?;
        let order = Order::try_from(wire)?;

        debug!("Order placed: id={} status={:?}", order.id, order.status);
        Ok(order)
    }
}
