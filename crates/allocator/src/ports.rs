//! Collaborator seams consumed by the engine, plus their production adapters.

use std::sync::Arc;
use std::time::Duration;

use alpaca_client::AlpacaRestClient;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use common::{
    Account, DeliveryStatus, Error, MarketClock, MarketDataPoint, Order, Period, Position,
    PortfolioSnapshot, QuarterRecord, ReservedBalance, Result, Side,
};
use fred_client::FredClient;
use telegram_client::TelegramClient;
use tracing::info;
use yahoo_client::YahooClient;

// ── Traits ────────────────────────────────────────────────────────────

/// Brokerage account and order API.
#[async_trait]
pub trait Brokerage: Send + Sync {
    async fn get_account(&self) -> Result<Account>;
    async fn list_positions(&self) -> Result<Vec<Position>>;
    async fn get_latest_trade(&self, symbol: &str) -> Result<f64>;
    async fn submit_order(&self, symbol: &str, qty: f64, side: Side) -> Result<Order>;
    async fn get_order(&self, order_id: &str) -> Result<Order>;

    /// Fresh balances and positions in one value.
    async fn snapshot(&self) -> Result<PortfolioSnapshot> {
        let account = self.get_account().await?;
        let positions = self.list_positions().await?;
        Ok(PortfolioSnapshot::new(account, positions))
    }
}

/// Prices and daily history for tradable tickers and indices.
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn latest_price(&self, symbol: &str) -> Result<f64>;
    /// Most recent `days` daily closes, oldest first.
    async fn daily_closes(&self, symbol: &str, days: usize) -> Result<Vec<f64>>;
}

/// Macro reference rate (fraction, e.g. 0.0433).
#[async_trait]
pub trait RateSource: Send + Sync {
    async fn reference_rate(&self) -> Result<f64>;
}

/// Durable strategy state.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get_reserved(&self, strategy: &str) -> Result<ReservedBalance>;
    async fn set_reserved(&self, strategy: &str, balance: &ReservedBalance) -> Result<()>;

    async fn append_quarter(&self, record: &QuarterRecord) -> Result<()>;
    async fn latest_quarter(&self) -> Result<Option<QuarterRecord>>;

    async fn get_market_point(&self, symbol: &str) -> Result<Option<MarketDataPoint>>;
    async fn set_market_point(&self, point: &MarketDataPoint) -> Result<()>;

    /// Monthly 9-Sig contributions accumulated since the last quarterly run.
    async fn get_contributions(&self) -> Result<f64>;
    async fn set_contributions(&self, amount: f64, at: DateTime<Utc>) -> Result<()>;
}

/// Outbound message sink. Delivery problems are reported, never raised.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> DeliveryStatus;
}

/// Exchange calendar and session clock.
#[async_trait]
pub trait TradingCalendar: Send + Sync {
    async fn is_trading_day(&self, date: NaiveDate) -> Result<bool>;
    async fn is_first_trading_day_of(&self, period: Period, date: NaiveDate) -> Result<bool>;
    async fn session_now(&self) -> Result<MarketClock>;
}

/// Wall clock and sleep, injectable for the fill-poll loop.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    async fn sleep(&self, duration: Duration);
}

// ── Production adapters ───────────────────────────────────────────────

#[async_trait]
impl Brokerage for AlpacaRestClient {
    async fn get_account(&self) -> Result<Account> {
        AlpacaRestClient::get_account(self).await
    }

    async fn list_positions(&self) -> Result<Vec<Position>> {
        AlpacaRestClient::list_positions(self).await
    }

    async fn get_latest_trade(&self, symbol: &str) -> Result<f64> {
        AlpacaRestClient::get_latest_trade(self, symbol).await
    }

    async fn submit_order(&self, symbol: &str, qty: f64, side: Side) -> Result<Order> {
        AlpacaRestClient::submit_order(self, symbol, qty, side).await
    }

    async fn get_order(&self, order_id: &str) -> Result<Order> {
        AlpacaRestClient::get_order(self, order_id).await
    }
}

/// Index symbols (`^GSPC`) go to Yahoo, tradable tickers to Alpaca bars.
pub struct RoutedMarketData {
    alpaca: Arc<AlpacaRestClient>,
    yahoo: YahooClient,
}

impl RoutedMarketData {
    pub fn new(alpaca: Arc<AlpacaRestClient>, yahoo: YahooClient) -> Self {
        Self { alpaca, yahoo }
    }

    fn is_index(symbol: &str) -> bool {
        symbol.starts_with('^')
    }
}

#[async_trait]
impl MarketData for RoutedMarketData {
    async fn latest_price(&self, symbol: &str) -> Result<f64> {
        if Self::is_index(symbol) {
            self.yahoo.latest_price(symbol).await
        } else {
            self.alpaca.get_latest_trade(symbol).await
        }
    }

    async fn daily_closes(&self, symbol: &str, days: usize) -> Result<Vec<f64>> {
        if Self::is_index(symbol) {
            self.yahoo.daily_closes(symbol, days).await
        } else {
            self.alpaca.get_daily_closes(symbol, days).await
        }
    }
}

#[async_trait]
impl RateSource for FredClient {
    async fn reference_rate(&self) -> Result<f64> {
        FredClient::reference_rate(self).await
    }
}

/// Stands in when no FRED key is configured, so the margin gate fails closed.
pub struct NoRateSource;

#[async_trait]
impl RateSource for NoRateSource {
    async fn reference_rate(&self) -> Result<f64> {
        Err(Error::Config("no reference-rate source configured".into()))
    }
}

#[async_trait]
impl Notifier for TelegramClient {
    async fn send(&self, text: &str) -> DeliveryStatus {
        TelegramClient::send(self, text).await
    }
}

/// Used when no chat is configured; messages only reach the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str) -> DeliveryStatus {
        info!("[notify] {}", text);
        DeliveryStatus::Disabled
    }
}

/// Calendar and session clock backed by Alpaca `/v2/calendar` and `/v2/clock`.
pub struct AlpacaCalendar {
    client: Arc<AlpacaRestClient>,
}

impl AlpacaCalendar {
    pub fn new(client: Arc<AlpacaRestClient>) -> Self {
        Self { client }
    }
}

/// First calendar day of the month or quarter containing `date`.
pub fn period_start(period: Period, date: NaiveDate) -> NaiveDate {
    let month = match period {
        Period::Month => date.month(),
        Period::Quarter => (date.month() - 1) / 3 * 3 + 1,
    };
    NaiveDate::from_ymd_opt(date.year(), month, 1).unwrap_or(date)
}

#[async_trait]
impl TradingCalendar for AlpacaCalendar {
    async fn is_trading_day(&self, date: NaiveDate) -> Result<bool> {
        let days = self.client.get_calendar(date, date).await?;
        Ok(days.contains(&date))
    }

    async fn is_first_trading_day_of(&self, period: Period, date: NaiveDate) -> Result<bool> {
        let days = self
            .client
            .get_calendar(period_start(period, date), date)
            .await?;
        Ok(days.first() == Some(&date))
    }

    async fn session_now(&self) -> Result<MarketClock> {
        self.client.get_clock().await
    }
}

/// Real time and `tokio::time::sleep`.
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
