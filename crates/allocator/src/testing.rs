//! In-memory collaborators for unit tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use common::{
    Account, DeliveryStatus, Error, MarketClock, MarketDataPoint, Order, OrderStatus, Period,
    Position, QuarterRecord, ReservedBalance, Result, Side,
};

use crate::ports::{
    Brokerage, Clock, MarketData, Notifier, RateSource, StateStore, TradingCalendar,
};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 1, 14, 0, 0).unwrap()
}

// ── Broker ────────────────────────────────────────────────────────────

/// Fills every order at the configured price unless told otherwise.
/// Filled orders move account cash.
pub struct FakeBroker {
    pub account: Mutex<Account>,
    pub positions: Mutex<Vec<Position>>,
    pub prices: Mutex<HashMap<String, f64>>,
    pub submitted: Mutex<Vec<(String, f64, Side)>>,
    /// Status reported by `get_order`; `Filled` by default.
    pub final_status: Mutex<OrderStatus>,
    pub polls: Mutex<u32>,
}

impl FakeBroker {
    pub fn new(account: Account) -> Self {
        Self {
            account: Mutex::new(account),
            positions: Mutex::new(Vec::new()),
            prices: Mutex::new(HashMap::new()),
            submitted: Mutex::new(Vec::new()),
            final_status: Mutex::new(OrderStatus::Filled),
            polls: Mutex::new(0),
        }
    }

    pub fn with_price(self, symbol: &str, price: f64) -> Self {
        self.prices.lock().unwrap().insert(symbol.to_string(), price);
        self
    }

    pub fn with_position(self, symbol: &str, qty: f64, market_value: f64) -> Self {
        self.positions.lock().unwrap().push(Position {
            symbol: symbol.to_string(),
            qty,
            market_value,
        });
        self
    }

    pub fn set_status(&self, status: OrderStatus) {
        *self.final_status.lock().unwrap() = status;
    }

    pub fn submitted(&self) -> Vec<(String, f64, Side)> {
        self.submitted.lock().unwrap().clone()
    }

    fn price(&self, symbol: &str) -> Result<f64> {
        self.prices
            .lock()
            .unwrap()
            .get(symbol)
            .copied()
            .ok_or_else(|| Error::data_unavailable(symbol, "no fake price"))
    }

    fn order(&self, id: &str, status: OrderStatus) -> Result<Order> {
        let submitted = self.submitted.lock().unwrap();
        let idx: usize = id
            .parse()
            .map_err(|_| Error::Other(format!("unknown order {}", id)))?;
        let (symbol, qty, side) = submitted
            .get(idx)
            .cloned()
            .ok_or_else(|| Error::Other(format!("unknown order {}", id)))?;
        drop(submitted);
        let filled = status == OrderStatus::Filled;
        Ok(Order {
            id: id.to_string(),
            filled_avg_price: if filled { Some(self.price(&symbol)?) } else { None },
            filled_qty: if filled { qty } else { 0.0 },
            symbol,
            qty,
            side,
            status,
        })
    }
}

#[async_trait]
impl Brokerage for FakeBroker {
    async fn get_account(&self) -> Result<Account> {
        Ok(*self.account.lock().unwrap())
    }

    async fn list_positions(&self) -> Result<Vec<Position>> {
        Ok(self.positions.lock().unwrap().clone())
    }

    async fn get_latest_trade(&self, symbol: &str) -> Result<f64> {
        self.price(symbol)
    }

    async fn submit_order(&self, symbol: &str, qty: f64, side: Side) -> Result<Order> {
        if *self.final_status.lock().unwrap() == OrderStatus::Filled {
            if let Ok(price) = self.price(symbol) {
                let mut account = self.account.lock().unwrap();
                match side {
                    Side::Buy => account.cash -= qty * price,
                    Side::Sell => account.cash += qty * price,
                }
            }
        }
        let id = {
            let mut submitted = self.submitted.lock().unwrap();
            submitted.push((symbol.to_string(), qty, side));
            (submitted.len() - 1).to_string()
        };
        self.order(&id, OrderStatus::Accepted)
    }

    async fn get_order(&self, order_id: &str) -> Result<Order> {
        *self.polls.lock().unwrap() += 1;
        let status = *self.final_status.lock().unwrap();
        self.order(order_id, status)
    }
}

// ── Market data ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeMarket {
    pub prices: Mutex<HashMap<String, f64>>,
    pub closes: Mutex<HashMap<String, Vec<f64>>>,
    pub fetches: Mutex<u32>,
}

impl FakeMarket {
    /// Flat history at `sma` with the latest price at `price`.
    pub fn with_series(self, symbol: &str, price: f64, sma: f64, days: usize) -> Self {
        self.prices.lock().unwrap().insert(symbol.to_string(), price);
        self.closes
            .lock()
            .unwrap()
            .insert(symbol.to_string(), vec![sma; days]);
        self
    }

    pub fn set_price(&self, symbol: &str, price: f64) {
        self.prices.lock().unwrap().insert(symbol.to_string(), price);
    }
}

#[async_trait]
impl MarketData for FakeMarket {
    async fn latest_price(&self, symbol: &str) -> Result<f64> {
        self.prices
            .lock()
            .unwrap()
            .get(symbol)
            .copied()
            .ok_or_else(|| Error::data_unavailable(symbol, "no fake price"))
    }

    async fn daily_closes(&self, symbol: &str, days: usize) -> Result<Vec<f64>> {
        *self.fetches.lock().unwrap() += 1;
        let closes = self
            .closes
            .lock()
            .unwrap()
            .get(symbol)
            .cloned()
            .ok_or_else(|| Error::data_unavailable(symbol, "no fake history"))?;
        let start = closes.len().saturating_sub(days);
        Ok(closes[start..].to_vec())
    }
}

// ── Rates ─────────────────────────────────────────────────────────────

pub struct FakeRates(pub Option<f64>);

#[async_trait]
impl RateSource for FakeRates {
    async fn reference_rate(&self) -> Result<f64> {
        self.0
            .ok_or_else(|| Error::data_unavailable("FEDFUNDS", "rate source down"))
    }
}

// ── Store ─────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryStore {
    pub reserved: Mutex<BTreeMap<String, ReservedBalance>>,
    pub quarters: Mutex<Vec<QuarterRecord>>,
    pub points: Mutex<BTreeMap<String, MarketDataPoint>>,
    pub contributions: Mutex<f64>,
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get_reserved(&self, strategy: &str) -> Result<ReservedBalance> {
        Ok(self
            .reserved
            .lock()
            .unwrap()
            .get(strategy)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_reserved(&self, strategy: &str, balance: &ReservedBalance) -> Result<()> {
        self.reserved
            .lock()
            .unwrap()
            .insert(strategy.to_string(), balance.clone());
        Ok(())
    }

    async fn append_quarter(&self, record: &QuarterRecord) -> Result<()> {
        self.quarters.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn latest_quarter(&self) -> Result<Option<QuarterRecord>> {
        Ok(self
            .quarters
            .lock()
            .unwrap()
            .iter()
            .max_by_key(|r| r.timestamp)
            .cloned())
    }

    async fn get_market_point(&self, symbol: &str) -> Result<Option<MarketDataPoint>> {
        Ok(self.points.lock().unwrap().get(symbol).cloned())
    }

    async fn set_market_point(&self, point: &MarketDataPoint) -> Result<()> {
        self.points
            .lock()
            .unwrap()
            .insert(point.symbol.clone(), point.clone());
        Ok(())
    }

    async fn get_contributions(&self) -> Result<f64> {
        Ok(*self.contributions.lock().unwrap())
    }

    async fn set_contributions(&self, amount: f64, _at: DateTime<Utc>) -> Result<()> {
        *self.contributions.lock().unwrap() = amount;
        Ok(())
    }
}

// ── Notifier ──────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingNotifier {
    pub messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, text: &str) -> DeliveryStatus {
        self.messages.lock().unwrap().push(text.to_string());
        DeliveryStatus::Delivered
    }
}

// ── Calendar and clock ────────────────────────────────────────────────

pub struct FakeCalendar {
    pub trading_day: bool,
    pub first_of_period: bool,
    pub session: MarketClock,
}

impl FakeCalendar {
    /// Open session, `minutes_to_close` before the 16:00 New York close.
    pub fn open(date: NaiveDate, minutes_to_close: i64) -> Self {
        let close = chrono::FixedOffset::west_opt(4 * 3600)
            .unwrap()
            .from_local_datetime(&date.and_hms_opt(16, 0, 0).unwrap())
            .unwrap();
        Self {
            trading_day: true,
            first_of_period: true,
            session: MarketClock {
                timestamp: close - chrono::Duration::minutes(minutes_to_close),
                is_open: true,
                next_close: close,
            },
        }
    }
}

#[async_trait]
impl TradingCalendar for FakeCalendar {
    async fn is_trading_day(&self, _date: NaiveDate) -> Result<bool> {
        Ok(self.trading_day)
    }

    async fn is_first_trading_day_of(&self, _period: Period, _date: NaiveDate) -> Result<bool> {
        Ok(self.first_of_period)
    }

    async fn session_now(&self) -> Result<MarketClock> {
        Ok(self.session)
    }
}

/// Time only moves when something sleeps.
pub struct FakeClock {
    pub now: Mutex<DateTime<Utc>>,
    pub sleeps: Mutex<u32>,
}

impl FakeClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
            sleeps: Mutex::new(0),
        }
    }

    pub fn advance(&self, secs: i64) {
        *self.now.lock().unwrap() += chrono::Duration::seconds(secs);
    }
}

#[async_trait]
impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        *self.sleeps.lock().unwrap() += 1;
        self.advance(duration.as_secs() as i64);
    }
}
