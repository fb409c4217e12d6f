//! Domain types shared across the engine and its clients.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ── Brokerage Types ───────────────────────────────────────────────────

/// Order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// Broker-side order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    Accepted,
    PendingNew,
    PartiallyFilled,
    Filled,
    DoneForDay,
    Canceled,
    Expired,
    Replaced,
    PendingCancel,
    Rejected,
    #[serde(other)]
    Unknown,
}

impl OrderStatus {
    /// Statuses after which the order will never fill further.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Expired | OrderStatus::Rejected
        )
    }
}

/// An order as reported by the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub symbol: String,
    pub qty: f64,
    pub side: Side,
    pub status: OrderStatus,
    #[serde(default)]
    pub filled_avg_price: Option<f64>,
    #[serde(default)]
    pub filled_qty: f64,
}

impl Order {
    /// Realized notional of the filled portion.
    pub fn filled_notional(&self) -> Option<f64> {
        self.filled_avg_price.map(|p| p * self.filled_qty)
    }
}

/// Account-level balances.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Account {
    pub cash: f64,
    pub equity: f64,
    pub portfolio_value: f64,
    pub maintenance_margin: f64,
}

/// A single open position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub qty: f64,
    pub market_value: f64,
}

/// Account balances plus positions, read fresh for every decision.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub cash: f64,
    pub equity: f64,
    pub portfolio_value: f64,
    pub maintenance_margin: f64,
    pub positions: HashMap<String, Position>,
}

impl PortfolioSnapshot {
    pub fn new(account: Account, positions: Vec<Position>) -> Self {
        Self {
            cash: account.cash,
            equity: account.equity,
            portfolio_value: account.portfolio_value,
            maintenance_margin: account.maintenance_margin,
            positions: positions
                .into_iter()
                .map(|p| (p.symbol.clone(), p))
                .collect(),
        }
    }

    /// Market value held in `symbol` (0 when flat).
    pub fn value_of(&self, symbol: &str) -> f64 {
        self.positions
            .get(symbol)
            .map(|p| p.market_value)
            .unwrap_or(0.0)
    }

    /// Share quantity held in `symbol` (0 when flat).
    pub fn qty_of(&self, symbol: &str) -> f64 {
        self.positions.get(symbol).map(|p| p.qty).unwrap_or(0.0)
    }

    /// Amount currently borrowed from the broker.
    pub fn borrowed(&self) -> f64 {
        (self.portfolio_value - self.equity).max(0.0)
    }

    pub fn is_leveraged(&self) -> bool {
        self.borrowed() > 0.0
    }
}

/// Market session as reported by the broker clock, in exchange-local time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MarketClock {
    pub timestamp: DateTime<FixedOffset>,
    pub is_open: bool,
    pub next_close: DateTime<FixedOffset>,
}

impl MarketClock {
    /// Exchange-local calendar date.
    pub fn session_date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }

    /// True while the session is open and closes within `window_minutes`.
    pub fn in_final_window(&self, window_minutes: i64) -> bool {
        if !self.is_open {
            return false;
        }
        let remaining = self.next_close - self.timestamp;
        remaining.num_minutes() >= 0 && remaining.num_minutes() < window_minutes
    }
}

/// Calendar period used by the first-trading-day guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Month,
    Quarter,
}

// ── Market Data Types ─────────────────────────────────────────────────

/// Position of price relative to its moving average.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendState {
    Above,
    Below,
    Neutral,
}

impl TrendState {
    /// Bearish means price is clearly below the average; neutral is not bearish.
    pub fn is_bearish(self) -> bool {
        self == TrendState::Below
    }
}

impl fmt::Display for TrendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrendState::Above => write!(f, "above"),
            TrendState::Below => write!(f, "below"),
            TrendState::Neutral => write!(f, "neutral"),
        }
    }
}

/// Cached price and moving averages for one normalized symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDataPoint {
    pub symbol: String,
    pub price: f64,
    #[serde(default)]
    pub sma_short: Option<f64>,
    pub sma_long: f64,
    pub state: TrendState,
    pub last_update: DateTime<Utc>,
    #[serde(default)]
    pub last_alert_date: Option<NaiveDate>,
}

impl MarketDataPoint {
    pub fn is_fresh(&self, now: DateTime<Utc>, max_age_secs: u64) -> bool {
        let age = now - self.last_update;
        age.num_seconds() >= 0 && (age.num_seconds() as u64) < max_age_secs
    }
}

// ── Persisted Strategy State ──────────────────────────────────────────

/// Cash withheld from a strategy during an unfavorable trend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReservedBalance {
    pub amount: f64,
    /// Notional of the position opened when the reserve was last deployed.
    #[serde(default)]
    pub last_invested_value: Option<f64>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Quarterly signal-line decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalAction {
    Buy,
    Sell,
    SellIgnored,
    Hold,
}

impl fmt::Display for SignalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SignalAction::Buy => "BUY",
            SignalAction::Sell => "SELL",
            SignalAction::SellIgnored => "SELL_IGNORED",
            SignalAction::Hold => "HOLD",
        };
        write!(f, "{}", label)
    }
}

/// One quarter of the signal-line recurrence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarterRecord {
    pub quarter_id: String,
    pub tqqq_balance: f64,
    pub bond_balance: f64,
    pub signal_line: f64,
    pub action: SignalAction,
    pub contributions: f64,
    #[serde(default)]
    pub sell_ignored_streak: u32,
    pub timestamp: DateTime<Utc>,
}

/// Quarter label such as `2026-Q3`.
pub fn quarter_id(date: NaiveDate) -> String {
    use chrono::Datelike;
    format!("{}-Q{}", date.year(), (date.month() - 1) / 3 + 1)
}

// ── Notification Types ────────────────────────────────────────────────

/// Result of handing a message to the notification sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Delivered,
    Disabled,
    Failed(String),
}
