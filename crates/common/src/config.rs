//! Bot configuration types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Broker environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingEnv {
    Paper,
    Live,
}

/// Top-level bot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Broker environment (paper or live).
    #[serde(default = "default_env")]
    pub environment: TradingEnv,

    /// Brokerage connection settings.
    #[serde(default)]
    pub alpaca: AlpacaConfig,

    /// Reference-rate source settings.
    #[serde(default)]
    pub rates: RateConfig,

    /// Market-data and moving-average settings.
    #[serde(default)]
    pub market: MarketConfig,

    /// Margin eligibility gates.
    #[serde(default)]
    pub margin: MarginConfig,

    /// Monthly budget split across sub-strategies.
    #[serde(default)]
    pub budget: BudgetConfig,

    /// HFEA sleeve (multi-asset, fixed weights).
    #[serde(default)]
    pub hfea: HfeaConfig,

    /// SPXL sleeve (trend-governed).
    #[serde(default)]
    pub spxl: SpxlConfig,

    /// 9-Sig quarterly signal-line sleeve.
    #[serde(default)]
    pub nine_sig: NineSigConfig,

    /// Trend tracker and alerting.
    #[serde(default)]
    pub trend: TrendConfig,

    /// Order submission and fill confirmation.
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Notification sink.
    #[serde(default)]
    pub notify: NotifyConfig,

    /// Persisted state location.
    #[serde(default)]
    pub store: StoreConfig,
}

/// Alpaca endpoints, limits and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlpacaConfig {
    /// API key ID (normally supplied through the environment).
    #[serde(default)]
    pub key_id: String,

    /// API secret (normally supplied through the environment).
    #[serde(default)]
    pub secret_key: String,

    #[serde(default = "default_paper_url")]
    pub paper_base_url: String,

    #[serde(default = "default_live_url")]
    pub live_base_url: String,

    #[serde(default = "default_data_url")]
    pub data_base_url: String,

    /// Basic-plan limit is 200 requests per minute.
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// FRED series used as the margin reference rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateConfig {
    #[serde(default)]
    pub fred_api_key: String,

    #[serde(default = "default_fred_series")]
    pub series_id: String,

    #[serde(default = "default_fred_url")]
    pub base_url: String,
}

/// Moving-average windows and cache freshness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Benchmark used by the margin trend gate and the SPXL sleeve.
    #[serde(default = "default_benchmark")]
    pub benchmark_symbol: String,

    #[serde(default = "default_sma_long")]
    pub sma_long_window: usize,

    #[serde(default = "default_sma_short")]
    pub sma_short_window: usize,

    /// Cached market points older than this are recomputed.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

/// Margin gate thresholds (all fractions, not percentages).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarginConfig {
    /// Leverage fraction granted when every gate passes.
    #[serde(default = "default_max_margin")]
    pub max_margin: f64,

    #[serde(default = "default_rate_ceiling")]
    pub rate_ceiling: f64,

    /// Spread over the reference rate for small accounts.
    #[serde(default = "default_spread_small")]
    pub spread_small_account: f64,

    /// Spread over the reference rate above `equity_threshold`.
    #[serde(default = "default_spread_large")]
    pub spread_large_account: f64,

    #[serde(default = "default_equity_threshold")]
    pub equity_threshold: f64,

    #[serde(default = "default_min_buffer")]
    pub min_buffer: f64,

    /// portfolio_value / equity must stay strictly below this.
    #[serde(default = "default_leverage_cap")]
    pub leverage_cap: f64,
}

/// Per-strategy share of each month's investable capital.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default = "default_weights")]
    pub weights: BTreeMap<String, f64>,
}

/// One asset of a fixed-weight sleeve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetWeight {
    pub symbol: String,
    pub weight: f64,
}

/// HFEA sleeve settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HfeaConfig {
    #[serde(default = "default_hfea_assets")]
    pub assets: Vec<AssetWeight>,

    /// Fraction withheld from buy-side proceeds to cover fees and drift.
    #[serde(default = "default_fee_margin")]
    pub fee_margin: f64,

    /// Trades smaller than this notional are skipped.
    #[serde(default = "default_min_trade_value")]
    pub min_trade_value: f64,
}

/// SPXL sleeve settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpxlConfig {
    #[serde(default = "default_spxl_symbol")]
    pub symbol: String,

    #[serde(default = "default_fee_margin")]
    pub fee_margin: f64,
}

/// 9-Sig settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NineSigConfig {
    #[serde(default = "default_growth_symbol")]
    pub growth_symbol: String,

    #[serde(default = "default_bond_symbol")]
    pub bond_symbol: String,

    /// Quarterly growth target for the growth asset.
    #[serde(default = "default_growth_rate")]
    pub growth_rate: f64,

    /// Growth-asset share used to seed the first signal line.
    #[serde(default = "default_initial_growth_weight")]
    pub initial_growth_weight: f64,

    /// Differences below this dollar amount are ignored.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,

    /// Bond share above which the excess is moved into the growth asset on a BUY.
    #[serde(default = "default_bond_threshold")]
    pub bond_rebalance_threshold: f64,

    /// Benchmark used by the crash-protection override.
    #[serde(default = "default_crash_benchmark")]
    pub crash_benchmark: String,

    /// Drawdown from the lookback high that suppresses sells.
    #[serde(default = "default_crash_drawdown")]
    pub crash_drawdown: f64,

    /// Trading days scanned for the benchmark high (about two years).
    #[serde(default = "default_crash_lookback")]
    pub crash_lookback_days: usize,

    #[serde(default = "default_max_sell_ignores")]
    pub max_sell_ignores: u32,

    #[serde(default = "default_fee_margin")]
    pub fee_margin: f64,
}

/// Trend tracker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendConfig {
    /// No-trade band around the moving average, in percent.
    #[serde(default = "default_noise_pct")]
    pub noise_threshold_pct: f64,

    /// Minutes before the close that count as the final hour.
    #[serde(default = "default_final_window")]
    pub final_window_minutes: i64,

    /// Extra symbols evaluated for alerts only.
    #[serde(default = "default_watchlist")]
    pub watchlist: Vec<String>,
}

/// Order execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_fill_timeout")]
    pub fill_timeout_secs: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Log intended orders without submitting them.
    #[serde(default)]
    pub dry_run: bool,
}

/// Telegram notification settings; empty token disables delivery.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub telegram_bot_token: String,

    #[serde(default)]
    pub telegram_chat_id: String,
}

/// Document store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
}

// ── Defaults ──────────────────────────────────────────────────────────

fn default_env() -> TradingEnv {
    TradingEnv::Paper
}
fn default_paper_url() -> String {
    "https://paper-api.alpaca.markets".into()
}
fn default_live_url() -> String {
    "https://api.alpaca.markets".into()
}
fn default_data_url() -> String {
    "https://data.alpaca.markets".into()
}
fn default_requests_per_minute() -> u32 {
    200
}
fn default_request_timeout() -> u64 {
    15
}

fn default_fred_series() -> String {
    "FEDFUNDS".into()
}
fn default_fred_url() -> String {
    "https://api.stlouisfed.org".into()
}

fn default_benchmark() -> String {
    "^GSPC".into()
}
fn default_sma_long() -> usize {
    200
}
fn default_sma_short() -> usize {
    50
}
fn default_cache_ttl() -> u64 {
    300
}

fn default_max_margin() -> f64 {
    0.10
}
fn default_rate_ceiling() -> f64 {
    0.08
}
fn default_spread_small() -> f64 {
    0.025
}
fn default_spread_large() -> f64 {
    0.01
}
fn default_equity_threshold() -> f64 {
    100_000.0
}
fn default_min_buffer() -> f64 {
    0.05
}
fn default_leverage_cap() -> f64 {
    1.14
}

fn default_weights() -> BTreeMap<String, f64> {
    BTreeMap::from([
        ("hfea".to_string(), 0.475),
        ("spxl".to_string(), 0.475),
        ("nine_sig".to_string(), 0.05),
    ])
}

fn default_hfea_assets() -> Vec<AssetWeight> {
    vec![
        AssetWeight {
            symbol: "UPRO".into(),
            weight: 0.45,
        },
        AssetWeight {
            symbol: "TMF".into(),
            weight: 0.25,
        },
        AssetWeight {
            symbol: "KMLM".into(),
            weight: 0.30,
        },
    ]
}
fn default_fee_margin() -> f64 {
    0.005
}
fn default_min_trade_value() -> f64 {
    1.0
}
fn default_spxl_symbol() -> String {
    "SPXL".into()
}

fn default_growth_symbol() -> String {
    "TQQQ".into()
}
fn default_bond_symbol() -> String {
    "AGG".into()
}
fn default_growth_rate() -> f64 {
    0.09
}
fn default_initial_growth_weight() -> f64 {
    0.8
}
fn default_tolerance() -> f64 {
    25.0
}
fn default_bond_threshold() -> f64 {
    0.30
}
fn default_crash_benchmark() -> String {
    "^GSPC".into()
}
fn default_crash_drawdown() -> f64 {
    0.30
}
fn default_crash_lookback() -> usize {
    504
}
fn default_max_sell_ignores() -> u32 {
    4
}

fn default_noise_pct() -> f64 {
    1.0
}
fn default_final_window() -> i64 {
    60
}
fn default_watchlist() -> Vec<String> {
    vec!["^NDX".into()]
}

fn default_fill_timeout() -> u64 {
    300
}
fn default_poll_interval() -> u64 {
    5
}

fn default_state_dir() -> String {
    "state".into()
}

impl Default for AlpacaConfig {
    fn default() -> Self {
        Self {
            key_id: String::new(),
            secret_key: String::new(),
            paper_base_url: default_paper_url(),
            live_base_url: default_live_url(),
            data_base_url: default_data_url(),
            requests_per_minute: default_requests_per_minute(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            fred_api_key: String::new(),
            series_id: default_fred_series(),
            base_url: default_fred_url(),
        }
    }
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            benchmark_symbol: default_benchmark(),
            sma_long_window: default_sma_long(),
            sma_short_window: default_sma_short(),
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

impl Default for MarginConfig {
    fn default() -> Self {
        Self {
            max_margin: default_max_margin(),
            rate_ceiling: default_rate_ceiling(),
            spread_small_account: default_spread_small(),
            spread_large_account: default_spread_large(),
            equity_threshold: default_equity_threshold(),
            min_buffer: default_min_buffer(),
            leverage_cap: default_leverage_cap(),
        }
    }
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            weights: default_weights(),
        }
    }
}

impl Default for HfeaConfig {
    fn default() -> Self {
        Self {
            assets: default_hfea_assets(),
            fee_margin: default_fee_margin(),
            min_trade_value: default_min_trade_value(),
        }
    }
}

impl Default for SpxlConfig {
    fn default() -> Self {
        Self {
            symbol: default_spxl_symbol(),
            fee_margin: default_fee_margin(),
        }
    }
}

impl Default for NineSigConfig {
    fn default() -> Self {
        Self {
            growth_symbol: default_growth_symbol(),
            bond_symbol: default_bond_symbol(),
            growth_rate: default_growth_rate(),
            initial_growth_weight: default_initial_growth_weight(),
            tolerance: default_tolerance(),
            bond_rebalance_threshold: default_bond_threshold(),
            crash_benchmark: default_crash_benchmark(),
            crash_drawdown: default_crash_drawdown(),
            crash_lookback_days: default_crash_lookback(),
            max_sell_ignores: default_max_sell_ignores(),
            fee_margin: default_fee_margin(),
        }
    }
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            noise_threshold_pct: default_noise_pct(),
            final_window_minutes: default_final_window(),
            watchlist: default_watchlist(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            fill_timeout_secs: default_fill_timeout(),
            poll_interval_secs: default_poll_interval(),
            dry_run: false,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            environment: default_env(),
            alpaca: AlpacaConfig::default(),
            rates: RateConfig::default(),
            market: MarketConfig::default(),
            margin: MarginConfig::default(),
            budget: BudgetConfig::default(),
            hfea: HfeaConfig::default(),
            spxl: SpxlConfig::default(),
            nine_sig: NineSigConfig::default(),
            trend: TrendConfig::default(),
            execution: ExecutionConfig::default(),
            notify: NotifyConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

/// Regulation T caps initial leverage at 50% of the purchase price.
pub const REG_T_MAX_MARGIN: f64 = 0.5;

impl BotConfig {
    /// Reject configurations the engine cannot run safely.
    pub fn validate(&self) -> Result<(), crate::Error> {
        use crate::Error;

        let weight_sum: f64 = self.budget.weights.values().sum();
        if (weight_sum - 1.0).abs() > 1e-6 {
            return Err(Error::Config(format!(
                "budget.weights must sum to 1.0 (got {:.6})",
                weight_sum
            )));
        }
        if self.budget.weights.values().any(|w| *w < 0.0) {
            return Err(Error::Config("budget.weights must be non-negative".into()));
        }

        let hfea_sum: f64 = self.hfea.assets.iter().map(|a| a.weight).sum();
        if self.hfea.assets.is_empty() || (hfea_sum - 1.0).abs() > 1e-6 {
            return Err(Error::Config(format!(
                "hfea.assets weights must sum to 1.0 (got {:.6})",
                hfea_sum
            )));
        }

        if !(0.0..REG_T_MAX_MARGIN).contains(&self.margin.max_margin) {
            return Err(Error::Config(format!(
                "margin.max_margin must be in [0, {}) (got {})",
                REG_T_MAX_MARGIN, self.margin.max_margin
            )));
        }

        for fee in [
            self.hfea.fee_margin,
            self.spxl.fee_margin,
            self.nine_sig.fee_margin,
        ] {
            if !(0.0..1.0).contains(&fee) {
                return Err(Error::Config(format!("fee_margin out of range: {}", fee)));
            }
        }

        if self.market.sma_long_window == 0 || self.market.sma_short_window == 0 {
            return Err(Error::Config("SMA windows must be positive".into()));
        }
        if self.execution.poll_interval_secs == 0 {
            return Err(Error::Config(
                "execution.poll_interval_secs must be positive".into(),
            ));
        }
        if self.trend.noise_threshold_pct < 0.0 {
            return Err(Error::Config(
                "trend.noise_threshold_pct must be non-negative".into(),
            ));
        }

        Ok(())
    }
}
