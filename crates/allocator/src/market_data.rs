//! Cached price and moving averages per normalized symbol.

use common::config::MarketConfig;
use common::{Error, MarketDataPoint, Result};
use tracing::debug;

use crate::ports::{Clock, MarketData, StateStore};
use crate::trend::classify;

/// Store key for a symbol: leading `^`, `$` or `.` stripped, upper-cased.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol
        .trim()
        .trim_start_matches(['^', '$', '.'])
        .to_ascii_uppercase()
}

/// Mean of the trailing `window` values, if there are enough of them.
pub fn sma(values: &[f64], window: usize) -> Option<f64> {
    if window == 0 || values.len() < window {
        return None;
    }
    let tail = &values[values.len() - window..];
    Some(tail.iter().sum::<f64>() / window as f64)
}

/// Read-through cache over [`MarketData`] persisted in the [`StateStore`].
pub struct MarketDataCache<'a> {
    market: &'a dyn MarketData,
    store: &'a dyn StateStore,
    clock: &'a dyn Clock,
    cfg: &'a MarketConfig,
    noise_threshold_pct: f64,
}

impl<'a> MarketDataCache<'a> {
    pub fn new(
        market: &'a dyn MarketData,
        store: &'a dyn StateStore,
        clock: &'a dyn Clock,
        cfg: &'a MarketConfig,
        noise_threshold_pct: f64,
    ) -> Self {
        Self {
            market,
            store,
            clock,
            cfg,
            noise_threshold_pct,
        }
    }

    /// Fresh point for `symbol`, refreshing from the market-data source when stale.
    ///
    /// Trend state and last alert date survive the refresh. A symbol seen for
    /// the first time is seeded with its current classification.
    pub async fn get(&self, symbol: &str) -> Result<MarketDataPoint> {
        let key = normalize_symbol(symbol);
        let now = self.clock.now();
        let cached = self.store.get_market_point(&key).await?;

        if let Some(point) = &cached {
            if point.is_fresh(now, self.cfg.cache_ttl_secs) {
                debug!("cache hit for {}", key);
                return Ok(point.clone());
            }
        }

        let need = self.cfg.sma_long_window;
        let closes = self.market.daily_closes(symbol, need).await?;
        let sma_long = sma(&closes, need).ok_or_else(|| Error::InsufficientHistory {
            symbol: symbol.to_string(),
            have: closes.len(),
            need,
        })?;
        let sma_short = sma(&closes, self.cfg.sma_short_window);
        let price = self.market.latest_price(symbol).await?;
        if sma_long <= 0.0 || !price.is_finite() {
            return Err(Error::data_unavailable(
                symbol,
                format!("unusable price={} sma={}", price, sma_long),
            ));
        }

        let (state, last_alert_date) = match cached {
            Some(prev) => (prev.state, prev.last_alert_date),
            None => (
                classify(diff_pct(price, sma_long), self.noise_threshold_pct),
                None,
            ),
        };

        let point = MarketDataPoint {
            symbol: key,
            price,
            sma_short,
            sma_long,
            state,
            last_update: now,
            last_alert_date,
        };
        self.store.set_market_point(&point).await?;
        debug!(
            "refreshed {}: price={:.2} sma{}={:.2}",
            point.symbol, price, need, sma_long
        );
        Ok(point)
    }
}

/// Percent distance of `price` from `sma`.
pub fn diff_pct(price: f64, sma: f64) -> f64 {
    (price - sma) / sma * 100.0
}
