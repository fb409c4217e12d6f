//! Moving-average trend tracker with a noise band and daily alert de-duplication.

use common::{MarketClock, Result, TrendState};
use serde::Serialize;
use tracing::info;

use crate::market_data::{diff_pct, MarketDataCache};
use crate::ports::StateStore;

/// Pure classification of a percent distance from the moving average.
pub fn classify(diff_pct: f64, noise_threshold_pct: f64) -> TrendState {
    if diff_pct > noise_threshold_pct {
        TrendState::Above
    } else if diff_pct < -noise_threshold_pct {
        TrendState::Below
    } else {
        TrendState::Neutral
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrendAlert {
    Crossover { from: TrendState, to: TrendState },
    LastHourConfirmation { state: TrendState },
}

#[derive(Debug, Clone, Serialize)]
pub struct TrendEvaluation {
    pub symbol: String,
    pub price: f64,
    pub sma: f64,
    pub diff_pct: f64,
    pub previous: TrendState,
    pub state: TrendState,
    pub alert: Option<TrendAlert>,
}

impl TrendEvaluation {
    /// Crossover target, if this evaluation changed state.
    pub fn crossed_to(&self) -> Option<TrendState> {
        match self.alert {
            Some(TrendAlert::Crossover { to, .. }) => Some(to),
            _ => None,
        }
    }

    pub fn message(&self) -> Option<String> {
        let alert = self.alert.as_ref()?;
        let text = match alert {
            TrendAlert::Crossover { from, to } => format!(
                "{} crossed {} -> {}: price {:.2} vs SMA {:.2} ({:+.2}%)",
                self.symbol, from, to, self.price, self.sma, self.diff_pct
            ),
            TrendAlert::LastHourConfirmation { state } => format!(
                "{} final-hour check: still {} ({:.2} vs SMA {:.2}, {:+.2}%)",
                self.symbol, state, self.price, self.sma, self.diff_pct
            ),
        };
        Some(text)
    }
}

pub struct TrendSignalTracker<'a> {
    cache: &'a MarketDataCache<'a>,
    store: &'a dyn StateStore,
    noise_threshold_pct: f64,
    final_window_minutes: i64,
}

impl<'a> TrendSignalTracker<'a> {
    pub fn new(
        cache: &'a MarketDataCache<'a>,
        store: &'a dyn StateStore,
        noise_threshold_pct: f64,
        final_window_minutes: i64,
    ) -> Self {
        Self {
            cache,
            store,
            noise_threshold_pct,
            final_window_minutes,
        }
    }

    /// Classify `symbol` against its long SMA and persist the new state.
    pub async fn evaluate(&self, symbol: &str, session: &MarketClock) -> Result<TrendEvaluation> {
        let mut point = self.cache.get(symbol).await?;
        let diff = diff_pct(point.price, point.sma_long);
        let state = classify(diff, self.noise_threshold_pct);
        let previous = point.state;
        let today = session.session_date();

        let alert = if state != previous {
            info!("{} crossover {} -> {} ({:+.2}%)", point.symbol, previous, state, diff);
            Some(TrendAlert::Crossover {
                from: previous,
                to: state,
            })
        } else if session.in_final_window(self.final_window_minutes)
            && point.last_alert_date != Some(today)
        {
            point.last_alert_date = Some(today);
            Some(TrendAlert::LastHourConfirmation { state })
        } else {
            None
        };

        point.state = state;
        self.store.set_market_point(&point).await?;

        Ok(TrendEvaluation {
            symbol: point.symbol,
            price: point.price,
            sma: point.sma_long,
            diff_pct: diff,
            previous,
            state,
            alert,
        })
    }
}
