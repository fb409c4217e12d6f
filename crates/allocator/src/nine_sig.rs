//! 9-Sig quarterly signal-line engine.
//!
//! The growth asset is steered toward a signal line that compounds the
//! previous quarter's balance by a fixed rate. Shortfalls are bought from the
//! bond asset, surpluses sold into it, and sells are suppressed for a bounded
//! number of quarters while the broad market is in a deep drawdown.

use chrono::NaiveDate;
use common::config::NineSigConfig;
use common::{quarter_id, Error, PortfolioSnapshot, QuarterRecord, Result, Side, SignalAction};
use serde::Serialize;
use tracing::{info, warn};

use crate::exec::OrderExecutor;
use crate::ports::{Clock, MarketData, StateStore};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalDecision {
    pub signal_line: f64,
    pub difference: f64,
    pub action: SignalAction,
    /// Dollar amount to move (0 for HOLD and SELL_IGNORED).
    pub amount: f64,
    pub sell_ignored_streak: u32,
    pub drawdown: Option<f64>,
    /// Why a shortfall was held instead of bought.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hold_reason: Option<String>,
}

/// Target growth balance for this quarter.
pub fn signal_line(
    previous: Option<&QuarterRecord>,
    contributions: f64,
    total_portfolio: f64,
    cfg: &NineSigConfig,
) -> f64 {
    match previous {
        Some(prev) => prev.tqqq_balance * (1.0 + cfg.growth_rate) + 0.5 * contributions,
        None => total_portfolio * cfg.initial_growth_weight,
    }
}

/// Pure decision over balances, the previous record and the benchmark drawdown.
pub fn decide(
    growth_balance: f64,
    bond_balance: f64,
    line: f64,
    previous: Option<&QuarterRecord>,
    drawdown: Option<f64>,
    cfg: &NineSigConfig,
) -> SignalDecision {
    let difference = growth_balance - line;
    let prior_streak = previous.map(|p| p.sell_ignored_streak).unwrap_or(0);
    let hold = |hold_reason| SignalDecision {
        signal_line: line,
        difference,
        action: SignalAction::Hold,
        amount: 0.0,
        sell_ignored_streak: 0,
        drawdown,
        hold_reason,
    };

    if difference.abs() < cfg.tolerance {
        return hold(None);
    }

    if difference < 0.0 {
        let total = growth_balance + bond_balance;
        let excess = (bond_balance - cfg.bond_rebalance_threshold * total).max(0.0);
        let amount = difference.abs() + excess;
        if bond_balance < amount {
            let err = Error::InsufficientFunds(format!(
                "{} balance ${:.2} cannot cover ${:.2}",
                cfg.bond_symbol, bond_balance, amount
            ));
            return hold(Some(err.to_string()));
        }
        return SignalDecision {
            signal_line: line,
            difference,
            action: SignalAction::Buy,
            amount,
            sell_ignored_streak: 0,
            drawdown,
            hold_reason: None,
        };
    }

    let crashed = drawdown.is_some_and(|d| d >= cfg.crash_drawdown);
    if crashed && prior_streak < cfg.max_sell_ignores {
        return SignalDecision {
            signal_line: line,
            difference,
            action: SignalAction::SellIgnored,
            amount: 0.0,
            sell_ignored_streak: prior_streak + 1,
            drawdown,
            hold_reason: None,
        };
    }

    SignalDecision {
        signal_line: line,
        difference,
        action: SignalAction::Sell,
        amount: difference,
        sell_ignored_streak: 0,
        drawdown,
        hold_reason: None,
    }
}

/// Fractional decline of the latest close from the highest close.
pub fn drawdown_from_high(closes: &[f64]) -> Option<f64> {
    let last = *closes.last()?;
    let high = closes.iter().copied().fold(f64::MIN, f64::max);
    if high <= 0.0 {
        return None;
    }
    Some(1.0 - last / high)
}

#[derive(Debug, Clone, Serialize)]
pub struct QuarterOutcome {
    pub decision: SignalDecision,
    pub record: QuarterRecord,
    pub trades: Vec<String>,
}

pub struct NineSigEngine<'a> {
    cfg: &'a NineSigConfig,
    market: &'a dyn MarketData,
    store: &'a dyn StateStore,
    clock: &'a dyn Clock,
}

impl<'a> NineSigEngine<'a> {
    pub fn new(
        cfg: &'a NineSigConfig,
        market: &'a dyn MarketData,
        store: &'a dyn StateStore,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            cfg,
            market,
            store,
            clock,
        }
    }

    async fn benchmark_drawdown(&self) -> Result<f64> {
        let symbol = &self.cfg.crash_benchmark;
        let closes = self
            .market
            .daily_closes(symbol, self.cfg.crash_lookback_days)
            .await?;
        drawdown_from_high(&closes)
            .ok_or_else(|| Error::data_unavailable(symbol, "no closes for drawdown"))
    }

    /// Run one quarter: decide, trade, append the record, reset contributions.
    pub async fn run_quarter(
        &self,
        snapshot: &PortfolioSnapshot,
        executor: &OrderExecutor<'_>,
        today: NaiveDate,
    ) -> Result<QuarterOutcome> {
        let cfg = self.cfg;
        let growth = snapshot.value_of(&cfg.growth_symbol);
        let bond = snapshot.value_of(&cfg.bond_symbol);
        let previous = self.store.latest_quarter().await?;
        let contributions = self.store.get_contributions().await?;

        let line = signal_line(previous.as_ref(), contributions, growth + bond, cfg);
        let drawdown = if growth - line >= cfg.tolerance {
            Some(self.benchmark_drawdown().await?)
        } else {
            None
        };
        let decision = decide(growth, bond, line, previous.as_ref(), drawdown, cfg);
        info!(
            "9-Sig {}: growth={:.2} line={:.2} diff={:+.2} -> {} {:.2}",
            quarter_id(today),
            growth,
            line,
            decision.difference,
            decision.action,
            decision.amount
        );

        let mut trades = Vec::new();
        let (mut growth_after, mut bond_after) = (growth, bond);
        match decision.action {
            SignalAction::Buy => {
                let (from, to) = (&cfg.bond_symbol, &cfg.growth_symbol);
                if let Some(moved) = self
                    .swap(executor, snapshot, from, to, decision.amount, &mut trades)
                    .await?
                {
                    bond_after -= moved.0;
                    growth_after += moved.1;
                }
            }
            SignalAction::Sell => {
                let (from, to) = (&cfg.growth_symbol, &cfg.bond_symbol);
                if let Some(moved) = self
                    .swap(executor, snapshot, from, to, decision.amount, &mut trades)
                    .await?
                {
                    growth_after -= moved.0;
                    bond_after += moved.1;
                }
            }
            SignalAction::SellIgnored => {
                warn!(
                    "9-Sig sell suppressed: benchmark drawdown {:.1}% (streak {})",
                    decision.drawdown.unwrap_or(0.0) * 100.0,
                    decision.sell_ignored_streak
                );
            }
            SignalAction::Hold => {
                if let Some(reason) = &decision.hold_reason {
                    warn!("9-Sig shortfall held: {}", reason);
                }
            }
        }

        let record = QuarterRecord {
            quarter_id: quarter_id(today),
            tqqq_balance: growth_after,
            bond_balance: bond_after,
            signal_line: decision.signal_line,
            action: decision.action,
            contributions,
            sell_ignored_streak: decision.sell_ignored_streak,
            timestamp: self.clock.now(),
        };
        self.store.append_quarter(&record).await?;
        self.store.set_contributions(0.0, self.clock.now()).await?;

        Ok(QuarterOutcome {
            decision,
            record,
            trades,
        })
    }

    /// Sell `amount` of `from`, then buy `to` with the proceeds net of fees.
    /// Returns (sold, bought) dollar values when the sell filled.
    async fn swap(
        &self,
        executor: &OrderExecutor<'_>,
        snapshot: &PortfolioSnapshot,
        from: &str,
        to: &str,
        amount: f64,
        trades: &mut Vec<String>,
    ) -> Result<Option<(f64, f64)>> {
        let sell = executor
            .sell_notional(from, amount, snapshot.qty_of(from))
            .await?;
        trades.push(sell.describe(Side::Sell, from));
        let Some(sold) = sell.filled_notional() else {
            return Ok(None);
        };

        let buy = executor
            .buy_notional(to, sold * (1.0 - self.cfg.fee_margin))
            .await?;
        trades.push(buy.describe(Side::Buy, to));
        Ok(Some((sold, buy.filled_notional().unwrap_or(0.0))))
    }
}
