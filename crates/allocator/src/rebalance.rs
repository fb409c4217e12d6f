//! Proportional N-asset rebalancer: pairwise sells of over-weight assets into
//! under-weight ones, net of a fee margin on the buy side.

use common::config::AssetWeight;
use common::{PortfolioSnapshot, Result, Side};
use serde::Serialize;
use tracing::{info, warn};

use crate::exec::{ExecutionOutcome, OrderExecutor};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RebalanceLeg {
    pub sell_symbol: String,
    pub buy_symbol: String,
    pub sell_value: f64,
    pub buy_value: f64,
}

/// Plan pairwise legs from current values toward target weights.
///
/// Deviations are consumed as legs are produced, so no asset is moved past
/// its target. Legs smaller than `min_trade_value` are dropped.
pub fn plan_rebalance(
    values: &[(String, f64)],
    targets: &[AssetWeight],
    fee_margin: f64,
    min_trade_value: f64,
) -> Vec<RebalanceLeg> {
    let total: f64 = values.iter().map(|(_, v)| v).sum();
    if total <= 0.0 {
        return Vec::new();
    }

    let mut diffs: Vec<(String, f64)> = targets
        .iter()
        .map(|t| {
            let current = values
                .iter()
                .find(|(s, _)| *s == t.symbol)
                .map(|(_, v)| *v)
                .unwrap_or(0.0);
            (t.symbol.clone(), current - total * t.weight)
        })
        .collect();

    let mut legs = Vec::new();
    for i in 0..diffs.len() {
        for j in 0..diffs.len() {
            if i == j || diffs[i].1 <= 0.0 || diffs[j].1 >= 0.0 {
                continue;
            }
            let amount = diffs[i].1.min(-diffs[j].1);
            if amount < min_trade_value {
                continue;
            }
            diffs[i].1 -= amount;
            diffs[j].1 += amount;
            legs.push(RebalanceLeg {
                sell_symbol: diffs[i].0.clone(),
                buy_symbol: diffs[j].0.clone(),
                sell_value: amount,
                buy_value: amount * (1.0 - fee_margin),
            });
        }
    }
    legs
}

/// Execute legs strictly in order; a buy only follows a confirmed sell.
pub async fn execute_legs(
    executor: &OrderExecutor<'_>,
    snapshot: &PortfolioSnapshot,
    legs: &[RebalanceLeg],
) -> Result<Vec<String>> {
    let mut report = Vec::new();
    for leg in legs {
        let sell = executor
            .sell_notional(&leg.sell_symbol, leg.sell_value, snapshot.qty_of(&leg.sell_symbol))
            .await?;
        report.push(sell.describe(Side::Sell, &leg.sell_symbol));

        let confirmed = matches!(
            sell,
            ExecutionOutcome::Filled { .. } | ExecutionOutcome::DryRun { .. }
        );
        if !confirmed {
            warn!(
                "Skipping buy of {}: paired sell of {} not confirmed",
                leg.buy_symbol, leg.sell_symbol
            );
            continue;
        }

        let buy = executor.buy_notional(&leg.buy_symbol, leg.buy_value).await?;
        report.push(buy.describe(Side::Buy, &leg.buy_symbol));
    }
    info!("Rebalance finished: {} legs", legs.len());
    Ok(report)
}
