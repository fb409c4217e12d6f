//! Market order submission with bounded fill confirmation.

use std::time::Duration;

use common::config::ExecutionConfig;
use common::{Error, Order, OrderStatus, Result, Side};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::ports::{Brokerage, Clock, Notifier};

/// Share quantities are submitted with six decimals.
const QTY_SCALE: f64 = 1_000_000.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Filled { order_id: String, qty: f64, notional: f64 },
    /// Timed out or ended canceled/expired/rejected; treat as not executed.
    Unconfirmed { order_id: String, reason: String },
    Skipped { reason: String },
    DryRun { qty: f64, notional: f64 },
}

impl ExecutionOutcome {
    pub fn filled_notional(&self) -> Option<f64> {
        match self {
            ExecutionOutcome::Filled { notional, .. } => Some(*notional),
            _ => None,
        }
    }

    pub fn describe(&self, side: Side, symbol: &str) -> String {
        match self {
            ExecutionOutcome::Filled { qty, notional, .. } => {
                format!("{} {:.6} {} (${:.2})", side, qty, symbol, notional)
            }
            ExecutionOutcome::Unconfirmed { reason, .. } => {
                format!("{} {} unconfirmed: {}", side, symbol, reason)
            }
            ExecutionOutcome::Skipped { reason } => format!("{} {} skipped: {}", side, symbol, reason),
            ExecutionOutcome::DryRun { qty, notional } => {
                format!("[dry-run] {} {:.6} {} (~${:.2})", side, qty, symbol, notional)
            }
        }
    }
}

/// Round a share quantity down to the submitted precision.
pub fn floor_qty(qty: f64) -> f64 {
    (qty * QTY_SCALE).floor() / QTY_SCALE
}

pub struct OrderExecutor<'a> {
    broker: &'a dyn Brokerage,
    notifier: &'a dyn Notifier,
    clock: &'a dyn Clock,
    cfg: &'a ExecutionConfig,
    min_trade_value: f64,
}

impl<'a> OrderExecutor<'a> {
    pub fn new(
        broker: &'a dyn Brokerage,
        notifier: &'a dyn Notifier,
        clock: &'a dyn Clock,
        cfg: &'a ExecutionConfig,
        min_trade_value: f64,
    ) -> Self {
        Self {
            broker,
            notifier,
            clock,
            cfg,
            min_trade_value,
        }
    }

    /// Buy `amount` dollars of `symbol` at the latest trade price.
    pub async fn buy_notional(&self, symbol: &str, amount: f64) -> Result<ExecutionOutcome> {
        if amount < self.min_trade_value {
            return Ok(ExecutionOutcome::Skipped {
                reason: format!("amount ${:.2} too small", amount),
            });
        }
        let price = self.broker.get_latest_trade(symbol).await?;
        self.execute(symbol, amount / price, Side::Buy, price).await
    }

    /// Sell `amount` dollars of `symbol`, capped at `held_qty` shares.
    pub async fn sell_notional(
        &self,
        symbol: &str,
        amount: f64,
        held_qty: f64,
    ) -> Result<ExecutionOutcome> {
        if amount < self.min_trade_value {
            return Ok(ExecutionOutcome::Skipped {
                reason: format!("amount ${:.2} too small", amount),
            });
        }
        let price = self.broker.get_latest_trade(symbol).await?;
        let qty = (amount / price).min(held_qty);
        self.execute(symbol, qty, Side::Sell, price).await
    }

    /// Sell an exact share quantity (e.g. a full position).
    pub async fn sell_qty(&self, symbol: &str, qty: f64) -> Result<ExecutionOutcome> {
        let price = self.broker.get_latest_trade(symbol).await?;
        self.execute(symbol, qty, Side::Sell, price).await
    }

    async fn execute(&self, symbol: &str, qty: f64, side: Side, price: f64) -> Result<ExecutionOutcome> {
        let qty = floor_qty(qty);
        if !qty.is_finite() || qty <= 0.0 {
            return Ok(ExecutionOutcome::Skipped {
                reason: "quantity rounds to zero".into(),
            });
        }
        if self.cfg.dry_run {
            info!("[dry-run] {} {:.6} {} @ ~{:.2}", side, qty, symbol, price);
            return Ok(ExecutionOutcome::DryRun {
                qty,
                notional: qty * price,
            });
        }

        // Submission is never retried.
        let order = self.broker.submit_order(symbol, qty, side).await?;
        info!("Submitted {} {:.6} {} (order {})", side, qty, symbol, order.id);

        Ok(match self.confirm_fill(&order).await {
            Ok(notional) => ExecutionOutcome::Filled {
                order_id: order.id,
                qty,
                notional,
            },
            Err(e) => ExecutionOutcome::Unconfirmed {
                order_id: order.id,
                reason: e.to_string(),
            },
        })
    }

    /// Poll until filled or terminal, bounded by the fill timeout.
    ///
    /// Returns the realized notional on fill. Otherwise sends exactly one
    /// notification and returns `OrderCanceled` or `OrderTimeout`.
    pub async fn confirm_fill(&self, order: &Order) -> Result<f64> {
        let timeout = chrono::Duration::seconds(self.cfg.fill_timeout_secs as i64);
        let interval = Duration::from_secs(self.cfg.poll_interval_secs);
        let deadline = self.clock.now() + timeout;
        let mut latest = order.clone();

        loop {
            match latest.status {
                OrderStatus::Filled => match latest.filled_notional() {
                    Some(notional) => return Ok(notional),
                    None => {
                        warn!("Order {} filled without an average price", latest.id);
                    }
                },
                OrderStatus::Canceled | OrderStatus::Expired | OrderStatus::Rejected => {
                    let err = Error::OrderCanceled {
                        order_id: latest.id.clone(),
                        status: format!("{:?}", latest.status).to_lowercase(),
                    };
                    return Err(self.report_unfilled(&latest, err).await);
                }
                _ => {}
            }

            if self.clock.now() >= deadline {
                let err = Error::OrderTimeout {
                    order_id: latest.id.clone(),
                    waited_secs: self.cfg.fill_timeout_secs,
                };
                return Err(self.report_unfilled(&latest, err).await);
            }

            self.clock.sleep(interval).await;
            match self.broker.get_order(&order.id).await {
                Ok(o) => latest = o,
                Err(e) => warn!("Polling order {} failed: {}", order.id, e),
            }
        }
    }

    async fn report_unfilled(&self, order: &Order, err: Error) -> Error {
        let text = format!(
            "{} {} {}: {}; treating as not executed",
            order.side, order.qty, order.symbol, err
        );
        error!("{}", text);
        self.notifier.send(&text).await;
        err
    }
}
