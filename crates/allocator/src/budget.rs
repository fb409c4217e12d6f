//! Monthly budget split, computed once per cycle.

use std::collections::BTreeMap;

use common::PortfolioSnapshot;
use serde::Serialize;
use tracing::info;

use crate::margin::MarginGateResult;

/// A strategy's carry-forward balance and whether its trend currently withholds it.
#[derive(Debug, Clone)]
pub struct ReserveClaim {
    pub strategy: String,
    pub amount: f64,
    pub bearish: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct InvestmentBudget {
    pub total_cash: f64,
    pub total_reserved: f64,
    pub total_available: f64,
    pub margin_approved: f64,
    pub total_investing: f64,
    pub amounts: BTreeMap<String, f64>,
    pub reserved: BTreeMap<String, f64>,
}

impl InvestmentBudget {
    /// Amount allotted to `strategy` (0 when unknown).
    pub fn amount(&self, strategy: &str) -> f64 {
        self.amounts.get(strategy).copied().unwrap_or(0.0)
    }
}

pub struct BudgetAllocator<'a> {
    weights: &'a BTreeMap<String, f64>,
}

impl<'a> BudgetAllocator<'a> {
    /// Weights are validated to sum to 1 at config load.
    pub fn new(weights: &'a BTreeMap<String, f64>) -> Self {
        Self { weights }
    }

    pub fn allocate(
        &self,
        snapshot: &PortfolioSnapshot,
        gate: &MarginGateResult,
        reserves: &[ReserveClaim],
    ) -> InvestmentBudget {
        let withheld: Vec<&ReserveClaim> = reserves.iter().filter(|r| r.bearish).collect();
        let total_reserved: f64 = withheld.iter().map(|r| r.amount.max(0.0)).sum();

        let total_available = (snapshot.cash - total_reserved).max(0.0);
        let margin_approved = if gate.allowed {
            snapshot.equity * gate.target_margin
        } else {
            0.0
        };
        let total_investing = total_available + margin_approved;

        let amounts = self
            .weights
            .iter()
            .map(|(name, w)| (name.clone(), total_investing * w))
            .collect();
        let reserved = withheld
            .iter()
            .map(|r| (r.strategy.clone(), r.amount))
            .collect();

        let budget = InvestmentBudget {
            total_cash: snapshot.cash,
            total_reserved,
            total_available,
            margin_approved,
            total_investing,
            amounts,
            reserved,
        };
        info!(
            "Budget: cash={:.2} reserved={:.2} margin={:.2} investing={:.2}",
            budget.total_cash, budget.total_reserved, budget.margin_approved, budget.total_investing
        );
        budget
    }
}
