//! Capital-allocation engine for a multi-strategy leveraged-ETF portfolio.
//!
//! Pipeline per cycle:
//! 1. Market data cache (price + moving averages, 5 minute freshness)
//! 2. Margin gate (four checks, fails closed)
//! 3. Budget allocator (computed once, shared by reference)
//! 4. Strategy engines (trend tracker, 9-Sig, proportional rebalancer)
//! 5. Order execution with bounded fill confirmation

pub mod budget;
pub mod exec;
pub mod journal;
pub mod margin;
pub mod market_data;
pub mod nine_sig;
pub mod orchestrator;
pub mod ports;
pub mod rebalance;
pub mod store;
pub mod trend;

#[cfg(test)]
pub(crate) mod testing;

pub use budget::{BudgetAllocator, InvestmentBudget, ReserveClaim};
pub use exec::{ExecutionOutcome, OrderExecutor};
pub use journal::TradeJournal;
pub use margin::{GateResults, MarginGateEvaluator, MarginGateResult, MarginMetrics};
pub use market_data::{normalize_symbol, MarketDataCache};
pub use nine_sig::{NineSigEngine, SignalDecision};
pub use orchestrator::{run_cycle, AppContext, CycleSummary, StrategyId};
pub use rebalance::{plan_rebalance, RebalanceLeg};
pub use store::{DryRunStore, JsonFileStore};
pub use trend::{classify, TrendAlert, TrendEvaluation, TrendSignalTracker};
