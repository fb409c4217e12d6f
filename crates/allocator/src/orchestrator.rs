//! Cycle orchestration: guards, strategy dispatch, reporting.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};
use common::{
    BotConfig, Error, MarketClock, Period, ReservedBalance, Result, Side, TrendState,
};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::budget::{BudgetAllocator, InvestmentBudget, ReserveClaim};
use crate::exec::OrderExecutor;
use crate::journal::TradeJournal;
use crate::margin::{MarginGateEvaluator, MarginGateResult};
use crate::market_data::{diff_pct, normalize_symbol, MarketDataCache};
use crate::nine_sig::NineSigEngine;
use crate::ports::{Brokerage, Clock, MarketData, Notifier, RateSource, StateStore, TradingCalendar};
use crate::rebalance::{execute_legs, plan_rebalance};
use crate::trend::{classify, TrendSignalTracker};

/// Budget keys for the sub-strategies.
pub const HFEA: &str = "hfea";
pub const SPXL: &str = "spxl";
pub const NINE_SIG: &str = "nine_sig";

/// One trigger of the external scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyId {
    /// First trading day of the month: HFEA buy, SPXL buy-or-reserve, 9-Sig contribution.
    MonthlyInvest,
    /// First trading day of the quarter.
    HfeaRebalance,
    /// Daily trend evaluation and crossover trades.
    TrendCheck,
    /// First trading day of the quarter.
    NineSigQuarterly,
}

impl StrategyId {
    pub const ALL: [StrategyId; 4] = [
        StrategyId::MonthlyInvest,
        StrategyId::HfeaRebalance,
        StrategyId::TrendCheck,
        StrategyId::NineSigQuarterly,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StrategyId::MonthlyInvest => "monthly-invest",
            StrategyId::HfeaRebalance => "hfea-rebalance",
            StrategyId::TrendCheck => "trend-check",
            StrategyId::NineSigQuarterly => "nine-sig-quarterly",
        }
    }

    /// Period whose first trading day gates this strategy, if any.
    pub fn period(self) -> Option<Period> {
        match self {
            StrategyId::MonthlyInvest => Some(Period::Month),
            StrategyId::HfeaRebalance | StrategyId::NineSigQuarterly => Some(Period::Quarter),
            StrategyId::TrendCheck => None,
        }
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        StrategyId::ALL
            .into_iter()
            .find(|id| id.as_str() == wanted)
            .ok_or_else(|| {
                let names: Vec<&str> = StrategyId::ALL.iter().map(|id| id.as_str()).collect();
                Error::Config(format!(
                    "unknown strategy '{}' (expected one of: {})",
                    s,
                    names.join(", ")
                ))
            })
    }
}

/// Everything a cycle needs, built once at startup.
pub struct AppContext {
    pub config: BotConfig,
    pub broker: Arc<dyn Brokerage>,
    pub market: Arc<dyn MarketData>,
    pub rates: Arc<dyn RateSource>,
    pub store: Arc<dyn StateStore>,
    pub notifier: Arc<dyn Notifier>,
    pub calendar: Arc<dyn TradingCalendar>,
    pub clock: Arc<dyn Clock>,
    pub journal: Option<Mutex<TradeJournal>>,
}

impl AppContext {
    /// Append an event to the trade journal, if one is open.
    pub fn record(&self, event: serde_json::Value) {
        if let Some(journal) = &self.journal {
            match journal.lock() {
                Ok(mut j) => j.append(self.clock.now(), event),
                Err(_) => warn!("journal lock poisoned; event dropped"),
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub strategy: StrategyId,
    pub started_at: DateTime<Utc>,
    pub skipped: Option<String>,
    pub margin: Option<MarginGateResult>,
    pub budget: Option<InvestmentBudget>,
    pub actions: Vec<String>,
    pub alerts: Vec<String>,
    pub errors: Vec<String>,
}

impl CycleSummary {
    fn new(strategy: StrategyId, started_at: DateTime<Utc>) -> Self {
        Self {
            strategy,
            started_at,
            skipped: None,
            margin: None,
            budget: None,
            actions: Vec::new(),
            alerts: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Human-readable report for the notification sink.
    pub fn report(&self) -> String {
        let mut lines = vec![format!("[{}] cycle report", self.strategy)];
        if let Some(reason) = &self.skipped {
            lines.push(format!("skipped: {}", reason));
        }
        if let Some(margin) = &self.margin {
            lines.push(margin.summary());
        }
        if let Some(budget) = &self.budget {
            lines.push(format!(
                "investing ${:.2} (cash ${:.2}, reserved ${:.2}, margin ${:.2})",
                budget.total_investing, budget.total_cash, budget.total_reserved, budget.margin_approved
            ));
        }
        lines.extend(self.actions.iter().map(|a| format!("- {}", a)));
        lines.extend(self.errors.iter().map(|e| format!("! {}", e)));
        lines.join("\n")
    }
}

/// Run one strategy cycle. Guards are skipped when `force` is set.
pub async fn run_cycle(ctx: &AppContext, strategy: StrategyId, force: bool) -> Result<CycleSummary> {
    let mut summary = CycleSummary::new(strategy, ctx.clock.now());
    ctx.record(json!({"kind": "cycle_start", "strategy": strategy, "force": force}));

    let session = ctx.calendar.session_now().await?;
    let today = session.session_date();

    if !force {
        if let Some(reason) = guard(ctx, strategy, today).await? {
            info!("[{}] skipped: {}", strategy, reason);
            summary.skipped = Some(reason);
            ctx.record(json!({"kind": "cycle_skipped", "strategy": strategy, "reason": summary.skipped}));
            return Ok(summary);
        }
    }

    let cfg = &ctx.config;
    let cache = MarketDataCache::new(
        ctx.market.as_ref(),
        ctx.store.as_ref(),
        ctx.clock.as_ref(),
        &cfg.market,
        cfg.trend.noise_threshold_pct,
    );
    let executor = OrderExecutor::new(
        ctx.broker.as_ref(),
        ctx.notifier.as_ref(),
        ctx.clock.as_ref(),
        &cfg.execution,
        cfg.hfea.min_trade_value,
    );

    info!("[{}] cycle start (session {})", strategy, today);
    let result = match strategy {
        StrategyId::MonthlyInvest => monthly_invest(ctx, &cache, &executor, &mut summary).await,
        StrategyId::HfeaRebalance => hfea_rebalance(ctx, &executor, &mut summary).await,
        StrategyId::TrendCheck => trend_check(ctx, &cache, &executor, &session, &mut summary).await,
        StrategyId::NineSigQuarterly => nine_sig_quarterly(ctx, &executor, today, &mut summary).await,
    };
    if let Err(e) = result {
        error!("[{}] cycle aborted: {}", strategy, e);
        summary.errors.push(e.to_string());
    }

    if !summary.actions.is_empty() || !summary.errors.is_empty() {
        ctx.notifier.send(&summary.report()).await;
    }
    ctx.record(json!({"kind": "cycle_end", "summary": summary}));
    info!(
        "[{}] cycle done: {} actions, {} alerts, {} errors",
        strategy,
        summary.actions.len(),
        summary.alerts.len(),
        summary.errors.len()
    );
    Ok(summary)
}

async fn guard(ctx: &AppContext, strategy: StrategyId, today: NaiveDate) -> Result<Option<String>> {
    if !ctx.calendar.is_trading_day(today).await? {
        return Ok(Some(format!("{} is not a trading day", today)));
    }
    if let Some(period) = strategy.period() {
        if !ctx.calendar.is_first_trading_day_of(period, today).await? {
            let label = match period {
                Period::Month => "month",
                Period::Quarter => "quarter",
            };
            return Ok(Some(format!("{} is not the first trading day of the {}", today, label)));
        }
    }
    Ok(None)
}

// ── Strategies ────────────────────────────────────────────────────────

async fn monthly_invest(
    ctx: &AppContext,
    cache: &MarketDataCache<'_>,
    executor: &OrderExecutor<'_>,
    summary: &mut CycleSummary,
) -> Result<()> {
    let cfg = &ctx.config;

    // Today's classification; the persisted state only drives crossover alerts.
    let spxl_trend = match cache.get(&cfg.market.benchmark_symbol).await {
        Ok(point) => Some(classify(
            diff_pct(point.price, point.sma_long),
            cfg.trend.noise_threshold_pct,
        )),
        Err(e) => {
            summary
                .errors
                .push(format!("{}: benchmark trend unavailable: {}", SPXL, e));
            None
        }
    };

    // A reserve carried into a non-bearish month goes to SPXL before the split.
    let carried = ctx.store.get_reserved(SPXL).await?.amount;
    if carried > 0.0 && spxl_trend.is_some_and(|s| !s.is_bearish()) {
        if let Err(e) = invest_reserve(ctx, executor, summary).await {
            summary.errors.push(format!("{}: reserve not deployed: {}", SPXL, e));
        }
    }
    let snapshot = ctx.broker.snapshot().await?;

    let gate = MarginGateEvaluator::new(
        &cfg.margin,
        cache,
        ctx.rates.as_ref(),
        &cfg.market.benchmark_symbol,
    )
    .evaluate(&snapshot)
    .await;

    // Unknown trend withholds the reserve, and so does a reserve left undeployed.
    let mut reserve = ctx.store.get_reserved(SPXL).await?;
    let claims = [ReserveClaim {
        strategy: SPXL.to_string(),
        amount: reserve.amount,
        bearish: spxl_trend.map_or(true, TrendState::is_bearish) || reserve.amount > 0.0,
    }];
    let budget = BudgetAllocator::new(&cfg.budget.weights).allocate(&snapshot, &gate, &claims);
    summary.margin = Some(gate);
    ctx.record(json!({"kind": "budget", "budget": budget}));

    // HFEA: fixed-weight buys.
    let hfea_amount = budget.amount(HFEA);
    for asset in &cfg.hfea.assets {
        match executor.buy_notional(&asset.symbol, hfea_amount * asset.weight).await {
            Ok(outcome) => summary
                .actions
                .push(format!("{}: {}", HFEA, outcome.describe(Side::Buy, &asset.symbol))),
            Err(e) => summary.errors.push(format!("{}: {}: {}", HFEA, asset.symbol, e)),
        }
    }

    // SPXL: buy when the benchmark is not bearish, otherwise reserve.
    let spxl_amount = budget.amount(SPXL);
    match spxl_trend {
        None => {}
        Some(state) if state.is_bearish() => {
            if snapshot.is_leveraged() {
                summary.actions.push(format!(
                    "{}: benchmark {}, account leveraged; ${:.2} not reserved",
                    SPXL, state, spxl_amount
                ));
            } else {
                reserve.amount += spxl_amount;
                reserve.updated_at = Some(ctx.clock.now());
                ctx.store.set_reserved(SPXL, &reserve).await?;
                summary.actions.push(format!(
                    "{}: benchmark {}, reserved ${:.2} (total ${:.2})",
                    SPXL, state, spxl_amount, reserve.amount
                ));
            }
        }
        Some(_) => {
            let symbol = &cfg.spxl.symbol;
            match executor
                .buy_notional(symbol, spxl_amount * (1.0 - cfg.spxl.fee_margin))
                .await
            {
                Ok(outcome) => summary
                    .actions
                    .push(format!("{}: {}", SPXL, outcome.describe(Side::Buy, symbol))),
                Err(e) => summary.errors.push(format!("{}: {}: {}", SPXL, symbol, e)),
            }
        }
    }

    // 9-Sig: monthly contribution goes to the bond asset.
    let bond = &cfg.nine_sig.bond_symbol;
    match executor.buy_notional(bond, budget.amount(NINE_SIG)).await {
        Ok(outcome) => {
            summary
                .actions
                .push(format!("{}: {}", NINE_SIG, outcome.describe(Side::Buy, bond)));
            if let Some(notional) = outcome.filled_notional() {
                let total = ctx.store.get_contributions().await? + notional;
                ctx.store.set_contributions(total, ctx.clock.now()).await?;
            }
        }
        Err(e) => summary.errors.push(format!("{}: {}: {}", NINE_SIG, bond, e)),
    }

    summary.budget = Some(budget);
    Ok(())
}

async fn hfea_rebalance(
    ctx: &AppContext,
    executor: &OrderExecutor<'_>,
    summary: &mut CycleSummary,
) -> Result<()> {
    let cfg = &ctx.config.hfea;
    let snapshot = ctx.broker.snapshot().await?;
    let values: Vec<(String, f64)> = cfg
        .assets
        .iter()
        .map(|a| (a.symbol.clone(), snapshot.value_of(&a.symbol)))
        .collect();

    let legs = plan_rebalance(&values, &cfg.assets, cfg.fee_margin, cfg.min_trade_value);
    ctx.record(json!({"kind": "rebalance_plan", "values": values, "legs": legs}));
    if legs.is_empty() {
        summary.actions.push(format!("{}: already balanced", HFEA));
        return Ok(());
    }

    let report = execute_legs(executor, &snapshot, &legs).await?;
    summary
        .actions
        .extend(report.into_iter().map(|r| format!("{}: {}", HFEA, r)));
    Ok(())
}

async fn trend_check(
    ctx: &AppContext,
    cache: &MarketDataCache<'_>,
    executor: &OrderExecutor<'_>,
    session: &MarketClock,
    summary: &mut CycleSummary,
) -> Result<()> {
    let cfg = &ctx.config;
    let tracker = TrendSignalTracker::new(
        cache,
        ctx.store.as_ref(),
        cfg.trend.noise_threshold_pct,
        cfg.trend.final_window_minutes,
    );

    let benchmark_key = normalize_symbol(&cfg.market.benchmark_symbol);
    let mut symbols = vec![cfg.market.benchmark_symbol.clone()];
    for symbol in &cfg.trend.watchlist {
        if !symbols.iter().any(|s| normalize_symbol(s) == normalize_symbol(symbol)) {
            symbols.push(symbol.clone());
        }
    }

    for symbol in &symbols {
        let eval = match tracker.evaluate(symbol, session).await {
            Ok(eval) => eval,
            Err(e) => {
                summary.errors.push(format!("{}: {}", symbol, e));
                continue;
            }
        };
        ctx.record(json!({"kind": "trend", "evaluation": eval}));

        if let Some(text) = eval.message() {
            ctx.notifier.send(&text).await;
            summary.alerts.push(text);
        }

        if eval.symbol != benchmark_key {
            continue;
        }
        match eval.crossed_to() {
            Some(TrendState::Below) => exit_spxl(ctx, executor, summary).await?,
            Some(TrendState::Above) => invest_reserve(ctx, executor, summary).await?,
            _ => {}
        }
    }
    Ok(())
}

/// Sell the whole SPXL position; confirmed proceeds join the reserve.
async fn exit_spxl(
    ctx: &AppContext,
    executor: &OrderExecutor<'_>,
    summary: &mut CycleSummary,
) -> Result<()> {
    let symbol = &ctx.config.spxl.symbol;
    let snapshot = ctx.broker.snapshot().await?;
    let qty = snapshot.qty_of(symbol);
    if qty <= 0.0 {
        summary.actions.push(format!("{}: no {} position to sell", SPXL, symbol));
        return Ok(());
    }

    let outcome = executor.sell_qty(symbol, qty).await?;
    summary
        .actions
        .push(format!("{}: {}", SPXL, outcome.describe(Side::Sell, symbol)));
    if let Some(notional) = outcome.filled_notional() {
        let mut reserve = ctx.store.get_reserved(SPXL).await?;
        reserve.amount += notional;
        reserve.updated_at = Some(ctx.clock.now());
        ctx.store.set_reserved(SPXL, &reserve).await?;
    }
    Ok(())
}

/// Deploy the reserved balance into SPXL.
async fn invest_reserve(
    ctx: &AppContext,
    executor: &OrderExecutor<'_>,
    summary: &mut CycleSummary,
) -> Result<()> {
    let cfg = &ctx.config.spxl;
    let reserve = ctx.store.get_reserved(SPXL).await?;
    if reserve.amount <= 0.0 {
        summary.actions.push(format!("{}: nothing reserved to invest", SPXL));
        return Ok(());
    }

    let snapshot = ctx.broker.snapshot().await?;
    let amount = reserve.amount.min(snapshot.cash.max(0.0)) * (1.0 - cfg.fee_margin);
    let outcome = executor.buy_notional(&cfg.symbol, amount).await?;
    summary
        .actions
        .push(format!("{}: {}", SPXL, outcome.describe(Side::Buy, &cfg.symbol)));
    if let Some(notional) = outcome.filled_notional() {
        reset_reserve(ctx, notional).await?;
    }
    Ok(())
}

async fn reset_reserve(ctx: &AppContext, invested: f64) -> Result<()> {
    let reset = ReservedBalance {
        amount: 0.0,
        last_invested_value: Some(invested),
        updated_at: Some(ctx.clock.now()),
    };
    ctx.store.set_reserved(SPXL, &reset).await
}

async fn nine_sig_quarterly(
    ctx: &AppContext,
    executor: &OrderExecutor<'_>,
    today: NaiveDate,
    summary: &mut CycleSummary,
) -> Result<()> {
    let snapshot = ctx.broker.snapshot().await?;
    let engine = NineSigEngine::new(
        &ctx.config.nine_sig,
        ctx.market.as_ref(),
        ctx.store.as_ref(),
        ctx.clock.as_ref(),
    );
    let outcome = engine.run_quarter(&snapshot, executor, today).await?;
    ctx.record(json!({"kind": "nine_sig", "outcome": outcome}));

    let d = &outcome.decision;
    summary.actions.push(format!(
        "{}: {} {} ${:.2} (signal line ${:.2}, diff {:+.2})",
        NINE_SIG, outcome.record.quarter_id, d.action, d.amount, d.signal_line, d.difference
    ));
    if let Some(reason) = &d.hold_reason {
        summary.actions.push(format!("{}: {}", NINE_SIG, reason));
    }
    summary
        .actions
        .extend(outcome.trades.iter().map(|t| format!("{}: {}", NINE_SIG, t)));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        t0, FakeBroker, FakeCalendar, FakeClock, FakeMarket, FakeRates, MemoryStore,
        RecordingNotifier,
    };
    use common::{Account, MarketDataPoint};

    struct Harness {
        broker: Arc<FakeBroker>,
        store: Arc<MemoryStore>,
        notifier: Arc<RecordingNotifier>,
        ctx: AppContext,
    }

    fn harness(broker: FakeBroker, market: FakeMarket, calendar: FakeCalendar) -> Harness {
        let broker = Arc::new(broker);
        let store = Arc::new(MemoryStore::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let mut config = BotConfig::default();
        config.trend.watchlist.clear();
        let ctx = AppContext {
            config,
            broker: broker.clone(),
            market: Arc::new(market),
            rates: Arc::new(FakeRates(None)),
            store: store.clone(),
            notifier: notifier.clone(),
            calendar: Arc::new(calendar),
            clock: Arc::new(FakeClock::at(t0())),
            journal: None,
        };
        Harness {
            broker,
            store,
            notifier,
            ctx,
        }
    }

    fn account(cash: f64) -> Account {
        Account {
            cash,
            equity: cash,
            portfolio_value: cash,
            maintenance_margin: 0.0,
        }
    }

    fn priced_broker(cash: f64) -> FakeBroker {
        FakeBroker::new(account(cash))
            .with_price("UPRO", 50.0)
            .with_price("TMF", 25.0)
            .with_price("KMLM", 20.0)
            .with_price("SPXL", 100.0)
            .with_price("AGG", 100.0)
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 1).unwrap()
    }

    fn stale_point(state: TrendState) -> MarketDataPoint {
        MarketDataPoint {
            symbol: "GSPC".into(),
            price: 100.0,
            sma_short: None,
            sma_long: 100.0,
            state,
            last_update: t0() - chrono::Duration::hours(1),
            last_alert_date: None,
        }
    }

    #[test]
    fn test_strategy_id_parsing() {
        assert_eq!("trend-check".parse::<StrategyId>().unwrap(), StrategyId::TrendCheck);
        assert_eq!(
            "nine_sig_quarterly".parse::<StrategyId>().unwrap(),
            StrategyId::NineSigQuarterly
        );
        assert!("buy".parse::<StrategyId>().is_err());
        for id in StrategyId::ALL {
            assert_eq!(id.as_str().parse::<StrategyId>().unwrap(), id);
        }
    }

    #[tokio::test]
    async fn test_guard_skips_non_trading_day() {
        let mut calendar = FakeCalendar::open(today(), 300);
        calendar.trading_day = false;
        let h = harness(priced_broker(1000.0), FakeMarket::default(), calendar);

        let summary = run_cycle(&h.ctx, StrategyId::TrendCheck, false).await.unwrap();
        assert!(summary.skipped.is_some());
        assert!(h.broker.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_guard_requires_first_day_of_period() {
        let mut calendar = FakeCalendar::open(today(), 300);
        calendar.first_of_period = false;
        let market = FakeMarket::default().with_series("^GSPC", 110.0, 100.0, 200);
        let h = harness(priced_broker(1000.0), market, calendar);

        let skipped = run_cycle(&h.ctx, StrategyId::MonthlyInvest, false).await.unwrap();
        assert!(skipped.skipped.unwrap().contains("first trading day of the month"));

        let forced = run_cycle(&h.ctx, StrategyId::MonthlyInvest, true).await.unwrap();
        assert!(forced.skipped.is_none());
        assert!(!h.broker.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_monthly_invest_bullish() {
        let market = FakeMarket::default().with_series("^GSPC", 110.0, 100.0, 200);
        let h = harness(priced_broker(1000.0), market, FakeCalendar::open(today(), 300));

        let summary = run_cycle(&h.ctx, StrategyId::MonthlyInvest, false).await.unwrap();
        assert!(summary.is_ok(), "{:?}", summary.errors);

        let budget = summary.budget.unwrap();
        assert!((budget.total_investing - 1000.0).abs() < 1e-9);
        assert!(!summary.margin.unwrap().allowed);

        let sent = h.broker.submitted();
        let symbols: Vec<&str> = sent.iter().map(|(s, _, _)| s.as_str()).collect();
        assert_eq!(symbols, vec!["UPRO", "TMF", "KMLM", "SPXL", "AGG"]);
        // 475 * 0.45 / 50
        assert!((sent[0].1 - 4.275).abs() < 1e-5);
        // 475 * 0.995 / 100
        assert!((sent[3].1 - 4.72625).abs() < 1e-5);

        assert!((*h.store.contributions.lock().unwrap() - 50.0).abs() < 1e-6);
        assert!(h.store.reserved.lock().unwrap().get(SPXL).is_none());
        assert_eq!(h.notifier.messages().len(), 1);
    }

    fn seed_reserve(store: &MemoryStore, amount: f64) {
        store.reserved.lock().unwrap().insert(
            SPXL.into(),
            ReservedBalance {
                amount,
                last_invested_value: None,
                updated_at: None,
            },
        );
    }

    #[tokio::test]
    async fn test_monthly_invest_ignores_stale_persisted_trend() {
        // Last trend check saw "above"; today the benchmark is 10% below its SMA.
        let market = FakeMarket::default().with_series("^GSPC", 90.0, 100.0, 200);
        let h = harness(priced_broker(1000.0), market, FakeCalendar::open(today(), 300));
        h.store
            .points
            .lock()
            .unwrap()
            .insert("GSPC".into(), stale_point(TrendState::Above));

        run_cycle(&h.ctx, StrategyId::MonthlyInvest, false).await.unwrap();
        assert!(h.broker.submitted().iter().all(|(s, _, _)| s != "SPXL"));
        let reserved = h.store.reserved.lock().unwrap()[SPXL].amount;
        assert!((reserved - 475.0).abs() < 1e-9);
        // Crossover detection still owns the persisted state.
        assert_eq!(h.store.points.lock().unwrap()["GSPC"].state, TrendState::Above);
    }

    #[tokio::test]
    async fn test_monthly_invest_neutral_deploys_carried_reserve() {
        // 0.5% above the SMA is inside the noise band.
        let market = FakeMarket::default().with_series("^GSPC", 100.5, 100.0, 200);
        let h = harness(priced_broker(1000.0), market, FakeCalendar::open(today(), 300));
        seed_reserve(&h.store, 400.0);

        let summary = run_cycle(&h.ctx, StrategyId::MonthlyInvest, false).await.unwrap();
        assert!(summary.is_ok(), "{:?}", summary.errors);

        let sent = h.broker.submitted();
        assert_eq!(sent[0].0, "SPXL");
        assert!((sent[0].1 - 3.98).abs() < 1e-5);

        let reserve = h.store.reserved.lock().unwrap()[SPXL].clone();
        assert_eq!(reserve.amount, 0.0);
        assert!((reserve.last_invested_value.unwrap() - 398.0).abs() < 1e-3);

        // The split covers only what is left after the reserve went to SPXL.
        let budget = summary.budget.unwrap();
        assert!((budget.total_investing - 602.0).abs() < 1e-3);
        let spxl_buys: f64 = sent
            .iter()
            .filter(|(s, _, side)| s == "SPXL" && *side == Side::Buy)
            .map(|(_, qty, _)| qty * 100.0)
            .sum();
        assert!((spxl_buys - (398.0 + 602.0 * 0.475 * 0.995)).abs() < 1e-2);
    }

    #[tokio::test]
    async fn test_monthly_invest_keeps_reserve_while_leveraged() {
        let market = FakeMarket::default().with_series("^GSPC", 90.0, 100.0, 200);
        let broker = FakeBroker::new(Account {
            cash: 1000.0,
            equity: 1000.0,
            portfolio_value: 1200.0,
            maintenance_margin: 0.0,
        })
        .with_price("UPRO", 50.0)
        .with_price("TMF", 25.0)
        .with_price("KMLM", 20.0)
        .with_price("SPXL", 100.0)
        .with_price("AGG", 100.0);
        let h = harness(broker, market, FakeCalendar::open(today(), 300));
        seed_reserve(&h.store, 100.0);

        let summary = run_cycle(&h.ctx, StrategyId::MonthlyInvest, false).await.unwrap();
        assert!(h.broker.submitted().iter().all(|(s, _, _)| s != "SPXL"));
        assert_eq!(h.store.reserved.lock().unwrap()[SPXL].amount, 100.0);
        assert!(summary.actions.iter().any(|a| a.contains("account leveraged")));
    }

    #[tokio::test]
    async fn test_monthly_invest_spxl_failure_still_contributes() {
        let market = FakeMarket::default().with_series("^GSPC", 110.0, 100.0, 200);
        let broker = FakeBroker::new(account(1000.0))
            .with_price("UPRO", 50.0)
            .with_price("TMF", 25.0)
            .with_price("KMLM", 20.0)
            .with_price("AGG", 100.0);
        let h = harness(broker, market, FakeCalendar::open(today(), 300));

        let summary = run_cycle(&h.ctx, StrategyId::MonthlyInvest, false).await.unwrap();
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].starts_with("spxl: SPXL"));
        assert_eq!(h.broker.submitted().last().unwrap().0, "AGG");
        assert!((*h.store.contributions.lock().unwrap() - 50.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_monthly_invest_bearish_reserves_spxl_share() {
        let market = FakeMarket::default().with_series("^GSPC", 90.0, 100.0, 200);
        let h = harness(priced_broker(1000.0), market, FakeCalendar::open(today(), 300));

        run_cycle(&h.ctx, StrategyId::MonthlyInvest, false).await.unwrap();
        assert!(h.broker.submitted().iter().all(|(s, _, _)| s != "SPXL"));
        let reserved = h.store.reserved.lock().unwrap()[SPXL].amount;
        assert!((reserved - 475.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_trend_check_bearish_crossover_sells_spxl() {
        let market = FakeMarket::default().with_series("^GSPC", 90.0, 100.0, 200);
        let broker = priced_broker(0.0).with_position("SPXL", 5.0, 500.0);
        let h = harness(broker, market, FakeCalendar::open(today(), 300));
        h.store
            .points
            .lock()
            .unwrap()
            .insert("GSPC".into(), stale_point(TrendState::Above));

        let summary = run_cycle(&h.ctx, StrategyId::TrendCheck, false).await.unwrap();
        assert_eq!(summary.alerts.len(), 1);
        assert!(summary.alerts[0].contains("above -> below"));
        assert_eq!(h.broker.submitted(), vec![("SPXL".to_string(), 5.0, Side::Sell)]);
        assert!((h.store.reserved.lock().unwrap()[SPXL].amount - 500.0).abs() < 1e-9);

        // Same inputs again: no second crossover, no second sale.
        let again = run_cycle(&h.ctx, StrategyId::TrendCheck, false).await.unwrap();
        assert!(again.alerts.is_empty());
        assert_eq!(h.broker.submitted().len(), 1);
    }

    #[tokio::test]
    async fn test_trend_check_bullish_crossover_invests_reserve() {
        let market = FakeMarket::default().with_series("^GSPC", 110.0, 100.0, 200);
        let h = harness(priced_broker(1000.0), market, FakeCalendar::open(today(), 300));
        h.store
            .points
            .lock()
            .unwrap()
            .insert("GSPC".into(), stale_point(TrendState::Below));
        seed_reserve(&h.store, 400.0);

        run_cycle(&h.ctx, StrategyId::TrendCheck, false).await.unwrap();
        let sent = h.broker.submitted();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].2, Side::Buy);
        assert!((sent[0].1 - 3.98).abs() < 1e-5);

        let reserve = h.store.reserved.lock().unwrap()[SPXL].clone();
        assert_eq!(reserve.amount, 0.0);
        assert!((reserve.last_invested_value.unwrap() - 398.0).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_trend_error_is_reported_not_fatal() {
        let market = FakeMarket::default().with_series("^GSPC", 110.0, 100.0, 50);
        let h = harness(priced_broker(1000.0), market, FakeCalendar::open(today(), 300));

        let summary = run_cycle(&h.ctx, StrategyId::TrendCheck, false).await.unwrap();
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].contains("Insufficient history"));
        assert_eq!(h.notifier.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_nine_sig_shortfall_reports_hold_reason() {
        let broker = FakeBroker::new(account(0.0))
            .with_price("TQQQ", 50.0)
            .with_price("AGG", 100.0)
            .with_position("TQQQ", 20.0, 1000.0)
            .with_position("AGG", 0.2, 20.0);
        let h = harness(broker, FakeMarket::default(), FakeCalendar::open(today(), 300));
        h.store.quarters.lock().unwrap().push(common::QuarterRecord {
            quarter_id: "2026-Q3".into(),
            tqqq_balance: 1000.0,
            bond_balance: 20.0,
            signal_line: 1000.0,
            action: common::SignalAction::Hold,
            contributions: 0.0,
            sell_ignored_streak: 0,
            timestamp: t0() - chrono::Duration::days(90),
        });

        // Line 1090, shortfall 90, only $20 of bond.
        let summary = run_cycle(&h.ctx, StrategyId::NineSigQuarterly, false).await.unwrap();
        assert!(summary.is_ok(), "{:?}", summary.errors);
        assert!(h.broker.submitted().is_empty());
        assert!(summary
            .actions
            .iter()
            .any(|a| a.starts_with("nine_sig: Insufficient funds: AGG balance $20.00")));
        assert_eq!(h.store.quarters.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_hfea_rebalance_runs_legs() {
        let broker = priced_broker(0.0)
            .with_position("UPRO", 14.0, 700.0)
            .with_position("TMF", 6.0, 150.0)
            .with_position("KMLM", 7.5, 150.0);
        let h = harness(broker, FakeMarket::default(), FakeCalendar::open(today(), 300));

        let summary = run_cycle(&h.ctx, StrategyId::HfeaRebalance, false).await.unwrap();
        assert!(summary.is_ok());
        let sides: Vec<(String, Side)> = h
            .broker
            .submitted()
            .into_iter()
            .map(|(s, _, side)| (s, side))
            .collect();
        assert_eq!(
            sides,
            vec![
                ("UPRO".to_string(), Side::Sell),
                ("TMF".to_string(), Side::Buy),
                ("UPRO".to_string(), Side::Sell),
                ("KMLM".to_string(), Side::Buy),
            ]
        );
    }
}
