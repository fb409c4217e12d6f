//! Margin eligibility gate. Four checks, all must pass; any error denies margin.

use common::config::MarginConfig;
use common::{Error, PortfolioSnapshot, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::market_data::MarketDataCache;
use crate::ports::RateSource;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct GateResults {
    pub market_trend: bool,
    pub margin_rate: bool,
    pub buffer: bool,
    pub leverage: bool,
}

impl GateResults {
    pub fn all_pass(&self) -> bool {
        self.market_trend && self.margin_rate && self.buffer && self.leverage
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MarginMetrics {
    pub benchmark_price: f64,
    pub benchmark_sma: f64,
    pub reference_rate: f64,
    pub spread: f64,
    pub effective_rate: f64,
    pub buffer: f64,
    pub leverage: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MarginGateResult {
    pub allowed: bool,
    pub target_margin: f64,
    pub gates: GateResults,
    pub metrics: MarginMetrics,
    pub errors: Vec<String>,
}

impl MarginGateResult {
    fn denied(error: String) -> Self {
        Self {
            errors: vec![error],
            ..Self::default()
        }
    }

    pub fn summary(&self) -> String {
        if self.allowed {
            format!("margin approved at {:.0}%", self.target_margin * 100.0)
        } else if !self.errors.is_empty() {
            format!("margin denied (error: {})", self.errors.join("; "))
        } else {
            format!(
                "margin denied (trend={} rate={} buffer={} leverage={})",
                self.gates.market_trend, self.gates.margin_rate, self.gates.buffer, self.gates.leverage
            )
        }
    }
}

pub struct MarginGateEvaluator<'a> {
    cfg: &'a MarginConfig,
    cache: &'a MarketDataCache<'a>,
    rates: &'a dyn RateSource,
    benchmark: &'a str,
}

impl<'a> MarginGateEvaluator<'a> {
    pub fn new(
        cfg: &'a MarginConfig,
        cache: &'a MarketDataCache<'a>,
        rates: &'a dyn RateSource,
        benchmark: &'a str,
    ) -> Self {
        Self {
            cfg,
            cache,
            rates,
            benchmark,
        }
    }

    /// Fetch inputs and evaluate. Never returns an error: failures deny margin.
    pub async fn evaluate(&self, snapshot: &PortfolioSnapshot) -> MarginGateResult {
        match self.collect(snapshot).await {
            Ok(metrics) => {
                let result = evaluate_gates(metrics, self.cfg);
                info!("{}", result.summary());
                result
            }
            Err(e) => {
                warn!("Margin gate evaluation failed, denying margin: {}", e);
                MarginGateResult::denied(e.to_string())
            }
        }
    }

    async fn collect(&self, snapshot: &PortfolioSnapshot) -> Result<MarginMetrics> {
        if snapshot.portfolio_value <= 0.0 || snapshot.equity <= 0.0 {
            return Err(Error::Other(format!(
                "cannot size margin with equity={} portfolio_value={}",
                snapshot.equity, snapshot.portfolio_value
            )));
        }

        let point = self.cache.get(self.benchmark).await?;
        let reference_rate = self.rates.reference_rate().await?;
        let spread = if snapshot.equity <= self.cfg.equity_threshold {
            self.cfg.spread_small_account
        } else {
            self.cfg.spread_large_account
        };
        let pv = snapshot.portfolio_value;

        Ok(MarginMetrics {
            benchmark_price: point.price,
            benchmark_sma: point.sma_long,
            reference_rate,
            spread,
            effective_rate: reference_rate + spread,
            buffer: snapshot.equity / pv - snapshot.maintenance_margin / pv,
            leverage: pv / snapshot.equity,
        })
    }
}

/// Pure gate evaluation over already-fetched metrics.
pub fn evaluate_gates(metrics: MarginMetrics, cfg: &MarginConfig) -> MarginGateResult {
    let gates = GateResults {
        market_trend: metrics.benchmark_price > metrics.benchmark_sma,
        margin_rate: metrics.effective_rate <= cfg.rate_ceiling,
        buffer: metrics.buffer >= cfg.min_buffer,
        leverage: metrics.leverage < cfg.leverage_cap,
    };
    let allowed = gates.all_pass();
    MarginGateResult {
        allowed,
        target_margin: if allowed { cfg.max_margin } else { 0.0 },
        gates,
        metrics,
        errors: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{t0, FakeClock, FakeMarket, FakeRates, MemoryStore};
    use common::config::MarketConfig;
    use common::Account;

    fn passing() -> MarginMetrics {
        MarginMetrics {
            benchmark_price: 5000.0,
            benchmark_sma: 4800.0,
            reference_rate: 0.04,
            spread: 0.025,
            effective_rate: 0.065,
            buffer: 0.7,
            leverage: 1.0,
        }
    }

    #[test]
    fn test_all_gates_pass() {
        let cfg = MarginConfig::default();
        let result = evaluate_gates(passing(), &cfg);
        assert!(result.allowed);
        assert!((result.target_margin - 0.10).abs() < 1e-12);
    }

    #[test]
    fn test_any_single_failure_denies() {
        let cfg = MarginConfig::default();
        let breakers: [fn(&mut MarginMetrics); 4] = [
            |m| m.benchmark_price = 4700.0,
            |m| m.effective_rate = 0.081,
            |m| m.buffer = 0.049,
            |m| m.leverage = 1.14,
        ];
        for brk in breakers {
            let mut m = passing();
            brk(&mut m);
            let result = evaluate_gates(m, &cfg);
            assert!(!result.allowed);
            assert_eq!(result.target_margin, 0.0);
        }
    }

    fn snapshot(equity: f64, pv: f64) -> PortfolioSnapshot {
        PortfolioSnapshot::new(
            Account {
                cash: 1000.0,
                equity,
                portfolio_value: pv,
                maintenance_margin: 0.25 * pv,
            },
            vec![],
        )
    }

    #[tokio::test]
    async fn test_spread_depends_on_equity() {
        let market = FakeMarket::default().with_series("^GSPC", 110.0, 100.0, 200);
        let store = MemoryStore::default();
        let clock = FakeClock::at(t0());
        let mcfg = MarketConfig::default();
        let cache = MarketDataCache::new(&market, &store, &clock, &mcfg, 1.0);
        let rates = FakeRates(Some(0.06));
        let cfg = MarginConfig::default();
        let gate = MarginGateEvaluator::new(&cfg, &cache, &rates, "^GSPC");

        // 6% + 2.5% breaches the 8% ceiling for small accounts.
        let small = gate.evaluate(&snapshot(50_000.0, 50_000.0)).await;
        assert!(!small.gates.margin_rate);
        assert!(!small.allowed);

        // 6% + 1% passes above the threshold.
        let large = gate.evaluate(&snapshot(200_000.0, 200_000.0)).await;
        assert!(large.gates.margin_rate);
        assert!(large.allowed);
    }

    #[tokio::test]
    async fn test_fetch_error_fails_closed() {
        let market = FakeMarket::default().with_series("^GSPC", 110.0, 100.0, 200);
        let store = MemoryStore::default();
        let clock = FakeClock::at(t0());
        let mcfg = MarketConfig::default();
        let cache = MarketDataCache::new(&market, &store, &clock, &mcfg, 1.0);
        let rates = FakeRates(None);
        let cfg = MarginConfig::default();
        let gate = MarginGateEvaluator::new(&cfg, &cache, &rates, "^GSPC");

        let result = gate.evaluate(&snapshot(200_000.0, 200_000.0)).await;
        assert!(!result.allowed);
        assert_eq!(result.target_margin, 0.0);
        assert_eq!(result.errors.len(), 1);
    }
}
