//! Leveraged-ETF allocation bot entry point.
//!
//! One invocation runs one strategy cycle and exits:
//!   leveraged-etf-bot --strategy monthly-invest --env paper

mod config;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use allocator::journal::journal_dir;
use allocator::ports::{
    AlpacaCalendar, LogNotifier, NoRateSource, Notifier, RateSource, RoutedMarketData,
    StateStore, TokioClock,
};
use allocator::{run_cycle, AppContext, DryRunStore, JsonFileStore, StrategyId, TradeJournal};
use alpaca_client::{AlpacaCredentials, AlpacaRestClient};
use anyhow::{bail, Context};
use clap::Parser;
use common::config::TradingEnv;
use common::BotConfig;
use fred_client::FredClient;
use serde_json::json;
use telegram_client::TelegramClient;
use tracing::{error, info, warn};
use yahoo_client::YahooClient;

use crate::config::{load_config, parse_trading_env};

#[derive(Parser)]
#[command(name = "leveraged-etf-bot", about = "Rule-based leveraged-ETF capital allocation")]
struct Cli {
    /// monthly-invest | hfea-rebalance | trend-check | nine-sig-quarterly
    #[arg(long, alias = "action", env = "STRATEGY")]
    strategy: String,

    /// Broker environment: paper or live.
    #[arg(long, value_parser = parse_trading_env)]
    env: Option<TradingEnv>,

    /// Bypass the trading-day and first-day-of-period guards.
    #[arg(long)]
    force: bool,

    /// Log intended orders without submitting or persisting anything.
    #[arg(long)]
    dry_run: bool,

    #[arg(long, default_value = "config.toml")]
    config: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "leveraged_etf_bot=info,allocator=info,alpaca_client=info".into()
            }),
        )
        .init();

    let cli = Cli::parse();
    let strategy: StrategyId = cli.strategy.parse()?;
    let cfg = load_config(&cli.config, cli.env, cli.dry_run).context("config error")?;

    info!(
        "Starting {} in {:?} mode{}",
        strategy,
        cfg.environment,
        if cfg.execution.dry_run { " (dry run)" } else { "" }
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(cfg, strategy, cli.force))
}

async fn run(cfg: BotConfig, strategy: StrategyId, force: bool) -> anyhow::Result<()> {
    let ctx = build_context(cfg)?;
    ctx.record(json!({
        "kind": "bot_start",
        "strategy": strategy,
        "force": force,
        "environment": ctx.config.environment,
        "dry_run": ctx.config.execution.dry_run,
    }));

    match run_cycle(&ctx, strategy, force).await {
        Ok(summary) if summary.is_ok() => {
            info!("{}", summary.report());
            Ok(())
        }
        Ok(summary) => {
            error!("{}", summary.report());
            bail!("{} finished with {} error(s)", strategy, summary.errors.len())
        }
        Err(e) => {
            ctx.notifier
                .send(&format!("[{}] cycle failed: {}", strategy, e))
                .await;
            Err(e).context(format!("{} cycle failed", strategy))
        }
    }
}

fn build_context(cfg: BotConfig) -> anyhow::Result<AppContext> {
    let creds = AlpacaCredentials::from_config(&cfg.alpaca, cfg.environment)?;
    info!("Broker: {}", creds.base_url);
    let alpaca = Arc::new(AlpacaRestClient::new(
        creds,
        cfg.alpaca.requests_per_minute,
        cfg.alpaca.request_timeout_secs,
    )?);

    let market = Arc::new(RoutedMarketData::new(alpaca.clone(), YahooClient::new()?));

    let rates: Arc<dyn RateSource> = if cfg.rates.fred_api_key.is_empty() {
        warn!("FRED_API_KEY not set; margin will be denied");
        Arc::new(NoRateSource)
    } else {
        Arc::new(FredClient::new(&cfg.rates)?)
    };

    let notify = &cfg.notify;
    let notifier: Arc<dyn Notifier> =
        if notify.telegram_bot_token.is_empty() || notify.telegram_chat_id.is_empty() {
            info!("Telegram not configured; notifications go to the log");
            Arc::new(LogNotifier)
        } else {
            Arc::new(TelegramClient::new(
                &notify.telegram_bot_token,
                &notify.telegram_chat_id,
            )?)
        };

    let file_store = JsonFileStore::open(&cfg.store.state_dir)?;
    let store: Arc<dyn StateStore> = if cfg.execution.dry_run {
        Arc::new(DryRunStore::new(file_store))
    } else {
        Arc::new(file_store)
    };

    let trades_dir = std::env::var("TRADES_DIR").ok();
    let journal = match TradeJournal::open(journal_dir(trades_dir.as_deref())) {
        Ok(journal) => {
            info!("Trade journal path: {}", journal.dir().display());
            Some(Mutex::new(journal))
        }
        Err(e) => {
            warn!("Trade journal disabled: {}", e);
            None
        }
    };

    Ok(AppContext {
        broker: alpaca.clone(),
        market,
        rates,
        store,
        notifier,
        calendar: Arc::new(AlpacaCalendar::new(alpaca)),
        clock: Arc::new(TokioClock),
        journal,
        config: cfg,
    })
}
