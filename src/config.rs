//! Configuration loading: `.env`, then `config.toml`, then environment overrides.

use std::path::Path;

use common::config::TradingEnv;
use common::{BotConfig, Error};

/// Load the bot configuration.
///
/// Priority, lowest to highest: defaults, `config_path` (if present), process
/// environment (after `.env`), then the CLI environment flag and dry-run switch.
pub fn load_config(
    config_path: &Path,
    cli_env: Option<TradingEnv>,
    dry_run: bool,
) -> Result<BotConfig, Error> {
    // 1. Load .env file from project root or parent directories.
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("No .env file loaded: {}", e);
    }

    // 2. Start with defaults, or config.toml if it exists.
    let mut config = BotConfig::default();
    if config_path.exists() {
        let contents = std::fs::read_to_string(config_path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", config_path.display(), e))
        })?;
        config = toml::from_str(&contents).map_err(|e| {
            Error::Config(format!("Failed to parse {}: {}", config_path.display(), e))
        })?;
    } else {
        tracing::debug!("{} not found, using defaults", config_path.display());
    }

    // 3. Environment overrides, then CLI flags.
    apply_env_overrides(&mut config, cli_env, |key| std::env::var(key).ok())?;
    if dry_run {
        config.execution.dry_run = true;
    }

    // 4. Validate.
    config.validate()?;
    if config.alpaca.key_id.is_empty() || config.alpaca.secret_key.is_empty() {
        let suffix = env_suffix(config.environment);
        return Err(Error::Config(format!(
            "ALPACA_API_KEY_{0} and ALPACA_SECRET_KEY_{0} are required (set in .env or environment)",
            suffix
        )));
    }

    Ok(config)
}

fn env_suffix(env: TradingEnv) -> &'static str {
    match env {
        TradingEnv::Live => "LIVE",
        TradingEnv::Paper => "PAPER",
    }
}

pub fn parse_trading_env(raw: &str) -> Result<TradingEnv, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "paper" => Ok(TradingEnv::Paper),
        "live" => Ok(TradingEnv::Live),
        other => Err(format!("unknown environment '{}' (expected paper or live)", other)),
    }
}

fn apply_env_overrides<F>(
    config: &mut BotConfig,
    cli_env: Option<TradingEnv>,
    lookup: F,
) -> Result<(), Error>
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(raw) = non_empty("TRADING_ENV") {
        config.environment = parse_trading_env(&raw).map_err(Error::Config)?;
    }
    if let Some(env) = cli_env {
        config.environment = env;
    }

    // Credentials follow the selected environment.
    let suffix = env_suffix(config.environment);
    if let Some(key) = non_empty(&format!("ALPACA_API_KEY_{}", suffix)) {
        config.alpaca.key_id = key;
    }
    if let Some(secret) = non_empty(&format!("ALPACA_SECRET_KEY_{}", suffix)) {
        config.alpaca.secret_key = secret;
    }

    if let Some(key) = non_empty("FRED_API_KEY") {
        config.rates.fred_api_key = key;
    }
    if let Some(token) = non_empty("TELEGRAM_BOT_TOKEN") {
        config.notify.telegram_bot_token = token;
    }
    if let Some(chat) = non_empty("TELEGRAM_CHAT_ID") {
        config.notify.telegram_chat_id = chat;
    }
    if let Some(dir) = non_empty("STATE_DIR") {
        config.store.state_dir = dir;
    }
    if let Some(dry) = non_empty("DRY_RUN") {
        config.execution.dry_run = dry != "0" && dry.to_lowercase() != "false";
    }
    Ok(())
}
