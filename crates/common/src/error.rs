//! Unified error type for the allocation engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("API error (status={status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Auth error: {0}")]
    Auth(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Market data unavailable for {symbol}: {reason}")]
    DataUnavailable { symbol: String, reason: String },

    #[error("Insufficient history for {symbol}: have {have} bars, need {need}")]
    InsufficientHistory {
        symbol: String,
        have: usize,
        need: usize,
    },

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Order {order_id} not filled within {waited_secs}s")]
    OrderTimeout { order_id: String, waited_secs: u64 },

    #[error("Order {order_id} ended with status={status}")]
    OrderCanceled { order_id: String, status: String },

    #[error("State store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn data_unavailable(symbol: &str, reason: impl Into<String>) -> Self {
        Error::DataUnavailable {
            symbol: symbol.to_string(),
            reason: reason.into(),
        }
    }
}
