//! Alpaca brokerage client library.
//!
//! Provides authenticated REST access to the Alpaca trading and market-data APIs.

pub mod auth;
pub mod rate_limit;
pub mod rest;

pub use auth::AlpacaCredentials;
pub use rate_limit::RateLimiter;
pub use rest::AlpacaRestClient;
