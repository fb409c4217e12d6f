//! Key-pair authentication for the Alpaca API.
//!
//! Every request carries `APCA-API-KEY-ID` and `APCA-API-SECRET-KEY` headers.

use reqwest::header::{HeaderMap, HeaderValue};

use common::config::{AlpacaConfig, TradingEnv};
use common::Error;

/// Typed credentials for one Alpaca environment.
#[derive(Clone)]
pub struct AlpacaCredentials {
    pub key_id: String,
    secret_key: String,
    pub base_url: String,
    pub data_url: String,
}

impl std::fmt::Debug for AlpacaCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlpacaCredentials")
            .field("key_id", &self.key_id)
            .field("secret_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("data_url", &self.data_url)
            .finish()
    }
}

fn normalize_base_url(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

impl AlpacaCredentials {
    pub fn new(key_id: &str, secret_key: &str, base_url: &str, data_url: &str) -> Result<Self, Error> {
        let key_id = key_id.trim();
        let secret_key = secret_key.trim();
        if key_id.is_empty() {
            return Err(Error::Auth("Alpaca key id is empty".into()));
        }
        if secret_key.is_empty() {
            return Err(Error::Auth("Alpaca secret key is empty".into()));
        }

        Ok(Self {
            key_id: key_id.to_string(),
            secret_key: secret_key.to_string(),
            base_url: normalize_base_url(base_url),
            data_url: normalize_base_url(data_url),
        })
    }

    /// Build credentials for `env` from the resolved config section.
    pub fn from_config(cfg: &AlpacaConfig, env: TradingEnv) -> Result<Self, Error> {
        let base_url = match env {
            TradingEnv::Live => &cfg.live_base_url,
            TradingEnv::Paper => &cfg.paper_base_url,
        };
        Self::new(&cfg.key_id, &cfg.secret_key, base_url, &cfg.data_base_url)
    }

    /// Authentication headers attached to every request.
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(v) = HeaderValue::from_str(&self.key_id) {
            headers.insert("APCA-API-KEY-ID", v);
        }
        if let Ok(mut v) = HeaderValue::from_str(&self.secret_key) {
            v.set_sensitive(true);
            headers.insert("APCA-API-SECRET-KEY", v);
        }
        headers
    }
}
