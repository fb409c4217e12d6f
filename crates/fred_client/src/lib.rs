//! FRED (St. Louis Fed) client for the margin reference rate.
//!
//! Returns the most recent valid observation of a series as a fraction,
//! e.g. a published `4.33` becomes `0.0433`.

use common::config::RateConfig;
use common::Error;
use serde::Deserialize;
use tracing::debug;

/// FRED series observations client.
#[derive(Debug, Clone)]
pub struct FredClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    series_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ObservationsResponse {
    #[serde(default)]
    pub observations: Vec<Observation>,
}

#[derive(Debug, Deserialize)]
pub struct Observation {
    pub date: String,
    /// Decimal string; FRED uses "." for missing values.
    pub value: String,
}

impl FredClient {
    pub fn new(cfg: &RateConfig) -> Result<Self, Error> {
        if cfg.fred_api_key.trim().is_empty() {
            return Err(Error::Config("rates.fred_api_key is required".into()));
        }

        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(2)
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .map_err(|e| Error::Http(format!("failed to build FRED HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.fred_api_key.trim().to_string(),
            series_id: cfg.series_id.clone(),
        })
    }

    /// Latest reference rate as a fraction.
    pub async fn reference_rate(&self) -> Result<f64, Error> {
        let url = format!("{}/fred/series/observations", self.base_url);
        debug!("Fetching FRED series {}", self.series_id);

        let resp = self
            .client
            .get(&url)
            .query(&[
                ("series_id", self.series_id.as_str()),
                ("api_key", self.api_key.as_str()),
                ("file_type", "json"),
                ("sort_order", "desc"),
                ("limit", "10"),
            ])
            .send()
            .await
            .map_err(|e| Error::Http(format!("FRED HTTP error: {e}")))?;

        let status = resp.status().as_u16();
        if status != 200 {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: body.chars().take(500).collect(),
            });
        }

        let payload: ObservationsResponse = resp
            .json()
            .await
            .map_err(|e| Error::Http(format!("FRED JSON parse error: {e}")))?;

        latest_rate(&self.series_id, &payload)
    }
}

fn latest_rate(series_id: &str, payload: &ObservationsResponse) -> Result<f64, Error> {
    payload
        .observations
        .iter()
        .find_map(|o| o.value.trim().parse::<f64>().ok().map(|v| (o, v)))
        .map(|(o, v)| {
            debug!("{} = {}% as of {}", series_id, v, o.date);
            v / 100.0
        })
        .ok_or_else(|| Error::data_unavailable(series_id, "no valid observations"))
}
