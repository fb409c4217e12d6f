//! JSON document store for strategy state.
//!
//! One pretty-printed JSON file per collection under the state directory.
//! Writes go to a temp file that is synced and renamed over the target, so a
//! reader sees either the old or the new document.

use std::collections::BTreeMap;
use std::fs::{self, create_dir_all, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Error, MarketDataPoint, QuarterRecord, ReservedBalance, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::ports::StateStore;

const RESERVED_FILE: &str = "reserved.json";
const QUARTERS_FILE: &str = "quarters.json";
const MARKET_FILE: &str = "market-data.json";
const CONTRIBUTIONS_FILE: &str = "contributions.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct ContributionLedger {
    amount: f64,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        create_dir_all(&dir)?;
        info!("State store at {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn load<T: DeserializeOwned + Default>(&self, name: &str) -> Result<T> {
        let path = self.dir.join(name);
        if !path.exists() {
            return Ok(T::default());
        }
        let raw = fs::read_to_string(&path)?;
        // A corrupt document is an error, never silently reset.
        serde_json::from_str(&raw)
            .map_err(|e| Error::Store(format!("failed to parse {}: {}", path.display(), e)))
    }

    fn save<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.dir.join(name);
        let tmp = self.dir.join(format!("{}.tmp", name));
        let data = serde_json::to_string_pretty(value)?;

        let mut file = File::create(&tmp)?;
        file.write_all(data.as_bytes())?;
        file.flush()?;
        file.sync_all()?;
        fs::rename(&tmp, &path)
            .map_err(|e| Error::Store(format!("failed to replace {}: {}", path.display(), e)))?;
        debug!("wrote {}", path.display());
        Ok(())
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn get_reserved(&self, strategy: &str) -> Result<ReservedBalance> {
        let all: BTreeMap<String, ReservedBalance> = self.load(RESERVED_FILE)?;
        Ok(all.get(strategy).cloned().unwrap_or_default())
    }

    async fn set_reserved(&self, strategy: &str, balance: &ReservedBalance) -> Result<()> {
        let mut all: BTreeMap<String, ReservedBalance> = self.load(RESERVED_FILE)?;
        all.insert(strategy.to_string(), balance.clone());
        self.save(RESERVED_FILE, &all)
    }

    async fn append_quarter(&self, record: &QuarterRecord) -> Result<()> {
        let mut all: Vec<QuarterRecord> = self.load(QUARTERS_FILE)?;
        all.push(record.clone());
        self.save(QUARTERS_FILE, &all)
    }

    async fn latest_quarter(&self) -> Result<Option<QuarterRecord>> {
        let all: Vec<QuarterRecord> = self.load(QUARTERS_FILE)?;
        Ok(all.into_iter().max_by_key(|r| r.timestamp))
    }

    async fn get_market_point(&self, symbol: &str) -> Result<Option<MarketDataPoint>> {
        let all: BTreeMap<String, MarketDataPoint> = self.load(MARKET_FILE)?;
        Ok(all.get(symbol).cloned())
    }

    async fn set_market_point(&self, point: &MarketDataPoint) -> Result<()> {
        let mut all: BTreeMap<String, MarketDataPoint> = self.load(MARKET_FILE)?;
        all.insert(point.symbol.clone(), point.clone());
        self.save(MARKET_FILE, &all)
    }

    async fn get_contributions(&self) -> Result<f64> {
        let ledger: ContributionLedger = self.load(CONTRIBUTIONS_FILE)?;
        Ok(ledger.amount)
    }

    async fn set_contributions(&self, amount: f64, at: DateTime<Utc>) -> Result<()> {
        self.save(
            CONTRIBUTIONS_FILE,
            &ContributionLedger {
                amount,
                updated_at: Some(at),
            },
        )
    }
}

/// Reads pass through; writes are logged and dropped.
pub struct DryRunStore<S> {
    inner: S,
}

impl<S: StateStore> DryRunStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S: StateStore> StateStore for DryRunStore<S> {
    async fn get_reserved(&self, strategy: &str) -> Result<ReservedBalance> {
        self.inner.get_reserved(strategy).await
    }

    async fn set_reserved(&self, strategy: &str, balance: &ReservedBalance) -> Result<()> {
        info!("[dry-run] reserved[{}] = {:.2}", strategy, balance.amount);
        Ok(())
    }

    async fn append_quarter(&self, record: &QuarterRecord) -> Result<()> {
        info!("[dry-run] quarter {} {}", record.quarter_id, record.action);
        Ok(())
    }

    async fn latest_quarter(&self) -> Result<Option<QuarterRecord>> {
        self.inner.latest_quarter().await
    }

    async fn get_market_point(&self, symbol: &str) -> Result<Option<MarketDataPoint>> {
        self.inner.get_market_point(symbol).await
    }

    async fn set_market_point(&self, point: &MarketDataPoint) -> Result<()> {
        debug!("[dry-run] market point {} {}", point.symbol, point.state);
        Ok(())
    }

    async fn get_contributions(&self) -> Result<f64> {
        self.inner.get_contributions().await
    }

    async fn set_contributions(&self, amount: f64, _at: DateTime<Utc>) -> Result<()> {
        info!("[dry-run] contributions = {:.2}", amount);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use common::{SignalAction, TrendState};

    fn quarter(id: &str, day: u32) -> QuarterRecord {
        QuarterRecord {
            quarter_id: id.into(),
            tqqq_balance: 1000.0,
            bond_balance: 250.0,
            signal_line: 990.0,
            action: SignalAction::Hold,
            contributions: 0.0,
            sell_ignored_streak: 0,
            timestamp: Utc.with_ymd_and_hms(2026, 1, day, 15, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_reserved_round_trip_and_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();

        let empty = store.get_reserved("spxl").await.unwrap();
        assert_eq!(empty.amount, 0.0);

        let bal = ReservedBalance {
            amount: 512.5,
            last_invested_value: None,
            updated_at: Some(Utc::now()),
        };
        store.set_reserved("spxl", &bal).await.unwrap();
        assert_eq!(store.get_reserved("spxl").await.unwrap().amount, 512.5);
        assert!(!dir.path().join("reserved.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_latest_quarter_by_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        assert!(store.latest_quarter().await.unwrap().is_none());

        store.append_quarter(&quarter("2026-Q1", 20)).await.unwrap();
        store.append_quarter(&quarter("2025-Q4", 2)).await.unwrap();
        let latest = store.latest_quarter().await.unwrap().unwrap();
        assert_eq!(latest.quarter_id, "2026-Q1");
    }

    #[tokio::test]
    async fn test_corrupt_document_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("quarters.json"), "{not json").unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        assert!(matches!(store.latest_quarter().await, Err(Error::Store(_))));
    }

    #[tokio::test]
    async fn test_contributions_stamped_with_caller_time() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        let at = Utc.with_ymd_and_hms(2026, 9, 1, 14, 30, 0).unwrap();
        store.set_contributions(50.0, at).await.unwrap();

        assert_eq!(store.get_contributions().await.unwrap(), 50.0);
        let raw = std::fs::read_to_string(dir.path().join(CONTRIBUTIONS_FILE)).unwrap();
        let ledger: ContributionLedger = serde_json::from_str(&raw).unwrap();
        assert_eq!(ledger.updated_at, Some(at));
    }

    #[tokio::test]
    async fn test_dry_run_drops_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = DryRunStore::new(JsonFileStore::open(dir.path()).unwrap());
        store.set_contributions(99.0, Utc::now()).await.unwrap();
        store
            .set_market_point(&MarketDataPoint {
                symbol: "GSPC".into(),
                price: 1.0,
                sma_short: None,
                sma_long: 1.0,
                state: TrendState::Neutral,
                last_update: Utc::now(),
                last_alert_date: None,
            })
            .await
            .unwrap();
        assert_eq!(store.get_contributions().await.unwrap(), 0.0);
        assert!(store.get_market_point("GSPC").await.unwrap().is_none());
    }
}
