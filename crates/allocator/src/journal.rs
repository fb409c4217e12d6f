//! Append-only JSONL record of cycle decisions, one file per UTC day.

use std::fs::{create_dir_all, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use common::Result;
use tracing::warn;

pub const JOURNAL_SUBDIR: &str = "leveraged-etf-bot";

/// `<trades_dir>/leveraged-etf-bot`, with `TRADES` when no override is given.
pub fn journal_dir(trades_dir: Option<&str>) -> PathBuf {
    let base = trades_dir
        .map(str::trim)
        .filter(|dir| !dir.is_empty())
        .unwrap_or("TRADES");
    PathBuf::from(base).join(JOURNAL_SUBDIR)
}

pub struct TradeJournal {
    dir: PathBuf,
    day: Option<(NaiveDate, File)>,
}

impl TradeJournal {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        create_dir_all(&dir)?;
        Ok(Self { dir, day: None })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, day: NaiveDate) -> PathBuf {
        self.dir.join(format!("trades-{}.jsonl", day.format("%Y-%m-%d")))
    }

    /// Append `event` under the day of `at`, adding a `ts` field when absent.
    /// Write failures are logged and dropped.
    pub fn append(&mut self, at: DateTime<Utc>, event: serde_json::Value) {
        if let Err(e) = self.try_append(at, event) {
            warn!("journal write failed: {}", e);
        }
    }

    fn try_append(&mut self, at: DateTime<Utc>, mut event: serde_json::Value) -> Result<()> {
        if let Some(fields) = event.as_object_mut() {
            fields
                .entry("ts")
                .or_insert_with(|| at.to_rfc3339_opts(SecondsFormat::Millis, true).into());
        }

        let day = at.date_naive();
        if self.day.as_ref().map(|(d, _)| *d) != Some(day) {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.path_for(day))?;
            self.day = Some((day, file));
        }
        if let Some((_, file)) = self.day.as_mut() {
            serde_json::to_writer(&mut *file, &event)?;
            file.write_all(b"\n")?;
            file.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn lines(path: &Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_journal_dir_override() {
        assert_eq!(journal_dir(None), PathBuf::from("TRADES/leveraged-etf-bot"));
        assert_eq!(journal_dir(Some("  ")), PathBuf::from("TRADES/leveraged-etf-bot"));
        assert_eq!(
            journal_dir(Some("/var/trades")),
            PathBuf::from("/var/trades/leveraged-etf-bot")
        );
    }

    #[test]
    fn test_events_rotate_on_event_day() {
        let tmp = tempfile::tempdir().unwrap();
        let mut journal = TradeJournal::open(tmp.path().join("bot")).unwrap();
        let before_midnight = Utc.with_ymd_and_hms(2026, 10, 1, 23, 59, 0).unwrap();
        let after_midnight = Utc.with_ymd_and_hms(2026, 10, 2, 0, 1, 0).unwrap();

        journal.append(before_midnight, json!({"kind": "cycle_start"}));
        journal.append(before_midnight, json!({"kind": "budget", "ts": "fixed"}));
        journal.append(after_midnight, json!({"kind": "cycle_end"}));

        let first = lines(&journal.path_for(before_midnight.date_naive()));
        assert_eq!(first.len(), 2);
        assert_eq!(first[0]["ts"], "2026-10-01T23:59:00.000Z");
        assert_eq!(first[1]["ts"], "fixed");

        let second = lines(&journal.path_for(after_midnight.date_naive()));
        assert_eq!(second.len(), 1);
        assert_eq!(second[0]["kind"], "cycle_end");
    }
}
