use crate::EngineError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::{SmolStr, ToSmolStr};
use std::io::Write;
use std::path::{Path, PathBuf};
use tiller_instrument::{Margin, PositionId, Side};

/// One executed trade, as recorded in the order history & the trade log.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TradeRecord {
    pub time: DateTime<Utc>,
    pub pair: SmolStr,
    pub side: Side,
    /// What produced the trade: "buy", "dca", "sell", "stop_loss",
    /// "take_profit", "swap", "trailing".
    pub action: SmolStr,
    pub order_id: SmolStr,
    pub position_id: Option<PositionId>,
    pub price: Decimal,
    pub quantity: Decimal,
    pub cost: Decimal,
    pub fees: Decimal,
    pub margin: Option<Margin>,
    /// Rule that produced the trade, if any.
    pub rule: Option<SmolStr>,
}

/// Append-only trade log: `log/YYYY-MM-DD-trades.txt`, one
/// `TradeResult { ... }` JSON line per trade.
#[derive(Debug, Clone)]
pub struct TradeLog {
    dir: PathBuf,
}

impl TradeLog {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, time: DateTime<Utc>) -> PathBuf {
        self.dir
            .join(format!("{}-trades.txt", time.format("%Y-%m-%d")))
    }

    pub fn append(&self, record: &TradeRecord) -> Result<(), EngineError> {
        std::fs::create_dir_all(&self.dir).map_err(|error| {
            EngineError::TransientIo(format!("creating {}: {error}", self.dir.display()).to_smolstr())
        })?;

        let json = serde_json::to_string(record).map_err(|error| {
            EngineError::TransientIo(format!("serialising trade: {error}").to_smolstr())
        })?;

        let path = self.path_for(record.time);
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|error| {
                EngineError::TransientIo(format!("opening {}: {error}", path.display()).to_smolstr())
            })?;

        writeln!(file, "TradeResult {json}").map_err(|error| {
            EngineError::TransientIo(format!("writing {}: {error}", path.display()).to_smolstr())
        })?;

        Ok(())
    }

    /// Parse every record of one day's log, used by replay verification.
    pub fn read_day(&self, day: DateTime<Utc>) -> Result<Vec<TradeRecord>, EngineError> {
        let path = self.path_for(day);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let contents = std::fs::read_to_string(&path).map_err(|error| {
            EngineError::TransientIo(format!("reading {}: {error}", path.display()).to_smolstr())
        })?;

        contents
            .lines()
            .filter_map(|line| line.strip_prefix("TradeResult "))
            .map(|json| {
                serde_json::from_str(json).map_err(|error| {
                    EngineError::TransientIo(format!("parsing trade line: {error}").to_smolstr())
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn record(time: DateTime<Utc>) -> TradeRecord {
        TradeRecord {
            time,
            pair: SmolStr::new("BTCUSDT"),
            side: Side::Buy,
            action: SmolStr::new("buy"),
            order_id: SmolStr::new("sim-1"),
            position_id: Some(PositionId::random()),
            price: dec!(100),
            quantity: dec!(10),
            cost: dec!(1000),
            fees: dec!(1),
            margin: None,
            rule: Some(SmolStr::new("momentum")),
        }
    }

    #[test]
    fn test_append_and_read_back() {
        let dir = std::env::temp_dir().join(format!("tiller-tradelog-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let log = TradeLog::new(&dir);
        let now = Utc::now();

        log.append(&record(now)).unwrap();
        log.append(&record(now)).unwrap();

        let records = log.read_day(now).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].pair, "BTCUSDT");

        // One prefixed JSON object per line
        let raw = std::fs::read_to_string(dir.join(format!("{}-trades.txt", now.format("%Y-%m-%d"))))
            .unwrap();
        assert!(raw.lines().all(|line| line.starts_with("TradeResult {")));
    }
}
