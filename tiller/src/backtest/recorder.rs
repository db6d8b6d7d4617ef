use crate::backtest::frame::{Frame, FrameValue};
use crate::EngineError;
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use smol_str::{SmolStr, ToSmolStr};
use std::path::{Path, PathBuf};
use tiller_instrument::Price;
use tiller_signal::snapshot::SignalSnapshot;
use tracing::debug;

/// Entity names used in the snapshot directory layout.
pub const ENTITY_TICKERS: &str = "tickers";
pub const ENTITY_SIGNALS: &str = "signals";

/// Writes live snapshots to `{root}/{entity}/YYYY-MM-DD/HH/mm-ss-fff.bin`.
#[derive(Debug, Clone)]
pub struct SnapshotRecorder {
    root: PathBuf,
}

impl SnapshotRecorder {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn path_for(&self, entity: &str, time: DateTime<Utc>) -> PathBuf {
        self.root
            .join(entity)
            .join(time.format("%Y-%m-%d").to_string())
            .join(time.format("%H").to_string())
            .join(format!("{}.bin", time.format("%M-%S-%3f")))
    }

    pub fn write(
        &self,
        entity: &str,
        time: DateTime<Utc>,
        frame: &Frame,
    ) -> Result<PathBuf, EngineError> {
        let path = self.path_for(entity, time);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                EngineError::TransientIo(
                    format!("creating {}: {error}", parent.display()).to_smolstr(),
                )
            })?;
        }

        std::fs::write(&path, frame.encode()).map_err(|error| {
            EngineError::TransientIo(format!("writing {}: {error}", path.display()).to_smolstr())
        })?;

        debug!(entity, path = %path.display(), "snapshot recorded");
        Ok(path)
    }
}

/// Ticker snapshot: symbol → price, in iteration order.
pub fn ticker_frame<'a, I>(prices: I) -> Frame
where
    I: IntoIterator<Item = (&'a SmolStr, &'a Price)>,
{
    let mut frame = Frame::new();
    for (symbol, price) in prices {
        frame.push(symbol, FrameValue::Decimal(price.value()));
    }
    frame
}

/// Signal snapshot: `provider|symbol|metric` → value, one frame per sweep.
pub fn signal_frame<'a, I>(provider: &SmolStr, snapshots: I) -> Frame
where
    I: IntoIterator<Item = (&'a SmolStr, &'a SignalSnapshot)>,
{
    let mut frame = Frame::new();
    for (symbol, snapshot) in snapshots {
        let metrics = [
            ("volume", snapshot.volume),
            ("volume_change", snapshot.volume_change),
            ("price", snapshot.price),
            ("price_change", snapshot.price_change),
            ("rating", snapshot.rating),
            ("rating_change", snapshot.rating_change),
            ("volatility", snapshot.volatility),
        ];
        for (metric, value) in metrics {
            if let Some(value) = value {
                frame.push(
                    format!("{provider}|{symbol}|{metric}"),
                    FrameValue::Decimal(value),
                );
            }
        }
    }
    frame
}

/// Parse one `provider|symbol|metric` key of a signal frame.
pub fn parse_signal_key(key: &str) -> Option<(SmolStr, SmolStr, SmolStr)> {
    let mut parts = key.splitn(3, '|');
    let provider = parts.next()?;
    let symbol = parts.next()?;
    let metric = parts.next()?;
    Some((
        SmolStr::new(provider),
        SmolStr::new(symbol),
        SmolStr::new(metric),
    ))
}

/// Rebuild per-(provider, symbol) snapshots from a decoded signal frame.
pub fn signal_frame_to_snapshots(
    frame: &Frame,
) -> FnvHashMap<(SmolStr, SmolStr), SignalSnapshot> {
    let mut snapshots: FnvHashMap<(SmolStr, SmolStr), SignalSnapshot> = FnvHashMap::default();

    for (key, value) in frame.iter() {
        let Some((provider, symbol, metric)) = parse_signal_key(key) else {
            continue;
        };
        let Some(value) = value.as_decimal() else {
            continue;
        };

        let snapshot = snapshots.entry((provider, symbol)).or_default();
        match metric.as_str() {
            "volume" => snapshot.volume = Some(value),
            "volume_change" => snapshot.volume_change = Some(value),
            "price" => snapshot.price = Some(value),
            "price_change" => snapshot.price_change = Some(value),
            "rating" => snapshot.rating = Some(value),
            "rating_change" => snapshot.rating_change = Some(value),
            "volatility" => snapshot.volatility = Some(value),
            _ => {}
        }
    }

    snapshots
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_path_layout_matches_contract() {
        let recorder = SnapshotRecorder::new("snapshots");
        let time = DateTime::parse_from_rfc3339("2024-03-05T14:07:09.250Z")
            .unwrap()
            .with_timezone(&Utc);

        let path = recorder.path_for(ENTITY_TICKERS, time);

        assert_eq!(
            path,
            PathBuf::from("snapshots/tickers/2024-03-05/14/07-09-250.bin")
        );
    }

    #[test]
    fn test_write_and_read_back() {
        let root = std::env::temp_dir().join(format!("tiller-snap-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&root);
        let recorder = SnapshotRecorder::new(&root);

        let symbol = SmolStr::new("BTCUSDT");
        let price = Price::new(dec!(27000)).unwrap();
        let frame = ticker_frame([(&symbol, &price)]);

        let path = recorder
            .write(ENTITY_TICKERS, Utc::now(), &frame)
            .unwrap();
        let decoded = Frame::decode(&std::fs::read(path).unwrap()).unwrap();

        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_signal_frame_round_trip() {
        let provider = SmolStr::new("tv-15m");
        let symbol = SmolStr::new("ETHUSDT");
        let snapshot = SignalSnapshot {
            rating: Some(dec!(0.6)),
            volume: Some(dec!(120000)),
            ..Default::default()
        };

        let frame = signal_frame(&provider, [(&symbol, &snapshot)]);
        let rebuilt = signal_frame_to_snapshots(&frame);

        let restored = rebuilt.get(&(provider, symbol)).unwrap();
        assert_eq!(restored.rating, Some(dec!(0.6)));
        assert_eq!(restored.volume, Some(dec!(120000)));
        assert_eq!(restored.price, None);
    }
}
