use crate::backtest::frame::Frame;
use crate::backtest::recorder::{signal_frame_to_snapshots, ENTITY_SIGNALS, ENTITY_TICKERS};
use crate::EngineError;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use parking_lot::Mutex;
use smol_str::ToSmolStr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tiller_execution::client::simulated::SimulatedExchange;
use tiller_instrument::Price;
use tiller_signal::aggregator::SignalAggregator;
use tracing::{debug, info, warn};

/// One snapshot file with the timestamp parsed from its path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFile {
    pub time: DateTime<Utc>,
    pub path: PathBuf,
}

/// Enumerate an entity's snapshot files in timestamp order.
///
/// Layout: `{root}/{entity}/YYYY-MM-DD/HH/mm-ss-fff.bin`. Files that do not
/// parse are skipped with a warning.
pub fn scan_entity(root: &Path, entity: &str) -> Result<Vec<SnapshotFile>, EngineError> {
    let entity_root = root.join(entity);
    if !entity_root.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();

    for date_entry in read_sorted_dir(&entity_root)? {
        let Some(date) = date_entry
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| NaiveDate::parse_from_str(name, "%Y-%m-%d").ok())
        else {
            warn!(path = %date_entry.display(), "skipping non-date snapshot directory");
            continue;
        };

        for hour_entry in read_sorted_dir(&date_entry)? {
            let Some(hour) = hour_entry
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| name.parse::<u32>().ok())
            else {
                warn!(path = %hour_entry.display(), "skipping non-hour snapshot directory");
                continue;
            };

            for file_entry in read_sorted_dir(&hour_entry)? {
                let Some(time) = file_entry
                    .file_stem()
                    .and_then(|name| name.to_str())
                    .and_then(|stem| parse_snapshot_stem(date, hour, stem))
                else {
                    warn!(path = %file_entry.display(), "skipping unparseable snapshot file");
                    continue;
                };

                files.push(SnapshotFile {
                    time,
                    path: file_entry,
                });
            }
        }
    }

    files.sort_by_key(|file| file.time);
    Ok(files)
}

fn read_sorted_dir(dir: &Path) -> Result<Vec<PathBuf>, EngineError> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|error| {
            EngineError::TransientIo(format!("reading {}: {error}", dir.display()).to_smolstr())
        })?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .collect();
    entries.sort();
    Ok(entries)
}

/// Parse `mm-ss-fff` against the date & hour from the directory layout.
fn parse_snapshot_stem(date: NaiveDate, hour: u32, stem: &str) -> Option<DateTime<Utc>> {
    let mut parts = stem.splitn(3, '-');
    let minute: u32 = parts.next()?.parse().ok()?;
    let second: u32 = parts.next()?.parse().ok()?;
    let milli: u32 = parts.next()?.parse().ok()?;

    let time = NaiveTime::from_hms_milli_opt(hour, minute, second, milli)?;
    Some(date.and_time(time).and_utc())
}

/// Substitutes the live exchange & signal ports during replay.
///
/// `advance_to(now)` applies every recorded frame with a timestamp at or
/// before `now`: ticker frames feed the [`SimulatedExchange`], signal frames
/// feed the [`SignalAggregator`]. When both streams are exhausted the driver
/// flips its `exhausted` flag and the orchestrator winds the run down.
#[derive(Debug)]
pub struct ReplayDriver {
    tickers: Vec<SnapshotFile>,
    signals: Vec<SnapshotFile>,
    cursors: Mutex<(usize, usize)>,
    exchange: Arc<SimulatedExchange>,
    aggregator: Arc<SignalAggregator>,
    exhausted: AtomicBool,
}

impl ReplayDriver {
    pub fn new(
        root: &Path,
        exchange: Arc<SimulatedExchange>,
        aggregator: Arc<SignalAggregator>,
    ) -> Result<Self, EngineError> {
        let tickers = scan_entity(root, ENTITY_TICKERS)?;
        let signals = scan_entity(root, ENTITY_SIGNALS)?;

        if tickers.is_empty() && signals.is_empty() {
            return Err(EngineError::Configuration(
                format!("no snapshots found under {}", root.display()).to_smolstr(),
            ));
        }

        info!(
            tickers = tickers.len(),
            signals = signals.len(),
            root = %root.display(),
            "replay snapshots scanned"
        );

        Ok(Self {
            tickers,
            signals,
            cursors: Mutex::new((0, 0)),
            exchange,
            aggregator,
            exhausted: AtomicBool::new(false),
        })
    }

    /// Earliest recorded timestamp; the replay clock starts here.
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        let first_ticker = self.tickers.first().map(|file| file.time);
        let first_signal = self.signals.first().map(|file| file.time);
        match (first_ticker, first_signal) {
            (Some(ticker), Some(signal)) => Some(ticker.min(signal)),
            (ticker, signal) => ticker.or(signal),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::Acquire)
    }

    /// Apply every frame recorded at or before `now`. Returns `false` once
    /// both snapshot streams are exhausted.
    pub fn advance_to(&self, now: DateTime<Utc>) -> Result<bool, EngineError> {
        let mut cursors = self.cursors.lock();
        let (ticker_cursor, signal_cursor) = &mut *cursors;

        while let Some(file) = self.tickers.get(*ticker_cursor) {
            if file.time > now {
                break;
            }
            self.apply_ticker_frame(file)?;
            *ticker_cursor += 1;
        }

        while let Some(file) = self.signals.get(*signal_cursor) {
            if file.time > now {
                break;
            }
            self.apply_signal_frame(file)?;
            *signal_cursor += 1;
        }

        let finished =
            *ticker_cursor >= self.tickers.len() && *signal_cursor >= self.signals.len();
        if finished {
            self.exhausted.store(true, Ordering::Release);
        }

        Ok(!finished)
    }

    fn read_frame(path: &Path) -> Result<Frame, EngineError> {
        let bytes = std::fs::read(path).map_err(|error| {
            EngineError::TransientIo(format!("reading {}: {error}", path.display()).to_smolstr())
        })?;
        Frame::decode(&bytes)
    }

    fn apply_ticker_frame(&self, file: &SnapshotFile) -> Result<(), EngineError> {
        let frame = Self::read_frame(&file.path)?;

        let prices = frame.iter().filter_map(|(symbol, value)| {
            let price = value.as_decimal().and_then(|value| Price::new(value).ok())?;
            Some((symbol.clone(), price))
        });
        self.exchange.set_prices(prices);

        debug!(time = %file.time, "replayed ticker frame");
        Ok(())
    }

    fn apply_signal_frame(&self, file: &SnapshotFile) -> Result<(), EngineError> {
        let frame = Self::read_frame(&file.path)?;

        for ((provider, symbol), snapshot) in signal_frame_to_snapshots(&frame) {
            self.aggregator.ingest(&provider, symbol, snapshot);
        }

        debug!(time = %file.time, "replayed signal frame");
        Ok(())
    }
}
