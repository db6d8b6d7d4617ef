use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Run statistics of one pipeline across a backtest.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PipelineRunStats {
    pub name: SmolStr,
    pub runs: u64,
    /// Mean wait beyond the scheduled tick time ("lag").
    pub mean_lag_ms: u64,
    pub faults: u64,
}

/// Emitted with `BacktestingCompleted` when the snapshot stream is
/// exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BacktestSummary {
    pub pipelines: Vec<PipelineRunStats>,
    pub trades: usize,
    pub final_balance: Decimal,
}
