//! Record/replay harness.
//!
//! In record mode the live tickers & signal sweeps are serialised to
//! self-describing binary frames under `snapshots/`. In replay mode a
//! [`ReplayDriver`](replay::ReplayDriver) substitutes for the exchange &
//! signal ports, the orchestrator cadence is multiplied by `replay_speed`,
//! and rule evaluation divides observed ages by the same factor so age-based
//! predicates see the wall-clock times the live engine would have.

/// Self-describing key-value binary frames.
pub mod frame;

/// Snapshot writer (record mode).
pub mod recorder;

/// Snapshot-driven port substitution (replay mode).
pub mod replay;

/// Run summary emitted when the snapshot stream is exhausted.
pub mod summary;
