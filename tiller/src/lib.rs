#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    unused_crate_dependencies,
    unused_extern_crates,
    clippy::unused_self,
    missing_debug_implementations,
    rust_2018_idioms
)]
#![allow(clippy::type_complexity, clippy::too_many_arguments)]

//! # Tiller
//! Tiller is an autonomous spot-market trading engine. It consumes
//! third-party signal feeds, evaluates a declarative hot-reloadable rule
//! configuration against signal & position snapshots, and executes
//! buy / sell / DCA / pair-swap orders through a pluggable exchange port in
//! virtual or live mode.
//!
//! ## Overview
//! Five cadenced pipelines drive a closed decision loop:
//! * **tickers** refreshes latest prices (~1s).
//! * **signals** polls the configured providers into the
//!   [`SignalAggregator`](tiller_signal::aggregator::SignalAggregator) (~7s).
//! * **signal_rules** produces buy/swap candidates for pairs the portfolio
//!   does not hold (~3s).
//! * **trading_rules** assesses every open position for stop-loss,
//!   take-profit, rule-driven sells, DCA and alerts (~3s).
//! * **order_execution** drains trade intents through the
//!   validate → place → reconcile → record sequence (~1s).
//!
//! The same engine replays recorded snapshots for backtesting: the exchange
//! and signal ports are swapped for snapshot-fed fakes and the pipeline
//! cadence is scaled by the replay speed.

/// Snapshot record/replay harness for backtesting.
pub mod backtest;

/// Hot-reloadable configuration surface.
pub mod config;

/// Credentials blob sealing for the `encrypt` subcommand.
pub mod credentials;

/// Periodic orchestrator: cadenced pipelines, engine clock, shutdown.
pub mod engine;

/// Domain events emitted by the aggregates and the executor.
pub mod event;

/// Order execution: constraint validation, placement, reconciliation,
/// recording.
pub mod executor;

/// Structured logging initialisation.
pub mod logging;

/// Notification sink and per-pipeline health registry.
pub mod notify;

/// Durable account state, legacy import and the append-only trade log.
pub mod persistence;

/// Position aggregate & margin math.
pub mod position;

/// Portfolio aggregate: available/reserved balance across concurrent trades.
pub mod portfolio;

/// Signal-side & trading-side rule processors.
pub mod processor;

/// Composable predicate engine over signal & position snapshots.
pub mod rule;

/// Concurrent per-pair buy/sell trailing state machines.
pub mod trailing;

mod error;

pub use error::EngineError;
