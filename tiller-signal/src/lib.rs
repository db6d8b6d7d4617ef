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

//! # Tiller-Signal
//! Signal snapshots, the [`SignalProvider`] port and the
//! [`SignalAggregator`](aggregator::SignalAggregator) that merges
//! per-provider readings into per-pair views and a market-wide global rating.

use crate::snapshot::{AggregatedSignal, SignalSnapshot, SignalUpdate};
use async_trait::async_trait;
use smol_str::SmolStr;
use thiserror::Error;
use tiller_instrument::TradingPair;
use tokio_util::sync::CancellationToken;

/// Merges per-provider snapshots & computes the global rating.
pub mod aggregator;

/// Immutable point-in-time signal projections.
pub mod snapshot;

/// Errors surfaced by a [`SignalProvider`].
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum SignalError {
    #[error("transient signal provider fault: {0}")]
    Transient(SmolStr),

    #[error("permanent signal provider fault: {0}")]
    Permanent(SmolStr),

    #[error("operation canceled")]
    Canceled,
}

impl SignalError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SignalError::Transient(_))
    }
}

/// Signal provider port.
///
/// One implementation per configured upstream feed. Calls may block on
/// network I/O and must honour the [`CancellationToken`].
#[async_trait]
pub trait SignalProvider: Send + Sync {
    /// Stable provider name, used as the snapshot-map key in rule contexts.
    fn name(&self) -> SmolStr;

    /// Latest signal reading for one pair.
    async fn all_signals(
        &self,
        pair: &TradingPair,
        token: &CancellationToken,
    ) -> Result<SignalSnapshot, SignalError>;

    /// Latest signal readings for a set of pairs.
    async fn signals_for_pairs(
        &self,
        pairs: &[TradingPair],
        token: &CancellationToken,
    ) -> Result<Vec<(SmolStr, SignalSnapshot)>, SignalError>;

    /// Provider-side aggregate for one pair.
    async fn aggregated(
        &self,
        pair: &TradingPair,
        token: &CancellationToken,
    ) -> Result<AggregatedSignal, SignalError>;

    /// Push stream of signal updates for one pair.
    async fn subscribe(
        &self,
        pair: &TradingPair,
        token: &CancellationToken,
    ) -> Result<tokio::sync::mpsc::Receiver<SignalUpdate>, SignalError>;
}
