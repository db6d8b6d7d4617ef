use crate::balance::AssetBalance;
use crate::order::{ClientOrderId, ExecutionReport, Order, OrderId};
use crate::rules::SymbolRules;
use crate::ExecutionError;
use async_trait::async_trait;
use fnv::FnvHashMap;
use smol_str::SmolStr;
use tiller_instrument::{Price, TradingPair};
use tokio_util::sync::CancellationToken;

/// In-process simulated exchange used for virtual trading & replay.
pub mod simulated;

/// Timeout & exponential-backoff retry wrapper for port calls.
pub mod retry;

/// Exchange port.
///
/// Implementations may block on network I/O. Every call must honour the
/// provided [`CancellationToken`] by returning
/// [`ExecutionError::Canceled`] at the next safe point.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Place an order. The [`ClientOrderId`] acts as an idempotency key: the
    /// exchange must treat a repeated id as the same order.
    async fn place_order(
        &self,
        order: &Order,
        cid: &ClientOrderId,
        token: &CancellationToken,
    ) -> Result<ExecutionReport, ExecutionError>;

    async fn get_price(
        &self,
        pair: &TradingPair,
        token: &CancellationToken,
    ) -> Result<Price, ExecutionError>;

    async fn get_prices(
        &self,
        pairs: &[TradingPair],
        token: &CancellationToken,
    ) -> Result<FnvHashMap<SmolStr, Price>, ExecutionError>;

    async fn get_balances(
        &self,
        token: &CancellationToken,
    ) -> Result<Vec<AssetBalance>, ExecutionError>;

    /// Query an order by its idempotency key. `Ok(None)` means the exchange
    /// never saw the placement.
    async fn get_order(
        &self,
        pair: &TradingPair,
        cid: &ClientOrderId,
        token: &CancellationToken,
    ) -> Result<Option<ExecutionReport>, ExecutionError>;

    async fn cancel_order(
        &self,
        pair: &TradingPair,
        id: &OrderId,
        token: &CancellationToken,
    ) -> Result<(), ExecutionError>;

    async fn symbol_rules(
        &self,
        pair: &TradingPair,
        token: &CancellationToken,
    ) -> Result<SymbolRules, ExecutionError>;

    async fn test_connectivity(&self, token: &CancellationToken) -> Result<(), ExecutionError>;
}
