use crate::backtest::summary::BacktestSummary;
use crate::notify::{NotifierHandle, NotifyLevel};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use tiller_instrument::{Margin, Money, PositionId, Price, Quantity, TradingPair};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Domain events emitted by the aggregates & the executor.
///
/// Aggregate mutations never call handlers synchronously: events flow through
/// an [`EventBus`] channel and are consumed by a dedicated worker.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum DomainEvent {
    PositionOpened {
        position_id: PositionId,
        pair: TradingPair,
        price: Price,
        quantity: Quantity,
        cost: Money,
        signal_rule: Option<SmolStr>,
        time: DateTime<Utc>,
    },
    DcaExecuted {
        position_id: PositionId,
        pair: TradingPair,
        dca_level: u32,
        price: Price,
        quantity: Quantity,
        average_price: Price,
        total_cost: Money,
        total_quantity: Quantity,
        time: DateTime<Utc>,
    },
    PositionClosed {
        position_id: PositionId,
        pair: TradingPair,
        proceeds: Money,
        total_fees: Money,
        final_margin: Margin,
        duration_secs: i64,
        time: DateTime<Utc>,
    },
    RuleMatched {
        pair: TradingPair,
        rule: SmolStr,
        action: SmolStr,
    },
    TrailingTriggered {
        pair: TradingPair,
        side: SmolStr,
        reason: SmolStr,
    },
    OrderRejected {
        pair: TradingPair,
        status: SmolStr,
    },
    BalanceSynced {
        previous_total: Decimal,
        total: Decimal,
    },
    ReserveClamped {
        total: Decimal,
        reserved: Decimal,
    },
    PersistenceDegraded {
        detail: SmolStr,
    },
    TradingSuspended {
        reason: SmolStr,
    },
    ConfigReloaded,
    BacktestingCompleted {
        summary: BacktestSummary,
    },
}

/// Cloneable handle publishing [`DomainEvent`]s to the event worker.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: mpsc::UnboundedSender<DomainEvent>,
}

impl EventBus {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DomainEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Publish an event. Dropped silently if the worker has shut down; events
    /// are advisory, the aggregates are the source of truth.
    pub fn publish(&self, event: DomainEvent) {
        let _ = self.tx.send(event);
    }
}

/// Dedicated worker consuming [`DomainEvent`]s: structured logs for all,
/// outbound notifications for user-facing ones.
pub async fn run_event_worker(
    mut rx: mpsc::UnboundedReceiver<DomainEvent>,
    notifier: NotifierHandle,
) {
    while let Some(event) = rx.recv().await {
        match &event {
            DomainEvent::PositionOpened {
                pair, price, cost, ..
            } => {
                info!(%pair, %price, %cost, "position opened");
                notifier.send(
                    NotifyLevel::Info,
                    format!("Opened {pair} @ {price} for {cost}"),
                );
            }
            DomainEvent::DcaExecuted {
                pair,
                dca_level,
                average_price,
                ..
            } => {
                info!(%pair, dca_level, %average_price, "DCA executed");
                notifier.send(
                    NotifyLevel::Info,
                    format!("DCA level {dca_level} on {pair}, average price now {average_price}"),
                );
            }
            DomainEvent::PositionClosed {
                pair,
                final_margin,
                proceeds,
                ..
            } => {
                info!(%pair, %final_margin, %proceeds, "position closed");
                notifier.send(
                    NotifyLevel::Info,
                    format!("Closed {pair} at {final_margin} for {proceeds}"),
                );
            }
            DomainEvent::RuleMatched { pair, rule, action } => {
                info!(%pair, %rule, %action, "rule matched");
            }
            DomainEvent::TrailingTriggered { pair, side, reason } => {
                info!(%pair, %side, %reason, "trailing triggered");
            }
            DomainEvent::OrderRejected { pair, status } => {
                warn!(%pair, %status, "order rejected by exchange");
                notifier.send(NotifyLevel::Warning, format!("Order on {pair}: {status}"));
            }
            DomainEvent::BalanceSynced {
                previous_total,
                total,
            } => {
                info!(%previous_total, %total, "balance synced with exchange");
            }
            DomainEvent::ReserveClamped { total, reserved } => {
                warn!(%total, %reserved, "exchange total below reserved, clamping");
                notifier.send(
                    NotifyLevel::Warning,
                    format!("Balance sync clamped reserve: total {total}, reserved {reserved}"),
                );
            }
            DomainEvent::PersistenceDegraded { detail } => {
                warn!(%detail, "persistence degraded");
                notifier.send(NotifyLevel::Warning, format!("Persistence degraded: {detail}"));
            }
            DomainEvent::TradingSuspended { reason } => {
                warn!(%reason, "trading suspended");
                notifier.send(NotifyLevel::Critical, format!("Trading suspended: {reason}"));
            }
            DomainEvent::ConfigReloaded => {
                info!("configuration reloaded");
            }
            DomainEvent::BacktestingCompleted { summary } => {
                info!(?summary, "backtesting completed");
                notifier.send(
                    NotifyLevel::Info,
                    format!(
                        "Backtest complete: {} trades, final balance {}",
                        summary.trades, summary.final_balance
                    ),
                );
            }
        }
    }
}
