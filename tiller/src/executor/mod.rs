use crate::config::ConfigStore;
use crate::engine::clock::EngineClock;
use crate::error::ValidationError;
use crate::event::{DomainEvent, EventBus};
use crate::executor::intent::{CloseReason, TradeIntent};
use crate::executor::validator::{OpenChecks, TradingConstraintValidator};
use crate::notify::health::{
    HealthRegistry, MARKER_PERSISTENCE_DEGRADED, MARKER_RECONCILE_PENDING,
    MARKER_TRADING_SUSPENDED,
};
use crate::notify::{NotifierHandle, NotifyLevel};
use crate::persistence::trade_log::{TradeLog, TradeRecord};
use crate::persistence::AccountRepository;
use crate::portfolio::Account;
use crate::position::margin::MarginCalculator;
use crate::position::Position;
use crate::rule::Rule;
use crate::EngineError;
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use smol_str::{SmolStr, ToSmolStr};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tiller_execution::client::retry::RetryPolicy;
use tiller_execution::client::ExchangeClient;
use tiller_execution::order::{ClientOrderId, ExecutionReport, Order, OrderKind, OrderStatus};
use tiller_execution::ExecutionError;
use tiller_instrument::{Currency, Margin, Money, PositionId, Price, Quantity, Side, TradingPair};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Bounded in-memory record of executed trades.
pub mod history;

/// Trade intents flowing from the processors to the executor.
pub mod intent;

/// Pre-trade constraint validation.
pub mod validator;

use history::OrderHistory;

const PLACEMENT_ATTEMPTS: u32 = 3;
const RECONCILE_POLL_INTERVAL: Duration = Duration::from_millis(500);
const RECONCILE_WINDOW: Duration = Duration::from_secs(30);

/// Order executor: validate → place → reconcile → record.
///
/// The account lock is held for validation and for reconciliation, but
/// released across every exchange call. The order-execution pipeline drains
/// intents sequentially, so at most one placement is in flight at a time.
pub struct OrderExecutor {
    exchange: Arc<dyn ExchangeClient>,
    account: Arc<RwLock<Account>>,
    universe: Arc<RwLock<Vec<TradingPair>>>,
    config: Arc<ConfigStore>,
    clock: Arc<dyn EngineClock>,
    events: EventBus,
    notifier: NotifierHandle,
    health: Arc<HealthRegistry>,
    history: Arc<OrderHistory>,
    trade_log: Option<TradeLog>,
    repository: Option<AccountRepository>,
    retry: RetryPolicy,
    token: CancellationToken,
    last_buy_fill: Mutex<FnvHashMap<SmolStr, DateTime<Utc>>>,
    reconcile_pending: Mutex<HashSet<SmolStr>>,
    idempotency_seq: AtomicU64,
    trading_suspended: AtomicBool,
}

impl std::fmt::Debug for OrderExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderExecutor")
            .field("retry", &self.retry)
            .field("trading_suspended", &self.trading_suspended)
            .finish()
    }
}

impl OrderExecutor {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        account: Arc<RwLock<Account>>,
        universe: Arc<RwLock<Vec<TradingPair>>>,
        config: Arc<ConfigStore>,
        clock: Arc<dyn EngineClock>,
        events: EventBus,
        notifier: NotifierHandle,
        health: Arc<HealthRegistry>,
        history: Arc<OrderHistory>,
        trade_log: Option<TradeLog>,
        repository: Option<AccountRepository>,
        token: CancellationToken,
    ) -> Self {
        Self {
            exchange,
            account,
            universe,
            config,
            clock,
            events,
            notifier,
            health,
            history,
            trade_log,
            repository,
            retry: RetryPolicy::default(),
            token,
            last_buy_fill: Mutex::new(FnvHashMap::default()),
            reconcile_pending: Mutex::new(HashSet::new()),
            idempotency_seq: AtomicU64::new(0),
            trading_suspended: AtomicBool::new(false),
        }
    }

    pub fn history(&self) -> &OrderHistory {
        &self.history
    }

    pub fn is_trading_suspended(&self) -> bool {
        self.trading_suspended.load(Ordering::Acquire)
    }

    /// Suspend all further trading, eg/ on an invariant violation or when a
    /// replay stream is exhausted.
    pub fn suspend_trading(&self, reason: &str) {
        if !self.trading_suspended.swap(true, Ordering::AcqRel) {
            self.health.raise(MARKER_TRADING_SUSPENDED);
            self.events.publish(DomainEvent::TradingSuspended {
                reason: SmolStr::new(reason),
            });
        }
    }

    /// Execute one trade intent end-to-end.
    pub async fn execute(&self, intent: TradeIntent) -> Result<(), EngineError> {
        if self.is_trading_suspended() {
            return Err(EngineError::Validation(ValidationError::TradingSuspended(
                SmolStr::new("executor suspended"),
            )));
        }

        match intent {
            TradeIntent::Open {
                pair,
                cost,
                signal_rule,
            } => self.execute_open(pair, cost, signal_rule).await,
            TradeIntent::Dca {
                position_id,
                cost,
                rule,
            } => self.execute_dca(position_id, cost, rule).await,
            TradeIntent::Close {
                position_id,
                reason,
            } => self.execute_close(position_id, reason).await,
            TradeIntent::Swap {
                victim,
                pair,
                cost,
                signal_rule,
            } => self.execute_swap(victim, pair, cost, signal_rule).await,
        }
    }

    async fn execute_open(
        &self,
        pair: TradingPair,
        cost: Money,
        signal_rule: Option<SmolStr>,
    ) -> Result<(), EngineError> {
        let config = self.config.current();
        let speed = self.clock.speed();
        let now = self.clock.now();

        let price = self
            .retry
            .call("get_price", &self.token, || {
                self.exchange.get_price(&pair, &self.token)
            })
            .await?;

        {
            let account = self.account.read();
            let universe = self.universe.read();
            let checks = OpenChecks {
                pair: &pair,
                cost: &cost,
                universe: &universe,
                now,
                last_buy_fill: self.last_buy_fill.lock().get(&pair.symbol).copied(),
                reconcile_pending: self.reconcile_pending.lock().contains(pair.symbol.as_str()),
                speed,
            };
            TradingConstraintValidator::validate_open(&account, &config.trading, &checks)?;
        }

        let quantity = self.sized_quantity(&pair, &cost, price).await?;
        let order = Order::new(
            pair.clone(),
            Side::Buy,
            config.trading.buy_type,
            quantity,
            matches!(config.trading.buy_type, OrderKind::Limit).then_some(price),
        );

        let report = self.place_reconciled(&order, "open").await?;
        if !report.is_filled() {
            self.record_rejection(&pair, &report);
            return Ok(());
        }

        let fees = self
            .fees_in_market(&report, &config.trading.market_currency()?)
            .await?;
        let fill_time = self.clock.now();

        let event = {
            let mut account = self.account.write();
            let (position, event) = Position::open(
                pair.clone(),
                report.order_id.clone(),
                report.average_price,
                report.filled_quantity,
                fees,
                signal_rule.clone(),
                fill_time,
            )?;
            let filled_cost = Money::new(report.cost.amount, account.portfolio.market.clone());
            account
                .portfolio
                .record_position_opened(position.id, &pair, &filled_cost)?;
            self.verify_account(&account, Some(&position))?;
            account.positions.insert(position.id, position);
            event
        };

        self.last_buy_fill
            .lock()
            .insert(pair.symbol.clone(), fill_time);

        self.record_fill(&report, event, SmolStr::new("buy"), signal_rule, None);
        Ok(())
    }

    async fn execute_dca(
        &self,
        position_id: PositionId,
        cost: Money,
        rule: Option<SmolStr>,
    ) -> Result<(), EngineError> {
        let config = self.config.current();
        let speed = self.clock.speed();
        let now = self.clock.now();

        let position = self.cloned_position(position_id)?;
        let pair = position.pair.clone();

        let price = self
            .retry
            .call("get_price", &self.token, || {
                self.exchange.get_price(&pair, &self.token)
            })
            .await?;

        {
            let account = self.account.read();
            TradingConstraintValidator::validate_dca(
                &account,
                &position,
                &config.rules.dca,
                &cost,
                price,
                now,
                speed,
            )?;
        }

        let quantity = self.sized_quantity(&pair, &cost, price).await?;
        let order = Order::new(
            pair.clone(),
            Side::Buy,
            config.trading.buy_type,
            quantity,
            matches!(config.trading.buy_type, OrderKind::Limit).then_some(price),
        );

        let report = self.place_reconciled(&order, "dca").await?;
        if !report.is_filled() {
            self.record_rejection(&pair, &report);
            return Ok(());
        }

        let fees = self
            .fees_in_market(&report, &config.trading.market_currency()?)
            .await?;
        let fill_time = self.clock.now();
        let margin_at_buy = position.calculate_margin(report.average_price, None);

        let event = {
            let mut account = self.account.write();
            let filled_cost = Money::new(report.cost.amount, account.portfolio.market.clone());
            let Some(position) = account.positions.get_mut(&position_id) else {
                return Err(EngineError::Validation(ValidationError::PositionNotFound(
                    pair.symbol.clone(),
                )));
            };
            let event = position.add_dca_entry(
                report.order_id.clone(),
                report.average_price,
                report.filled_quantity,
                fees,
                margin_at_buy,
                fill_time,
            )?;
            account
                .portfolio
                .record_position_cost_increased(position_id, &pair, &filled_cost)?;
            self.verify_account(&account, account.positions.get(&position_id))?;
            event
        };

        self.last_buy_fill
            .lock()
            .insert(pair.symbol.clone(), fill_time);

        self.record_fill(&report, event, SmolStr::new("dca"), rule, None);
        Ok(())
    }

    async fn execute_close(
        &self,
        position_id: PositionId,
        reason: CloseReason,
    ) -> Result<(), EngineError> {
        let config = self.config.current();
        let speed = self.clock.speed();
        let now = self.clock.now();

        let position = self.cloned_position(position_id)?;
        let pair = position.pair.clone();

        TradingConstraintValidator::validate_close(
            &position,
            now,
            self.reconcile_pending.lock().contains(pair.symbol.as_str()),
            speed,
        )?;

        let limit_price = match config.trading.sell_type {
            OrderKind::Market => None,
            OrderKind::Limit => Some(self.close_limit_price(&position, &reason, &config).await?),
        };
        let order = Order::new(
            pair.clone(),
            Side::Sell,
            config.trading.sell_type,
            position.total_quantity(),
            limit_price,
        );

        let report = self.place_reconciled(&order, "close").await?;
        if !report.is_filled() {
            self.record_rejection(&pair, &report);
            return Ok(());
        }

        let sell_fees = self
            .fees_in_market(&report, &config.trading.market_currency()?)
            .await?;
        let fill_time = self.clock.now();

        let (event, final_margin) = {
            let mut account = self.account.write();
            let Some(position) = account.positions.get_mut(&position_id) else {
                return Err(EngineError::Validation(ValidationError::PositionNotFound(
                    pair.symbol.clone(),
                )));
            };
            let event = position.close(
                report.order_id.clone(),
                report.average_price,
                sell_fees,
                fill_time,
            )?;

            let (net_proceeds, final_margin) = match &event {
                DomainEvent::PositionClosed {
                    proceeds,
                    total_fees,
                    final_margin,
                    ..
                } => (
                    Money::new(proceeds.amount - total_fees.amount, proceeds.currency.clone()),
                    *final_margin,
                ),
                _ => unreachable!("Position::close emits PositionClosed"),
            };

            account
                .portfolio
                .record_position_closed(position_id, &pair, &net_proceeds)?;
            self.verify_account(&account, account.positions.get(&position_id))?;
            (event, final_margin)
        };

        self.record_fill(
            &report,
            event,
            reason.action(),
            reason.rule_name(),
            Some(final_margin),
        );
        Ok(())
    }

    async fn execute_swap(
        &self,
        victim: PositionId,
        pair: TradingPair,
        cost: Money,
        signal_rule: Option<SmolStr>,
    ) -> Result<(), EngineError> {
        let rule_name = signal_rule.clone().unwrap_or_else(|| SmolStr::new("swap"));
        self.execute_close(victim, CloseReason::Swap(rule_name))
            .await?;

        if let Err(open_error) = self
            .execute_open(pair.clone(), cost, signal_rule)
            .await
        {
            warn!(
                %open_error,
                pair = %pair.symbol,
                "swap closed the victim but the replacement buy failed"
            );
            self.notifier.send(
                NotifyLevel::Warning,
                format!("Swap into {} failed after closing the victim: {open_error}", pair.symbol),
            );
            return Err(open_error);
        }

        Ok(())
    }

    /// Reconcile the portfolio total with the exchange-reported balance.
    pub async fn sync_balance(&self) -> Result<(), EngineError> {
        let balances = self
            .retry
            .call("get_balances", &self.token, || {
                self.exchange.get_balances(&self.token)
            })
            .await?;

        let (market, previous_total) = {
            let account = self.account.read();
            (
                account.portfolio.market.clone(),
                account.portfolio.balance.total,
            )
        };

        let Some(market_balance) = balances
            .iter()
            .find(|balance| balance.currency == market)
        else {
            return Err(EngineError::TransientIo(
                format!("exchange reported no {market} balance").to_smolstr(),
            ));
        };

        let clamped = {
            let mut account = self.account.write();
            account.portfolio.sync_balance(market_balance.total)
        };

        if clamped {
            self.events.publish(DomainEvent::ReserveClamped {
                total: market_balance.total,
                reserved: self.account.read().portfolio.balance.reserved,
            });
        } else if previous_total != market_balance.total {
            self.events.publish(DomainEvent::BalanceSynced {
                previous_total,
                total: market_balance.total,
            });
        }

        Ok(())
    }

    fn cloned_position(&self, position_id: PositionId) -> Result<Position, EngineError> {
        self.account
            .read()
            .positions
            .get(&position_id)
            .cloned()
            .ok_or_else(|| {
                EngineError::Validation(ValidationError::PositionNotFound(
                    position_id.to_smolstr(),
                ))
            })
    }

    async fn sized_quantity(
        &self,
        pair: &TradingPair,
        cost: &Money,
        price: Price,
    ) -> Result<Quantity, EngineError> {
        if price.is_zero() {
            return Err(EngineError::Validation(
                ValidationError::NonPositivePriceOrQuantity,
            ));
        }

        let raw = Quantity::new(cost.amount / price.value())
            .map_err(|_| EngineError::Validation(ValidationError::NonPositivePriceOrQuantity))?;

        let rules = match self
            .retry
            .call("symbol_rules", &self.token, || {
                self.exchange.symbol_rules(pair, &self.token)
            })
            .await
        {
            Ok(rules) => rules,
            Err(rules_error) => {
                warn!(%rules_error, pair = %pair.symbol, "symbol rules unavailable, using defaults");
                Default::default()
            }
        };

        let quantity = rules.quantize_quantity(raw);
        if quantity.is_zero() {
            return Err(EngineError::Validation(
                ValidationError::NonPositivePriceOrQuantity,
            ));
        }
        Ok(quantity)
    }

    /// Limit price for a closing sell.
    ///
    /// Profit-seeking closes rest at the price that realises the configured
    /// take-profit margin after fees. Urgent exits (stop-loss, trailing,
    /// swap) go out as a marketable limit at the current ticker instead; a
    /// resting target there would strand a position the engine needs rid of.
    async fn close_limit_price(
        &self,
        position: &Position,
        reason: &CloseReason,
        config: &crate::config::Config,
    ) -> Result<Price, EngineError> {
        if matches!(reason, CloseReason::TakeProfit | CloseReason::Rule(_)) {
            let target = MarginCalculator::target_price(
                position,
                config.rules.take_profit_margin,
                config.trading.fee_percent,
            );
            if !target.is_zero() {
                return Ok(target);
            }
        }

        self.retry
            .call("get_price", &self.token, || {
                self.exchange.get_price(&position.pair, &self.token)
            })
            .await
            .map_err(EngineError::from)
    }

    fn next_cid(&self, pair: &TradingPair, action: &str) -> ClientOrderId {
        let seq = self.idempotency_seq.fetch_add(1, Ordering::Relaxed);
        ClientOrderId::new(format!("t-{}-{action}-{seq}", pair.symbol.to_lowercase()))
    }

    /// Place with the idempotency key, resolving ambiguous outcomes via a
    /// status query before any retry, then await a terminal status.
    async fn place_reconciled(
        &self,
        order: &Order,
        action: &str,
    ) -> Result<ExecutionReport, EngineError> {
        let cid = self.next_cid(&order.pair, action);
        let mut attempt = 0;

        let report = loop {
            attempt += 1;
            match self.exchange.place_order(order, &cid, &self.token).await {
                Ok(report) => break report,
                Err(ExecutionError::Canceled) => return Err(EngineError::Canceled),
                Err(place_error) if place_error.is_transient() => {
                    warn!(
                        %place_error,
                        pair = %order.pair.symbol,
                        %cid,
                        attempt,
                        "placement outcome ambiguous, querying by idempotency key"
                    );
                    match self.query_order(&order.pair, &cid).await {
                        Ok(Some(report)) => break report,
                        Ok(None) if attempt < PLACEMENT_ATTEMPTS => {
                            // Exchange never saw it; safe to place again with
                            // the same idempotency key
                            tokio::time::sleep(RECONCILE_POLL_INTERVAL).await;
                        }
                        Ok(None) | Err(_) => {
                            return Err(self.mark_reconcile_pending(order, &cid, place_error));
                        }
                    }
                }
                Err(place_error) => {
                    return Err(place_error.into());
                }
            }
        };

        self.await_terminal(order, report).await
    }

    async fn query_order(
        &self,
        pair: &TradingPair,
        cid: &ClientOrderId,
    ) -> Result<Option<ExecutionReport>, EngineError> {
        self.retry
            .call("get_order", &self.token, || {
                self.exchange.get_order(pair, cid, &self.token)
            })
            .await
            .map_err(EngineError::from)
    }

    fn mark_reconcile_pending(
        &self,
        order: &Order,
        cid: &ClientOrderId,
        place_error: ExecutionError,
    ) -> EngineError {
        let symbol = order.pair.symbol.clone();
        error!(
            %place_error,
            pair = %symbol,
            %cid,
            "placement still ambiguous after bounded resolution, blocking pair"
        );
        self.reconcile_pending.lock().insert(symbol.clone());
        self.health.raise(MARKER_RECONCILE_PENDING);
        self.notifier.send(
            NotifyLevel::Critical,
            format!("Order on {symbol} is ambiguous (cid {cid}); pair blocked pending reconciliation"),
        );
        EngineError::AmbiguousPlacement {
            pair: symbol,
            cid: cid.0.clone(),
            detail: SmolStr::new(place_error.to_string()),
        }
    }

    /// Clear a pair from the reconcile-pending set once resolved.
    pub fn resolve_reconcile_pending(&self, symbol: &str) {
        let mut pending = self.reconcile_pending.lock();
        pending.remove(symbol);
        if pending.is_empty() {
            self.health.clear(MARKER_RECONCILE_PENDING);
        }
    }

    async fn await_terminal(
        &self,
        order: &Order,
        mut report: ExecutionReport,
    ) -> Result<ExecutionReport, EngineError> {
        let deadline = tokio::time::Instant::now() + RECONCILE_WINDOW;

        while !report.is_terminal() {
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    pair = %order.pair.symbol,
                    order_id = %report.order_id,
                    "order not terminal within the reconcile window, cancelling"
                );
                let _ = self
                    .exchange
                    .cancel_order(&order.pair, &report.order_id, &self.token)
                    .await;
                report.status = OrderStatus::Canceled;
                break;
            }

            tokio::time::sleep(RECONCILE_POLL_INTERVAL).await;
            if let Some(updated) = self.query_order(&order.pair, &report.client_order_id).await? {
                report = updated;
            }
        }

        Ok(report)
    }

    async fn fees_in_market(
        &self,
        report: &ExecutionReport,
        market: &Currency,
    ) -> Result<Money, EngineError> {
        if report.fees.currency == *market {
            return Ok(report.fees.clone());
        }

        // Fees paid in a foreign currency convert at the current ticker; an
        // unavailable conversion price fails the trade rather than guessing
        let fee_pair = TradingPair::new(report.fees.currency.clone(), market.clone());
        let conversion = self
            .retry
            .call("get_price", &self.token, || {
                self.exchange.get_price(&fee_pair, &self.token)
            })
            .await
            .map_err(|_| {
                EngineError::TransientIo(
                    format!("no conversion price for fee pair {}", fee_pair.symbol).to_smolstr(),
                )
            })?;

        Ok(Money::new(
            report.fees.amount * conversion.value(),
            market.clone(),
        ))
    }

    fn verify_account(
        &self,
        account: &Account,
        position: Option<&Position>,
    ) -> Result<(), EngineError> {
        if let Err(violation) = account.portfolio.verify_invariants() {
            return Err(self.invariant_violation(violation, account));
        }
        if let Some(position) = position
            && let Err(violation) = position.verify_invariants()
        {
            return Err(self.invariant_violation(violation, account));
        }
        Ok(())
    }

    fn invariant_violation(&self, violation: SmolStr, account: &Account) -> EngineError {
        error!(%violation, state = ?account, "invariant violation, suspending trading");
        self.suspend_trading(violation.as_str());
        EngineError::Invariant(violation)
    }

    fn record_rejection(&self, pair: &TradingPair, report: &ExecutionReport) {
        self.events.publish(DomainEvent::OrderRejected {
            pair: pair.clone(),
            status: report.status.to_smolstr(),
        });
    }

    fn record_fill(
        &self,
        report: &ExecutionReport,
        event: DomainEvent,
        action: SmolStr,
        rule: Option<SmolStr>,
        margin: Option<Margin>,
    ) {
        let position_id = match &event {
            DomainEvent::PositionOpened { position_id, .. }
            | DomainEvent::DcaExecuted { position_id, .. }
            | DomainEvent::PositionClosed { position_id, .. } => Some(*position_id),
            _ => None,
        };

        let record = TradeRecord {
            time: report.time_exchange,
            pair: report.pair.symbol.clone(),
            side: report.side,
            action,
            order_id: report.order_id.0.clone(),
            position_id,
            price: report.average_price.value(),
            quantity: report.filled_quantity.value(),
            cost: report.cost.amount,
            fees: report.fees.amount,
            margin,
            rule: rule.clone(),
        };

        self.history.push(record.clone());

        if let Some(trade_log) = &self.trade_log
            && let Err(log_error) = trade_log.append(&record)
        {
            warn!(%log_error, "trade log append failed");
            self.health.raise(MARKER_PERSISTENCE_DEGRADED);
            self.events.publish(DomainEvent::PersistenceDegraded {
                detail: SmolStr::new(log_error.to_string()),
            });
        }

        if let Some(repository) = &self.repository {
            let account = self.account.read();
            if let Err(save_error) = repository.save(&account) {
                warn!(%save_error, "account persistence failed, memory remains source of truth");
                self.health.raise(MARKER_PERSISTENCE_DEGRADED);
                self.events.publish(DomainEvent::PersistenceDegraded {
                    detail: SmolStr::new(save_error.to_string()),
                });
            } else {
                self.health.clear(MARKER_PERSISTENCE_DEGRADED);
            }
        }

        if let Some(rule) = rule {
            self.events.publish(DomainEvent::RuleMatched {
                pair: report.pair.clone(),
                rule,
                action: SmolStr::new("executed"),
            });
        }

        self.events.publish(event);
        info!(
            pair = %report.pair.symbol,
            side = %report.side,
            price = %report.average_price,
            quantity = %report.filled_quantity,
            "order recorded"
        );
    }
}

/// Designate the swap victim for a matched swap rule: the worst-margin open
/// position whose originating signal rule is in the rule's swap set and
/// whose swap timeout has elapsed.
pub fn select_swap_victim(
    account: &Account,
    rule: &Rule,
    prices: &FnvHashMap<SmolStr, Price>,
    now: DateTime<Utc>,
    speed: Decimal,
) -> Option<PositionId> {
    let swap_rules = rule.swap_signal_rules.as_ref()?;
    let timeout_secs = Decimal::from(rule.swap_timeout_secs.unwrap_or(0));
    let scaled_timeout_secs = timeout_secs / speed.max(Decimal::ONE);

    account
        .open_positions()
        .filter(|position| !position.is_closed())
        .filter(|position| {
            position
                .signal_rule
                .as_ref()
                .is_some_and(|signal_rule| swap_rules.contains(signal_rule))
        })
        .filter(|position| {
            let age_secs = Decimal::from((now - position.last_buy_at).num_seconds());
            age_secs >= scaled_timeout_secs
        })
        .filter_map(|position| {
            let price = prices.get(&position.pair.symbol)?;
            Some((position.id, position.calculate_margin(*price, None)))
        })
        .min_by_key(|(_, margin)| *margin)
        .map(|(position_id, _)| position_id)
}
