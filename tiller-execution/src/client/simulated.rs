use crate::balance::AssetBalance;
use crate::client::ExchangeClient;
use crate::order::{ClientOrderId, ExecutionReport, Order, OrderId, OrderKind, OrderStatus};
use crate::rules::SymbolRules;
use crate::ExecutionError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use smol_str::{SmolStr, ToSmolStr};
use std::collections::HashSet;
use tiller_instrument::{Currency, Money, Price, Quantity, Side, TradingPair};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// In-process exchange simulator.
///
/// Fills market orders at the latest ticker price with a configured fee
/// percentage, maintaining asset balances like a real spot venue. Marketable
/// limit orders fill at their limit price; non-marketable ones rest as `New`.
///
/// Used both for virtual (paper) trading against live tickers and for replay
/// runs where the tickers come from recorded snapshots.
pub struct SimulatedExchange {
    fee_percent: Decimal,
    clock: std::sync::Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    state: Mutex<SimulatedState>,
}

impl std::fmt::Debug for SimulatedExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedExchange")
            .field("fee_percent", &self.fee_percent)
            .field("state", &self.state)
            .finish()
    }
}

#[derive(Debug, Default)]
struct SimulatedState {
    prices: FnvHashMap<SmolStr, Price>,
    balances: FnvHashMap<Currency, Decimal>,
    orders: FnvHashMap<ClientOrderId, ExecutionReport>,
    rules: FnvHashMap<SmolStr, SymbolRules>,
    disabled_pairs: HashSet<SmolStr>,
    order_sequence: u64,
}

impl SimulatedExchange {
    /// Construct a simulator charging `fee_percent` (eg/ 0.1 == 0.1%) on
    /// every fill, with an initial quote-currency balance.
    pub fn new(fee_percent: Decimal, initial_balance: Money) -> Self {
        let mut balances = FnvHashMap::default();
        balances.insert(initial_balance.currency, initial_balance.amount);

        Self {
            fee_percent,
            clock: std::sync::Arc::new(Utc::now),
            state: Mutex::new(SimulatedState {
                balances,
                ..Default::default()
            }),
        }
    }

    /// Override the wall clock, allowing replay runs to stamp fills with
    /// snapshot time.
    pub fn with_clock<C>(mut self, clock: C) -> Self
    where
        C: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = std::sync::Arc::new(clock);
        self
    }

    /// Update the ticker price for one symbol.
    pub fn set_price(&self, pair: &TradingPair, price: Price) {
        self.state.lock().prices.insert(pair.symbol.clone(), price);
    }

    /// Bulk ticker update, eg/ one replay snapshot frame.
    pub fn set_prices<I>(&self, prices: I)
    where
        I: IntoIterator<Item = (SmolStr, Price)>,
    {
        self.state.lock().prices.extend(prices);
    }

    /// Mark a pair as disabled; placements & trailing updates will observe
    /// [`ExecutionError::PairDisabled`].
    pub fn set_pair_disabled(&self, pair: &TradingPair, disabled: bool) {
        let mut state = self.state.lock();
        if disabled {
            state.disabled_pairs.insert(pair.symbol.clone());
        } else {
            state.disabled_pairs.remove(&pair.symbol);
        }
    }

    /// Install symbol trading rules returned by [`ExchangeClient::symbol_rules`].
    pub fn set_symbol_rules(&self, pair: &TradingPair, rules: SymbolRules) {
        self.state.lock().rules.insert(pair.symbol.clone(), rules);
    }

    fn fill_order(
        &self,
        state: &mut SimulatedState,
        order: &Order,
        cid: &ClientOrderId,
    ) -> Result<ExecutionReport, ExecutionError> {
        let symbol = &order.pair.symbol;

        if state.disabled_pairs.contains(symbol) {
            return Err(ExecutionError::PairDisabled(symbol.clone()));
        }

        let ticker = state
            .prices
            .get(symbol)
            .copied()
            .ok_or_else(|| ExecutionError::MissingPrice(symbol.clone()))?;

        let fill_price = match (order.kind, order.price) {
            (OrderKind::Market, _) => Some(ticker),
            (OrderKind::Limit, Some(limit)) => {
                let marketable = match order.side {
                    Side::Buy => ticker.value() <= limit.value(),
                    Side::Sell => ticker.value() >= limit.value(),
                };
                marketable.then_some(limit)
            }
            (OrderKind::Limit, None) => {
                return Err(ExecutionError::Permanent(SmolStr::new(
                    "limit order without price",
                )));
            }
        };

        state.order_sequence += 1;
        let order_id = OrderId::new(format!("sim-{}", state.order_sequence));
        let now = (self.clock)();

        let Some(fill_price) = fill_price else {
            // Non-marketable limit order rests on the book
            let report = ExecutionReport::new(
                order_id,
                cid.clone(),
                order.pair.clone(),
                order.side,
                OrderStatus::New,
                order.quantity,
                Quantity::ZERO,
                Price::ZERO,
                Money::zero(order.pair.quote.clone()),
                Money::zero(order.pair.quote.clone()),
                now,
            );
            state.orders.insert(cid.clone(), report.clone());
            return Ok(report);
        };

        let quantity = order.quantity.value();
        let cost = quantity * fill_price.value();
        let fee = cost * self.fee_percent / Decimal::ONE_HUNDRED;
        let quote = order.pair.quote.clone();
        let base = order.pair.base.clone();

        match order.side {
            Side::Buy => {
                let required = cost + fee;
                let free = state.balances.get(&quote).copied().unwrap_or_default();
                if free < required {
                    return Err(ExecutionError::InsufficientBalance {
                        currency: SmolStr::new(quote.as_ref()),
                        required: required.to_smolstr(),
                        free: free.to_smolstr(),
                    });
                }
                *state.balances.entry(quote.clone()).or_default() -= required;
                *state.balances.entry(base).or_default() += quantity;
            }
            Side::Sell => {
                let held = state.balances.get(&base).copied().unwrap_or_default();
                if held < quantity {
                    return Err(ExecutionError::InsufficientBalance {
                        currency: SmolStr::new(base.as_ref()),
                        required: quantity.to_smolstr(),
                        free: held.to_smolstr(),
                    });
                }
                *state.balances.entry(base).or_default() -= quantity;
                *state.balances.entry(quote.clone()).or_default() += cost - fee;
            }
        }

        let report = ExecutionReport::new(
            order_id,
            cid.clone(),
            order.pair.clone(),
            order.side,
            OrderStatus::Filled,
            order.quantity,
            order.quantity,
            fill_price,
            Money::new(cost, quote.clone()),
            Money::new(fee, quote),
            now,
        );

        debug!(
            pair = %order.pair,
            side = %order.side,
            %fill_price,
            %quantity,
            "SimulatedExchange filled order"
        );

        state.orders.insert(cid.clone(), report.clone());
        Ok(report)
    }
}

#[async_trait]
impl ExchangeClient for SimulatedExchange {
    async fn place_order(
        &self,
        order: &Order,
        cid: &ClientOrderId,
        token: &CancellationToken,
    ) -> Result<ExecutionReport, ExecutionError> {
        if token.is_cancelled() {
            return Err(ExecutionError::Canceled);
        }

        let mut state = self.state.lock();

        // Idempotent placement: a repeated ClientOrderId returns the original
        if let Some(existing) = state.orders.get(cid) {
            return Ok(existing.clone());
        }

        self.fill_order(&mut state, order, cid)
    }

    async fn get_price(
        &self,
        pair: &TradingPair,
        token: &CancellationToken,
    ) -> Result<Price, ExecutionError> {
        if token.is_cancelled() {
            return Err(ExecutionError::Canceled);
        }

        self.state
            .lock()
            .prices
            .get(&pair.symbol)
            .copied()
            .ok_or_else(|| ExecutionError::MissingPrice(pair.symbol.clone()))
    }

    async fn get_prices(
        &self,
        pairs: &[TradingPair],
        token: &CancellationToken,
    ) -> Result<FnvHashMap<SmolStr, Price>, ExecutionError> {
        if token.is_cancelled() {
            return Err(ExecutionError::Canceled);
        }

        let state = self.state.lock();
        Ok(pairs
            .iter()
            .filter_map(|pair| {
                state
                    .prices
                    .get(&pair.symbol)
                    .map(|price| (pair.symbol.clone(), *price))
            })
            .collect())
    }

    async fn get_balances(
        &self,
        token: &CancellationToken,
    ) -> Result<Vec<AssetBalance>, ExecutionError> {
        if token.is_cancelled() {
            return Err(ExecutionError::Canceled);
        }

        let now = (self.clock)();
        Ok(self
            .state
            .lock()
            .balances
            .iter()
            .map(|(currency, total)| AssetBalance::new(currency.clone(), *total, *total, now))
            .collect())
    }

    async fn get_order(
        &self,
        _pair: &TradingPair,
        cid: &ClientOrderId,
        token: &CancellationToken,
    ) -> Result<Option<ExecutionReport>, ExecutionError> {
        if token.is_cancelled() {
            return Err(ExecutionError::Canceled);
        }

        Ok(self.state.lock().orders.get(cid).cloned())
    }

    async fn cancel_order(
        &self,
        _pair: &TradingPair,
        id: &OrderId,
        token: &CancellationToken,
    ) -> Result<(), ExecutionError> {
        if token.is_cancelled() {
            return Err(ExecutionError::Canceled);
        }

        let mut state = self.state.lock();
        let report = state
            .orders
            .values_mut()
            .find(|report| &report.order_id == id)
            .ok_or_else(|| ExecutionError::UnknownOrder(id.0.clone()))?;

        if !report.status.is_terminal() {
            report.status = OrderStatus::Canceled;
        }
        Ok(())
    }

    async fn symbol_rules(
        &self,
        pair: &TradingPair,
        token: &CancellationToken,
    ) -> Result<SymbolRules, ExecutionError> {
        if token.is_cancelled() {
            return Err(ExecutionError::Canceled);
        }

        Ok(self
            .state
            .lock()
            .rules
            .get(&pair.symbol)
            .cloned()
            .unwrap_or_default())
    }

    async fn test_connectivity(&self, token: &CancellationToken) -> Result<(), ExecutionError> {
        if token.is_cancelled() {
            return Err(ExecutionError::Canceled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pair() -> TradingPair {
        TradingPair::new(
            Currency::new("BTC").unwrap(),
            Currency::new("USDT").unwrap(),
        )
    }

    fn usdt(amount: Decimal) -> Money {
        Money::new(amount, Currency::new("USDT").unwrap())
    }

    fn exchange() -> SimulatedExchange {
        let exchange = SimulatedExchange::new(dec!(0.1), usdt(dec!(10_000)));
        exchange.set_price(&pair(), Price::new(dec!(100)).unwrap());
        exchange
    }

    #[tokio::test]
    async fn test_market_buy_fills_at_ticker_with_fee() {
        let exchange = exchange();
        let token = CancellationToken::new();
        let order = Order::new(
            pair(),
            Side::Buy,
            OrderKind::Market,
            Quantity::new(dec!(10)).unwrap(),
            None,
        );

        let report = exchange
            .place_order(&order, &ClientOrderId::new("cid-1"), &token)
            .await
            .unwrap();

        assert_eq!(report.status, OrderStatus::Filled);
        assert_eq!(report.average_price.value(), dec!(100));
        assert_eq!(report.cost.amount, dec!(1000));
        assert_eq!(report.fees.amount, dec!(1)); // 0.1% of 1000

        // Quote debited by cost + fee, base credited
        let balances = exchange.get_balances(&token).await.unwrap();
        let quote = balances
            .iter()
            .find(|balance| balance.currency.as_ref() == "USDT")
            .unwrap();
        let base = balances
            .iter()
            .find(|balance| balance.currency.as_ref() == "BTC")
            .unwrap();
        assert_eq!(quote.total, dec!(8999));
        assert_eq!(base.total, dec!(10));
    }

    #[tokio::test]
    async fn test_placement_is_idempotent_per_client_order_id() {
        let exchange = exchange();
        let token = CancellationToken::new();
        let order = Order::new(
            pair(),
            Side::Buy,
            OrderKind::Market,
            Quantity::new(dec!(1)).unwrap(),
            None,
        );
        let cid = ClientOrderId::new("cid-repeat");

        let first = exchange.place_order(&order, &cid, &token).await.unwrap();
        let second = exchange.place_order(&order, &cid, &token).await.unwrap();

        assert_eq!(first, second);

        let balances = exchange.get_balances(&token).await.unwrap();
        let base = balances
            .iter()
            .find(|balance| balance.currency.as_ref() == "BTC")
            .unwrap();
        assert_eq!(base.total, dec!(1), "second placement must not re-fill");
    }

    #[tokio::test]
    async fn test_buy_with_insufficient_funds_is_refused() {
        let exchange = SimulatedExchange::new(dec!(0.1), usdt(dec!(50)));
        exchange.set_price(&pair(), Price::new(dec!(100)).unwrap());
        let token = CancellationToken::new();
        let order = Order::new(
            pair(),
            Side::Buy,
            OrderKind::Market,
            Quantity::new(dec!(1)).unwrap(),
            None,
        );

        let actual = exchange
            .place_order(&order, &ClientOrderId::new("cid-poor"), &token)
            .await;

        assert!(matches!(
            actual,
            Err(ExecutionError::InsufficientBalance { .. })
        ));
    }

    #[tokio::test]
    async fn test_disabled_pair_is_refused() {
        let exchange = exchange();
        exchange.set_pair_disabled(&pair(), true);
        let token = CancellationToken::new();
        let order = Order::new(
            pair(),
            Side::Buy,
            OrderKind::Market,
            Quantity::new(dec!(1)).unwrap(),
            None,
        );

        let actual = exchange
            .place_order(&order, &ClientOrderId::new("cid-off"), &token)
            .await;

        assert_eq!(
            actual,
            Err(ExecutionError::PairDisabled(SmolStr::new("BTCUSDT")))
        );
    }

    #[tokio::test]
    async fn test_non_marketable_limit_rests_as_new() {
        let exchange = exchange();
        let token = CancellationToken::new();
        let order = Order::new(
            pair(),
            Side::Buy,
            OrderKind::Limit,
            Quantity::new(dec!(1)).unwrap(),
            Some(Price::new(dec!(90)).unwrap()),
        );

        let report = exchange
            .place_order(&order, &ClientOrderId::new("cid-limit"), &token)
            .await
            .unwrap();

        assert_eq!(report.status, OrderStatus::New);
        assert!(report.filled_quantity.is_zero());
    }
}
