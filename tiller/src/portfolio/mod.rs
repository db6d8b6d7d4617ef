use crate::error::ValidationError;
use crate::position::Position;
use fnv::FnvHashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::{SmolStr, ToSmolStr};
use tiller_instrument::{Currency, Money, PortfolioId, PositionId, TradingPair};
use tracing::warn;

/// Quote-currency balance split across concurrent trades.
///
/// `total == available + reserved` at all times.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct PortfolioBalance {
    pub total: Decimal,
    pub available: Decimal,
    pub reserved: Decimal,
}

/// Portfolio aggregate tracking balance, the open-position index and per
/// position reserved costs.
///
/// All mutation is serialised through the owning
/// [`Account`](crate::portfolio::Account) lock.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Portfolio {
    pub id: PortfolioId,
    pub name: SmolStr,
    /// Quote currency every [`Money`] in this portfolio is denominated in.
    pub market: Currency,
    pub balance: PortfolioBalance,
    pub max_positions: usize,
    pub min_position_cost: Decimal,
    /// pair symbol → open position id; a pair appears at most once.
    active_positions: FnvHashMap<SmolStr, PositionId>,
    /// position id → originally reserved cost.
    position_costs: FnvHashMap<PositionId, Decimal>,
}

impl Portfolio {
    pub fn new(
        name: SmolStr,
        market: Currency,
        initial_balance: Decimal,
        max_positions: usize,
        min_position_cost: Decimal,
    ) -> Self {
        Self {
            id: PortfolioId::random(),
            name,
            market,
            balance: PortfolioBalance {
                total: initial_balance,
                available: initial_balance,
                reserved: Decimal::ZERO,
            },
            max_positions,
            min_position_cost,
            active_positions: FnvHashMap::default(),
            position_costs: FnvHashMap::default(),
        }
    }

    pub fn position_count(&self) -> usize {
        self.active_positions.len()
    }

    pub fn holds_pair(&self, symbol: &str) -> bool {
        self.active_positions.contains_key(symbol)
    }

    pub fn position_id_for(&self, symbol: &str) -> Option<PositionId> {
        self.active_positions.get(symbol).copied()
    }

    pub fn active_positions(&self) -> &FnvHashMap<SmolStr, PositionId> {
        &self.active_positions
    }

    pub fn reserved_cost(&self, position_id: &PositionId) -> Option<Decimal> {
        self.position_costs.get(position_id).copied()
    }

    pub fn can_afford(&self, cost: Decimal) -> bool {
        cost <= self.balance.available
    }

    fn ensure_market_currency(&self, money: &Money) -> Result<(), ValidationError> {
        if money.currency == self.market {
            Ok(())
        } else {
            Err(ValidationError::CurrencyMismatch(SmolStr::new(format!(
                "{} vs portfolio market {}",
                money.currency, self.market
            ))))
        }
    }

    /// Reserve `cost` for a newly opened position.
    pub fn record_position_opened(
        &mut self,
        position_id: PositionId,
        pair: &TradingPair,
        cost: &Money,
    ) -> Result<(), ValidationError> {
        self.ensure_market_currency(cost)?;

        if self.active_positions.contains_key(&pair.symbol) {
            return Err(ValidationError::PositionAlreadyExists(pair.symbol.clone()));
        }
        if self.active_positions.len() >= self.max_positions {
            return Err(ValidationError::MaxPositionsReached(self.max_positions));
        }
        if !self.can_afford(cost.amount) {
            return Err(ValidationError::InsufficientFunds {
                required: cost.amount.to_smolstr(),
                available: self.balance.available.to_smolstr(),
            });
        }

        self.balance.available -= cost.amount;
        self.balance.reserved += cost.amount;
        self.active_positions
            .insert(pair.symbol.clone(), position_id);
        self.position_costs.insert(position_id, cost.amount);

        Ok(())
    }

    /// Reserve the additional cost of a DCA entry.
    pub fn record_position_cost_increased(
        &mut self,
        position_id: PositionId,
        pair: &TradingPair,
        added_cost: &Money,
    ) -> Result<(), ValidationError> {
        self.ensure_market_currency(added_cost)?;

        if self.active_positions.get(&pair.symbol) != Some(&position_id) {
            return Err(ValidationError::PositionNotFound(pair.symbol.clone()));
        }
        if !self.can_afford(added_cost.amount) {
            return Err(ValidationError::InsufficientFunds {
                required: added_cost.amount.to_smolstr(),
                available: self.balance.available.to_smolstr(),
            });
        }

        self.balance.available -= added_cost.amount;
        self.balance.reserved += added_cost.amount;
        *self.position_costs.entry(position_id).or_default() += added_cost.amount;

        Ok(())
    }

    /// Release the reserved cost of a closed position and record its PnL.
    ///
    /// `proceeds` is the net quote value realised by the sell (gross value
    /// minus all fees). A negative-PnL close that would drive `available`
    /// below zero clamps it to zero, with the shortfall absorbed by `total`.
    pub fn record_position_closed(
        &mut self,
        position_id: PositionId,
        pair: &TradingPair,
        proceeds: &Money,
    ) -> Result<Decimal, ValidationError> {
        self.ensure_market_currency(proceeds)?;

        if self.active_positions.get(&pair.symbol) != Some(&position_id) {
            return Err(ValidationError::PositionNotFound(pair.symbol.clone()));
        }

        let reserved_cost = self
            .position_costs
            .remove(&position_id)
            .unwrap_or_default();
        self.active_positions.remove(&pair.symbol);

        // Release the reservation, then apply realised PnL
        self.balance.reserved -= reserved_cost;
        self.balance.available += reserved_cost;

        let pnl = proceeds.amount - reserved_cost;
        self.balance.available += pnl;
        self.balance.total += pnl;

        if self.balance.available.is_sign_negative() {
            let shortfall = -self.balance.available;
            warn!(
                %shortfall,
                portfolio = %self.name,
                "close drove available below zero, clamping"
            );
            self.balance.available = Decimal::ZERO;
            self.balance.total = self.balance.reserved;
        }

        Ok(pnl)
    }

    /// Reconcile the tracked total with the exchange-reported total.
    ///
    /// Returns `true` when the reserve had to be clamped because the
    /// exchange total dropped below it.
    pub fn sync_balance(&mut self, exchange_total: Decimal) -> bool {
        self.balance.total = exchange_total;

        if exchange_total < self.balance.reserved {
            warn!(
                %exchange_total,
                reserved = %self.balance.reserved,
                portfolio = %self.name,
                "exchange total below reserved, clamping reserve"
            );
            self.balance.reserved = exchange_total;
            self.balance.available = Decimal::ZERO;
            true
        } else {
            self.balance.available = exchange_total - self.balance.reserved;
            false
        }
    }

    /// Check P1 (total = available + reserved) & P5 (available ≥ 0).
    pub fn verify_invariants(&self) -> Result<(), SmolStr> {
        if self.balance.total != self.balance.available + self.balance.reserved {
            return Err(format!(
                "balance split broken: total {} != available {} + reserved {}",
                self.balance.total, self.balance.available, self.balance.reserved
            )
            .to_smolstr());
        }
        if self.balance.available.is_sign_negative() {
            return Err(SmolStr::new("available balance negative"));
        }
        if self.active_positions.len() > self.max_positions {
            return Err(SmolStr::new("more active positions than allowed"));
        }
        Ok(())
    }
}

/// Portfolio plus its positions, mutated only under one exclusive lock.
///
/// An open/DCA/close is always paired with a portfolio mutation, so the two
/// live behind the same lock and stay mutually consistent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Account {
    pub portfolio: Portfolio,
    pub positions: FnvHashMap<PositionId, Position>,
}

impl Account {
    pub fn new(portfolio: Portfolio) -> Self {
        Self {
            portfolio,
            positions: FnvHashMap::default(),
        }
    }

    pub fn open_position(&self, symbol: &str) -> Option<&Position> {
        self.portfolio
            .position_id_for(symbol)
            .and_then(|id| self.positions.get(&id))
    }

    /// Open (non-closed) positions in the portfolio index.
    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.portfolio
            .active_positions()
            .values()
            .filter_map(|id| self.positions.get(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn usdt() -> Currency {
        Currency::new("USDT").unwrap()
    }

    fn pair(base: &str) -> TradingPair {
        TradingPair::new(Currency::new(base).unwrap(), usdt())
    }

    fn portfolio() -> Portfolio {
        Portfolio::new(SmolStr::new("test"), usdt(), dec!(10_000), 5, dec!(100))
    }

    #[test]
    fn test_open_reserves_cost() {
        let mut portfolio = portfolio();
        let position_id = PositionId::random();

        portfolio
            .record_position_opened(position_id, &pair("BTC"), &Money::new(dec!(1000), usdt()))
            .unwrap();

        assert_eq!(portfolio.balance.available, dec!(9000));
        assert_eq!(portfolio.balance.reserved, dec!(1000));
        assert_eq!(portfolio.balance.total, dec!(10_000));
        assert!(portfolio.holds_pair("BTCUSDT"));
        assert!(portfolio.verify_invariants().is_ok());
    }

    #[test]
    fn test_open_rejects_duplicate_pair() {
        let mut portfolio = portfolio();
        portfolio
            .record_position_opened(
                PositionId::random(),
                &pair("BTC"),
                &Money::new(dec!(1000), usdt()),
            )
            .unwrap();

        let result = portfolio.record_position_opened(
            PositionId::random(),
            &pair("BTC"),
            &Money::new(dec!(500), usdt()),
        );

        assert!(matches!(
            result,
            Err(ValidationError::PositionAlreadyExists(_))
        ));
    }

    #[test]
    fn test_open_rejects_over_max_positions() {
        let mut portfolio = Portfolio::new(SmolStr::new("test"), usdt(), dec!(10_000), 1, dec!(1));
        portfolio
            .record_position_opened(
                PositionId::random(),
                &pair("BTC"),
                &Money::new(dec!(100), usdt()),
            )
            .unwrap();

        let result = portfolio.record_position_opened(
            PositionId::random(),
            &pair("ETH"),
            &Money::new(dec!(100), usdt()),
        );

        assert_eq!(result, Err(ValidationError::MaxPositionsReached(1)));
    }

    #[test]
    fn test_open_rejects_foreign_currency() {
        let mut portfolio = portfolio();

        let result = portfolio.record_position_opened(
            PositionId::random(),
            &pair("BTC"),
            &Money::new(dec!(100), Currency::new("EUR").unwrap()),
        );

        assert!(matches!(result, Err(ValidationError::CurrencyMismatch(_))));
    }

    #[test]
    fn test_dca_moves_additional_cost_to_reserved() {
        let mut portfolio = portfolio();
        let position_id = PositionId::random();
        let pair = pair("BTC");
        portfolio
            .record_position_opened(position_id, &pair, &Money::new(dec!(1000), usdt()))
            .unwrap();

        portfolio
            .record_position_cost_increased(position_id, &pair, &Money::new(dec!(500), usdt()))
            .unwrap();

        assert_eq!(portfolio.balance.available, dec!(8500));
        assert_eq!(portfolio.balance.reserved, dec!(1500));
        assert_eq!(portfolio.reserved_cost(&position_id), Some(dec!(1500)));
        assert!(portfolio.verify_invariants().is_ok());
    }

    #[test]
    fn test_close_releases_reserve_and_records_pnl() {
        let mut portfolio = portfolio();
        let position_id = PositionId::random();
        let pair = pair("BTC");
        portfolio
            .record_position_opened(position_id, &pair, &Money::new(dec!(1000), usdt()))
            .unwrap();

        // Net proceeds 1048 (S1: 1050 gross − 2 fees) → PnL +48
        let pnl = portfolio
            .record_position_closed(position_id, &pair, &Money::new(dec!(1048), usdt()))
            .unwrap();

        assert_eq!(pnl, dec!(48));
        assert_eq!(portfolio.balance.available, dec!(10_048));
        assert_eq!(portfolio.balance.reserved, dec!(0));
        assert_eq!(portfolio.balance.total, dec!(10_048));
        assert!(!portfolio.holds_pair("BTCUSDT"));
        assert!(portfolio.verify_invariants().is_ok());
    }

    #[test]
    fn test_close_with_loss() {
        let mut portfolio = portfolio();
        let position_id = PositionId::random();
        let pair = pair("BTC");
        portfolio
            .record_position_opened(position_id, &pair, &Money::new(dec!(1000), usdt()))
            .unwrap();

        let pnl = portfolio
            .record_position_closed(position_id, &pair, &Money::new(dec!(900), usdt()))
            .unwrap();

        assert_eq!(pnl, dec!(-100));
        assert_eq!(portfolio.balance.total, dec!(9900));
        assert!(portfolio.verify_invariants().is_ok());
    }

    #[test]
    fn test_sync_balance_clamps_when_total_below_reserved() {
        let mut portfolio = portfolio();
        portfolio
            .record_position_opened(
                PositionId::random(),
                &pair("BTC"),
                &Money::new(dec!(1000), usdt()),
            )
            .unwrap();

        let clamped = portfolio.sync_balance(dec!(600));

        assert!(clamped);
        assert_eq!(portfolio.balance.total, dec!(600));
        assert_eq!(portfolio.balance.reserved, dec!(600));
        assert_eq!(portfolio.balance.available, dec!(0));
        assert!(portfolio.verify_invariants().is_ok());
    }

    #[test]
    fn test_sync_balance_normal_reconcile() {
        let mut portfolio = portfolio();
        portfolio
            .record_position_opened(
                PositionId::random(),
                &pair("BTC"),
                &Money::new(dec!(1000), usdt()),
            )
            .unwrap();

        let clamped = portfolio.sync_balance(dec!(10_500));

        assert!(!clamped);
        assert_eq!(portfolio.balance.available, dec!(9500));
        assert_eq!(portfolio.balance.reserved, dec!(1000));
        assert!(portfolio.verify_invariants().is_ok());
    }
}
