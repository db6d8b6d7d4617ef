use crate::error::ValidationError;
use crate::event::DomainEvent;
use crate::rule::context::PositionSnapshot;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::{SmolStr, ToSmolStr};
use tiller_execution::order::OrderId;
use tiller_instrument::{Currency, Margin, Money, PositionId, Price, Quantity, TradingPair};

/// Break-even & target-price math.
pub mod margin;

/// One immutable fill that entered a [`Position`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PositionEntry {
    pub order_id: OrderId,
    pub price: Price,
    pub quantity: Quantity,
    /// Fees paid for this entry, always in the position's quote currency.
    pub fees: Money,
    pub time: DateTime<Utc>,
    /// Entry imported from a legacy account file rather than executed here.
    pub migrated: bool,
}

impl PositionEntry {
    /// Quote-currency cost of this entry, excluding fees.
    pub fn cost(&self) -> Decimal {
        self.price.value() * self.quantity.value()
    }
}

/// Terminal state of a closed [`Position`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ClosedState {
    pub sell_order_id: OrderId,
    pub sell_price: Price,
    pub sell_fees: Money,
    pub closed_at: DateTime<Utc>,
    pub final_margin: Margin,
}

/// One open trade against a pair, possibly extended by DCA entries.
///
/// Invariants:
/// * a closed position is frozen - no further mutation.
/// * every entry's fee currency equals the position quote currency.
/// * every entry has price > 0 and quantity > 0.
/// * `opened_at` ≤ every entry time ≤ `last_buy_at` ≤ `closed_at`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Position {
    pub id: PositionId,
    pub pair: TradingPair,
    pub quote: Currency,
    /// Name of the signal rule that opened the position, if any.
    pub signal_rule: Option<SmolStr>,
    entries: Vec<PositionEntry>,
    pub opened_at: DateTime<Utc>,
    pub last_buy_at: DateTime<Utc>,
    /// Margin observed when the most recent DCA entry executed, feeding the
    /// margin-change rule predicate.
    pub last_buy_margin: Option<Margin>,
    closed: Option<ClosedState>,
}

impl Position {
    /// Open a new position from its first fill.
    pub fn open(
        pair: TradingPair,
        order_id: OrderId,
        price: Price,
        quantity: Quantity,
        fees: Money,
        signal_rule: Option<SmolStr>,
        time: DateTime<Utc>,
    ) -> Result<(Self, DomainEvent), ValidationError> {
        if price.is_zero() || quantity.is_zero() {
            return Err(ValidationError::NonPositivePriceOrQuantity);
        }
        if fees.currency != pair.quote {
            return Err(ValidationError::CurrencyMismatch(SmolStr::new(format!(
                "entry fees {} vs position quote {}",
                fees.currency, pair.quote
            ))));
        }

        let quote = pair.quote.clone();
        let entry = PositionEntry {
            order_id,
            price,
            quantity,
            fees,
            time,
            migrated: false,
        };
        let cost = Money::new(entry.cost(), quote.clone());

        let position = Self {
            id: PositionId::random(),
            pair,
            quote,
            signal_rule,
            entries: vec![entry],
            opened_at: time,
            last_buy_at: time,
            last_buy_margin: None,
            closed: None,
        };

        let event = DomainEvent::PositionOpened {
            position_id: position.id,
            pair: position.pair.clone(),
            price,
            quantity,
            cost,
            signal_rule: position.signal_rule.clone(),
            time,
        };

        Ok((position, event))
    }

    /// Reconstruct a position from migrated legacy data.
    pub fn from_migrated_entries(
        pair: TradingPair,
        entries: Vec<PositionEntry>,
        signal_rule: Option<SmolStr>,
        last_buy_margin: Option<Margin>,
    ) -> Result<Self, ValidationError> {
        let (first, last) = match (entries.first(), entries.last()) {
            (Some(first), Some(last)) => (first.time, last.time),
            _ => return Err(ValidationError::NonPositivePriceOrQuantity),
        };

        Ok(Self {
            id: PositionId::random(),
            quote: pair.quote.clone(),
            pair,
            signal_rule,
            entries,
            opened_at: first,
            last_buy_at: last,
            last_buy_margin,
            closed: None,
        })
    }

    /// Append a DCA fill, lowering the average entry price.
    pub fn add_dca_entry(
        &mut self,
        order_id: OrderId,
        price: Price,
        quantity: Quantity,
        fees: Money,
        margin_at_buy: Margin,
        time: DateTime<Utc>,
    ) -> Result<DomainEvent, ValidationError> {
        if self.is_closed() {
            return Err(ValidationError::PositionClosed);
        }
        if price.is_zero() || quantity.is_zero() {
            return Err(ValidationError::NonPositivePriceOrQuantity);
        }
        if fees.currency != self.quote {
            return Err(ValidationError::CurrencyMismatch(SmolStr::new(format!(
                "entry fees {} vs position quote {}",
                fees.currency, self.quote
            ))));
        }

        self.entries.push(PositionEntry {
            order_id,
            price,
            quantity,
            fees,
            time,
            migrated: false,
        });
        self.last_buy_at = time;
        self.last_buy_margin = Some(margin_at_buy);

        Ok(DomainEvent::DcaExecuted {
            position_id: self.id,
            pair: self.pair.clone(),
            dca_level: self.dca_level(),
            price,
            quantity,
            average_price: self.average_price(),
            total_cost: Money::new(self.total_cost(), self.quote.clone()),
            total_quantity: self.total_quantity(),
            time,
        })
    }

    /// Close the position with its sell fill.
    pub fn close(
        &mut self,
        sell_order_id: OrderId,
        sell_price: Price,
        sell_fees: Money,
        time: DateTime<Utc>,
    ) -> Result<DomainEvent, ValidationError> {
        if self.is_closed() {
            return Err(ValidationError::PositionClosed);
        }
        if sell_price.is_zero() {
            return Err(ValidationError::NonPositivePriceOrQuantity);
        }
        if sell_fees.currency != self.quote {
            return Err(ValidationError::CurrencyMismatch(SmolStr::new(format!(
                "sell fees {} vs position quote {}",
                sell_fees.currency, self.quote
            ))));
        }

        let value = sell_price.value() * self.total_quantity().value();
        let full_cost = self.total_cost() + self.total_fees().amount + sell_fees.amount;
        let final_margin = if full_cost.is_zero() {
            Margin::ZERO
        } else {
            Margin::percent((value - full_cost) / full_cost * Decimal::ONE_HUNDRED)
        };
        let total_fees = Money::new(
            self.total_fees().amount + sell_fees.amount,
            self.quote.clone(),
        );

        self.closed = Some(ClosedState {
            sell_order_id,
            sell_price,
            sell_fees,
            closed_at: time,
            final_margin,
        });

        Ok(DomainEvent::PositionClosed {
            position_id: self.id,
            pair: self.pair.clone(),
            proceeds: Money::new(value, self.quote.clone()),
            total_fees,
            final_margin,
            duration_secs: (time - self.opened_at).num_seconds(),
            time,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }

    pub fn closed_state(&self) -> Option<&ClosedState> {
        self.closed.as_ref()
    }

    pub fn entries(&self) -> &[PositionEntry] {
        &self.entries
    }

    /// Number of DCA extensions beyond the opening entry.
    pub fn dca_level(&self) -> u32 {
        self.entries.len().saturating_sub(1) as u32
    }

    pub fn total_quantity(&self) -> Quantity {
        let total = self
            .entries
            .iter()
            .map(|entry| entry.quantity.value())
            .sum();
        Quantity::new(total).unwrap_or(Quantity::ZERO)
    }

    /// Total quote-currency cost across entries, excluding fees.
    pub fn total_cost(&self) -> Decimal {
        self.entries.iter().map(PositionEntry::cost).sum()
    }

    /// Total buy-side fees across entries.
    pub fn total_fees(&self) -> Money {
        let total = self.entries.iter().map(|entry| entry.fees.amount).sum();
        Money::new(total, self.quote.clone())
    }

    /// Volume-weighted average entry price; [`Price::ZERO`] when empty.
    pub fn average_price(&self) -> Price {
        let quantity = self.total_quantity();
        if quantity.is_zero() {
            return Price::ZERO;
        }
        Price::new(self.total_cost() / quantity.value()).unwrap_or(Price::ZERO)
    }

    /// Unrealised margin percentage at `current_price`.
    ///
    /// `estimated_sell_fees` (quote amount) is folded into the full cost when
    /// provided, making the figure fee-aware on the exit side too.
    pub fn calculate_margin(
        &self,
        current_price: Price,
        estimated_sell_fees: Option<Decimal>,
    ) -> Margin {
        let full_cost =
            self.total_cost() + self.total_fees().amount + estimated_sell_fees.unwrap_or_default();
        if full_cost.is_zero() {
            return Margin::ZERO;
        }

        let value = current_price.value() * self.total_quantity().value();
        Margin::percent((value - full_cost) / full_cost * Decimal::ONE_HUNDRED)
    }

    /// True iff the price has dropped at least `min_drop_pct` percent below
    /// the average entry price and the position is still open.
    pub fn can_dca_by_price_drop(&self, current_price: Price, min_drop_pct: Decimal) -> bool {
        if self.is_closed() {
            return false;
        }
        let average = self.average_price().value();
        if average.is_zero() {
            return false;
        }

        let drop_pct = (average - current_price.value()) / average * Decimal::ONE_HUNDRED;
        drop_pct >= min_drop_pct
    }

    /// Rule-evaluation projection at `now` & `current_margin`.
    pub fn snapshot(&self, now: DateTime<Utc>, current_margin: Margin) -> PositionSnapshot {
        PositionSnapshot {
            pair: self.pair.clone(),
            current_age: now - self.opened_at,
            last_buy_age: now - self.last_buy_at,
            current_margin,
            last_buy_margin: self.last_buy_margin,
            total_amount: self.total_quantity().value(),
            current_cost: self.total_cost(),
            dca_level: self.dca_level(),
            signal_rule: self.signal_rule.clone(),
        }
    }

    /// Check the structural invariants, returning the first violation.
    pub fn verify_invariants(&self) -> Result<(), SmolStr> {
        if self.entries.is_empty() {
            return Err(SmolStr::new("position has no entries"));
        }

        for entry in &self.entries {
            if entry.price.is_zero() || entry.quantity.is_zero() {
                return Err(format!(
                    "entry {} has non-positive price or quantity",
                    entry.order_id
                )
                .to_smolstr());
            }
            if entry.fees.currency != self.quote {
                return Err(format!(
                    "entry {} fee currency {} != quote {}",
                    entry.order_id, entry.fees.currency, self.quote
                )
                .to_smolstr());
            }
            if entry.time < self.opened_at || entry.time > self.last_buy_at {
                return Err(format!("entry {} outside position time bounds", entry.order_id)
                    .to_smolstr());
            }
        }

        if let Some(closed) = &self.closed
            && closed.closed_at < self.last_buy_at
        {
            return Err(SmolStr::new("closed before last buy"));
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

    fn open_position() -> Position {
        // S1 shape: buy at 100, cost 1000 -> qty 10, fees 1
        let (position, _) = Position::open(
            pair(),
            OrderId::new("buy-1"),
            Price::new(dec!(100)).unwrap(),
            Quantity::new(dec!(10)).unwrap(),
            usdt(dec!(1)),
            Some(SmolStr::new("momentum")),
            Utc::now(),
        )
        .unwrap();
        position
    }

    #[test]
    fn test_open_rejects_zero_price_or_quantity() {
        let result = Position::open(
            pair(),
            OrderId::new("buy-1"),
            Price::ZERO,
            Quantity::new(dec!(10)).unwrap(),
            usdt(dec!(1)),
            None,
            Utc::now(),
        );
        assert_eq!(result.unwrap_err(), ValidationError::NonPositivePriceOrQuantity);
    }

    #[test]
    fn test_open_rejects_foreign_fee_currency() {
        let result = Position::open(
            pair(),
            OrderId::new("buy-1"),
            Price::new(dec!(100)).unwrap(),
            Quantity::new(dec!(10)).unwrap(),
            Money::new(dec!(1), Currency::new("BNB").unwrap()),
            None,
            Utc::now(),
        );
        assert!(matches!(
            result.unwrap_err(),
            ValidationError::CurrencyMismatch(_)
        ));
    }

    #[test]
    fn test_margin_at_price_matches_expected_take_profit_shape() {
        let position = open_position();

        // (1050 - 1001) / 1001 * 100 ≈ 4.895%
        let margin = position.calculate_margin(Price::new(dec!(105)).unwrap(), None);

        let expected = (dec!(1050) - dec!(1001)) / dec!(1001) * dec!(100);
        assert_eq!(margin.value(), expected);
    }

    #[test]
    fn test_dca_lowers_average_price() {
        let mut position = open_position();

        // Price dropped to 90; add 500 USDT -> qty 500/90
        let quantity = Quantity::new(dec!(500) / dec!(90)).unwrap();
        let event = position
            .add_dca_entry(
                OrderId::new("buy-2"),
                Price::new(dec!(90)).unwrap(),
                quantity,
                usdt(dec!(0.5)),
                Margin::percent(dec!(-10)),
                Utc::now(),
            )
            .unwrap();

        assert_eq!(position.dca_level(), 1);

        // New average = 1500 / (10 + 5.555...) ≈ 96.43
        let average = position.average_price().value();
        assert!(average > dec!(96.42) && average < dec!(96.43));

        match event {
            DomainEvent::DcaExecuted {
                dca_level,
                total_cost,
                ..
            } => {
                assert_eq!(dca_level, 1);
                assert_eq!(total_cost.amount.round_dp(10), dec!(1500));
            }
            other => panic!("expected DcaExecuted, got {other:?}"),
        }
    }

    #[test]
    fn test_can_dca_by_price_drop() {
        let position = open_position();

        // 10% below the 100 average
        assert!(position.can_dca_by_price_drop(Price::new(dec!(90)).unwrap(), dec!(9)));
        // 5% below is not enough for a 9% threshold
        assert!(!position.can_dca_by_price_drop(Price::new(dec!(95)).unwrap(), dec!(9)));
    }

    #[test]
    fn test_close_computes_final_margin_and_freezes() {
        let mut position = open_position();

        let event = position
            .close(
                OrderId::new("sell-1"),
                Price::new(dec!(105)).unwrap(),
                usdt(dec!(1)),
                Utc::now(),
            )
            .unwrap();

        match event {
            DomainEvent::PositionClosed {
                proceeds,
                total_fees,
                final_margin,
                ..
            } => {
                assert_eq!(proceeds.amount, dec!(1050));
                assert_eq!(total_fees.amount, dec!(2));
                // (1050 - 1002) / 1002 * 100 ≈ 4.790%
                let expected = (dec!(1050) - dec!(1002)) / dec!(1002) * dec!(100);
                assert_eq!(final_margin.value(), expected);
            }
            other => panic!("expected PositionClosed, got {other:?}"),
        }

        // Frozen: further mutation fails
        assert_eq!(
            position
                .add_dca_entry(
                    OrderId::new("buy-3"),
                    Price::new(dec!(90)).unwrap(),
                    Quantity::new(dec!(1)).unwrap(),
                    usdt(dec!(0.1)),
                    Margin::ZERO,
                    Utc::now(),
                )
                .unwrap_err(),
            ValidationError::PositionClosed
        );
        assert_eq!(
            position
                .close(
                    OrderId::new("sell-2"),
                    Price::new(dec!(110)).unwrap(),
                    usdt(dec!(1)),
                    Utc::now(),
                )
                .unwrap_err(),
            ValidationError::PositionClosed
        );
    }

    #[test]
    fn test_total_cost_consistency_invariant() {
        let mut position = open_position();
        position
            .add_dca_entry(
                OrderId::new("buy-2"),
                Price::new(dec!(90)).unwrap(),
                Quantity::new(dec!(500) / dec!(90)).unwrap(),
                usdt(dec!(0.5)),
                Margin::ZERO,
                Utc::now(),
            )
            .unwrap();

        // averagePrice * totalQuantity == totalCost, within rounding tolerance
        let lhs = position.average_price().value() * position.total_quantity().value();
        let rhs = position.total_cost();
        assert!((lhs - rhs).abs() < dec!(0.000001));

        assert!(position.verify_invariants().is_ok());
    }
}
