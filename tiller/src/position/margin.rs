use crate::position::Position;
use rust_decimal::Decimal;
use tiller_instrument::Price;

/// Break-even & target-price helpers for exit planning.
///
/// Both account for an estimated sell-fee percentage so the engine can place
/// sells that clear fees, not just gross cost.
#[derive(Debug, Copy, Clone, Default)]
pub struct MarginCalculator;

impl MarginCalculator {
    /// Sell price at which the position exits flat after paying
    /// `fee_percent` of the sale value in fees.
    ///
    /// `(total_cost + buy_fees) / (quantity × (1 − fee/100))`
    pub fn break_even_price(position: &Position, fee_percent: Decimal) -> Price {
        let quantity = position.total_quantity().value();
        if quantity.is_zero() {
            return Price::ZERO;
        }

        let full_cost = position.total_cost() + position.total_fees().amount;
        let fee_multiplier = Decimal::ONE - fee_percent / Decimal::ONE_HUNDRED;
        if fee_multiplier.is_zero() {
            return Price::ZERO;
        }

        Price::new(full_cost / (quantity * fee_multiplier)).unwrap_or(Price::ZERO)
    }

    /// Sell price that realises `margin_percent` profit after fees.
    ///
    /// `target_value = full_cost × (1 + margin/100)`, then
    /// `target_value / (quantity × (1 − fee/100))`.
    pub fn target_price(
        position: &Position,
        margin_percent: Decimal,
        fee_percent: Decimal,
    ) -> Price {
        let quantity = position.total_quantity().value();
        if quantity.is_zero() {
            return Price::ZERO;
        }

        let full_cost = position.total_cost() + position.total_fees().amount;
        let target_value = full_cost * (Decimal::ONE + margin_percent / Decimal::ONE_HUNDRED);
        let fee_multiplier = Decimal::ONE - fee_percent / Decimal::ONE_HUNDRED;
        if fee_multiplier.is_zero() {
            return Price::ZERO;
        }

        Price::new(target_value / (quantity * fee_multiplier)).unwrap_or(Price::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use tiller_execution::order::OrderId;
    use tiller_instrument::{Currency, Money, Quantity, TradingPair};

    fn position() -> Position {
        let pair = TradingPair::new(
            Currency::new("BTC").unwrap(),
            Currency::new("USDT").unwrap(),
        );
        let (position, _) = Position::open(
            pair,
            OrderId::new("buy-1"),
            Price::new(dec!(100)).unwrap(),
            Quantity::new(dec!(10)).unwrap(),
            Money::new(dec!(1), Currency::new("USDT").unwrap()),
            None,
            Utc::now(),
        )
        .unwrap();
        position
    }

    #[test]
    fn test_break_even_margin_is_zero() {
        let position = position();
        let fee_percent = dec!(0.1);

        let break_even = MarginCalculator::break_even_price(&position, fee_percent);

        // Margin at the break-even price, with sell fees estimated at
        // fee_percent of the sale value, is ~0
        let sale_value = break_even.value() * position.total_quantity().value();
        let estimated_sell_fees = sale_value * fee_percent / dec!(100);
        let margin = position.calculate_margin(break_even, Some(estimated_sell_fees));

        assert!(margin.value().abs() < dec!(0.0001), "margin = {margin}");
    }

    #[test]
    fn test_target_price_round_trips_margin() {
        let position = position();
        let fee_percent = dec!(0.1);

        for target_margin in [dec!(1), dec!(4), dec!(10)] {
            let target = MarginCalculator::target_price(&position, target_margin, fee_percent);

            let sale_value = target.value() * position.total_quantity().value();
            let estimated_sell_fees = sale_value * fee_percent / dec!(100);
            let margin = position.calculate_margin(target, Some(estimated_sell_fees));

            // Within epsilon: the fee estimate feeds back into the full cost
            assert!(
                (margin.value() - target_margin).abs() < dec!(0.02),
                "target {target_margin} produced {margin}"
            );
        }
    }

    #[test]
    fn test_zero_quantity_yields_zero_prices() {
        let position = position();
        // Indirect: a calculator on a healthy position never divides by zero,
        // and the degenerate inputs short-circuit to Price::ZERO
        assert!(MarginCalculator::break_even_price(&position, dec!(100)).is_zero());
        assert!(MarginCalculator::target_price(&position, dec!(5), dec!(100)).is_zero());
    }
}
