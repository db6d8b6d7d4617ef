use crate::order::Order;
use crate::ExecutionError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::ToSmolStr;
use tiller_instrument::{Price, Quantity};

/// Exchange-published trading constraints for one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SymbolRules {
    /// Minimum quote-currency value of an order.
    pub min_order_value: Decimal,
    pub min_quantity: Decimal,
    pub max_quantity: Decimal,
    /// Quantity increments must be a multiple of this step.
    pub step_size: Decimal,
    pub price_precision: u32,
    pub quantity_precision: u32,
}

impl Default for SymbolRules {
    fn default() -> Self {
        Self {
            min_order_value: Decimal::ZERO,
            min_quantity: Decimal::ZERO,
            max_quantity: Decimal::MAX,
            step_size: Decimal::ZERO,
            price_precision: 8,
            quantity_precision: 8,
        }
    }
}

impl SymbolRules {
    /// Round a quantity down onto the symbol's step grid & precision.
    pub fn quantize_quantity(&self, quantity: Quantity) -> Quantity {
        let mut value = quantity.value().round_dp_with_strategy(
            self.quantity_precision,
            rust_decimal::RoundingStrategy::ToZero,
        );

        if !self.step_size.is_zero() {
            let steps = (value / self.step_size).floor();
            value = steps * self.step_size;
        }

        Quantity::new(value).unwrap_or(Quantity::ZERO)
    }

    /// Round a price onto the symbol's precision.
    pub fn quantize_price(&self, price: Price) -> Price {
        Price::new(price.value().round_dp(self.price_precision)).unwrap_or(Price::ZERO)
    }

    /// Validate an order against the symbol constraints at the given
    /// reference price.
    pub fn validate(&self, order: &Order, reference_price: Price) -> Result<(), ExecutionError> {
        let quantity = order.quantity.value();

        if quantity < self.min_quantity {
            return Err(ExecutionError::Permanent(
                format!(
                    "order quantity {quantity} below symbol minimum {}",
                    self.min_quantity
                )
                .to_smolstr(),
            ));
        }

        if quantity > self.max_quantity {
            return Err(ExecutionError::Permanent(
                format!(
                    "order quantity {quantity} above symbol maximum {}",
                    self.max_quantity
                )
                .to_smolstr(),
            ));
        }

        let price = order.price.unwrap_or(reference_price);
        let value = quantity * price.value();
        if value < self.min_order_value {
            return Err(ExecutionError::Permanent(
                format!(
                    "order value {value} below symbol minimum {}",
                    self.min_order_value
                )
                .to_smolstr(),
            ));
        }

        Ok(())
    }
}
