use chrono::{DateTime, Utc};
use derive_more::{Constructor, Display, From};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use tiller_instrument::{Currency, Money, Price, Quantity, Side, TradingPair};

/// Exchange-assigned order identifier.
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display, From,
)]
pub struct OrderId(pub SmolStr);

impl OrderId {
    pub fn new<S: AsRef<str>>(id: S) -> Self {
        Self(SmolStr::new(id))
    }
}

/// Client-generated order identifier, doubling as the idempotency key sent
/// with every placement.
///
/// Callers derive deterministic ids (pair + action + monotonic counter) so a
/// retried placement is recognisable by the exchange.
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display, From,
)]
pub struct ClientOrderId(pub SmolStr);

impl ClientOrderId {
    pub fn new<S: Into<SmolStr>>(id: S) -> Self {
        Self(id.into())
    }
}

/// Whether an order executes immediately at market or rests at a limit price.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    Market,
    Limit,
}

/// An order request sent through the exchange port.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct Order {
    pub pair: TradingPair,
    pub side: Side,
    pub kind: OrderKind,
    pub quantity: Quantity,
    /// Required for [`OrderKind::Limit`], ignored for market orders.
    pub price: Option<Price>,
}

/// Exchange-reported lifecycle state of an order.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    /// An order is terminal once no further fills can occur.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Canceled
                | OrderStatus::Rejected
                | OrderStatus::Expired
        )
    }
}

/// Result of placing (or querying) an order on the exchange.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct ExecutionReport {
    pub order_id: OrderId,
    pub client_order_id: ClientOrderId,
    pub pair: TradingPair,
    pub side: Side,
    pub status: OrderStatus,
    pub requested_quantity: Quantity,
    pub filled_quantity: Quantity,
    pub average_price: Price,
    /// Gross quote-currency value of the filled quantity.
    pub cost: Money,
    pub fees: Money,
    pub time_exchange: DateTime<Utc>,
}

impl ExecutionReport {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled
    }

    /// Currency the exchange charged its fees in.
    pub fn fees_currency(&self) -> &Currency {
        &self.fees.currency
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_status_terminal() {
        struct TestCase {
            input: OrderStatus,
            expected: bool,
        }

        let cases = vec![
            TestCase {
                input: OrderStatus::New,
                expected: false,
            },
            TestCase {
                input: OrderStatus::PartiallyFilled,
                expected: false,
            },
            TestCase {
                input: OrderStatus::Filled,
                expected: true,
            },
            TestCase {
                input: OrderStatus::Canceled,
                expected: true,
            },
            TestCase {
                input: OrderStatus::Rejected,
                expected: true,
            },
            TestCase {
                input: OrderStatus::Expired,
                expected: true,
            },
        ];

        for (index, test) in cases.into_iter().enumerate() {
            assert_eq!(test.input.is_terminal(), test.expected, "TC{index} failed");
        }
    }
}
