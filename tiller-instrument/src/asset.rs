use crate::error::InstrumentError;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use smol_str::{SmolStr, StrExt};
use std::fmt::{Display, Formatter};

/// Upper-cased currency symbol new type.
///
/// eg/ "BTC", "ETH", "USDT", etc.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
pub struct Currency(SmolStr);

impl Currency {
    /// Construct a validated [`Currency`], upper-casing the provided symbol.
    pub fn new<S>(symbol: S) -> Result<Self, InstrumentError>
    where
        S: AsRef<str>,
    {
        let symbol = symbol.as_ref().trim();
        if symbol.is_empty() {
            return Err(InstrumentError::EmptyCurrency);
        }

        Ok(Self(symbol.to_uppercase_smolstr()))
    }
}

impl AsRef<str> for Currency {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for Currency {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for Currency {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let symbol = String::deserialize(deserializer)?;
        Currency::new(symbol).map_err(serde::de::Error::custom)
    }
}

/// A [`Decimal`] amount tagged with its [`Currency`].
///
/// Binary operations are checked: combining two [`Money`] values of different
/// currencies fails with [`InstrumentError::CurrencyMismatch`] rather than
/// silently mixing units.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct Money {
    pub amount: Decimal,
    pub currency: Currency,
}

impl Money {
    pub fn new(amount: Decimal, currency: Currency) -> Self {
        Self { amount, currency }
    }

    /// Zero-valued [`Money`] in the provided [`Currency`].
    pub fn zero(currency: Currency) -> Self {
        Self {
            amount: Decimal::ZERO,
            currency,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    /// Checked addition, failing on a [`Currency`] mismatch.
    pub fn checked_add(&self, other: &Money) -> Result<Money, InstrumentError> {
        self.ensure_same_currency(other)?;
        Ok(Money::new(self.amount + other.amount, self.currency.clone()))
    }

    /// Checked subtraction, failing on a [`Currency`] mismatch.
    pub fn checked_sub(&self, other: &Money) -> Result<Money, InstrumentError> {
        self.ensure_same_currency(other)?;
        Ok(Money::new(self.amount - other.amount, self.currency.clone()))
    }

    /// Scale the amount by a unit-less [`Decimal`] factor.
    pub fn scale(&self, factor: Decimal) -> Money {
        Money::new(self.amount * factor, self.currency.clone())
    }

    fn ensure_same_currency(&self, other: &Money) -> Result<(), InstrumentError> {
        if self.currency == other.currency {
            Ok(())
        } else {
            Err(InstrumentError::CurrencyMismatch {
                lhs: SmolStr::new(self.currency.as_ref()),
                rhs: SmolStr::new(other.currency.as_ref()),
            })
        }
    }
}

impl Display for Money {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn usdt() -> Currency {
        Currency::new("usdt").unwrap()
    }

    #[test]
    fn test_currency_new_normalises_case() {
        let currency = Currency::new("btc").unwrap();
        assert_eq!(currency.as_ref(), "BTC");
    }

    #[test]
    fn test_currency_new_rejects_empty() {
        assert_eq!(Currency::new("  "), Err(InstrumentError::EmptyCurrency));
    }

    #[test]
    fn test_money_checked_add_same_currency() {
        let lhs = Money::new(dec!(10.5), usdt());
        let rhs = Money::new(dec!(4.5), usdt());

        let actual = lhs.checked_add(&rhs).unwrap();

        assert_eq!(actual, Money::new(dec!(15.0), usdt()));
    }

    #[test]
    fn test_money_checked_add_currency_mismatch() {
        let lhs = Money::new(dec!(10), usdt());
        let rhs = Money::new(dec!(10), Currency::new("BTC").unwrap());

        assert!(matches!(
            lhs.checked_add(&rhs),
            Err(InstrumentError::CurrencyMismatch { .. })
        ));
    }

    #[test]
    fn test_money_checked_sub_can_go_negative() {
        let lhs = Money::new(dec!(5), usdt());
        let rhs = Money::new(dec!(8), usdt());

        let actual = lhs.checked_sub(&rhs).unwrap();

        assert_eq!(actual.amount, dec!(-3));
    }

    #[test]
    fn test_currency_deserialize_normalises() {
        let currency: Currency = serde_json::from_str("\"usdt\"").unwrap();
        assert_eq!(currency, usdt());
    }
}
