use crate::error::InstrumentError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::ToSmolStr;
use std::fmt::{Display, Formatter};
use std::ops::{Add, Sub};

/// Non-negative price new type.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default, Deserialize, Serialize,
)]
pub struct Price(Decimal);

impl Price {
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Construct a validated [`Price`], failing when the value is negative.
    pub fn new(value: Decimal) -> Result<Self, InstrumentError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(InstrumentError::NegativePrice(value.to_smolstr()));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl Display for Price {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Non-negative quantity new type.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default, Deserialize, Serialize,
)]
pub struct Quantity(Decimal);

impl Quantity {
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Construct a validated [`Quantity`], failing when the value is negative.
    pub fn new(value: Decimal) -> Result<Self, InstrumentError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(InstrumentError::NegativeQuantity(value.to_smolstr()));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Saturating sum of two quantities.
    pub fn add(&self, other: Quantity) -> Quantity {
        Quantity(self.0 + other.0)
    }
}

impl Display for Quantity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Signed percentage new type used for position margins, trailing deltas and
/// rule bounds.
///
/// eg/ `Margin::percent(dec!(4.79))` == +4.79%
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default, Deserialize, Serialize,
)]
pub struct Margin(Decimal);

impl Margin {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn percent(value: Decimal) -> Self {
        Self(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_sign_negative(&self) -> bool {
        self.0.is_sign_negative()
    }

    pub fn min(self, other: Margin) -> Margin {
        Margin(self.0.min(other.0))
    }

    pub fn max(self, other: Margin) -> Margin {
        Margin(self.0.max(other.0))
    }
}

impl Add for Margin {
    type Output = Margin;
    fn add(self, rhs: Margin) -> Margin {
        Margin(self.0 + rhs.0)
    }
}

impl Sub for Margin {
    type Output = Margin;
    fn sub(self, rhs: Margin) -> Margin {
        Margin(self.0 - rhs.0)
    }
}

impl Display for Margin {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}%", self.0.round_dp(4))
    }
}
