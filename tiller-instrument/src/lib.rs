#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    unused_crate_dependencies,
    unused_extern_crates,
    clippy::unused_self,
    missing_debug_implementations,
    rust_2018_idioms
)]
#![allow(clippy::type_complexity)]

//! # Tiller-Instrument
//! Financial value types shared by every Tiller crate: currencies, money,
//! prices, quantities, margins, trading pairs and aggregate identifiers.
//!
//! All arithmetic is fixed-point via [`rust_decimal::Decimal`]. Construction
//! validates once; thereafter values are assumed well-formed.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// [`Currency`] and currency-tagged [`Money`](asset::Money).
pub mod asset;

/// Typed identifiers for aggregates (eg/ `PositionId`, `PortfolioId`).
pub mod id;

/// [`TradingPair`](pair::TradingPair) - a base/quote symbol combination.
pub mod pair;

/// Non-negative [`Price`](value::Price) & [`Quantity`](value::Quantity), and
/// the signed percentage [`Margin`](value::Margin).
pub mod value;

mod error;

pub use asset::{Currency, Money};
pub use error::InstrumentError;
pub use id::{PortfolioId, PositionId};
pub use pair::TradingPair;
pub use value::{Margin, Price, Quantity};

/// Side of an order or trade on a spot market.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl Display for Side {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}
