use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use thiserror::Error;

/// Errors produced when constructing or combining instrument value types.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Error)]
pub enum InstrumentError {
    #[error("currency symbol is empty")]
    EmptyCurrency,

    #[error("currency mismatch: {lhs} vs {rhs}")]
    CurrencyMismatch { lhs: SmolStr, rhs: SmolStr },

    #[error("price cannot be negative: {0}")]
    NegativePrice(SmolStr),

    #[error("quantity cannot be negative: {0}")]
    NegativeQuantity(SmolStr),

    #[error("symbol {symbol} is not quoted in {quote}")]
    SymbolQuoteMismatch { symbol: SmolStr, quote: SmolStr },
}
