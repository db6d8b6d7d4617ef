use crate::asset::Currency;
use crate::error::InstrumentError;
use serde::{Deserialize, Serialize};
use smol_str::{SmolStr, StrExt};
use std::fmt::{Display, Formatter};

/// A tradable base/quote combination and its case-normalised exchange symbol.
///
/// eg/ TradingPair { base: "BTC", quote: "USDT", symbol: "BTCUSDT" }
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct TradingPair {
    pub base: Currency,
    pub quote: Currency,
    pub symbol: SmolStr,
}

impl TradingPair {
    /// Construct a [`TradingPair`] from base & quote currencies, deriving the
    /// upper-cased symbol.
    pub fn new(base: Currency, quote: Currency) -> Self {
        let symbol = format!("{}{}", base.as_ref(), quote.as_ref());
        Self {
            base,
            quote,
            symbol: SmolStr::new(symbol),
        }
    }

    /// Construct a [`TradingPair`] by stripping a known quote [`Currency`]
    /// from the end of an exchange symbol.
    ///
    /// eg/ ("btcusdt", "USDT") -> TradingPair { base: "BTC", .. }
    pub fn from_symbol<S>(symbol: S, quote: Currency) -> Result<Self, InstrumentError>
    where
        S: AsRef<str>,
    {
        let symbol = symbol.as_ref().to_uppercase_smolstr();

        let base = symbol
            .strip_suffix(quote.as_ref())
            .filter(|base| !base.is_empty())
            .ok_or_else(|| InstrumentError::SymbolQuoteMismatch {
                symbol: symbol.clone(),
                quote: SmolStr::new(quote.as_ref()),
            })?;

        Ok(Self {
            base: Currency::new(base)?,
            quote,
            symbol,
        })
    }

    /// Case-insensitive symbol equality.
    pub fn matches_symbol(&self, symbol: &str) -> bool {
        self.symbol.eq_ignore_ascii_case(symbol)
    }
}

impl Display for TradingPair {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn currency(symbol: &str) -> Currency {
        Currency::new(symbol).unwrap()
    }

    #[test]
    fn test_trading_pair_new_derives_symbol() {
        let pair = TradingPair::new(currency("btc"), currency("usdt"));
        assert_eq!(pair.symbol, "BTCUSDT");
    }

    #[test]
    fn test_trading_pair_from_symbol() {
        struct TestCase {
            input_symbol: &'static str,
            input_quote: &'static str,
            expected_base: Option<&'static str>,
        }

        let cases = vec![
            TestCase {
                input_symbol: "btcusdt",
                input_quote: "USDT",
                expected_base: Some("BTC"),
            },
            TestCase {
                input_symbol: "ETHBTC",
                input_quote: "BTC",
                expected_base: Some("ETH"),
            },
            TestCase {
                // Symbol not quoted in the portfolio market
                input_symbol: "ETHBTC",
                input_quote: "USDT",
                expected_base: None,
            },
            TestCase {
                // Quote alone is not a pair
                input_symbol: "USDT",
                input_quote: "USDT",
                expected_base: None,
            },
        ];

        for (index, test) in cases.into_iter().enumerate() {
            let actual = TradingPair::from_symbol(test.input_symbol, currency(test.input_quote));

            match (actual, test.expected_base) {
                (Ok(pair), Some(expected)) => {
                    assert_eq!(pair.base, currency(expected), "TC{index} base");
                }
                (Err(_), None) => {}
                (actual, expected) => {
                    panic!("TC{index} failed: actual={actual:?}, expected_base={expected:?}")
                }
            }
        }
    }

    #[test]
    fn test_matches_symbol_is_case_insensitive() {
        let pair = TradingPair::new(currency("BTC"), currency("USDT"));
        assert!(pair.matches_symbol("btcusdt"));
        assert!(!pair.matches_symbol("ethusdt"));
    }
}
