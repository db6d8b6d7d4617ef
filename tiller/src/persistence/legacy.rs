use crate::error::ValidationError;
use crate::position::{Position, PositionEntry};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::BTreeMap;
use tiller_execution::order::OrderId;
use tiller_instrument::{Currency, Margin, Money, Price, Quantity, TradingPair};
use tracing::warn;

/// Optional metadata block of a legacy trading pair.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct LegacyMetadata {
    pub signal_rule: Option<SmolStr>,
    #[serde(rename = "AdditionalDCALevels")]
    pub additional_dca_levels: Option<u32>,
    pub additional_costs: Option<Decimal>,
    pub swap_pair: Option<SmolStr>,
    pub last_buy_margin: Option<Decimal>,
}

/// One trading pair entry of the legacy account schema.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LegacyTradingPair {
    pub pair: SmolStr,
    pub order_ids: Vec<SmolStr>,
    /// ISO-8601 order timestamps, parallel to `OrderIds`.
    pub order_dates: Vec<DateTime<Utc>>,
    pub total_amount: Decimal,
    pub average_price_paid: Decimal,
    pub fees_pair_currency: Decimal,
    pub fees_market_currency: Decimal,
    pub current_price: Decimal,
    #[serde(default)]
    pub metadata: Option<LegacyMetadata>,
}

impl LegacyTradingPair {
    /// DCA level: `len(OrderDates) − 1 + AdditionalDCALevels`.
    pub fn dca_level(&self) -> u32 {
        let additional = self
            .metadata
            .as_ref()
            .and_then(|metadata| metadata.additional_dca_levels)
            .unwrap_or(0);
        (self.order_dates.len() as u32).saturating_sub(1) + additional
    }
}

/// The legacy on-disk account schema consumed by the one-shot migrator.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LegacyAccount {
    pub balance: Decimal,
    pub trading_pairs: BTreeMap<SmolStr, LegacyTradingPair>,
}

impl LegacyAccount {
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Convert into positions with migrated entries, against the given
    /// market currency. Unparseable pairs are skipped with a warning rather
    /// than failing the whole import.
    pub fn into_positions(self, market: &Currency) -> (Decimal, Vec<Position>) {
        let mut positions = Vec::new();

        for (symbol, legacy) in self.trading_pairs {
            match convert_pair(&symbol, legacy, market) {
                Ok(position) => positions.push(position),
                Err(error) => {
                    warn!(%symbol, %error, "skipping unconvertible legacy pair");
                }
            }
        }

        (self.balance, positions)
    }
}

fn convert_pair(
    symbol: &SmolStr,
    legacy: LegacyTradingPair,
    market: &Currency,
) -> Result<Position, ValidationError> {
    let pair = TradingPair::from_symbol(symbol, market.clone()).map_err(|error| {
        ValidationError::InvalidPair(symbol.clone(), SmolStr::new(error.to_string()))
    })?;

    if legacy.order_dates.is_empty() || legacy.total_amount.is_zero() {
        return Err(ValidationError::NonPositivePriceOrQuantity);
    }

    // The legacy schema keeps only aggregate amounts; spread them evenly
    // across the recorded orders so derived totals survive the migration.
    let order_count = Decimal::from(legacy.order_dates.len() as u64);
    let quantity_per_order = legacy.total_amount / order_count;
    let fees_per_order = legacy.fees_market_currency / order_count;

    let price = Price::new(legacy.average_price_paid)
        .map_err(|_| ValidationError::NonPositivePriceOrQuantity)?;
    let quantity = Quantity::new(quantity_per_order)
        .map_err(|_| ValidationError::NonPositivePriceOrQuantity)?;

    let entries = legacy
        .order_dates
        .iter()
        .enumerate()
        .map(|(index, time)| PositionEntry {
            order_id: legacy
                .order_ids
                .get(index)
                .map(OrderId::new)
                .unwrap_or_else(|| OrderId::new(format!("migrated-{index}"))),
            price,
            quantity,
            fees: Money::new(fees_per_order, market.clone()),
            time: *time,
            migrated: true,
        })
        .collect();

    let metadata = legacy.metadata.unwrap_or_default();

    Position::from_migrated_entries(
        pair,
        entries,
        metadata.signal_rule,
        metadata.last_buy_margin.map(Margin::percent),
    )
}
