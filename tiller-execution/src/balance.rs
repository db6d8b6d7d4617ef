use chrono::{DateTime, Utc};
use derive_more::Constructor;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tiller_instrument::Currency;

/// Exchange balance for a single asset.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Constructor)]
pub struct AssetBalance {
    pub currency: Currency,
    pub total: Decimal,
    pub free: Decimal,
    pub time_exchange: DateTime<Utc>,
}

impl AssetBalance {
    pub fn used(&self) -> Decimal {
        self.total - self.free
    }
}
