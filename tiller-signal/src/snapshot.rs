use chrono::{DateTime, Utc};
use derive_more::Constructor;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Point-in-time reading of one signal for one pair.
///
/// Every metric is optional: providers publish different subsets, and rule
/// predicates referencing an absent field evaluate to false rather than
/// guessing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SignalSnapshot {
    pub volume: Option<Decimal>,
    pub volume_change: Option<Decimal>,
    pub price: Option<Decimal>,
    pub price_change: Option<Decimal>,
    /// Sentiment in [-1, 1]; clamped on ingest.
    pub rating: Option<Decimal>,
    pub rating_change: Option<Decimal>,
    pub volatility: Option<Decimal>,
}

impl SignalSnapshot {
    /// Clamp the rating into [-1, 1].
    pub fn normalised(mut self) -> Self {
        self.rating = self
            .rating
            .map(|rating| rating.clamp(Decimal::NEGATIVE_ONE, Decimal::ONE));
        self
    }
}

/// Pushed signal update from a provider subscription.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Constructor)]
pub struct SignalUpdate {
    pub provider: SmolStr,
    pub symbol: SmolStr,
    pub snapshot: SignalSnapshot,
    pub time: DateTime<Utc>,
}

/// Provider-side aggregate across the individual signals of one pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, Constructor)]
pub struct AggregatedSignal {
    pub overall_rating: Decimal,
    pub buy_count: u32,
    pub sell_count: u32,
    pub neutral_count: u32,
}
