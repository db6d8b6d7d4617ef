use crate::snapshot::{AggregatedSignal, SignalSnapshot};
use fnv::FnvHashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use smol_str::SmolStr;
use tracing::trace;

/// Rating at or above which a signal counts as a buy vote (mirrored for
/// sells).
fn vote_threshold() -> Decimal {
    Decimal::new(3, 1) // 0.3
}

/// Merges the latest reading of every configured provider, keyed by pair
/// symbol, and derives the market-wide global rating.
///
/// Writes come from the signals pipeline; reads come from rule evaluation.
/// Lookups clone small snapshot maps so rule evaluation never holds the lock.
#[derive(Debug, Default)]
pub struct SignalAggregator {
    weights: FnvHashMap<SmolStr, Decimal>,
    state: RwLock<FnvHashMap<SmolStr, FnvHashMap<SmolStr, SignalSnapshot>>>,
}

impl SignalAggregator {
    /// Construct an aggregator with per-provider weights used by the global
    /// rating. Unknown providers default to weight 1.
    pub fn new<I>(weights: I) -> Self
    where
        I: IntoIterator<Item = (SmolStr, Decimal)>,
    {
        Self {
            weights: weights.into_iter().collect(),
            state: RwLock::new(FnvHashMap::default()),
        }
    }

    /// Store the latest `snapshot` of `provider` for `symbol`.
    pub fn ingest(&self, provider: &SmolStr, symbol: SmolStr, snapshot: SignalSnapshot) {
        trace!(%provider, %symbol, "SignalAggregator ingesting snapshot");
        self.state
            .write()
            .entry(symbol)
            .or_default()
            .insert(provider.clone(), snapshot.normalised());
    }

    /// Bulk ingest, eg/ one polling sweep of a provider.
    pub fn ingest_many<I>(&self, provider: &SmolStr, snapshots: I)
    where
        I: IntoIterator<Item = (SmolStr, SignalSnapshot)>,
    {
        let mut state = self.state.write();
        for (symbol, snapshot) in snapshots {
            state
                .entry(symbol)
                .or_default()
                .insert(provider.clone(), snapshot.normalised());
        }
    }

    /// Latest provider-name → snapshot map for one pair symbol.
    pub fn snapshots(&self, symbol: &str) -> FnvHashMap<SmolStr, SignalSnapshot> {
        self.state
            .read()
            .get(symbol)
            .cloned()
            .unwrap_or_default()
    }

    /// Weighted mean rating across every stored snapshot, or `None` when no
    /// snapshot carries a rating.
    pub fn global_rating(&self) -> Option<Decimal> {
        let state = self.state.read();

        let mut weighted_sum = Decimal::ZERO;
        let mut weight_total = Decimal::ZERO;

        for providers in state.values() {
            for (provider, snapshot) in providers {
                let Some(rating) = snapshot.rating else {
                    continue;
                };
                let weight = self
                    .weights
                    .get(provider)
                    .copied()
                    .unwrap_or(Decimal::ONE);
                weighted_sum += rating * weight;
                weight_total += weight;
            }
        }

        (!weight_total.is_zero()).then(|| weighted_sum / weight_total)
    }

    /// Buy/sell/neutral vote counts and mean rating for one pair.
    pub fn aggregated(&self, symbol: &str) -> AggregatedSignal {
        let state = self.state.read();
        let Some(providers) = state.get(symbol) else {
            return AggregatedSignal::default();
        };

        let threshold = vote_threshold();
        let mut aggregate = AggregatedSignal::default();
        let mut rating_sum = Decimal::ZERO;
        let mut rated = 0u32;

        for snapshot in providers.values() {
            let Some(rating) = snapshot.rating else {
                aggregate.neutral_count += 1;
                continue;
            };

            rating_sum += rating;
            rated += 1;

            if rating >= threshold {
                aggregate.buy_count += 1;
            } else if rating <= -threshold {
                aggregate.sell_count += 1;
            } else {
                aggregate.neutral_count += 1;
            }
        }

        if rated > 0 {
            aggregate.overall_rating = rating_sum / Decimal::from(rated);
        }

        aggregate
    }

    /// Forget every stored snapshot (used when switching into replay).
    pub fn clear(&self) {
        self.state.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snapshot_with_rating(rating: Decimal) -> SignalSnapshot {
        SignalSnapshot {
            rating: Some(rating),
            ..Default::default()
        }
    }

    #[test]
    fn test_global_rating_is_weighted_mean() {
        let aggregator = SignalAggregator::new([
            (SmolStr::new("tv-15m"), dec!(3)),
            (SmolStr::new("tv-60m"), dec!(1)),
        ]);

        aggregator.ingest(
            &SmolStr::new("tv-15m"),
            SmolStr::new("BTCUSDT"),
            snapshot_with_rating(dec!(0.8)),
        );
        aggregator.ingest(
            &SmolStr::new("tv-60m"),
            SmolStr::new("BTCUSDT"),
            snapshot_with_rating(dec!(-0.4)),
        );

        // (0.8*3 + -0.4*1) / 4 = 0.5
        assert_eq!(aggregator.global_rating(), Some(dec!(0.5)));
    }

    #[test]
    fn test_global_rating_none_without_rated_snapshots() {
        let aggregator = SignalAggregator::default();
        aggregator.ingest(
            &SmolStr::new("tv-15m"),
            SmolStr::new("BTCUSDT"),
            SignalSnapshot::default(),
        );

        assert_eq!(aggregator.global_rating(), None);
    }

    #[test]
    fn test_ingest_clamps_rating_into_bounds() {
        let aggregator = SignalAggregator::default();
        aggregator.ingest(
            &SmolStr::new("tv-15m"),
            SmolStr::new("BTCUSDT"),
            snapshot_with_rating(dec!(7)),
        );

        let snapshots = aggregator.snapshots("BTCUSDT");
        assert_eq!(
            snapshots.get("tv-15m").and_then(|snapshot| snapshot.rating),
            Some(dec!(1))
        );
    }

    #[test]
    fn test_aggregated_votes() {
        let aggregator = SignalAggregator::default();
        for (provider, rating) in [
            ("a", dec!(0.9)),
            ("b", dec!(0.3)),
            ("c", dec!(-0.5)),
            ("d", dec!(0.1)),
        ] {
            aggregator.ingest(
                &SmolStr::new(provider),
                SmolStr::new("ETHUSDT"),
                snapshot_with_rating(rating),
            );
        }

        let aggregate = aggregator.aggregated("ETHUSDT");

        assert_eq!(aggregate.buy_count, 2);
        assert_eq!(aggregate.sell_count, 1);
        assert_eq!(aggregate.neutral_count, 1);
        assert_eq!(aggregate.overall_rating, dec!(0.2));
    }
}
