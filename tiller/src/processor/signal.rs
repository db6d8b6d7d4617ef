use crate::rule::context::RuleContext;
use crate::rule::{select, ProcessingMode, Rule, RuleAction};
use fnv::FnvHashMap;
use rust_decimal::Decimal;
use smol_str::SmolStr;
use tiller_instrument::{Price, TradingPair};
use tiller_signal::aggregator::SignalAggregator;
use tracing::trace;

/// One matched signal rule for a pair the engine may buy (or swap into).
#[derive(Debug, Clone, PartialEq)]
pub struct SignalCandidate {
    pub pair: TradingPair,
    pub rule: Rule,
    pub snapshots: FnvHashMap<SmolStr, tiller_signal::snapshot::SignalSnapshot>,
    pub current_price: Price,
}

/// Inputs that vary per sweep of the signal-rule pipeline.
#[derive(Debug)]
pub struct SignalSweep<'a> {
    /// Market pair universe for the configured market.
    pub universe: &'a [TradingPair],
    /// Latest ticker prices by symbol.
    pub prices: &'a FnvHashMap<SmolStr, Price>,
    /// Symbols the portfolio currently holds.
    pub held_symbols: &'a [SmolStr],
    pub rules: &'a [Rule],
    pub mode: ProcessingMode,
    pub speed_multiplier: Decimal,
}

/// Evaluate the enabled signal rules for every eligible pair, in universe
/// order.
///
/// Held pairs are excluded unless a rule's action is [`RuleAction::Swap`];
/// the executor later designates the swap victim. Pairs without a ticker
/// price are skipped - a candidate without a price cannot be sized.
pub fn process(aggregator: &SignalAggregator, sweep: &SignalSweep<'_>) -> Vec<SignalCandidate> {
    let mut candidates = Vec::new();

    for pair in sweep.universe {
        let Some(current_price) = sweep.prices.get(&pair.symbol).copied() else {
            continue;
        };
        if current_price.is_zero() {
            continue;
        }

        let held = sweep
            .held_symbols
            .iter()
            .any(|symbol| pair.matches_symbol(symbol));

        let snapshots = aggregator.snapshots(&pair.symbol);
        let ctx = RuleContext::new(pair, &snapshots, aggregator.global_rating(), None)
            .with_speed_multiplier(sweep.speed_multiplier);

        let selected = if held {
            // A held pair may only surface through a swap rule
            let swap_rules: Vec<Rule> = sweep
                .rules
                .iter()
                .filter(|rule| rule.action == RuleAction::Swap)
                .cloned()
                .collect();
            select(&swap_rules, sweep.mode, &ctx).cloned()
        } else {
            select(sweep.rules, sweep.mode, &ctx).cloned()
        };

        if let Some(rule) = selected {
            trace!(pair = %pair.symbol, rule = %rule.name, "signal rule matched");
            candidates.push(SignalCandidate {
                pair: pair.clone(),
                rule,
                snapshots,
                current_price,
            });
        }
    }

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::condition::Condition;
    use rust_decimal_macros::dec;
    use tiller_instrument::Currency;
    use tiller_signal::snapshot::SignalSnapshot;

    fn pair(base: &str) -> TradingPair {
        TradingPair::new(
            Currency::new(base).unwrap(),
            Currency::new("USDT").unwrap(),
        )
    }

    fn buy_rule(name: &str, min_rating: Decimal) -> Rule {
        Rule {
            name: SmolStr::new(name),
            enabled: true,
            priority: 0,
            action: RuleAction::Buy,
            trailing: None,
            conditions: vec![Condition {
                signal: Some(SmolStr::new("tv")),
                min_rating: Some(min_rating),
                ..Default::default()
            }],
            swap_signal_rules: None,
            swap_timeout_secs: None,
        }
    }

    fn aggregator_with(symbol: &str, rating: Decimal) -> SignalAggregator {
        let aggregator = SignalAggregator::default();
        aggregator.ingest(
            &SmolStr::new("tv"),
            SmolStr::new(symbol),
            SignalSnapshot {
                rating: Some(rating),
                ..Default::default()
            },
        );
        aggregator
    }

    #[test]
    fn test_emits_candidate_for_matching_unheld_pair() {
        let universe = vec![pair("BTC"), pair("ETH")];
        let mut prices = FnvHashMap::default();
        prices.insert(SmolStr::new("BTCUSDT"), Price::new(dec!(100)).unwrap());
        prices.insert(SmolStr::new("ETHUSDT"), Price::new(dec!(10)).unwrap());
        let rules = vec![buy_rule("momentum", dec!(0.3))];
        let aggregator = aggregator_with("BTCUSDT", dec!(0.5));

        let candidates = process(
            &aggregator,
            &SignalSweep {
                universe: &universe,
                prices: &prices,
                held_symbols: &[],
                rules: &rules,
                mode: ProcessingMode::FirstMatch,
                speed_multiplier: Decimal::ONE,
            },
        );

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].pair.symbol, "BTCUSDT");
        assert_eq!(candidates[0].rule.name, "momentum");
        assert_eq!(candidates[0].current_price.value(), dec!(100));
    }

    #[test]
    fn test_held_pair_excluded_for_buy_rules() {
        let universe = vec![pair("BTC")];
        let mut prices = FnvHashMap::default();
        prices.insert(SmolStr::new("BTCUSDT"), Price::new(dec!(100)).unwrap());
        let rules = vec![buy_rule("momentum", dec!(0.3))];
        let aggregator = aggregator_with("BTCUSDT", dec!(0.9));
        let held = vec![SmolStr::new("BTCUSDT")];

        let candidates = process(
            &aggregator,
            &SignalSweep {
                universe: &universe,
                prices: &prices,
                held_symbols: &held,
                rules: &rules,
                mode: ProcessingMode::FirstMatch,
                speed_multiplier: Decimal::ONE,
            },
        );

        assert!(candidates.is_empty());
    }

    #[test]
    fn test_held_pair_still_matches_swap_rules() {
        let universe = vec![pair("BTC")];
        let mut prices = FnvHashMap::default();
        prices.insert(SmolStr::new("BTCUSDT"), Price::new(dec!(100)).unwrap());
        let mut swap_rule = buy_rule("rotate", dec!(0.3));
        swap_rule.action = RuleAction::Swap;
        let rules = vec![buy_rule("momentum", dec!(0.3)), swap_rule];
        let aggregator = aggregator_with("BTCUSDT", dec!(0.9));
        let held = vec![SmolStr::new("BTCUSDT")];

        let candidates = process(
            &aggregator,
            &SignalSweep {
                universe: &universe,
                prices: &prices,
                held_symbols: &held,
                rules: &rules,
                mode: ProcessingMode::FirstMatch,
                speed_multiplier: Decimal::ONE,
            },
        );

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].rule.name, "rotate");
    }

    #[test]
    fn test_pair_without_price_is_skipped() {
        let universe = vec![pair("BTC")];
        let prices = FnvHashMap::default();
        let rules = vec![buy_rule("momentum", dec!(0.3))];
        let aggregator = aggregator_with("BTCUSDT", dec!(0.9));

        let candidates = process(
            &aggregator,
            &SignalSweep {
                universe: &universe,
                prices: &prices,
                held_symbols: &[],
                rules: &rules,
                mode: ProcessingMode::FirstMatch,
                speed_multiplier: Decimal::ONE,
            },
        );

        assert!(candidates.is_empty());
    }
}
