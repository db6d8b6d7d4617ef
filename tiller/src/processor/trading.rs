use crate::config::RulesConfig;
use crate::position::Position;
use crate::rule::context::RuleContext;
use crate::rule::{select, Rule, RuleAction};
use chrono::{DateTime, TimeDelta, Utc};
use fnv::FnvHashMap;
use rust_decimal::Decimal;
use smol_str::SmolStr;
use tiller_instrument::{Margin, PositionId, Price, TradingPair};
use tiller_signal::aggregator::SignalAggregator;
use tracing::trace;

/// Decision for one open position after a trading-rule sweep.
#[derive(Debug, Clone, PartialEq)]
pub enum TradeDecision {
    StopLoss,
    TakeProfit,
    Sell { rule: Rule },
    Dca { rule: Rule },
    Alert { rule: Rule },
    /// No action this tick; the reason is kept for diagnostics.
    Hold { reason: SmolStr },
}

/// Per-position output of the trading-rule processor.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionAssessment {
    pub position_id: PositionId,
    pub pair: TradingPair,
    pub current_price: Price,
    pub current_margin: Margin,
    pub decision: TradeDecision,
}

/// Assess one open position in the mandated order: stop-loss first,
/// take-profit second, configured trading rules last.
///
/// DCA rule matches are suppressed (with the reason recorded) when DCA is
/// disabled or the position is already at its maximum level.
pub fn assess_position(
    position: &Position,
    current_price: Price,
    aggregator: &SignalAggregator,
    rules: &RulesConfig,
    speed_multiplier: Decimal,
    now: DateTime<Utc>,
) -> PositionAssessment {
    let current_margin = position.calculate_margin(current_price, None);
    let snapshot = position.snapshot(now, current_margin);

    // 1. Stop-loss, gated on minimum age
    let stop_loss = &rules.stop_loss;
    if stop_loss.enabled && current_margin.value() <= stop_loss.margin {
        let min_age = TimeDelta::seconds(stop_loss.min_age_secs as i64);
        let effective_age = scaled_age(snapshot.current_age, speed_multiplier);
        if effective_age >= min_age {
            return PositionAssessment {
                position_id: position.id,
                pair: position.pair.clone(),
                current_price,
                current_margin,
                decision: TradeDecision::StopLoss,
            };
        }
        trace!(
            pair = %position.pair,
            %current_margin,
            "stop-loss margin breached but position below minimum age"
        );
    }

    // 2. Take-profit on the default sell margin
    if current_margin.value() >= rules.take_profit_margin {
        return PositionAssessment {
            position_id: position.id,
            pair: position.pair.clone(),
            current_price,
            current_margin,
            decision: TradeDecision::TakeProfit,
        };
    }

    // 3. Configured trading rules
    let snapshots = aggregator.snapshots(&position.pair.symbol);
    let ctx = RuleContext::new(
        &position.pair,
        &snapshots,
        aggregator.global_rating(),
        Some(&snapshot),
    )
    .with_speed_multiplier(speed_multiplier);

    let decision = match select(&rules.trading_rules, rules.processing_mode, &ctx) {
        Some(rule) => match rule.action {
            RuleAction::Sell | RuleAction::StopLoss | RuleAction::TakeProfit => {
                TradeDecision::Sell { rule: rule.clone() }
            }
            RuleAction::Dca => {
                if !rules.dca.enabled {
                    TradeDecision::Hold {
                        reason: SmolStr::new("DCA not allowed: disabled"),
                    }
                } else if position.dca_level() >= rules.dca.max_levels {
                    TradeDecision::Hold {
                        reason: SmolStr::new("DCA not allowed: maximum level reached"),
                    }
                } else {
                    TradeDecision::Dca { rule: rule.clone() }
                }
            }
            RuleAction::Alert => TradeDecision::Alert { rule: rule.clone() },
            RuleAction::Buy | RuleAction::Swap => TradeDecision::Hold {
                reason: SmolStr::new("rule action not applicable to open position"),
            },
        },
        None => TradeDecision::Hold {
            reason: SmolStr::new("no trading rule matched"),
        },
    };

    PositionAssessment {
        position_id: position.id,
        pair: position.pair.clone(),
        current_price,
        current_margin,
        decision,
    }
}

/// Assess every open position that has a ticker price.
pub fn process(
    positions: &[Position],
    prices: &FnvHashMap<SmolStr, Price>,
    aggregator: &SignalAggregator,
    rules: &RulesConfig,
    speed_multiplier: Decimal,
    now: DateTime<Utc>,
) -> Vec<PositionAssessment> {
    positions
        .iter()
        .filter(|position| !position.is_closed())
        .filter_map(|position| {
            let current_price = prices.get(&position.pair.symbol).copied()?;
            Some(assess_position(
                position,
                current_price,
                aggregator,
                rules,
                speed_multiplier,
                now,
            ))
        })
        .collect()
}

fn scaled_age(age: TimeDelta, speed_multiplier: Decimal) -> TimeDelta {
    use rust_decimal::prelude::ToPrimitive;

    if speed_multiplier <= Decimal::ONE {
        return age;
    }
    let millis = Decimal::from(age.num_milliseconds()) / speed_multiplier;
    TimeDelta::milliseconds(millis.to_i64().unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StopLossConfig;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use tiller_execution::order::OrderId;
    use tiller_instrument::{Currency, Money, Quantity};

    fn pair() -> TradingPair {
        TradingPair::new(
            Currency::new("BTC").unwrap(),
            Currency::new("USDT").unwrap(),
        )
    }

    fn position_opened_at(opened_at: DateTime<Utc>) -> Position {
        let (position, _) = Position::open(
            pair(),
            OrderId::new("buy-1"),
            Price::new(dec!(100)).unwrap(),
            Quantity::new(dec!(10)).unwrap(),
            Money::new(dec!(1), Currency::new("USDT").unwrap()),
            None,
            opened_at,
        )
        .unwrap();
        position
    }

    fn rules_with_stop_loss(margin: Decimal, min_age_secs: u64) -> RulesConfig {
        RulesConfig {
            stop_loss: StopLossConfig {
                enabled: true,
                margin,
                min_age_secs,
            },
            take_profit_margin: dec!(4),
            ..Default::default()
        }
    }

    #[test]
    fn test_stop_loss_respects_minimum_age() {
        let aggregator = SignalAggregator::default();
        let rules = rules_with_stop_loss(dec!(-10), 300);
        let now = Utc::now();

        // 60s old, margin ≈ -12: below stop margin but too young
        let position = position_opened_at(now - TimeDelta::seconds(60));
        let low_price = Price::new(dec!(88)).unwrap();
        let assessment =
            assess_position(&position, low_price, &aggregator, &rules, Decimal::ONE, now);
        assert!(matches!(assessment.decision, TradeDecision::Hold { .. }));

        // Same margin at 301s: stop-loss fires
        let position = position_opened_at(now - TimeDelta::seconds(301));
        let assessment =
            assess_position(&position, low_price, &aggregator, &rules, Decimal::ONE, now);
        assert_eq!(assessment.decision, TradeDecision::StopLoss);
    }

    #[test]
    fn test_take_profit_on_default_sell_margin() {
        let aggregator = SignalAggregator::default();
        let rules = rules_with_stop_loss(dec!(-10), 300);
        let now = Utc::now();
        let position = position_opened_at(now - TimeDelta::seconds(60));

        // Margin (1050-1001)/1001 ≈ 4.895% ≥ 4%
        let assessment = assess_position(
            &position,
            Price::new(dec!(105)).unwrap(),
            &aggregator,
            &rules,
            Decimal::ONE,
            now,
        );

        assert_eq!(assessment.decision, TradeDecision::TakeProfit);
        assert!(assessment.current_margin.value() > dec!(4.8));
    }

    #[test]
    fn test_stop_loss_checked_before_take_profit() {
        // Degenerate config where both could fire: stop-loss wins by order
        let aggregator = SignalAggregator::default();
        let mut rules = rules_with_stop_loss(dec!(50), 0);
        rules.take_profit_margin = dec!(-100);
        let now = Utc::now();
        let position = position_opened_at(now - TimeDelta::seconds(600));

        let assessment = assess_position(
            &position,
            Price::new(dec!(100)).unwrap(),
            &aggregator,
            &rules,
            Decimal::ONE,
            now,
        );

        assert_eq!(assessment.decision, TradeDecision::StopLoss);
    }

    #[test]
    fn test_dca_rule_suppressed_at_max_level() {
        use crate::rule::condition::Condition;

        let aggregator = SignalAggregator::default();
        let mut rules = rules_with_stop_loss(dec!(-50), 0);
        rules.dca.max_levels = 0;
        rules.trading_rules = vec![Rule {
            name: SmolStr::new("dca-on-drop"),
            enabled: true,
            priority: 0,
            action: RuleAction::Dca,
            trailing: None,
            conditions: vec![Condition {
                max_margin: Some(dec!(-5)),
                ..Default::default()
            }],
            swap_signal_rules: None,
            swap_timeout_secs: None,
        }];
        let now = Utc::now();
        let position = position_opened_at(now - TimeDelta::seconds(600));

        let assessment = assess_position(
            &position,
            Price::new(dec!(92)).unwrap(),
            &aggregator,
            &rules,
            Decimal::ONE,
            now,
        );

        match assessment.decision {
            TradeDecision::Hold { reason } => assert!(reason.contains("DCA not allowed")),
            other => panic!("expected suppressed DCA, got {other:?}"),
        }
    }

    #[test]
    fn test_replay_speed_scales_stop_loss_age() {
        let aggregator = SignalAggregator::default();
        let rules = rules_with_stop_loss(dec!(-10), 300);
        let now = Utc::now();
        // 600s of replay time at 10x is only 60s of effective age
        let position = position_opened_at(now - TimeDelta::seconds(600));

        let assessment = assess_position(
            &position,
            Price::new(dec!(88)).unwrap(),
            &aggregator,
            &rules,
            dec!(10),
            now,
        );

        assert!(matches!(assessment.decision, TradeDecision::Hold { .. }));
    }
}
