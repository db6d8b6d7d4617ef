use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::{SmolStr, ToSmolStr};
use tiller_instrument::{Margin, Money, PositionId, Price, TradingPair};
use tracing::debug;

/// What to do when the stop margin is breached while trailing.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopAction {
    /// Trade immediately at the stop.
    Execute,
    /// Abandon the trailing attempt without trading.
    Cancel,
}

/// Trailing behaviour attached to a rule.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TrailingConfig {
    /// Reversal from the best margin that fires the trigger, in percent
    /// points.
    pub trailing_percentage: Decimal,
    /// Margin at which trailing stops outright.
    pub stop_margin: Decimal,
    pub stop_action: StopAction,
}

/// Sell-side trailing: ride a rally, exit on the reversal.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SellTrailing {
    pub pair: TradingPair,
    pub position_id: PositionId,
    pub config: TrailingConfig,
    /// Margin the initiating rule was aiming for; a negative target permits
    /// locking in a negative exit.
    pub target_margin: Margin,
    pub initial_price: Price,
    pub initial_margin: Margin,
    pub best_margin: Margin,
    pub last_margin: Margin,
    pub started_at: DateTime<Utc>,
}

/// Buy-side trailing: follow a dip, enter on the rebound.
///
/// Margin here is relative to the price when trailing started, so a negative
/// margin means the price dropped - the favourable direction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BuyTrailing {
    pub pair: TradingPair,
    /// Present when the pending buy extends an existing position (DCA).
    pub position_id: Option<PositionId>,
    pub config: TrailingConfig,
    /// Quote cost the triggered buy should spend.
    pub cost: Money,
    pub initial_price: Price,
    pub best_margin: Margin,
    pub last_margin: Margin,
    pub signal_rule: Option<SmolStr>,
    pub started_at: DateTime<Utc>,
}

/// Per-pair trailing state; at most one direction at a time.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum TrailingState {
    Buy(BuyTrailing),
    Sell(SellTrailing),
}

impl TrailingState {
    pub fn symbol(&self) -> &SmolStr {
        match self {
            TrailingState::Buy(state) => &state.pair.symbol,
            TrailingState::Sell(state) => &state.pair.symbol,
        }
    }

    fn started_at(&self) -> DateTime<Utc> {
        match self {
            TrailingState::Buy(state) => state.started_at,
            TrailingState::Sell(state) => state.started_at,
        }
    }
}

/// Outcome of one trailing tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrailingOutcome {
    Continue,
    TriggerSell {
        position_id: PositionId,
        reason: SmolStr,
    },
    TriggerBuy {
        position_id: Option<PositionId>,
        cost: Money,
        signal_rule: Option<SmolStr>,
        reason: SmolStr,
    },
    Cancelled {
        reason: SmolStr,
    },
    /// Pair reported disabled by the trading port; state removed, no trade.
    Disabled,
}

/// Concurrent per-pair trailing state machines.
///
/// Tick processing takes a read snapshot, computes outcomes lock-free, then
/// removes triggered entries with a compare-and-remove that tolerates a
/// racing re-initiate.
#[derive(Debug, Default)]
pub struct TrailingManager {
    states: RwLock<FnvHashMap<SmolStr, TrailingState>>,
}

impl TrailingManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start sell-side trailing, replacing any buy-side state for the pair.
    pub fn initiate_sell(&self, state: SellTrailing) {
        let mut states = self.states.write();
        let symbol = state.pair.symbol.clone();
        states.remove(&symbol);
        debug!(pair = %symbol, best = %state.best_margin, "initiating sell trailing");
        states.insert(symbol, TrailingState::Sell(state));
    }

    /// Start buy-side trailing, replacing any sell-side state for the pair.
    pub fn initiate_buy(&self, state: BuyTrailing) {
        let mut states = self.states.write();
        let symbol = state.pair.symbol.clone();
        states.remove(&symbol);
        debug!(pair = %symbol, initial_price = %state.initial_price, "initiating buy trailing");
        states.insert(symbol, TrailingState::Buy(state));
    }

    pub fn has_state(&self, symbol: &str) -> bool {
        self.states.read().contains_key(symbol)
    }

    pub fn is_empty(&self) -> bool {
        self.states.read().is_empty()
    }

    /// Clone of every active state, for the tick sweep.
    pub fn snapshot(&self) -> Vec<TrailingState> {
        self.states.read().values().cloned().collect()
    }

    /// Advance the state for `symbol` with the latest observation.
    ///
    /// `position_margin` is the current margin of the underlying position
    /// (required by sell-side states). Returns `None` when no state exists
    /// for the symbol.
    pub fn tick(
        &self,
        symbol: &str,
        current_price: Price,
        position_margin: Option<Margin>,
        pair_disabled: bool,
    ) -> Option<TrailingOutcome> {
        // Read snapshot, compute pure, then compare-and-remove/update
        let observed = self.states.read().get(symbol).cloned()?;

        if pair_disabled {
            self.remove_if_unchanged(symbol, &observed);
            return Some(TrailingOutcome::Disabled);
        }

        let (outcome, updated) = match &observed {
            TrailingState::Sell(state) => {
                let Some(margin) = position_margin else {
                    // Position vanished under the trailing state
                    self.remove_if_unchanged(symbol, &observed);
                    return Some(TrailingOutcome::Cancelled {
                        reason: SmolStr::new("position no longer open"),
                    });
                };
                Self::tick_sell(state, margin)
            }
            TrailingState::Buy(state) => Self::tick_buy(state, current_price),
        };

        match updated {
            Some(updated) => {
                let mut states = self.states.write();
                if let Some(existing) = states.get_mut(symbol)
                    && existing.started_at() == observed.started_at()
                {
                    *existing = updated;
                }
            }
            None => self.remove_if_unchanged(symbol, &observed),
        }

        Some(outcome)
    }

    fn remove_if_unchanged(&self, symbol: &str, observed: &TrailingState) {
        let mut states = self.states.write();
        if states
            .get(symbol)
            .is_some_and(|existing| existing.started_at() == observed.started_at())
        {
            states.remove(symbol);
        }
    }

    fn tick_sell(state: &SellTrailing, margin: Margin) -> (TrailingOutcome, Option<TrailingState>) {
        let stop = Margin::percent(state.config.stop_margin);
        let trailing = Margin::percent(state.config.trailing_percentage);

        if margin <= stop {
            let outcome = match state.config.stop_action {
                StopAction::Execute => TrailingOutcome::TriggerSell {
                    position_id: state.position_id,
                    reason: format!("stop margin {stop} reached at {margin}").to_smolstr(),
                },
                StopAction::Cancel => TrailingOutcome::Cancelled {
                    reason: format!("stop margin {stop} reached at {margin}").to_smolstr(),
                },
            };
            return (outcome, None);
        }

        if margin < state.best_margin - trailing {
            // Reversal beyond the trailing distance
            let outcome = if margin.value() > Decimal::ZERO
                || state.target_margin.value() < Decimal::ZERO
            {
                TrailingOutcome::TriggerSell {
                    position_id: state.position_id,
                    reason: format!(
                        "margin reversed to {margin} from best {}",
                        state.best_margin
                    )
                    .to_smolstr(),
                }
            } else {
                // A positive exit was still possible; refuse to lock in a loss
                TrailingOutcome::Cancelled {
                    reason: format!(
                        "refusing negative exit at {margin} with best {}",
                        state.best_margin
                    )
                    .to_smolstr(),
                }
            };
            return (outcome, None);
        }

        let mut state = state.clone();
        state.last_margin = margin;
        state.best_margin = state.best_margin.max(margin);
        (TrailingOutcome::Continue, Some(TrailingState::Sell(state)))
    }

    fn tick_buy(state: &BuyTrailing, current_price: Price) -> (TrailingOutcome, Option<TrailingState>) {
        if state.initial_price.is_zero() {
            return (
                TrailingOutcome::Cancelled {
                    reason: SmolStr::new("initial price is zero"),
                },
                None,
            );
        }

        // Negative = price dropped below the trailing start = favourable
        let margin = Margin::percent(
            (current_price.value() - state.initial_price.value()) / state.initial_price.value()
                * Decimal::ONE_HUNDRED,
        );
        let stop = Margin::percent(state.config.stop_margin);
        let trailing = Margin::percent(state.config.trailing_percentage);

        if margin >= stop {
            let outcome = match state.config.stop_action {
                StopAction::Execute => TrailingOutcome::TriggerBuy {
                    position_id: state.position_id,
                    cost: state.cost.clone(),
                    signal_rule: state.signal_rule.clone(),
                    reason: format!("stop margin {stop} reached at {margin}").to_smolstr(),
                },
                StopAction::Cancel => TrailingOutcome::Cancelled {
                    reason: format!("stop margin {stop} reached at {margin}").to_smolstr(),
                },
            };
            return (outcome, None);
        }

        if margin > state.best_margin + trailing {
            let outcome = TrailingOutcome::TriggerBuy {
                position_id: state.position_id,
                cost: state.cost.clone(),
                signal_rule: state.signal_rule.clone(),
                reason: format!(
                    "price rebounded to {margin} from best {}",
                    state.best_margin
                )
                .to_smolstr(),
            };
            return (outcome, None);
        }

        let mut state = state.clone();
        state.last_margin = margin;
        state.best_margin = state.best_margin.min(margin);
        (TrailingOutcome::Continue, Some(TrailingState::Buy(state)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tiller_instrument::Currency;

    fn pair() -> TradingPair {
        TradingPair::new(
            Currency::new("BTC").unwrap(),
            Currency::new("USDT").unwrap(),
        )
    }

    fn sell_config() -> TrailingConfig {
        TrailingConfig {
            trailing_percentage: dec!(1),
            stop_margin: dec!(2),
            stop_action: StopAction::Execute,
        }
    }

    fn sell_state(initial_margin: Decimal) -> SellTrailing {
        SellTrailing {
            pair: pair(),
            position_id: PositionId::random(),
            config: sell_config(),
            target_margin: Margin::percent(dec!(4)),
            initial_price: Price::new(dec!(100)).unwrap(),
            initial_margin: Margin::percent(initial_margin),
            best_margin: Margin::percent(initial_margin),
            last_margin: Margin::percent(initial_margin),
            started_at: Utc::now(),
        }
    }

    fn usdt(amount: Decimal) -> Money {
        Money::new(amount, Currency::new("USDT").unwrap())
    }

    #[test]
    fn test_sell_trailing_rides_rally_then_triggers() {
        let manager = TrailingManager::new();
        manager.initiate_sell(sell_state(dec!(5)));
        let price = Price::new(dec!(100)).unwrap();

        // Rally: 5 -> 6 -> 7, best follows, state continues
        for margin in [dec!(6), dec!(7)] {
            let outcome = manager
                .tick("BTCUSDT", price, Some(Margin::percent(margin)), false)
                .unwrap();
            assert_eq!(outcome, TrailingOutcome::Continue);
        }

        // Reversal to 5.5: dropped 1.5 from best 7, beyond the 1% distance
        let outcome = manager
            .tick("BTCUSDT", price, Some(Margin::percent(dec!(5.5))), false)
            .unwrap();

        match outcome {
            TrailingOutcome::TriggerSell { reason, .. } => {
                assert!(reason.contains("5.5"), "reason: {reason}");
                assert!(reason.contains('7'), "reason: {reason}");
            }
            other => panic!("expected TriggerSell, got {other:?}"),
        }
        assert!(!manager.has_state("BTCUSDT"));
    }

    #[test]
    fn test_sell_best_margin_never_decreases_while_continue() {
        let manager = TrailingManager::new();
        manager.initiate_sell(sell_state(dec!(5)));
        let price = Price::new(dec!(100)).unwrap();

        let mut best = dec!(5);
        for margin in [dec!(6), dec!(5.8), dec!(6.5), dec!(6.1)] {
            let outcome = manager
                .tick("BTCUSDT", price, Some(Margin::percent(margin)), false)
                .unwrap();
            assert_eq!(outcome, TrailingOutcome::Continue);

            let snapshot = manager.snapshot();
            let TrailingState::Sell(state) = &snapshot[0] else {
                panic!("expected sell state");
            };
            assert!(state.best_margin.value() >= best);
            best = state.best_margin.value();
        }
    }

    #[test]
    fn test_sell_stop_margin_executes() {
        let manager = TrailingManager::new();
        manager.initiate_sell(sell_state(dec!(5)));

        let outcome = manager
            .tick(
                "BTCUSDT",
                Price::new(dec!(100)).unwrap(),
                Some(Margin::percent(dec!(1.5))),
                false,
            )
            .unwrap();

        assert!(matches!(outcome, TrailingOutcome::TriggerSell { .. }));
        assert!(!manager.has_state("BTCUSDT"));
    }

    #[test]
    fn test_sell_refuses_negative_lock_in_when_positive_target() {
        let manager = TrailingManager::new();
        // Start below water with a positive target; stop margin far below
        let mut state = sell_state(dec!(-1));
        state.config.stop_margin = dec!(-50);
        manager.initiate_sell(state);

        // Reversal: -1 -> -2.5 (beyond 1% trailing), still negative
        let outcome = manager
            .tick(
                "BTCUSDT",
                Price::new(dec!(100)).unwrap(),
                Some(Margin::percent(dec!(-2.5))),
                false,
            )
            .unwrap();

        assert!(matches!(outcome, TrailingOutcome::Cancelled { .. }));
        assert!(!manager.has_state("BTCUSDT"));
    }

    #[test]
    fn test_buy_trailing_follows_dip_then_rebound_triggers() {
        let manager = TrailingManager::new();
        manager.initiate_buy(BuyTrailing {
            pair: pair(),
            position_id: None,
            config: TrailingConfig {
                trailing_percentage: dec!(1),
                stop_margin: dec!(3),
                stop_action: StopAction::Cancel,
            },
            cost: usdt(dec!(1000)),
            initial_price: Price::new(dec!(100)).unwrap(),
            best_margin: Margin::ZERO,
            last_margin: Margin::ZERO,
            signal_rule: Some(SmolStr::new("momentum")),
            started_at: Utc::now(),
        });

        // Price dips: -2%, -4% (best follows down)
        for price in [dec!(98), dec!(96)] {
            let outcome = manager
                .tick("BTCUSDT", Price::new(price).unwrap(), None, false)
                .unwrap();
            assert_eq!(outcome, TrailingOutcome::Continue);
        }

        // Rebound to 97.5: margin -2.5 > best -4 + trailing 1
        let outcome = manager
            .tick("BTCUSDT", Price::new(dec!(97.5)).unwrap(), None, false)
            .unwrap();

        match outcome {
            TrailingOutcome::TriggerBuy {
                cost, signal_rule, ..
            } => {
                assert_eq!(cost.amount, dec!(1000));
                assert_eq!(signal_rule, Some(SmolStr::new("momentum")));
            }
            other => panic!("expected TriggerBuy, got {other:?}"),
        }
        assert!(!manager.has_state("BTCUSDT"));
    }

    #[test]
    fn test_buy_best_margin_never_increases_while_continue() {
        let manager = TrailingManager::new();
        manager.initiate_buy(BuyTrailing {
            pair: pair(),
            position_id: None,
            config: TrailingConfig {
                trailing_percentage: dec!(2),
                stop_margin: dec!(5),
                stop_action: StopAction::Cancel,
            },
            cost: usdt(dec!(500)),
            initial_price: Price::new(dec!(100)).unwrap(),
            best_margin: Margin::ZERO,
            last_margin: Margin::ZERO,
            signal_rule: None,
            started_at: Utc::now(),
        });

        let mut best = dec!(0);
        for price in [dec!(99), dec!(99.5), dec!(98), dec!(98.5)] {
            let outcome = manager
                .tick("BTCUSDT", Price::new(price).unwrap(), None, false)
                .unwrap();
            assert_eq!(outcome, TrailingOutcome::Continue);

            let snapshot = manager.snapshot();
            let TrailingState::Buy(state) = &snapshot[0] else {
                panic!("expected buy state");
            };
            assert!(state.best_margin.value() <= best);
            best = state.best_margin.value();
        }
    }

    #[test]
    fn test_buy_stop_margin_cancel() {
        let manager = TrailingManager::new();
        manager.initiate_buy(BuyTrailing {
            pair: pair(),
            position_id: None,
            config: TrailingConfig {
                trailing_percentage: dec!(1),
                stop_margin: dec!(3),
                stop_action: StopAction::Cancel,
            },
            cost: usdt(dec!(1000)),
            initial_price: Price::new(dec!(100)).unwrap(),
            best_margin: Margin::ZERO,
            last_margin: Margin::ZERO,
            signal_rule: None,
            started_at: Utc::now(),
        });

        // Price ran away upward past the stop margin
        let outcome = manager
            .tick("BTCUSDT", Price::new(dec!(104)).unwrap(), None, false)
            .unwrap();

        assert!(matches!(outcome, TrailingOutcome::Cancelled { .. }));
        assert!(!manager.has_state("BTCUSDT"));
    }

    #[test]
    fn test_one_direction_per_pair() {
        let manager = TrailingManager::new();
        manager.initiate_sell(sell_state(dec!(5)));
        assert_eq!(manager.snapshot().len(), 1);

        manager.initiate_buy(BuyTrailing {
            pair: pair(),
            position_id: None,
            config: sell_config(),
            cost: usdt(dec!(100)),
            initial_price: Price::new(dec!(100)).unwrap(),
            best_margin: Margin::ZERO,
            last_margin: Margin::ZERO,
            signal_rule: None,
            started_at: Utc::now(),
        });

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(matches!(snapshot[0], TrailingState::Buy(_)));
    }

    #[test]
    fn test_disabled_pair_removes_without_trade() {
        let manager = TrailingManager::new();
        manager.initiate_sell(sell_state(dec!(5)));

        let outcome = manager
            .tick(
                "BTCUSDT",
                Price::new(dec!(100)).unwrap(),
                Some(Margin::percent(dec!(5))),
                true,
            )
            .unwrap();

        assert_eq!(outcome, TrailingOutcome::Disabled);
        assert!(!manager.has_state("BTCUSDT"));
    }
}
