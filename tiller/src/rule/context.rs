use chrono::TimeDelta;
use fnv::FnvHashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use tiller_instrument::{Margin, TradingPair};
use tiller_signal::snapshot::SignalSnapshot;

/// Projection of an open position used by rule evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PositionSnapshot {
    pub pair: TradingPair,
    pub current_age: TimeDelta,
    pub last_buy_age: TimeDelta,
    pub current_margin: Margin,
    pub last_buy_margin: Option<Margin>,
    /// Total base-currency amount held.
    pub total_amount: Decimal,
    /// Total quote-currency cost paid so far.
    pub current_cost: Decimal,
    pub dca_level: u32,
    pub signal_rule: Option<SmolStr>,
}

/// Everything a rule may inspect: per-signal snapshots for the pair, the
/// market-wide global rating and (for trading rules) the position projection.
#[derive(Debug)]
pub struct RuleContext<'a> {
    pub pair: &'a TradingPair,
    pub signals: &'a FnvHashMap<SmolStr, SignalSnapshot>,
    pub global_rating: Option<Decimal>,
    pub position: Option<&'a PositionSnapshot>,
    /// Replay speed; ages are divided by this before age-bound comparison so
    /// that replay observes the wall-clock ages the live engine would have.
    /// Always 1 in live mode.
    pub speed_multiplier: Decimal,
}

impl<'a> RuleContext<'a> {
    pub fn new(
        pair: &'a TradingPair,
        signals: &'a FnvHashMap<SmolStr, SignalSnapshot>,
        global_rating: Option<Decimal>,
        position: Option<&'a PositionSnapshot>,
    ) -> Self {
        Self {
            pair,
            signals,
            global_rating,
            position,
            speed_multiplier: Decimal::ONE,
        }
    }

    pub fn with_speed_multiplier(mut self, speed_multiplier: Decimal) -> Self {
        self.speed_multiplier = speed_multiplier;
        self
    }

    /// Age in effective seconds, de-scaled by the replay speed multiplier.
    pub fn effective_age_secs(&self, age: TimeDelta) -> Decimal {
        let millis = Decimal::from(age.num_milliseconds());
        let speed = if self.speed_multiplier.is_zero() {
            Decimal::ONE
        } else {
            self.speed_multiplier
        };
        millis / Decimal::ONE_THOUSAND / speed
    }
}
