use crate::rule::context::RuleContext;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use tiller_signal::snapshot::SignalSnapshot;

/// Inclusive lower/upper bound over a [`Decimal`] value.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Bound {
    pub min: Option<Decimal>,
    pub max: Option<Decimal>,
}

impl Bound {
    pub fn new(min: Option<Decimal>, max: Option<Decimal>) -> Self {
        Self { min, max }
    }

    pub fn is_unbounded(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    pub fn holds(&self, value: Decimal) -> bool {
        self.min.is_none_or(|min| value >= min) && self.max.is_none_or(|max| value <= max)
    }
}

/// Metric of a [`SignalSnapshot`] a predicate may bound.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalMetric {
    Volume,
    VolumeChange,
    Price,
    PriceChange,
    Rating,
    RatingChange,
    Volatility,
}

impl SignalMetric {
    fn extract(&self, snapshot: &SignalSnapshot) -> Option<Decimal> {
        match self {
            SignalMetric::Volume => snapshot.volume,
            SignalMetric::VolumeChange => snapshot.volume_change,
            SignalMetric::Price => snapshot.price,
            SignalMetric::PriceChange => snapshot.price_change,
            SignalMetric::Rating => snapshot.rating,
            SignalMetric::RatingChange => snapshot.rating_change,
            SignalMetric::Volatility => snapshot.volatility,
        }
    }
}

/// One compiled atomic predicate.
///
/// Missing-data policy: a predicate referencing a signal that is not in the
/// snapshot map, a metric the provider did not publish, or position state on
/// an empty-position context evaluates to `false` - never `true`, never
/// "skip".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Signal {
        signal: SmolStr,
        metric: SignalMetric,
        bound: Bound,
    },
    GlobalRating(Bound),
    /// Pair symbol within the allowed set (case-insensitive).
    PairAllowed(Vec<SmolStr>),
    Age(Bound),
    LastBuyAge(Bound),
    Margin(Bound),
    /// current margin − last-buy margin; false when last-buy margin missing.
    MarginChange(Bound),
    Amount(Bound),
    Cost(Bound),
    DcaLevel(Bound),
    /// Position's originating signal rule within the set.
    SignalRuleIn(Vec<SmolStr>),
}

impl Predicate {
    pub fn eval(&self, ctx: &RuleContext<'_>) -> bool {
        match self {
            Predicate::Signal {
                signal,
                metric,
                bound,
            } => ctx
                .signals
                .get(signal)
                .and_then(|snapshot| metric.extract(snapshot))
                .is_some_and(|value| bound.holds(value)),

            Predicate::GlobalRating(bound) => {
                ctx.global_rating.is_some_and(|value| bound.holds(value))
            }

            Predicate::PairAllowed(pairs) => pairs
                .iter()
                .any(|symbol| ctx.pair.matches_symbol(symbol)),

            Predicate::Age(bound) => ctx
                .position
                .is_some_and(|position| bound.holds(ctx.effective_age_secs(position.current_age))),

            Predicate::LastBuyAge(bound) => ctx
                .position
                .is_some_and(|position| bound.holds(ctx.effective_age_secs(position.last_buy_age))),

            Predicate::Margin(bound) => ctx
                .position
                .is_some_and(|position| bound.holds(position.current_margin.value())),

            Predicate::MarginChange(bound) => ctx.position.is_some_and(|position| {
                position.last_buy_margin.is_some_and(|last_buy| {
                    bound.holds((position.current_margin - last_buy).value())
                })
            }),

            Predicate::Amount(bound) => ctx
                .position
                .is_some_and(|position| bound.holds(position.total_amount)),

            Predicate::Cost(bound) => ctx
                .position
                .is_some_and(|position| bound.holds(position.current_cost)),

            Predicate::DcaLevel(bound) => ctx
                .position
                .is_some_and(|position| bound.holds(Decimal::from(position.dca_level))),

            Predicate::SignalRuleIn(rules) => ctx.position.is_some_and(|position| {
                position
                    .signal_rule
                    .as_ref()
                    .is_some_and(|rule| rules.iter().any(|name| name == rule))
            }),
        }
    }
}

/// One declarative condition: a set of optional bounds over the context.
///
/// A condition with no bounds is trivially true. Signal-metric bounds apply
/// to the named `signal`; the remaining bounds are context-global or
/// position-scoped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Condition {
    /// Signal name the per-signal bounds below refer to.
    pub signal: Option<SmolStr>,

    pub min_volume: Option<Decimal>,
    pub max_volume: Option<Decimal>,
    pub min_volume_change: Option<Decimal>,
    pub max_volume_change: Option<Decimal>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub min_price_change: Option<Decimal>,
    pub max_price_change: Option<Decimal>,
    pub min_rating: Option<Decimal>,
    pub max_rating: Option<Decimal>,
    pub min_rating_change: Option<Decimal>,
    pub max_rating_change: Option<Decimal>,
    pub min_volatility: Option<Decimal>,
    pub max_volatility: Option<Decimal>,

    pub min_global_rating: Option<Decimal>,
    pub max_global_rating: Option<Decimal>,

    /// Allowed pair symbols, matched case-insensitively.
    pub pairs: Option<Vec<SmolStr>>,

    /// Position age bounds in seconds.
    pub min_age: Option<Decimal>,
    pub max_age: Option<Decimal>,
    pub min_last_buy_age: Option<Decimal>,
    pub max_last_buy_age: Option<Decimal>,

    pub min_margin: Option<Decimal>,
    pub max_margin: Option<Decimal>,
    pub min_margin_change: Option<Decimal>,
    pub max_margin_change: Option<Decimal>,

    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    pub min_cost: Option<Decimal>,
    pub max_cost: Option<Decimal>,

    pub min_dca_level: Option<Decimal>,
    pub max_dca_level: Option<Decimal>,

    /// Position's originating signal-rule name within this set.
    pub signal_rules: Option<Vec<SmolStr>>,
}

impl Condition {
    /// Compile into the conjunction of atomic predicates it implies.
    pub fn compile(&self) -> Vec<Predicate> {
        let mut predicates = Vec::new();

        let signal_bounds = [
            (SignalMetric::Volume, self.min_volume, self.max_volume),
            (
                SignalMetric::VolumeChange,
                self.min_volume_change,
                self.max_volume_change,
            ),
            (SignalMetric::Price, self.min_price, self.max_price),
            (
                SignalMetric::PriceChange,
                self.min_price_change,
                self.max_price_change,
            ),
            (SignalMetric::Rating, self.min_rating, self.max_rating),
            (
                SignalMetric::RatingChange,
                self.min_rating_change,
                self.max_rating_change,
            ),
            (
                SignalMetric::Volatility,
                self.min_volatility,
                self.max_volatility,
            ),
        ];

        for (metric, min, max) in signal_bounds {
            let bound = Bound::new(min, max);
            if bound.is_unbounded() {
                continue;
            }
            // A signal bound without a named signal can never hold
            let signal = self.signal.clone().unwrap_or_default();
            predicates.push(Predicate::Signal {
                signal,
                metric,
                bound,
            });
        }

        let scalar_bounds: [(fn(Bound) -> Predicate, Option<Decimal>, Option<Decimal>); 8] = [
            (
                Predicate::GlobalRating,
                self.min_global_rating,
                self.max_global_rating,
            ),
            (Predicate::Age, self.min_age, self.max_age),
            (
                Predicate::LastBuyAge,
                self.min_last_buy_age,
                self.max_last_buy_age,
            ),
            (Predicate::Margin, self.min_margin, self.max_margin),
            (
                Predicate::MarginChange,
                self.min_margin_change,
                self.max_margin_change,
            ),
            (Predicate::Amount, self.min_amount, self.max_amount),
            (Predicate::Cost, self.min_cost, self.max_cost),
            (Predicate::DcaLevel, self.min_dca_level, self.max_dca_level),
        ];

        for (build, min, max) in scalar_bounds {
            let bound = Bound::new(min, max);
            if !bound.is_unbounded() {
                predicates.push(build(bound));
            }
        }

        if let Some(pairs) = &self.pairs {
            predicates.push(Predicate::PairAllowed(pairs.clone()));
        }

        if let Some(rules) = &self.signal_rules {
            predicates.push(Predicate::SignalRuleIn(rules.clone()));
        }

        predicates
    }

    /// True iff every compiled predicate holds against the context.
    pub fn matches(&self, ctx: &RuleContext<'_>) -> bool {
        self.compile().iter().all(|predicate| predicate.eval(ctx))
    }
}
