use crate::rule::condition::Condition;
use crate::rule::context::RuleContext;
use crate::trailing::TrailingConfig;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Declarative [`Condition`]s and their compiled predicates.
pub mod condition;

/// [`RuleContext`] and the position projection it carries.
pub mod context;

/// Action taken when a rule matches.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    Buy,
    Sell,
    Dca,
    Swap,
    StopLoss,
    TakeProfit,
    Alert,
}

impl RuleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleAction::Buy => "buy",
            RuleAction::Sell => "sell",
            RuleAction::Dca => "dca",
            RuleAction::Swap => "swap",
            RuleAction::StopLoss => "stop_loss",
            RuleAction::TakeProfit => "take_profit",
            RuleAction::Alert => "alert",
        }
    }
}

/// How a rule list resolves multiple matchers.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    /// First matching rule in list order wins.
    #[default]
    FirstMatch,
    /// Lowest numeric priority among the matchers wins.
    HighestPriority,
    /// Last matching rule overwrites earlier matches.
    AllMatches,
}

/// One configured rule: an ordered list of [`Condition`]s that must all hold.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Rule {
    pub name: SmolStr,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub priority: i32,

    pub action: RuleAction,

    /// When set, a matching rule initiates trailing instead of executing
    /// immediately.
    #[serde(default)]
    pub trailing: Option<TrailingConfig>,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// For [`RuleAction::Swap`]: signal-rule names whose positions may be
    /// swapped out for this candidate.
    #[serde(default)]
    pub swap_signal_rules: Option<Vec<SmolStr>>,

    /// For [`RuleAction::Swap`]: seconds since a position's last buy before
    /// it becomes a swap victim.
    #[serde(default)]
    pub swap_timeout_secs: Option<u64>,
}

fn default_enabled() -> bool {
    true
}

impl Rule {
    /// True iff every atomic predicate across every condition holds.
    pub fn matches(&self, ctx: &RuleContext<'_>) -> bool {
        self.conditions.iter().all(|condition| condition.matches(ctx))
    }
}

/// Resolve an ordered rule list against a context.
///
/// Disabled rules are filtered before resolution. Evaluation is pure: the
/// same context and rules always select the same rule.
pub fn select<'a>(
    rules: &'a [Rule],
    mode: ProcessingMode,
    ctx: &RuleContext<'_>,
) -> Option<&'a Rule> {
    let mut enabled = rules.iter().filter(|rule| rule.enabled);

    match mode {
        ProcessingMode::FirstMatch => enabled.find(|rule| rule.matches(ctx)),
        ProcessingMode::HighestPriority => enabled
            .filter(|rule| rule.matches(ctx))
            .min_by_key(|rule| rule.priority),
        ProcessingMode::AllMatches => enabled.filter(|rule| rule.matches(ctx)).last(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fnv::FnvHashMap;
    use rust_decimal_macros::dec;
    use tiller_instrument::{Currency, TradingPair};
    use tiller_signal::snapshot::SignalSnapshot;

    fn pair() -> TradingPair {
        TradingPair::new(
            Currency::new("BTC").unwrap(),
            Currency::new("USDT").unwrap(),
        )
    }

    fn rule(name: &str, enabled: bool, priority: i32, min_rating: Option<rust_decimal::Decimal>) -> Rule {
        Rule {
            name: SmolStr::new(name),
            enabled,
            priority,
            action: RuleAction::Buy,
            trailing: None,
            conditions: vec![Condition {
                signal: Some(SmolStr::new("tv")),
                min_rating,
                ..Default::default()
            }],
            swap_signal_rules: None,
            swap_timeout_secs: None,
        }
    }

    fn signals(rating: rust_decimal::Decimal) -> FnvHashMap<SmolStr, SignalSnapshot> {
        let mut signals = FnvHashMap::default();
        signals.insert(
            SmolStr::new("tv"),
            SignalSnapshot {
                rating: Some(rating),
                ..Default::default()
            },
        );
        signals
    }

    #[test]
    fn test_select_first_match_honours_list_order() {
        let rules = vec![
            rule("loose", true, 5, Some(dec!(0.1))),
            rule("tight", true, 1, Some(dec!(0.2))),
        ];
        let signals = signals(dec!(0.5));
        let pair = pair();
        let ctx = RuleContext::new(&pair, &signals, None, None);

        let selected = select(&rules, ProcessingMode::FirstMatch, &ctx).unwrap();

        assert_eq!(selected.name, "loose");
    }

    #[test]
    fn test_select_highest_priority_wins_on_lowest_number() {
        let rules = vec![
            rule("loose", true, 5, Some(dec!(0.1))),
            rule("tight", true, 1, Some(dec!(0.2))),
        ];
        let signals = signals(dec!(0.5));
        let pair = pair();
        let ctx = RuleContext::new(&pair, &signals, None, None);

        let selected = select(&rules, ProcessingMode::HighestPriority, &ctx).unwrap();

        assert_eq!(selected.name, "tight");
    }

    #[test]
    fn test_select_all_matches_takes_last() {
        let rules = vec![
            rule("loose", true, 5, Some(dec!(0.1))),
            rule("tight", true, 1, Some(dec!(0.2))),
        ];
        let signals = signals(dec!(0.5));
        let pair = pair();
        let ctx = RuleContext::new(&pair, &signals, None, None);

        let selected = select(&rules, ProcessingMode::AllMatches, &ctx).unwrap();

        assert_eq!(selected.name, "tight");
    }

    #[test]
    fn test_select_filters_disabled_rules() {
        let rules = vec![
            rule("off", false, 0, Some(dec!(0.1))),
            rule("on", true, 9, Some(dec!(0.1))),
        ];
        let signals = signals(dec!(0.5));
        let pair = pair();
        let ctx = RuleContext::new(&pair, &signals, None, None);

        let selected = select(&rules, ProcessingMode::FirstMatch, &ctx).unwrap();

        assert_eq!(selected.name, "on");
    }

    #[test]
    fn test_select_is_idempotent() {
        let rules = vec![rule("only", true, 0, Some(dec!(0.1)))];
        let signals = signals(dec!(0.5));
        let pair = pair();
        let ctx = RuleContext::new(&pair, &signals, None, None);

        let first = select(&rules, ProcessingMode::FirstMatch, &ctx).map(|rule| rule.name.clone());
        let second = select(&rules, ProcessingMode::FirstMatch, &ctx).map(|rule| rule.name.clone());

        assert_eq!(first, second);
    }
}
