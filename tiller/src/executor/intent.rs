use smol_str::SmolStr;
use tiller_instrument::{Money, PositionId, TradingPair};

/// Why a position is being closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
    Rule(SmolStr),
    Trailing(SmolStr),
    Swap(SmolStr),
}

impl CloseReason {
    /// Action label recorded in the trade log.
    pub fn action(&self) -> SmolStr {
        match self {
            CloseReason::StopLoss => SmolStr::new("stop_loss"),
            CloseReason::TakeProfit => SmolStr::new("take_profit"),
            CloseReason::Rule(_) => SmolStr::new("sell"),
            CloseReason::Trailing(_) => SmolStr::new("trailing"),
            CloseReason::Swap(_) => SmolStr::new("swap"),
        }
    }

    pub fn rule_name(&self) -> Option<SmolStr> {
        match self {
            CloseReason::Rule(rule) | CloseReason::Swap(rule) => Some(rule.clone()),
            _ => None,
        }
    }
}

/// A trade the engine intends to make, produced by the processors & the
/// trailing manager, consumed by the order-execution pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum TradeIntent {
    Open {
        pair: TradingPair,
        cost: Money,
        signal_rule: Option<SmolStr>,
    },
    Dca {
        position_id: PositionId,
        cost: Money,
        rule: Option<SmolStr>,
    },
    Close {
        position_id: PositionId,
        reason: CloseReason,
    },
    /// Close the victim position, then open the candidate with the released
    /// funds.
    Swap {
        victim: PositionId,
        pair: TradingPair,
        cost: Money,
        signal_rule: Option<SmolStr>,
    },
}
