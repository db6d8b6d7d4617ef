use crate::config::{DcaConfig, TradingConfig};
use crate::error::ValidationError;
use crate::portfolio::Account;
use crate::position::Position;
use chrono::{DateTime, TimeDelta, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use smol_str::{SmolStr, ToSmolStr};
use std::time::Duration;
use tiller_instrument::{Money, Price, TradingPair};

/// Minimum wall-clock separation between a buy fill and any further order on
/// the same pair. Scaled down by the replay speed.
pub const MIN_BUY_SELL_INTERVAL: Duration = Duration::from_secs(10);

fn scaled_interval(base: Duration, speed: Decimal) -> TimeDelta {
    let millis = Decimal::from(base.as_millis() as i64) / speed.max(Decimal::ONE);
    TimeDelta::milliseconds(millis.to_i64().unwrap_or(i64::MAX))
}

/// Inputs to an open-order validation that live outside the account.
#[derive(Debug)]
pub struct OpenChecks<'a> {
    pub pair: &'a TradingPair,
    pub cost: &'a Money,
    /// Symbols tradable on the configured market.
    pub universe: &'a [TradingPair],
    pub now: DateTime<Utc>,
    /// Most recent buy fill on this pair, if any.
    pub last_buy_fill: Option<DateTime<Utc>>,
    pub reconcile_pending: bool,
    pub speed: Decimal,
}

/// Pre-trade constraint validation: every check is a pure pre-condition, so
/// a refusal leaves no state to undo.
#[derive(Debug, Copy, Clone, Default)]
pub struct TradingConstraintValidator;

impl TradingConstraintValidator {
    pub fn validate_open(
        account: &Account,
        trading: &TradingConfig,
        checks: &OpenChecks<'_>,
    ) -> Result<(), ValidationError> {
        let symbol = &checks.pair.symbol;
        let portfolio = &account.portfolio;

        if checks.reconcile_pending {
            return Err(ValidationError::ReconcilePending(symbol.clone()));
        }
        if portfolio.holds_pair(symbol) {
            return Err(ValidationError::PositionAlreadyExists(symbol.clone()));
        }
        if portfolio.position_count() >= portfolio.max_positions {
            return Err(ValidationError::MaxPositionsReached(portfolio.max_positions));
        }
        if checks.cost.amount < portfolio.min_position_cost {
            return Err(ValidationError::BelowMinCost {
                cost: checks.cost.amount.to_smolstr(),
                min: portfolio.min_position_cost.to_smolstr(),
            });
        }
        if !portfolio.can_afford(checks.cost.amount) {
            return Err(ValidationError::InsufficientFunds {
                required: checks.cost.amount.to_smolstr(),
                available: portfolio.balance.available.to_smolstr(),
            });
        }
        if checks.cost.currency != portfolio.market {
            return Err(ValidationError::CurrencyMismatch(SmolStr::new(format!(
                "{} vs portfolio market {}",
                checks.cost.currency, portfolio.market
            ))));
        }

        Self::validate_pair_tradable(trading, checks.pair)?;

        if !checks
            .universe
            .iter()
            .any(|pair| pair.symbol == *symbol)
        {
            return Err(ValidationError::InvalidPair(
                symbol.clone(),
                SmolStr::new("not in market universe"),
            ));
        }

        if let Some(last_buy) = checks.last_buy_fill {
            let min_interval = scaled_interval(MIN_BUY_SELL_INTERVAL, checks.speed);
            if checks.now - last_buy < min_interval {
                return Err(ValidationError::BuySellIntervalNotElapsed(symbol.clone()));
            }
        }

        Ok(())
    }

    /// Allowed/blocked/excluded pair sets, all case-insensitive.
    pub fn validate_pair_tradable(
        trading: &TradingConfig,
        pair: &TradingPair,
    ) -> Result<(), ValidationError> {
        if trading
            .excluded_pairs
            .iter()
            .any(|symbol| pair.matches_symbol(symbol))
        {
            return Err(ValidationError::InvalidPair(
                pair.symbol.clone(),
                SmolStr::new("pair is excluded"),
            ));
        }
        if trading
            .blocked_pairs
            .iter()
            .any(|symbol| pair.matches_symbol(symbol))
        {
            return Err(ValidationError::InvalidPair(
                pair.symbol.clone(),
                SmolStr::new("pair is blocked"),
            ));
        }
        if let Some(allowed) = &trading.allowed_pairs
            && !allowed.iter().any(|symbol| pair.matches_symbol(symbol))
        {
            return Err(ValidationError::InvalidPair(
                pair.symbol.clone(),
                SmolStr::new("pair not in allowed set"),
            ));
        }
        Ok(())
    }

    pub fn validate_dca(
        account: &Account,
        position: &Position,
        dca: &DcaConfig,
        added_cost: &Money,
        current_price: Price,
        now: DateTime<Utc>,
        speed: Decimal,
    ) -> Result<(), ValidationError> {
        if position.is_closed() {
            return Err(ValidationError::PositionClosed);
        }
        if position.dca_level() >= dca.max_levels {
            return Err(ValidationError::DcaNotAllowed(SmolStr::new(
                "maximum DCA level reached",
            )));
        }
        if !position.can_dca_by_price_drop(current_price, dca.min_price_drop_percent) {
            return Err(ValidationError::DcaNotAllowed(SmolStr::new(
                "price drop threshold not met",
            )));
        }

        let cooldown = scaled_interval(
            Duration::from_secs(dca.min_time_between_secs),
            speed,
        );
        if now - position.last_buy_at < cooldown {
            return Err(ValidationError::DcaNotAllowed(SmolStr::new(
                "cooldown since last buy not elapsed",
            )));
        }

        if !account.portfolio.can_afford(added_cost.amount) {
            return Err(ValidationError::InsufficientFunds {
                required: added_cost.amount.to_smolstr(),
                available: account.portfolio.balance.available.to_smolstr(),
            });
        }
        if position.total_cost() + added_cost.amount > dca.max_total_cost {
            return Err(ValidationError::DcaNotAllowed(SmolStr::new(
                "cumulative cost cap exceeded",
            )));
        }

        Ok(())
    }

    pub fn validate_close(
        position: &Position,
        now: DateTime<Utc>,
        reconcile_pending: bool,
        speed: Decimal,
    ) -> Result<(), ValidationError> {
        if position.is_closed() {
            return Err(ValidationError::PositionClosed);
        }
        if reconcile_pending {
            return Err(ValidationError::ReconcilePending(
                position.pair.symbol.clone(),
            ));
        }

        // Cross-pipeline ordering guarantee: no sell starts execution within
        // the buy/sell interval of the latest buy fill on the pair
        let min_interval = scaled_interval(MIN_BUY_SELL_INTERVAL, speed);
        if now - position.last_buy_at < min_interval {
            return Err(ValidationError::BuySellIntervalNotElapsed(
                position.pair.symbol.clone(),
            ));
        }

        Ok(())
    }
}
