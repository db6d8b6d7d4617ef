use crate::rule::{ProcessingMode, Rule};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use tiller_execution::order::OrderKind;

/// Loading, validation, atomic hot-swap and the polling watcher.
pub mod store;

pub use store::{ConfigEvent, ConfigStore};

/// `core.json` - engine-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CoreConfig {
    pub instance_name: SmolStr,
    pub health_check_interval_secs: u64,
    pub password_protection: bool,
    pub timezone_offset_hours: i32,
    /// Replay speed; 1 in live mode.
    pub speed_multiplier: Decimal,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            instance_name: SmolStr::new("tiller"),
            health_check_interval_secs: 60,
            password_protection: false,
            timezone_offset_hours: 0,
            speed_multiplier: Decimal::ONE,
        }
    }
}

/// One configured DCA step: buy `multiplier` × the original cost once the
/// margin falls to `margin`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DcaLevel {
    pub multiplier: Decimal,
    pub margin: Decimal,
}

/// `trading.json` - market, execution mode and position sizing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TradingConfig {
    /// Quote currency of the portfolio (eg/ "USDT").
    pub market: SmolStr,
    pub exchange: SmolStr,
    /// Virtual (simulated fills) vs live execution.
    pub virtual_trading: bool,
    pub buy_type: OrderKind,
    pub sell_type: OrderKind,
    /// Maximum quote cost of one buy.
    pub buy_max_cost: Decimal,
    pub max_positions: usize,
    pub min_position_cost: Decimal,
    pub excluded_pairs: Vec<SmolStr>,
    /// Starting balance for virtual trading.
    pub initial_virtual_balance: Decimal,
    pub dca_levels: Vec<DcaLevel>,
    /// Exchange fee percentage per fill (eg/ 0.1 = 0.1%).
    pub fee_percent: Decimal,
    /// When present, only these pairs are tradable.
    pub allowed_pairs: Option<Vec<SmolStr>>,
    pub blocked_pairs: Vec<SmolStr>,
}

impl TradingConfig {
    /// Validated quote currency of the configured market.
    pub fn market_currency(&self) -> Result<tiller_instrument::Currency, tiller_instrument::InstrumentError> {
        tiller_instrument::Currency::new(&self.market)
    }
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            market: SmolStr::new("USDT"),
            exchange: SmolStr::new("virtual"),
            virtual_trading: true,
            buy_type: OrderKind::Market,
            sell_type: OrderKind::Market,
            buy_max_cost: Decimal::new(1000, 0),
            max_positions: 5,
            min_position_cost: Decimal::new(100, 0),
            excluded_pairs: Vec::new(),
            initial_virtual_balance: Decimal::new(10_000, 0),
            dca_levels: Vec::new(),
            fee_percent: Decimal::new(1, 1), // 0.1
            allowed_pairs: None,
            blocked_pairs: Vec::new(),
        }
    }
}

/// One signal provider definition in `signals.json`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SignalProviderConfig {
    pub name: SmolStr,
    /// Provider type discriminator (eg/ "tradingview").
    #[serde(rename = "type")]
    pub kind: SmolStr,
    pub polling_interval_secs: u64,
    pub signal_period_secs: u64,
    /// Weight in the global rating.
    #[serde(default = "default_weight")]
    pub weight: Decimal,
    /// Provider-specific parameters, passed through opaquely.
    #[serde(default)]
    pub params: serde_json::Value,
}

fn default_weight() -> Decimal {
    Decimal::ONE
}

/// `signals.json`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SignalsConfig {
    pub providers: Vec<SignalProviderConfig>,
}

/// Stop-loss gate in `rules.json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct StopLossConfig {
    pub enabled: bool,
    /// Margin at or below which the stop fires.
    pub margin: Decimal,
    /// Minimum position age before the stop may fire.
    pub min_age_secs: u64,
}

impl Default for StopLossConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            margin: Decimal::new(-10, 0),
            min_age_secs: 300,
        }
    }
}

/// DCA policy in `rules.json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DcaConfig {
    pub enabled: bool,
    pub max_levels: u32,
    pub min_price_drop_percent: Decimal,
    /// Cooldown between DCA buys on the same position.
    pub min_time_between_secs: u64,
    /// Cap on the cumulative quote cost of one position.
    pub max_total_cost: Decimal,
}

impl Default for DcaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_levels: 3,
            min_price_drop_percent: Decimal::new(5, 0),
            min_time_between_secs: 3600,
            max_total_cost: Decimal::new(5000, 0),
        }
    }
}

/// `rules.json` - the declarative strategy surface.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RulesConfig {
    pub signal_rules: Vec<Rule>,
    pub trading_rules: Vec<Rule>,
    pub processing_mode: ProcessingMode,
    pub stop_loss: StopLossConfig,
    /// Margin at or above which take-profit fires.
    pub take_profit_margin: Decimal,
    pub dca: DcaConfig,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            signal_rules: Vec::new(),
            trading_rules: Vec::new(),
            processing_mode: ProcessingMode::FirstMatch,
            stop_loss: StopLossConfig::default(),
            take_profit_margin: Decimal::new(4, 0),
            dca: DcaConfig::default(),
        }
    }
}

/// One opaque notification destination.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NotificationChannel {
    pub id: SmolStr,
    pub token: SmolStr,
}

/// `notification.json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub channels: Vec<NotificationChannel>,
    /// Minimum interval between same-level messages.
    pub min_interval_secs: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channels: Vec::new(),
            min_interval_secs: 5,
        }
    }
}

/// The full hot-reloadable configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub core: CoreConfig,
    pub trading: TradingConfig,
    pub signals: SignalsConfig,
    pub rules: RulesConfig,
    pub notification: NotificationConfig,
}

impl Config {
    /// Validate cross-field consistency; all violations reported at once.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut violations = Vec::new();

        if self.trading.market.trim().is_empty() {
            violations.push(String::from("trading.market must not be empty"));
        }
        if self.trading.max_positions == 0 {
            violations.push(String::from("trading.max_positions must be at least 1"));
        }
        if self.trading.min_position_cost.is_sign_negative() {
            violations.push(String::from("trading.min_position_cost must not be negative"));
        }
        if self.trading.buy_max_cost < self.trading.min_position_cost {
            violations.push(String::from(
                "trading.buy_max_cost must be at least trading.min_position_cost",
            ));
        }
        if self.trading.fee_percent.is_sign_negative()
            || self.trading.fee_percent >= Decimal::ONE_HUNDRED
        {
            violations.push(String::from("trading.fee_percent must be in [0, 100)"));
        }
        if self.core.speed_multiplier < Decimal::ONE {
            violations.push(String::from("core.speed_multiplier must be at least 1"));
        }
        for provider in &self.signals.providers {
            if provider.polling_interval_secs == 0 {
                violations.push(format!(
                    "signals.providers[{}].polling_interval_secs must be positive",
                    provider.name
                ));
            }
        }
        for rule in self
            .rules
            .signal_rules
            .iter()
            .chain(self.rules.trading_rules.iter())
        {
            if rule.name.trim().is_empty() {
                violations.push(String::from("rule names must not be empty"));
            }
            if let Some(trailing) = &rule.trailing
                && trailing.trailing_percentage.is_sign_negative()
            {
                violations.push(format!(
                    "rule {} trailing_percentage must not be negative",
                    rule.name
                ));
            }
        }
        if self.rules.dca.max_levels == 0 && self.rules.dca.enabled {
            violations.push(String::from("rules.dca.max_levels must be positive when enabled"));
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}
