use smol_str::SmolStr;
use thiserror::Error;
use tiller_execution::ExecutionError;
use tiller_instrument::InstrumentError;
use tiller_signal::SignalError;

/// Top-level engine fault taxonomy.
///
/// The variant decides the handling policy:
/// * [`EngineError::Validation`] is surfaced to the caller, never retried.
/// * [`EngineError::TransientIo`] is retried with backoff until exhausted.
/// * [`EngineError::AmbiguousPlacement`] parks the pair in the
///   reconcile-pending set until the order outcome is resolved.
/// * [`EngineError::ExchangeRejected`] leaves state untouched.
/// * [`EngineError::Invariant`] suspends trading; it is a bug, not a fault.
/// * [`EngineError::Configuration`] keeps the previous config active.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("validation: {0}")]
    Validation(#[from] ValidationError),

    #[error("transient io: {0}")]
    TransientIo(SmolStr),

    #[error("ambiguous placement for {pair} (cid {cid}): {detail}")]
    AmbiguousPlacement {
        pair: SmolStr,
        cid: SmolStr,
        detail: SmolStr,
    },

    #[error("exchange rejected order: {0}")]
    ExchangeRejected(SmolStr),

    #[error("operation canceled")]
    Canceled,

    #[error("invariant violation: {0}")]
    Invariant(SmolStr),

    #[error("configuration: {0}")]
    Configuration(SmolStr),
}

/// Pre-condition failures raised by the trading constraint validator and the
/// aggregates.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ValidationError {
    #[error("currency mismatch: {0}")]
    CurrencyMismatch(SmolStr),

    #[error("position already exists for {0}")]
    PositionAlreadyExists(SmolStr),

    #[error("no position found for {0}")]
    PositionNotFound(SmolStr),

    #[error("position is closed")]
    PositionClosed,

    #[error("cost {cost} below minimum position cost {min}")]
    BelowMinCost { cost: SmolStr, min: SmolStr },

    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        required: SmolStr,
        available: SmolStr,
    },

    #[error("maximum open positions reached ({0})")]
    MaxPositionsReached(usize),

    #[error("pair {0} is not tradable: {1}")]
    InvalidPair(SmolStr, SmolStr),

    #[error("buy/sell interval not elapsed for {0}")]
    BuySellIntervalNotElapsed(SmolStr),

    #[error("pair {0} awaiting reconciliation")]
    ReconcilePending(SmolStr),

    #[error("DCA not allowed: {0}")]
    DcaNotAllowed(SmolStr),

    #[error("price and quantity must be positive")]
    NonPositivePriceOrQuantity,

    #[error("trading is suspended: {0}")]
    TradingSuspended(SmolStr),
}

impl From<InstrumentError> for EngineError {
    fn from(error: InstrumentError) -> Self {
        match error {
            InstrumentError::CurrencyMismatch { lhs, rhs } => EngineError::Validation(
                ValidationError::CurrencyMismatch(SmolStr::new(format!("{lhs} vs {rhs}"))),
            ),
            other => EngineError::Validation(ValidationError::InvalidPair(
                SmolStr::new("value"),
                SmolStr::new(other.to_string()),
            )),
        }
    }
}

impl From<ExecutionError> for EngineError {
    fn from(error: ExecutionError) -> Self {
        match error {
            ExecutionError::Canceled => EngineError::Canceled,
            other if other.is_transient() => EngineError::TransientIo(SmolStr::new(other.to_string())),
            other => EngineError::ExchangeRejected(SmolStr::new(other.to_string())),
        }
    }
}

impl From<SignalError> for EngineError {
    fn from(error: SignalError) -> Self {
        match error {
            SignalError::Canceled => EngineError::Canceled,
            other if other.is_transient() => EngineError::TransientIo(SmolStr::new(other.to_string())),
            other => EngineError::TransientIo(SmolStr::new(other.to_string())),
        }
    }
}
