use smol_str::SmolStr;
use thiserror::Error;

/// Errors surfaced by an [`ExchangeClient`](crate::client::ExchangeClient).
///
/// The split matters to callers: [`ExecutionError::is_transient`] values are
/// safe to retry with backoff, everything else is not.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ExecutionError {
    /// Network fault, rate limit or similar recoverable condition.
    #[error("transient exchange fault: {0}")]
    Transient(SmolStr),

    /// Per-call deadline elapsed before the exchange responded.
    #[error("exchange call timed out after {0}s")]
    Timeout(u64),

    /// Root cancellation token fired mid-call.
    #[error("operation canceled")]
    Canceled,

    /// The exchange refused the request and will keep refusing it.
    #[error("permanent exchange fault: {0}")]
    Permanent(SmolStr),

    /// Trading on the pair is currently disabled by the exchange.
    #[error("pair {0} is disabled for trading")]
    PairDisabled(SmolStr),

    /// No order known for the provided identifier.
    #[error("unknown order {0}")]
    UnknownOrder(SmolStr),

    /// The pair has no ticker price available.
    #[error("no ticker price available for {0}")]
    MissingPrice(SmolStr),

    /// Simulated account has insufficient funds to fill the order.
    #[error("insufficient {currency} balance: required {required}, free {free}")]
    InsufficientBalance {
        currency: SmolStr,
        required: SmolStr,
        free: SmolStr,
    },
}

impl ExecutionError {
    /// Whether a retry with backoff may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExecutionError::Transient(_)
                | ExecutionError::Timeout(_)
                | ExecutionError::MissingPrice(_)
        )
    }
}
