#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    unused_crate_dependencies,
    unused_extern_crates,
    clippy::unused_self,
    missing_debug_implementations,
    rust_2018_idioms
)]
#![allow(clippy::type_complexity, clippy::too_many_arguments)]

//! # Tiller-Execution
//! Order model, [`ExchangeClient`](client::ExchangeClient) port and the
//! in-process [`SimulatedExchange`](client::simulated::SimulatedExchange)
//! used for virtual trading and snapshot replay.
//!
//! The port is intentionally thin: orders in, [`ExecutionReport`](
//! order::ExecutionReport)s out, with a transient/permanent error split so
//! callers can decide what is retryable.

/// Exchange account balances per asset.
pub mod balance;

/// [`ExchangeClient`](client::ExchangeClient) port, retry utilities and the
/// simulated implementation.
pub mod client;

/// Order, execution report and order identifier types.
pub mod order;

/// Per-symbol exchange trading rules (lot size, precision, minimum value).
pub mod rules;

mod error;

pub use error::ExecutionError;
