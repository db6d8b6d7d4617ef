/// Signal-side rule processor: produces buy/swap candidates for pairs the
/// portfolio does not hold.
pub mod signal;

/// Trading-side rule processor: stop-loss, take-profit and rule actions per
/// open position.
pub mod trading;
