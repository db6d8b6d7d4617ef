use chrono::{DateTime, TimeDelta, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::time::Instant;

/// Defines how the engine determines the current time.
///
/// * [`LiveClock`] for live trading.
/// * [`ReplayClock`] for backtesting, advancing `speed` times faster than
///   wall clock from a recorded base time.
pub trait EngineClock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Replay speed multiplier; 1 in live mode.
    fn speed(&self) -> Decimal;
}

/// Live clock using `Utc::now()`.
#[derive(Debug, Default, Copy, Clone)]
pub struct LiveClock;

impl EngineClock for LiveClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn speed(&self) -> Decimal {
        Decimal::ONE
    }
}

/// Replay clock: `base + wall_elapsed × speed`.
#[derive(Debug)]
pub struct ReplayClock {
    base: DateTime<Utc>,
    started: Instant,
    speed: Decimal,
}

impl ReplayClock {
    pub fn new(base: DateTime<Utc>, speed: Decimal) -> Self {
        Self {
            base,
            started: Instant::now(),
            speed: speed.max(Decimal::ONE),
        }
    }
}

impl EngineClock for ReplayClock {
    fn now(&self) -> DateTime<Utc> {
        let wall_millis = Decimal::from(self.started.elapsed().as_millis() as i64);
        let scaled = (wall_millis * self.speed).to_i64().unwrap_or(i64::MAX);
        self.base + TimeDelta::milliseconds(scaled)
    }

    fn speed(&self) -> Decimal {
        self.speed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_replay_clock_advances_faster_than_wall() {
        let base = Utc::now();
        let clock = ReplayClock::new(base, dec!(10));

        std::thread::sleep(std::time::Duration::from_millis(50));

        let elapsed = clock.now() - base;
        // ~500ms of replay time for ~50ms of wall time
        assert!(elapsed >= TimeDelta::milliseconds(400), "elapsed {elapsed}");
    }

    #[test]
    fn test_replay_speed_is_clamped_to_at_least_one() {
        let clock = ReplayClock::new(Utc::now(), dec!(0.1));
        assert_eq!(clock.speed(), Decimal::ONE);
    }
}
