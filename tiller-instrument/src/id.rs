use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Unique identifier for a position aggregate.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize,
)]
pub struct PositionId(Uuid);

impl PositionId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for PositionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "position_{}", self.0)
    }
}

/// Unique identifier for a portfolio aggregate.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize,
)]
pub struct PortfolioId(Uuid);

impl PortfolioId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for PortfolioId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "portfolio_{}", self.0)
    }
}
