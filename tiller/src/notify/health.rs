use chrono::{DateTime, TimeDelta, Utc};
use fnv::FnvHashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::BTreeSet;

/// Named degradation markers raised by subsystems.
pub const MARKER_PERSISTENCE_DEGRADED: &str = "persistence degraded";
pub const MARKER_RECONCILE_PENDING: &str = "reconcile pending";
pub const MARKER_TRADING_SUSPENDED: &str = "trading suspended";

/// Per-pipeline liveness heartbeats plus named degradation markers.
#[derive(Debug, Default)]
pub struct HealthRegistry {
    heartbeats: Mutex<FnvHashMap<&'static str, DateTime<Utc>>>,
    markers: Mutex<BTreeSet<SmolStr>>,
}

/// Point-in-time health projection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct HealthReport {
    pub stale_pipelines: Vec<SmolStr>,
    pub markers: Vec<SmolStr>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.stale_pipelines.is_empty() && self.markers.is_empty()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `pipeline` completed a tick at `now`.
    pub fn heartbeat(&self, pipeline: &'static str, now: DateTime<Utc>) {
        self.heartbeats.lock().insert(pipeline, now);
    }

    pub fn raise(&self, marker: &str) {
        self.markers.lock().insert(SmolStr::new(marker));
    }

    pub fn clear(&self, marker: &str) {
        self.markers.lock().remove(marker);
    }

    pub fn has_marker(&self, marker: &str) -> bool {
        self.markers.lock().contains(marker)
    }

    /// Pipelines whose last heartbeat is older than `staleness` at `now`,
    /// plus the raised markers.
    pub fn report(&self, now: DateTime<Utc>, staleness: TimeDelta) -> HealthReport {
        let stale_pipelines = self
            .heartbeats
            .lock()
            .iter()
            .filter(|(_, last)| now - **last > staleness)
            .map(|(name, _)| SmolStr::new(*name))
            .collect();

        HealthReport {
            stale_pipelines,
            markers: self.markers.lock().iter().cloned().collect(),
        }
    }
}
