use crate::notify::health::HealthRegistry;
use crate::notify::{NotifierHandle, NotifyLevel};
use crate::EngineError;
use chrono::Utc;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Accumulated run counters of one pipeline.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    pub runs: u64,
    /// Total time ticks started late ("lag"), accumulated when a tick's work
    /// overran into the next slot.
    pub total_lag: Duration,
    pub faults: u64,
}

impl PipelineStats {
    pub fn mean_lag_ms(&self) -> u64 {
        if self.runs == 0 {
            return 0;
        }
        (self.total_lag.as_millis() / self.runs as u128) as u64
    }
}

/// Run one cadenced pipeline until the stop token fires.
///
/// The schedule is monotonic: tick `n` is due at `start + n × interval`.
/// If a tick's work has not finished by the next due time, the next tick is
/// deferred (never dropped) and the overrun is accumulated in the stats.
/// A faulting tick is logged & notified, then the pipeline continues.
pub async fn run_pipeline<F, Fut>(
    name: &'static str,
    interval: Duration,
    stagger: Duration,
    token: CancellationToken,
    health: Arc<HealthRegistry>,
    notifier: NotifierHandle,
    stats: Arc<Mutex<PipelineStats>>,
    mut work: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), EngineError>>,
{
    // Staggered startup avoids synchronized bursts across the pipelines
    tokio::select! {
        biased;
        _ = token.cancelled() => return,
        _ = tokio::time::sleep(stagger) => {}
    }

    info!(pipeline = name, interval_ms = interval.as_millis() as u64, "pipeline started");

    let start = Instant::now();
    let mut tick: u32 = 0;

    loop {
        tick += 1;
        let due = start + interval * tick;
        let now = Instant::now();

        if due > now {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = tokio::time::sleep_until(due) => {}
            }
        } else {
            stats.lock().total_lag += now - due;
        }

        if token.is_cancelled() {
            break;
        }

        match work().await {
            Ok(()) => {}
            Err(EngineError::Canceled) => break,
            Err(fault) => {
                error!(pipeline = name, %fault, "pipeline tick faulted");
                notifier.send(
                    NotifyLevel::Warning,
                    format!("Pipeline {name} faulted: {fault}"),
                );
                stats.lock().faults += 1;
            }
        }

        stats.lock().runs += 1;
        health.heartbeat(name, Utc::now());
    }

    debug!(pipeline = name, "pipeline stopped");
}
