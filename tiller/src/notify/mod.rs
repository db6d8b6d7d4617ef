use async_trait::async_trait;
use fnv::FnvHashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Per-pipeline liveness heartbeats & degradation markers.
pub mod health;

/// Severity of an outbound notification.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum NotifyLevel {
    Info,
    Warning,
    Critical,
}

impl Display for NotifyLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifyLevel::Info => write!(f, "info"),
            NotifyLevel::Warning => write!(f, "warning"),
            NotifyLevel::Critical => write!(f, "critical"),
        }
    }
}

/// One outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: NotifyLevel,
    pub text: String,
}

/// Notification transport port. Best-effort: implementations swallow their
/// own delivery failures after logging them.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification);
}

/// Sink that only logs; the default when no channel is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: Notification) {
        match notification.level {
            NotifyLevel::Info => info!(text = %notification.text, "notification"),
            NotifyLevel::Warning | NotifyLevel::Critical => {
                warn!(level = %notification.level, text = %notification.text, "notification")
            }
        }
    }
}

/// Fire-and-forget handle used by the pipelines.
///
/// `send` never blocks: when the channel is full the message is dropped and
/// counted, because a slow notification transport must not stall trading.
#[derive(Debug, Clone)]
pub struct NotifierHandle {
    tx: mpsc::Sender<Notification>,
    dropped: Arc<AtomicU64>,
}

impl NotifierHandle {
    const CHANNEL_CAPACITY: usize = 256;

    /// Construct the handle + worker pair draining into `sink`.
    pub fn new(
        sink: Arc<dyn Notifier>,
        throttle: Throttle,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(Self::CHANNEL_CAPACITY);
        let handle = Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        let worker = tokio::spawn(run_notify_worker(rx, sink, throttle));
        (handle, worker)
    }

    /// Handle that drops everything, for tests and disabled notifications.
    pub fn disabled() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn send(&self, level: NotifyLevel, text: String) {
        if self.tx.try_send(Notification { level, text }).is_err() {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(dropped, "notification channel full, dropping message");
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Per-level minimum interval between deliveries. Excess messages are
/// dropped, not queued.
#[derive(Debug)]
pub struct Throttle {
    min_interval: Duration,
    last_sent: Mutex<FnvHashMap<NotifyLevel, Instant>>,
    dropped: AtomicU64,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_sent: Mutex::new(FnvHashMap::default()),
            dropped: AtomicU64::new(0),
        }
    }

    /// Critical messages bypass throttling.
    pub fn admit(&self, level: NotifyLevel) -> bool {
        if level == NotifyLevel::Critical {
            return true;
        }

        let now = Instant::now();
        let mut last_sent = self.last_sent.lock();
        match last_sent.get(&level) {
            Some(last) if now.duration_since(*last) < self.min_interval => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(%level, dropped, "notification throttled");
                false
            }
            _ => {
                last_sent.insert(level, now);
                true
            }
        }
    }
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

async fn run_notify_worker(
    mut rx: mpsc::Receiver<Notification>,
    sink: Arc<dyn Notifier>,
    throttle: Throttle,
) {
    while let Some(notification) = rx.recv().await {
        if throttle.admit(notification.level) {
            sink.notify(notification).await;
        }
    }
}
