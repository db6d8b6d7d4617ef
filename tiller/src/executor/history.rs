use crate::persistence::trade_log::TradeRecord;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Bounded in-memory record of executed trades, newest first.
///
/// Push is a short critical section; readers iterate over a snapshot so the
/// executor is never blocked by a slow consumer. The capacity bound keeps
/// memory flat over long runs.
#[derive(Debug)]
pub struct OrderHistory {
    capacity: usize,
    entries: Mutex<VecDeque<TradeRecord>>,
}

impl OrderHistory {
    pub const DEFAULT_CAPACITY: usize = 10_000;

    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    pub fn push(&self, record: TradeRecord) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_back();
        }
        entries.push_front(record);
    }

    /// Snapshot of the stored records, newest first.
    pub fn snapshot(&self) -> Vec<TradeRecord> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for OrderHistory {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
