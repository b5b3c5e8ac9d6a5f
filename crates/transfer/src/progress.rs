use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::types::{TransferId, TransferOutcome};

/// Default minimum progress delta (percent) between notifications.
const DEFAULT_MIN_DELTA_PCT: f64 = 1.0;

/// Default minimum time between notifications.
const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(250);

/// Progress and result callbacks exposed to the host.
pub trait TransferObserver: Send + Sync {
    fn on_progress(&self, id: &TransferId, bytes_done: u64, bytes_total: u64);

    /// Fires exactly once per transfer, on its terminal transition.
    fn on_transfer_finished(&self, id: &TransferId, outcome: &TransferOutcome);
}

/// Observer notifications as values.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    Progress {
        id: TransferId,
        bytes_done: u64,
        bytes_total: u64,
    },
    Finished {
        id: TransferId,
        outcome: TransferOutcome,
    },
}

/// Forwards notifications over an unbounded tokio channel.
#[derive(Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<TransferEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransferEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl TransferObserver for ChannelObserver {
    fn on_progress(&self, id: &TransferId, bytes_done: u64, bytes_total: u64) {
        // A dropped receiver just means nobody is listening.
        let _ = self.tx.send(TransferEvent::Progress {
            id: id.clone(),
            bytes_done,
            bytes_total,
        });
    }

    fn on_transfer_finished(&self, id: &TransferId, outcome: &TransferOutcome) {
        let _ = self.tx.send(TransferEvent::Finished {
            id: id.clone(),
            outcome: outcome.clone(),
        });
    }
}

// ---------------------------------------------------------------------------
// ProgressThrottle
// ---------------------------------------------------------------------------

struct LastEmit {
    pct: f64,
    at: Instant,
}

/// Limits progress notifications per transfer.
///
/// A notification passes when the percentage moved by at least
/// `min_delta_pct`, when `min_interval` elapsed, or when it is the final one.
pub struct ProgressThrottle {
    min_delta_pct: f64,
    min_interval: Duration,
    last: HashMap<TransferId, LastEmit>,
}

impl Default for ProgressThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_DELTA_PCT, DEFAULT_MIN_INTERVAL)
    }
}

impl ProgressThrottle {
    pub fn new(min_delta_pct: f64, min_interval: Duration) -> Self {
        Self {
            min_delta_pct,
            min_interval,
            last: HashMap::new(),
        }
    }

    /// Returns `true` if this update should reach the observer.
    pub fn should_emit(&mut self, id: &TransferId, done: u64, total: u64, now: Instant) -> bool {
        let pct = if total == 0 {
            100.0
        } else {
            done as f64 * 100.0 / total as f64
        };

        let emit = match self.last.get(id) {
            None => true,
            Some(last) => {
                pct >= 100.0
                    || (pct - last.pct) >= self.min_delta_pct
                    || now.duration_since(last.at) >= self.min_interval
            }
        };
        if emit {
            self.last.insert(id.clone(), LastEmit { pct, at: now });
        }
        emit
    }

    /// Drops state for a retired transfer.
    pub fn forget(&mut self, id: &TransferId) {
        self.last.remove(id);
    }

    pub fn tracked(&self) -> usize {
        self.last.len()
    }
}
