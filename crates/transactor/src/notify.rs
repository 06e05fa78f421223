//! Usage-tracking counters reported per provider.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub const AUTHORIZE: &str = "transactions/authorize";
pub const CREATE_MULTIPLE: &str = "transactions/create_multiple";
pub const TRANSACTIONS: &str = "transactions";

/// Receives usage-tracking counters for a provider.
///
/// Implementations must return quickly; they are called on the request path.
pub trait Notifier: Send + Sync {
    fn notify(&self, provider_key: &str, counters: &[(&str, i64)]);
}

/// Summed counters of one provider, emitted by [`NotifyBatcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyBatch {
    pub provider_key: String,
    pub counters: BTreeMap<String, i64>,
}

#[derive(Debug, Default)]
struct Pending {
    calls: usize,
    totals: HashMap<String, BTreeMap<String, i64>>,
}

/// Coalesces notify calls in memory and emits one batch per provider
/// every `batch_size` calls.
#[derive(Debug)]
pub struct NotifyBatcher {
    batch_size: usize,
    pending: Mutex<Pending>,
    tx: mpsc::UnboundedSender<NotifyBatch>,
}

impl NotifyBatcher {
    /// Create a batcher and the receiver its batches are sent to.
    pub fn channel(batch_size: usize) -> (Self, mpsc::UnboundedReceiver<NotifyBatch>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let batcher = Self {
            batch_size: batch_size.max(1),
            pending: Mutex::new(Pending::default()),
            tx,
        };
        (batcher, rx)
    }

    /// Emit everything accumulated so far.
    pub fn flush(&self) {
        let totals = {
            let mut pending = self.pending.lock();
            pending.calls = 0;
            std::mem::take(&mut pending.totals)
        };
        self.emit(totals);
    }

    fn emit(&self, totals: HashMap<String, BTreeMap<String, i64>>) {
        let providers = totals.len();
        for (provider_key, counters) in totals {
            if self
                .tx
                .send(NotifyBatch {
                    provider_key,
                    counters,
                })
                .is_err()
            {
                warn!("notification channel closed, dropping batch");
                return;
            }
        }
        if providers > 0 {
            debug!(providers, "notification batch emitted");
        }
    }
}

impl Notifier for NotifyBatcher {
    fn notify(&self, provider_key: &str, counters: &[(&str, i64)]) {
        let ready = {
            let mut pending = self.pending.lock();
            let totals = pending.totals.entry(provider_key.to_owned()).or_default();
            for (name, value) in counters {
                *totals.entry((*name).to_owned()).or_insert(0) += value;
            }
            pending.calls += 1;
            if pending.calls >= self.batch_size {
                pending.calls = 0;
                Some(std::mem::take(&mut pending.totals))
            } else {
                None
            }
        };
        if let Some(totals) = ready {
            self.emit(totals);
        }
    }
}

/// Notifier that records every call, for tests and diagnostics.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    calls: Mutex<Vec<(String, BTreeMap<String, i64>)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(String, BTreeMap<String, i64>)> {
        self.calls.lock().clone()
    }

    /// Sum of every counter reported for `provider_key`.
    pub fn totals(&self, provider_key: &str) -> BTreeMap<String, i64> {
        let mut totals = BTreeMap::new();
        for (provider, counters) in self.calls.lock().iter() {
            if provider == provider_key {
                for (name, value) in counters {
                    *totals.entry(name.clone()).or_insert(0) += value;
                }
            }
        }
        totals
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, provider_key: &str, counters: &[(&str, i64)]) {
        let counters = counters
            .iter()
            .map(|(name, value)| ((*name).to_owned(), *value))
            .collect();
        self.calls.lock().push((provider_key.to_owned(), counters));
    }
}
