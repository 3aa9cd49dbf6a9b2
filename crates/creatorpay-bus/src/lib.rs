use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use creatorpay_schema::{BackendState, Toast};
use tokio::sync::{broadcast, Mutex};
use tokio::time::{Duration, Instant};

/// One push of the session state to every connected viewer.
#[derive(Debug, Clone)]
pub struct SyncEvent {
    pub seq: u64,
    pub snapshot: Arc<BackendState>,
    pub toast: Option<Toast>,
}

/// Minimum-interval gate for bulk pushes.
///
/// A denied push is remembered as pending; since every push carries the whole
/// tree, the next admitted or forced push delivers the coalesced changes.
#[derive(Debug)]
pub struct PushGate {
    min_interval: Duration,
    last_push: Option<Instant>,
    pending: bool,
}

impl PushGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_push: None,
            pending: false,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Returns true and records the push when `min_interval` has elapsed since the
    /// last one; otherwise marks a pending push and returns false.
    pub fn admit(&mut self, now: Instant) -> bool {
        let due = match self.last_push {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.min_interval,
        };
        if due {
            self.record(now);
        } else {
            self.pending = true;
        }
        due
    }

    /// Records an unconditional push.
    pub fn record(&mut self, now: Instant) {
        self.last_push = Some(now);
        self.pending = false;
    }

    pub fn has_pending(&self) -> bool {
        self.pending
    }
}

/// Per-session fan-out of state pushes.
///
/// Publishing with no viewer attached is a no-op apart from bumping the
/// sequence number; a viewer that attaches later asks for a fresh snapshot.
pub struct SyncBus {
    sender: broadcast::Sender<SyncEvent>,
    gate: Mutex<PushGate>,
    seq: AtomicU64,
}

impl SyncBus {
    pub fn new(capacity: usize, min_interval: Duration) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            gate: Mutex::new(PushGate::new(min_interval)),
            seq: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    pub fn viewer_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Number of pushes published so far.
    pub fn published(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    /// Consults the push gate for a throttled push.
    pub async fn admit(&self) -> bool {
        self.gate.lock().await.admit(Instant::now())
    }

    pub async fn has_pending(&self) -> bool {
        self.gate.lock().await.has_pending()
    }

    /// Unconditional push. Returns the sequence number assigned to the event.
    pub async fn publish(&self, snapshot: Arc<BackendState>, toast: Option<Toast>) -> u64 {
        self.gate.lock().await.record(Instant::now());
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let event = SyncEvent {
            seq,
            snapshot,
            toast,
        };
        if self.sender.send(event).is_err() {
            tracing::trace!(seq, "no viewer attached, push skipped");
        }
        seq
    }
}
