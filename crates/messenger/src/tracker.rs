//! Request/reply correlation by sequence number.
//!
//! Every outbound request registers a pending entry; the entry is consumed
//! exactly once — by the matching reply, by the caller's response timeout,
//! or by connection teardown.  A reply with no pending entry is stale and
//! is logged, never dispatched.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use sb_protocol::{CallResult, Fault};

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<CallResult>>>>;

/// Correlation state for one connection.
pub struct ResponseTracker {
    next_seqno: AtomicU64,
    pending: PendingMap,
}

impl ResponseTracker {
    pub fn new() -> Self {
        Self {
            next_seqno: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Allocate the next sequence number and register a pending entry for
    /// it.  Returns the seqno and the handle the caller awaits the reply on.
    pub fn register(&self) -> (u64, PendingReply) {
        let seqno = self.next_seqno.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(seqno, tx);
        (
            seqno,
            PendingReply {
                seqno,
                rx,
                pending: Arc::clone(&self.pending),
            },
        )
    }

    /// Deliver the reply for `seqno`.  Returns `false` when no entry exists
    /// (stale or duplicate reply) — the caller logs it and carries on.
    pub fn complete(&self, seqno: u64, result: CallResult) -> bool {
        match self.pending.lock().remove(&seqno) {
            Some(tx) => {
                // A receiver dropped between removal and send means the
                // caller raced us with its timeout; it already has an
                // outcome, so dropping the result here keeps dispatch
                // at-most-once.
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    /// Fail every pending entry with `fault`.  Used on connection teardown.
    pub fn fail_all(&self, fault: &Fault) -> usize {
        let drained: Vec<_> = {
            let mut pending = self.pending.lock();
            pending.drain().collect()
        };
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(fault.clone()));
        }
        count
    }

    /// Number of requests still awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

impl Default for ResponseTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle a caller awaits one reply on.
///
/// Dropping it (for instance when the caller's timeout fires and the future
/// is abandoned) removes the pending entry, so the map never holds entries
/// nobody is waiting for.
pub struct PendingReply {
    seqno: u64,
    rx: oneshot::Receiver<CallResult>,
    pending: PendingMap,
}

impl PendingReply {
    pub fn seqno(&self) -> u64 {
        self.seqno
    }

    /// Wait for the reply.  `None` means the sender vanished without a
    /// result, which only happens on teardown races; callers treat it as a
    /// lost connection.
    pub async fn recv(mut self) -> Option<CallResult> {
        (&mut self.rx).await.ok()
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.seqno);
    }
}
