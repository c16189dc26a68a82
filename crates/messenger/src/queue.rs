//! Outbound send queue with watermark backpressure.
//!
//! Appending while the queue is at or above the high-water mark suspends
//! reading from the connection; the writer draining it to the low-water mark
//! resumes reading.  Frames are never dropped.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

use sb_protocol::Frame;

/// Default high-water mark (queued frames).
pub const DEFAULT_HIGH_WATERMARK: usize = 6;

/// Default low-water mark.
pub const DEFAULT_LOW_WATERMARK: usize = 4;

/// Queue-depth counters, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Current depth.
    pub depth: usize,
    /// Deepest the queue has ever been.
    pub peak_depth: usize,
    /// Times the high-water mark suspended reading.
    pub suspensions: u64,
}

struct Inner {
    queue: VecDeque<Frame>,
    suspended: bool,
    closed: bool,
    peak_depth: usize,
    suspensions: u64,
}

/// Shared between the side that enqueues frames (request senders, inbound
/// dispatch producing replies) and the writer task that drains them.
pub struct SendQueue {
    inner: Mutex<Inner>,
    /// Wakes the writer when frames arrive or the queue closes.
    frames_ready: Notify,
    /// Wakes the reader when suspension lifts or the queue closes.
    read_resume: Notify,
    high: usize,
    low: usize,
}

impl SendQueue {
    pub fn new(high: usize, low: usize) -> Self {
        assert!(low < high, "low-water mark must be below high-water mark");
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                suspended: false,
                closed: false,
                peak_depth: 0,
                suspensions: 0,
            }),
            frames_ready: Notify::new(),
            read_resume: Notify::new(),
            high,
            low,
        }
    }

    /// Append a frame.  Never blocks; returns `false` when the queue has
    /// been closed (the frame is discarded — the connection is gone).
    pub fn push(&self, frame: Frame) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return false;
            }
            inner.queue.push_back(frame);
            let depth = inner.queue.len();
            inner.peak_depth = inner.peak_depth.max(depth);
            if depth >= self.high && !inner.suspended {
                inner.suspended = true;
                inner.suspensions += 1;
                tracing::debug!(depth, high = self.high, "send queue full, suspending reads");
            }
        }
        self.frames_ready.notify_one();
        true
    }

    /// Take the next frame to write, waiting until one is available.
    /// Returns `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<Frame> {
        loop {
            let notified = self.frames_ready.notified();
            {
                let mut inner = self.inner.lock();
                if let Some(frame) = inner.queue.pop_front() {
                    if inner.suspended && inner.queue.len() <= self.low {
                        inner.suspended = false;
                        tracing::debug!(
                            depth = inner.queue.len(),
                            low = self.low,
                            "send queue drained, resuming reads"
                        );
                        drop(inner);
                        self.read_resume.notify_waiters();
                    }
                    return Some(frame);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Wait until reading is permitted (queue below the high-water mark or
    /// queue closed — a closing connection must not wedge its reader).
    pub async fn ready_for_read(&self) {
        loop {
            let notified = self.read_resume.notified();
            {
                let inner = self.inner.lock();
                if !inner.suspended || inner.closed {
                    return;
                }
            }
            notified.await;
        }
    }

    /// Close the queue.  Idempotent; wakes both sides.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
        }
        self.frames_ready.notify_waiters();
        self.read_resume.notify_waiters();
    }

    pub fn is_suspended(&self) -> bool {
        self.inner.lock().suspended
    }

    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock();
        QueueStats {
            depth: inner.queue.len(),
            peak_depth: inner.peak_depth,
            suspensions: inner.suspensions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(n: u64) -> Frame {
        Frame::reply_ok(n, vec![])
    }

    #[test]
    fn suspends_at_high_water_mark() {
        let q = SendQueue::new(6, 4);
        for n in 0..5 {
            q.push(frame(n));
            assert!(!q.is_suspended(), "suspended below high mark at depth {}", n + 1);
        }
        q.push(frame(5));
        assert!(q.is_suspended());
        assert_eq!(q.stats().suspensions, 1);
    }

    #[tokio::test]
    async fn resumes_at_low_water_mark() {
        let q = SendQueue::new(6, 4);
        for n in 0..6 {
            q.push(frame(n));
        }
        assert!(q.is_suspended());

        // 6 -> 5: still suspended.
        q.pop().await.unwrap();
        assert!(q.is_suspended());

        // 5 -> 4: resumes.
        q.pop().await.unwrap();
        assert!(!q.is_suspended());
    }

    #[tokio::test]
    async fn ready_for_read_blocks_while_suspended() {
        let q = std::sync::Arc::new(SendQueue::new(2, 0));
        q.push(frame(0));
        q.push(frame(1));
        assert!(q.is_suspended());

        let q2 = q.clone();
        let waiter = tokio::spawn(async move { q2.ready_for_read().await });

        // Not resumed until drained to the low mark (0 here).
        q.pop().await.unwrap();
        assert!(q.is_suspended());
        q.pop().await.unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("reader should resume")
            .unwrap();
    }

    #[tokio::test]
    async fn pop_drains_then_ends_after_close() {
        let q = SendQueue::new(6, 4);
        q.push(frame(1));
        q.push(frame(2));
        q.close();

        assert_eq!(q.pop().await.unwrap().seqno(), 1);
        assert_eq!(q.pop().await.unwrap().seqno(), 2);
        assert!(q.pop().await.is_none());
    }

    #[test]
    fn push_after_close_is_rejected() {
        let q = SendQueue::new(6, 4);
        q.close();
        assert!(!q.push(frame(1)));
        assert_eq!(q.stats().depth, 0);
    }

    #[tokio::test]
    async fn ready_for_read_unblocks_on_close() {
        let q = std::sync::Arc::new(SendQueue::new(2, 0));
        q.push(frame(0));
        q.push(frame(1));
        let q2 = q.clone();
        let waiter = tokio::spawn(async move { q2.ready_for_read().await });
        q.close();
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("close should unblock reader")
            .unwrap();
    }

    #[test]
    fn peak_depth_tracks_deepest_point() {
        let q = SendQueue::new(10, 4);
        for n in 0..7 {
            q.push(frame(n));
        }
        assert_eq!(q.stats().peak_depth, 7);
    }
}
