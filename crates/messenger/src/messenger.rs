//! The messenger: owner of one bidirectional connection.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use sb_protocol::{CallResult, Fault, Frame, FrameCodec};

use crate::dispatch::{CallContext, CallDispatcher};
use crate::manager::{MessengerId, MessengerManager};
use crate::queue::{QueueStats, SendQueue, DEFAULT_HIGH_WATERMARK, DEFAULT_LOW_WATERMARK};
use crate::tracker::ResponseTracker;

/// Per-connection tunables.
#[derive(Debug, Clone)]
pub struct MessengerConfig {
    /// How long a request waits for its reply before failing with `timeout`.
    pub response_timeout: Duration,
    /// Send-queue depth at which reading suspends.
    pub high_watermark: usize,
    /// Send-queue depth at which reading resumes.
    pub low_watermark: usize,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(30),
            high_watermark: DEFAULT_HIGH_WATERMARK,
            low_watermark: DEFAULT_LOW_WATERMARK,
        }
    }
}

struct Inner {
    id: MessengerId,
    peer: SocketAddr,
    queue: SendQueue,
    tracker: ResponseTracker,
    manager: Weak<dyn MessengerManager>,
    response_timeout: Duration,
    shutdown: CancellationToken,
    torn_down: AtomicBool,
}

/// Handle to one connection.
///
/// Cheap to clone, but ownership is single: the manager that received the
/// `birth` event drives teardown, everyone else holds a back-reference.
/// Destruction order is owner-drives-teardown, never the reverse.
#[derive(Clone)]
pub struct Messenger {
    inner: Arc<Inner>,
}

impl Messenger {
    /// Take ownership of `stream` and start the connection's reader loop and
    /// writer task.  Delivers `birth` to `manager` before any traffic flows.
    pub fn spawn(
        stream: TcpStream,
        peer: SocketAddr,
        config: MessengerConfig,
        dispatcher: Arc<CallDispatcher>,
        manager: &Arc<dyn MessengerManager>,
    ) -> Messenger {
        let messenger = Messenger {
            inner: Arc::new(Inner {
                id: MessengerId::next(),
                peer,
                queue: SendQueue::new(config.high_watermark, config.low_watermark),
                tracker: ResponseTracker::new(),
                manager: Arc::downgrade(manager),
                response_timeout: config.response_timeout,
                shutdown: CancellationToken::new(),
                torn_down: AtomicBool::new(false),
            }),
        };

        tracing::debug!(
            messenger_id = %messenger.id(),
            peer = %peer,
            "messenger born"
        );
        manager.messenger_birth(&messenger);

        let framed = Framed::new(stream, FrameCodec::new());
        let (write, read) = framed.split();

        let m = messenger.clone();
        tokio::spawn(async move { m.write_loop(write).await });

        let m = messenger.clone();
        tokio::spawn(async move { m.read_loop(read, dispatcher).await });

        messenger
    }

    pub fn id(&self) -> MessengerId {
        self.inner.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.inner.peer
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.inner.queue.stats()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.tracker.pending_count()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.torn_down.load(Ordering::SeqCst)
    }

    /// Send a request and wait for its reply.
    ///
    /// Returns immediately after queueing as far as the connection is
    /// concerned; the await is only for the reply.  Exactly one outcome is
    /// ever delivered per sequence number: the reply, `timeout` when the
    /// response window closes first, or `connection_lost` on teardown.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> CallResult {
        let (seqno, reply) = self.inner.tracker.register();
        let frame = Frame::Request {
            seqno,
            method: method.to_string(),
            args,
        };
        if !self.inner.queue.push(frame) {
            return Err(Fault::connection_lost("connection closed"));
        }
        tracing::trace!(
            messenger_id = %self.id(),
            seqno,
            method,
            "request queued"
        );

        match tokio::time::timeout(self.inner.response_timeout, reply.recv()).await {
            Ok(Some(result)) => result,
            Ok(None) => Err(Fault::connection_lost("connection closed")),
            // Dropping `reply` on this path removed the pending entry, so a
            // late reply is treated as stale rather than dispatched twice.
            Err(_) => Err(Fault::timeout()),
        }
    }

    /// Send a request without waiting for its reply.
    ///
    /// The frame is queued before this returns, so successive detached calls
    /// reach the peer in call order.  The reply (or timeout) is observed by a
    /// background task purely for logging.
    pub fn call_detached(&self, method: &str, args: Vec<Value>) {
        let (seqno, reply) = self.inner.tracker.register();
        let frame = Frame::Request {
            seqno,
            method: method.to_string(),
            args,
        };
        if !self.inner.queue.push(frame) {
            return;
        }
        let timeout = self.inner.response_timeout;
        let id = self.id();
        let method = method.to_string();
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, reply.recv()).await {
                Ok(Some(Ok(_))) => {}
                Ok(Some(Err(fault))) => {
                    tracing::debug!(messenger_id = %id, seqno, method, fault = %fault, "detached call failed");
                }
                Ok(None) | Err(_) => {
                    tracing::debug!(messenger_id = %id, seqno, method, "detached call got no reply");
                }
            }
        });
    }

    /// Close the connection.  Idempotent.  Every pending response fails with
    /// `connection_lost` and `stopped`/`death` are delivered to the manager
    /// before this returns.
    pub fn close(&self) {
        self.inner.shutdown.cancel();
        self.teardown("closed by owner");
    }

    async fn write_loop(
        &self,
        mut write: SplitSink<Framed<TcpStream, FrameCodec>, Frame>,
    ) {
        while let Some(frame) = self.inner.queue.pop().await {
            if let Err(e) = write.send(frame).await {
                tracing::debug!(
                    messenger_id = %self.id(),
                    error = %e,
                    "write failed"
                );
                // Teardown (not just a cancel) so a reader parked on the
                // watermark gate is released by the queue closing.
                self.teardown("write failed");
                return;
            }
        }
        let _ = write.close().await;
    }

    async fn read_loop(
        &self,
        mut read: SplitStream<Framed<TcpStream, FrameCodec>>,
        dispatcher: Arc<CallDispatcher>,
    ) {
        let reason = loop {
            // Watermark discipline: no reads while the send queue sits at or
            // above the high-water mark.
            self.inner.queue.ready_for_read().await;

            tokio::select! {
                _ = self.inner.shutdown.cancelled() => break "closed",
                frame = read.next() => match frame {
                    Some(Ok(frame)) => self.handle_inbound(frame, &dispatcher).await,
                    Some(Err(e)) => {
                        tracing::warn!(
                            messenger_id = %self.id(),
                            peer = %self.peer(),
                            error = %e,
                            "transport error"
                        );
                        break "transport error";
                    }
                    None => break "peer closed connection",
                },
            }
        };
        self.teardown(reason);
    }

    async fn handle_inbound(&self, frame: Frame, dispatcher: &Arc<CallDispatcher>) {
        match frame {
            Frame::Reply {
                seqno,
                ok,
                values,
                fault,
            } => {
                let result = if ok {
                    Ok(values)
                } else {
                    Err(fault.unwrap_or_else(|| {
                        Fault::new(sb_protocol::FaultKind::Internal, "fault reply without fault")
                    }))
                };
                if !self.inner.tracker.complete(seqno, result) {
                    // Stale or duplicate reply: protocol-level, non-fatal.
                    tracing::warn!(
                        messenger_id = %self.id(),
                        seqno,
                        "reply for unknown sequence number"
                    );
                }
            }
            Frame::Request { seqno, method, args } => {
                if let Some(mgr) = self.inner.manager.upgrade() {
                    mgr.messenger_active(self);
                }
                let ctx = CallContext {
                    source: crate::dispatch::CallSource::Messenger(self.clone()),
                    seqno,
                    method: method.clone(),
                };
                let reply = match dispatcher.dispatch(ctx, args).await {
                    Ok(values) => Frame::reply_ok(seqno, values),
                    Err(fault) => Frame::reply_fault(seqno, fault),
                };
                self.inner.queue.push(reply);
                if let Some(mgr) = self.inner.manager.upgrade() {
                    mgr.messenger_idle(self);
                }
            }
        }
    }

    fn teardown(&self, reason: &str) {
        if self.inner.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.shutdown.cancel();
        self.inner.queue.close();
        let failed = self.inner.tracker.fail_all(&Fault::connection_lost(reason));
        tracing::info!(
            messenger_id = %self.id(),
            peer = %self.peer(),
            reason,
            failed_pending = failed,
            "messenger stopped"
        );
        if let Some(mgr) = self.inner.manager.upgrade() {
            mgr.messenger_stopped(self);
            mgr.messenger_death(self);
        }
    }
}
