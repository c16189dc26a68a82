//! Flood test: 500 requests through one messenger with a peer that
//! dispatches slower than the sender enqueues.  The send queue must hit its
//! high-water mark and suspend reading at least once, and every request must
//! be delivered, in order, with no drops.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};

use sb_messenger::{
    CallContext, CallDispatcher, CallHandler, Messenger, MessengerConfig, MessengerManager,
};
use sb_protocol::CallResult;

struct NullManager;

impl MessengerManager for NullManager {
    fn messenger_birth(&self, _m: &Messenger) {}
    fn messenger_active(&self, _m: &Messenger) {}
    fn messenger_idle(&self, _m: &Messenger) {}
    fn messenger_stopped(&self, _m: &Messenger) {}
    fn messenger_death(&self, _m: &Messenger) {}
    fn manages(&self, _m: &Messenger) -> bool {
        true
    }
}

/// Records every request body, slowly.
struct SlowCollector {
    seen: Mutex<Vec<u64>>,
}

#[async_trait::async_trait]
impl CallHandler for SlowCollector {
    async fn call(&self, _ctx: CallContext, args: Vec<Value>) -> CallResult {
        // Half the sender's pace: the sender enqueues instantly, we take a
        // breath per dispatch.
        tokio::time::sleep(Duration::from_micros(200)).await;
        self.seen.lock().push(args[0].as_u64().unwrap_or(0));
        Ok(vec![])
    }
}

#[tokio::test]
async fn five_hundred_requests_survive_a_slow_reader() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let collector = Arc::new(SlowCollector {
        seen: Mutex::new(Vec::new()),
    });
    let receiver_dispatch = Arc::new(CallDispatcher::new());
    receiver_dispatch.register_arc("flood.item", collector.clone());

    let connect = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
    let (accepted, peer) = listener.accept().await.unwrap();
    let dialed = connect.await.unwrap();
    let dialed_peer = dialed.peer_addr().unwrap();

    let manager: Arc<dyn MessengerManager> = Arc::new(NullManager);
    let _receiver = Messenger::spawn(
        accepted,
        peer,
        MessengerConfig::default(),
        receiver_dispatch,
        &manager,
    );
    let sender = Messenger::spawn(
        dialed,
        dialed_peer,
        MessengerConfig::default(),
        Arc::new(CallDispatcher::new()),
        &manager,
    );

    // Enqueue 500 requests without yielding: the queue must climb past the
    // high-water mark before the writer gets a chance to drain it.
    for n in 0..500u64 {
        sender.call_detached("flood.item", vec![serde_json::json!(n)]);
    }
    let stats = sender.queue_stats();
    assert!(
        stats.peak_depth >= 6,
        "queue never reached the high-water mark: {stats:?}"
    );
    assert!(
        stats.suspensions >= 1,
        "reads were never suspended: {stats:?}"
    );

    // Every request arrives, in send order.
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            if collector.seen.lock().len() == 500 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("not all requests were delivered");

    let seen = collector.seen.lock().clone();
    let want: Vec<u64> = (0..500).collect();
    assert_eq!(seen, want);

    // The queue drained completely once the peer caught up.
    assert_eq!(sender.queue_stats().depth, 0);
}
