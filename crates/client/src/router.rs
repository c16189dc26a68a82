//! The Router façade — the only surface collaborating daemons see.
//!
//! `send` dispatches locally when the call targets this daemon, otherwise
//! resolves through the cache/Registry path and talks to the serving daemon
//! directly over a pooled point-to-point connection.  The Registry is never
//! on the data path.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use sb_messenger::{
    CallContext, CallDispatcher, CallHandler, Messenger, MessengerConfig, MessengerId,
    MessengerManager,
};
use sb_protocol::{CallName, CallResult, Endpoint, Fault, FaultKind};

use crate::client::RegistryClient;
use crate::observer::{ClientObserver, EventSink, TargetEvent};
use crate::reconnect::{ConnState, Reconnector};

/// Manages daemon-to-daemon connections: inbound ones from peers calling
/// us, and the outbound pool `send` dials.
#[derive(Default)]
pub(crate) struct PeerManager {
    all: Mutex<HashMap<MessengerId, Messenger>>,
    by_endpoint: Mutex<HashMap<Endpoint, Messenger>>,
}

impl PeerManager {
    fn cached(&self, endpoint: &Endpoint) -> Option<Messenger> {
        self.by_endpoint
            .lock()
            .get(endpoint)
            .filter(|m| !m.is_closed())
            .cloned()
    }

    /// Cache an outbound connection.  If a usable one raced us in, keep it
    /// and discard the newcomer.
    fn cache(&self, endpoint: Endpoint, messenger: Messenger) -> Messenger {
        let mut pool = self.by_endpoint.lock();
        match pool.get(&endpoint) {
            Some(existing) if !existing.is_closed() && existing.id() != messenger.id() => {
                let existing = existing.clone();
                drop(pool);
                messenger.close();
                existing
            }
            _ => {
                pool.insert(endpoint, messenger.clone());
                messenger
            }
        }
    }

    fn evict(&self, endpoint: &Endpoint, id: MessengerId) {
        let mut pool = self.by_endpoint.lock();
        if pool.get(endpoint).map(|m| m.id()) == Some(id) {
            pool.remove(endpoint);
        }
    }

    fn close_all(&self) {
        let all: Vec<Messenger> = self.all.lock().values().cloned().collect();
        for m in all {
            m.close();
        }
    }
}

impl MessengerManager for PeerManager {
    fn messenger_birth(&self, m: &Messenger) {
        self.all.lock().insert(m.id(), m.clone());
    }

    fn messenger_active(&self, _m: &Messenger) {}

    fn messenger_idle(&self, _m: &Messenger) {}

    fn messenger_stopped(&self, m: &Messenger) {
        self.by_endpoint.lock().retain(|_, v| v.id() != m.id());
    }

    fn messenger_death(&self, m: &Messenger) {
        self.all.lock().remove(&m.id());
    }

    fn manages(&self, m: &Messenger) -> bool {
        self.all.lock().contains_key(&m.id())
    }
}

pub(crate) struct RouterInner {
    pub(crate) client: Arc<RegistryClient>,
    pub(crate) reconnector: Reconnector,
    pub(crate) dispatcher: Arc<CallDispatcher>,
    pub(crate) peers: Arc<PeerManager>,
    pub(crate) endpoint: Endpoint,
    pub(crate) instance: String,
    pub(crate) class: String,
    pub(crate) config: MessengerConfig,
    pub(crate) finalized: AtomicBool,
    pub(crate) shutdown: CancellationToken,
}

/// Public entry point a daemon embeds.  Built by
/// [`RouterBuilder`](crate::builder::RouterBuilder).
#[derive(Clone)]
pub struct Router {
    pub(crate) inner: Arc<RouterInner>,
}

impl Router {
    /// This daemon's primary target instance name.
    pub fn instance(&self) -> &str {
        &self.inner.instance
    }

    pub fn class(&self) -> &str {
        &self.inner.class
    }

    /// The endpoint this Router serves its calls on.
    pub fn endpoint(&self) -> Endpoint {
        self.inner.endpoint
    }

    pub fn connection_state(&self) -> ConnState {
        self.inner.reconnector.state()
    }

    /// Wait for the Registry connection to come up.
    pub async fn wait_connected(&self) {
        self.inner.reconnector.wait_connected().await;
    }

    /// Suppress or resume Registry reconnection attempts.  Registration
    /// state is kept either way.
    pub fn set_reconnect_enabled(&self, en: bool) {
        self.inner.reconnector.set_enabled(en);
    }

    // ── Call registration ────────────────────────────────────────────

    /// Serve `method` on this daemon and advertise it, both as
    /// `sb://<instance>/<method>` and `sb://<class>/<method>` (class
    /// resolution fans out across instances).
    pub fn register_call<H: CallHandler>(&self, method: &str, handler: H) -> Result<(), Fault> {
        if method.is_empty() {
            return Err(Fault::bad_request("method must be non-empty"));
        }
        let handler: Arc<dyn CallHandler> = Arc::new(handler);
        let value = self.inner.endpoint.to_string();
        for target in [&self.inner.instance, &self.inner.class] {
            let key = CallName::new(target.clone(), method).to_string();
            self.inner.dispatcher.register_arc(&key, handler.clone());
            self.inner
                .client
                .register_resolution(&self.inner.instance, &key, &value)?;
        }
        Ok(())
    }

    /// Withdraw a call: stop serving it and remove its advertisements.
    pub fn unregister_call(&self, method: &str) -> Result<(), Fault> {
        for target in [&self.inner.instance, &self.inner.class] {
            let key = CallName::new(target.clone(), method).to_string();
            self.inner.dispatcher.unregister(&key);
            self.inner
                .client
                .remove_resolutions(&self.inner.instance, &key)?;
        }
        Ok(())
    }

    /// Mark this daemon's call set complete and begin advertising it.
    /// `send` is rejected before this point.
    pub fn finalize(&self) -> Result<(), Fault> {
        for (instance, _) in self.inner.client.local_instances() {
            self.inner.client.enable_target(&instance)?;
        }
        self.inner.finalized.store(true, Ordering::Release);
        Ok(())
    }

    pub fn finalized(&self) -> bool {
        self.inner.finalized.load(Ordering::Acquire)
    }

    // ── Outbound calls ───────────────────────────────────────────────

    /// Invoke a call.  Local targets dispatch in-process; remote ones go
    /// through resolution and a direct connection to the serving daemon.
    pub async fn send(&self, call: &CallName, args: Vec<Value>) -> CallResult {
        if !self.finalized() {
            return Err(Fault::new(
                FaultKind::NotFinalized,
                "router not finalized; call finalize() first",
            ));
        }
        let key = call.to_string();

        if self.inner.client.is_local_target(call.target()) {
            let ctx = CallContext::local(&key);
            return self.inner.dispatcher.dispatch(ctx, args).await;
        }

        let values = self.inner.client.query(&key).await?;
        let mut last_fault = Fault::new(
            FaultKind::NotFound,
            format!("no usable endpoint for {key}"),
        );
        for value in &values {
            let endpoint = match Endpoint::parse(value) {
                Ok(ep) => ep,
                Err(fault) => {
                    tracing::warn!(key = %key, value = %value, "unparseable endpoint value");
                    last_fault = fault;
                    continue;
                }
            };
            let messenger = match self.peer_messenger(endpoint).await {
                Ok(m) => m,
                Err(fault) => {
                    last_fault = fault;
                    continue;
                }
            };
            match messenger.call(&key, args.clone()).await {
                Err(fault) if fault.kind == FaultKind::ConnectionLost => {
                    self.inner.peers.evict(&endpoint, messenger.id());
                    last_fault = fault;
                }
                other => return other,
            }
        }
        Err(last_fault)
    }

    /// Resolve a call name to its endpoint values (cache first).
    pub async fn resolve(&self, key: &str) -> Result<Vec<String>, Fault> {
        self.inner.client.query(key).await
    }

    /// Cache-only resolution lookup.
    pub fn resolve_cached(&self, key: &str) -> Option<Vec<String>> {
        self.inner.client.query_cache(key)
    }

    /// Call a method on the Registry itself (list targets, permitted
    /// hosts, ...).
    pub async fn registry_call(&self, method: &str, args: Vec<Value>) -> CallResult {
        self.inner.client.forward(method, args).await
    }

    // ── Watches & observers ──────────────────────────────────────────

    /// Subscribe to arrival/departure events for a class of targets.
    pub fn watch_class(&self, class: &str) -> Result<(), Fault> {
        self.inner.client.add_class_watch(&self.inner.instance, class)
    }

    /// Subscribe to arrival/departure events for one instance.
    pub fn watch_instance(&self, instance: &str) -> Result<(), Fault> {
        self.inner
            .client
            .add_instance_watch(&self.inner.instance, instance)
    }

    pub fn unwatch_class(&self, class: &str) -> Result<(), Fault> {
        self.inner
            .client
            .remove_class_watch(&self.inner.instance, class)
    }

    pub fn unwatch_instance(&self, instance: &str) -> Result<(), Fault> {
        self.inner
            .client
            .remove_instance_watch(&self.inner.instance, instance)
    }

    /// Install the watch event callback.
    pub fn on_target_event<F>(&self, f: F)
    where
        F: Fn(TargetEvent) + Send + Sync + 'static,
    {
        let sink: EventSink = Arc::new(f);
        self.inner.client.set_event_sink(sink);
    }

    /// Attach the connection observer (at most one).
    pub fn attach_observer(&self, observer: Arc<dyn ClientObserver>) -> bool {
        self.inner.client.attach_observer(observer)
    }

    pub fn detach_observer(&self) -> bool {
        self.inner.client.detach_observer()
    }

    // ── Shutdown ─────────────────────────────────────────────────────

    /// Stop reconnecting, close the listener and every peer connection.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.reconnector.stop();
        self.inner.peers.close_all();
    }

    // ── Internals ────────────────────────────────────────────────────

    async fn peer_messenger(&self, endpoint: Endpoint) -> Result<Messenger, Fault> {
        if let Some(m) = self.inner.peers.cached(&endpoint) {
            return Ok(m);
        }
        let stream = TcpStream::connect(endpoint.addr()).await.map_err(|e| {
            Fault::connection_lost(format!("connect {endpoint}: {e}"))
        })?;
        let manager: Arc<dyn MessengerManager> = self.inner.peers.clone();
        let messenger = Messenger::spawn(
            stream,
            endpoint.addr(),
            self.inner.config.clone(),
            self.inner.dispatcher.clone(),
            &manager,
        );
        Ok(self.inner.peers.cache(endpoint, messenger))
    }
}

/// Accept loop for the Router's own listener: every peer connection gets a
/// messenger sharing the Router's dispatcher.
pub(crate) async fn serve_peers(
    listener: TcpListener,
    config: MessengerConfig,
    dispatcher: Arc<CallDispatcher>,
    peers: Arc<PeerManager>,
    shutdown: CancellationToken,
) {
    let manager: Arc<dyn MessengerManager> = peers;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    Messenger::spawn(stream, peer, config.clone(), dispatcher.clone(), &manager);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "peer accept failed");
                }
            },
        }
    }
}

/// Listener binding shared with the builder.
pub(crate) async fn bind_peer_listener(
    addr: SocketAddr,
) -> Result<(TcpListener, SocketAddr), crate::error::ClientError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| crate::error::ClientError::Bind { addr, source })?;
    let local = listener.local_addr()?;
    Ok((listener, local))
}
