//! The registration/cache state machine every daemon embeds.
//!
//! Operations queue in order and execute one at a time on the Registry
//! connection.  Completion advances the queue; failure tears the connection
//! down, which (via the auto-reconnector) leads to a fresh messenger birth,
//! at which point every previously completed repeatable operation is spliced
//! back onto the front of the queue and replayed in its original order.
//! One-off operations are never replayed: pending ones fail when the
//! connection dies and callers re-issue them if still interested.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{oneshot, watch};

use sb_messenger::{
    CallContext, CallDispatcher, CallHandler, Messenger, MessengerManager,
};
use sb_protocol::args::{nonempty_str_arg, str_arg};
use sb_protocol::methods;
use sb_protocol::{CallResult, Fault, FaultKind};

use crate::cache::ResolvedCache;
use crate::observer::{ClientObserver, EventKind, EventSink, TargetEvent};
use crate::ops::Operation;

/// A target this daemon has registered (or queued for registration).
struct InstanceInfo {
    instance: String,
    class: String,
    cookie: String,
}

struct State {
    /// Bumped on every messenger birth; operation completions from an older
    /// epoch are stale and ignored (their operation has already been queued
    /// for replay).
    epoch: u64,
    messenger: Option<Messenger>,
    in_flight: bool,
    todo: VecDeque<Operation>,
    done: Vec<Operation>,
    cache: ResolvedCache,
    instances: Vec<InstanceInfo>,
}

/// Client half of the Registry protocol.  One per daemon.
pub struct RegistryClient {
    state: Mutex<State>,
    observer: Mutex<Option<Arc<dyn ClientObserver>>>,
    event_sink: Mutex<Option<EventSink>>,
    /// Disconnect generation counter; the reconnector waits on it.
    disconnects: watch::Sender<u64>,
    /// Back-reference handed to spawned operation tasks.
    me: std::sync::Weak<RegistryClient>,
}

impl RegistryClient {
    pub fn new() -> Arc<Self> {
        let (disconnects, _) = watch::channel(0);
        Arc::new_cyclic(|me| Self {
            state: Mutex::new(State {
                epoch: 0,
                messenger: None,
                in_flight: false,
                todo: VecDeque::new(),
                done: Vec::new(),
                cache: ResolvedCache::new(),
                instances: Vec::new(),
            }),
            observer: Mutex::new(None),
            event_sink: Mutex::new(None),
            disconnects,
            me: me.clone(),
        })
    }

    // ── Registration API ─────────────────────────────────────────────

    /// Queue registration of a target.  Re-registering a known instance
    /// with the same class is a no-op; with a different class it fails.
    pub fn register_target(
        &self,
        instance: &str,
        class: &str,
        singleton: bool,
    ) -> Result<(), Fault> {
        if instance.is_empty() || class.is_empty() {
            return Err(Fault::bad_request("instance and class must be non-empty"));
        }
        let mut state = self.state.lock();
        if let Some(existing) = state.instances.iter().find(|i| i.instance == instance) {
            if existing.class != class {
                return Err(Fault::bad_request(format!(
                    "instance {instance} already registered with class {}",
                    existing.class
                )));
            }
            tracing::warn!(instance, "target already registered, ignoring");
            return Ok(());
        }
        state.instances.push(InstanceInfo {
            instance: instance.to_string(),
            class: class.to_string(),
            cookie: String::new(),
        });
        state.todo.push_back(Operation::RegisterTarget {
            instance: instance.to_string(),
            class: class.to_string(),
            singleton,
        });
        self.crank(&mut state);
        Ok(())
    }

    /// Queue a call resolution for a registered instance.
    pub fn register_resolution(
        &self,
        instance: &str,
        key: &str,
        value: &str,
    ) -> Result<(), Fault> {
        let mut state = self.state.lock();
        if !state.instances.iter().any(|i| i.instance == instance) {
            return Err(Fault::new(
                FaultKind::NoSuchTarget,
                format!("unknown local target: {instance}"),
            ));
        }
        state.todo.push_back(Operation::AddResolution {
            instance: instance.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        });
        self.crank(&mut state);
        Ok(())
    }

    /// Queue the enable that makes `instance`'s call set visible.
    pub fn enable_target(&self, instance: &str) -> Result<(), Fault> {
        let mut state = self.state.lock();
        if !state.instances.iter().any(|i| i.instance == instance) {
            return Err(Fault::new(
                FaultKind::NoSuchTarget,
                format!("unknown local target: {instance}"),
            ));
        }
        state.todo.push_back(Operation::EnableTarget {
            instance: instance.to_string(),
        });
        self.crank(&mut state);
        Ok(())
    }

    /// Withdraw one call resolution: the replayable registration is pruned
    /// and the Registry told once.
    pub fn remove_resolutions(&self, instance: &str, key: &str) -> Result<(), Fault> {
        let mut state = self.state.lock();
        if !state.instances.iter().any(|i| i.instance == instance) {
            return Err(Fault::new(
                FaultKind::NoSuchTarget,
                format!("unknown local target: {instance}"),
            ));
        }
        state.done.retain(|op| {
            !matches!(op, Operation::AddResolution { instance: i, key: k, .. }
                if i == instance && k == key)
        });
        state.todo.retain(|op| {
            !matches!(op, Operation::AddResolution { instance: i, key: k, .. }
                if i == instance && k == key)
        });
        state.todo.push_back(Operation::Forward {
            method: methods::REMOVE_RESOLUTIONS.to_string(),
            args: vec![serde_json::json!(instance), serde_json::json!(key)],
            tx: None,
        });
        self.crank(&mut state);
        Ok(())
    }

    /// Unregister a target: local bookkeeping is dropped (including its
    /// replayable operations) and the Registry is told once.
    pub fn unregister_target(&self, instance: &str) -> Result<(), Fault> {
        let mut state = self.state.lock();
        let Some(pos) = state.instances.iter().position(|i| i.instance == instance) else {
            return Err(Fault::new(
                FaultKind::NoSuchTarget,
                format!("unknown local target: {instance}"),
            ));
        };
        state.instances.remove(pos);
        state.done.retain(|op| !op_mentions_instance(op, instance));
        state
            .todo
            .retain(|op| !(op.is_repeatable() && op_mentions_instance(op, instance)));
        state.todo.push_back(Operation::Forward {
            method: methods::UNREGISTER_TARGET.to_string(),
            args: vec![serde_json::json!(instance)],
            tx: None,
        });
        self.crank(&mut state);
        Ok(())
    }

    // ── Watch API ────────────────────────────────────────────────────

    pub fn add_class_watch(&self, watcher: &str, class: &str) -> Result<(), Fault> {
        let mut state = self.state.lock();
        if !state.instances.iter().any(|i| i.instance == watcher) {
            return Err(Fault::new(
                FaultKind::NoSuchTarget,
                format!("unknown local target: {watcher}"),
            ));
        }
        state.todo.push_back(Operation::AddClassWatch {
            watcher: watcher.to_string(),
            class: class.to_string(),
        });
        self.crank(&mut state);
        Ok(())
    }

    pub fn add_instance_watch(
        &self,
        watcher: &str,
        instance: &str,
    ) -> Result<(), Fault> {
        let mut state = self.state.lock();
        if !state.instances.iter().any(|i| i.instance == watcher) {
            return Err(Fault::new(
                FaultKind::NoSuchTarget,
                format!("unknown local target: {watcher}"),
            ));
        }
        state.todo.push_back(Operation::AddInstanceWatch {
            watcher: watcher.to_string(),
            instance: instance.to_string(),
        });
        self.crank(&mut state);
        Ok(())
    }

    /// Drop a class watch: the replayable subscription is pruned and the
    /// Registry told once.
    pub fn remove_class_watch(&self, watcher: &str, class: &str) -> Result<(), Fault> {
        let mut state = self.state.lock();
        state.done.retain(|op| {
            !matches!(op, Operation::AddClassWatch { watcher: w, class: c }
                if w == watcher && c == class)
        });
        state.todo.retain(|op| {
            !matches!(op, Operation::AddClassWatch { watcher: w, class: c }
                if w == watcher && c == class)
        });
        state.todo.push_back(Operation::Forward {
            method: methods::REMOVE_CLASS_WATCH.to_string(),
            args: vec![serde_json::json!(watcher), serde_json::json!(class)],
            tx: None,
        });
        self.crank(&mut state);
        Ok(())
    }

    /// Drop an instance watch.
    pub fn remove_instance_watch(&self, watcher: &str, instance: &str) -> Result<(), Fault> {
        let mut state = self.state.lock();
        state.done.retain(|op| {
            !matches!(op, Operation::AddInstanceWatch { watcher: w, instance: i }
                if w == watcher && i == instance)
        });
        state.todo.retain(|op| {
            !matches!(op, Operation::AddInstanceWatch { watcher: w, instance: i }
                if w == watcher && i == instance)
        });
        state.todo.push_back(Operation::Forward {
            method: methods::REMOVE_INSTANCE_WATCH.to_string(),
            args: vec![serde_json::json!(watcher), serde_json::json!(instance)],
            tx: None,
        });
        self.crank(&mut state);
        Ok(())
    }

    // ── Resolution API ───────────────────────────────────────────────

    /// Resolve a call name.  A cache hit answers without touching the
    /// Registry (and without yielding); a miss queues a one-off query that
    /// waits for a connection if none exists yet.
    pub async fn query(&self, key: &str) -> Result<Vec<String>, Fault> {
        let rx = {
            let mut state = self.state.lock();
            if let Some(values) = state.cache.get(key) {
                return Ok(values.clone());
            }
            let (tx, rx) = oneshot::channel();
            state.todo.push_back(Operation::Resolve {
                key: key.to_string(),
                tx: Some(tx),
            });
            self.crank(&mut state);
            rx
        };
        rx.await
            .unwrap_or_else(|_| Err(Fault::new(FaultKind::NoRegistry, "client shut down")))
    }

    /// Cache-only lookup.
    pub fn query_cache(&self, key: &str) -> Option<Vec<String>> {
        self.state.lock().cache.get(key).cloned()
    }

    /// Drop one cached resolution (Registry push).
    pub fn uncache_call(&self, key: &str) {
        let removed = self.state.lock().cache.uncache_call(key);
        tracing::debug!(key, removed, "uncache call");
    }

    /// Drop every cached resolution naming `target` (Registry push).
    pub fn uncache_target(&self, target: &str) {
        let removed = self.state.lock().cache.uncache_target(target);
        tracing::debug!(target, removed, "uncache target");
    }

    /// Forward an arbitrary call to the Registry as a one-off operation.
    pub async fn forward(&self, method: &str, args: Vec<Value>) -> CallResult {
        let rx = {
            let mut state = self.state.lock();
            let (tx, rx) = oneshot::channel();
            state.todo.push_back(Operation::Forward {
                method: method.to_string(),
                args,
                tx: Some(tx),
            });
            self.crank(&mut state);
            rx
        };
        rx.await
            .unwrap_or_else(|_| Err(Fault::new(FaultKind::NoRegistry, "client shut down")))
    }

    // ── Introspection ────────────────────────────────────────────────

    pub fn connected(&self) -> bool {
        self.state.lock().messenger.is_some()
    }

    /// Whether `name` is one of this daemon's instances or classes.
    pub fn is_local_target(&self, name: &str) -> bool {
        self.state
            .lock()
            .instances
            .iter()
            .any(|i| i.instance == name || i.class == name)
    }

    pub fn pending_operations(&self) -> usize {
        self.state.lock().todo.len()
    }

    /// This daemon's registered `(instance, class)` pairs.
    pub fn local_instances(&self) -> Vec<(String, String)> {
        self.state
            .lock()
            .instances
            .iter()
            .map(|i| (i.instance.clone(), i.class.clone()))
            .collect()
    }

    // ── Observer / events ────────────────────────────────────────────

    /// Attach the (single) observer.  Fails if one is already attached.
    /// Fires `connect` immediately when already connected.
    pub fn attach_observer(&self, observer: Arc<dyn ClientObserver>) -> bool {
        {
            let mut slot = self.observer.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(observer.clone());
        }
        if self.connected() {
            observer.connect();
        }
        true
    }

    pub fn detach_observer(&self) -> bool {
        self.observer.lock().take().is_some()
    }

    pub fn set_event_sink(&self, sink: EventSink) {
        *self.event_sink.lock() = Some(sink);
    }

    // ── Reconnector interface ────────────────────────────────────────

    pub(crate) fn disconnect_generation(&self) -> u64 {
        *self.disconnects.borrow()
    }

    /// Wait until a disconnect after generation `since` occurs.
    pub(crate) async fn wait_disconnect(&self, since: u64) {
        let mut rx = self.disconnects.subscribe();
        let _ = rx.wait_for(|g| *g > since).await;
    }

    /// Serve the `client.*` surface from `dispatcher`.
    pub fn install_handlers(&self, dispatcher: &CallDispatcher) {
        let surface: Arc<dyn CallHandler> = Arc::new(ClientSurface {
            client: self.me.clone(),
        });
        for method in [
            methods::CLIENT_HELLO,
            methods::UNCACHE_CALL,
            methods::UNCACHE_TARGET,
            methods::CLIENT_EVENT,
        ] {
            dispatcher.register_arc(method, surface.clone());
        }
    }

    // ── Queue machinery ──────────────────────────────────────────────

    /// Start the front operation if idle, connected, and work exists.
    fn crank(&self, state: &mut State) {
        if state.in_flight || state.todo.is_empty() {
            return;
        }
        let Some(messenger) = state.messenger.clone() else {
            return;
        };
        state.in_flight = true;
        let epoch = state.epoch;
        let cookies: Vec<(String, String)> = state
            .instances
            .iter()
            .map(|i| (i.instance.clone(), i.cookie.clone()))
            .collect();
        let Some(front) = state.todo.front() else {
            state.in_flight = false;
            return;
        };
        let (method, args) = front.request(|instance| {
            cookies
                .iter()
                .find(|(i, _)| i == instance)
                .map(|(_, c)| c.clone())
                .unwrap_or_default()
        });
        let desc = front.describe();

        let Some(client) = self.me.upgrade() else {
            state.in_flight = false;
            return;
        };
        tokio::spawn(async move {
            tracing::debug!(op = %desc, "executing client operation");
            let result = messenger.call(&method, args).await;
            client.complete_front(epoch, result);
        });
    }

    /// Outcome of the in-flight (front) operation.
    fn complete_front(&self, epoch: u64, result: CallResult) {
        let mut to_close = None;
        let mut ready = Vec::new();
        {
            let mut state = self.state.lock();
            if epoch != state.epoch {
                tracing::debug!("operation completion from a dead connection, ignoring");
                return;
            }
            state.in_flight = false;
            let Some(mut op) = state.todo.pop_front() else {
                return;
            };
            let failed = apply_outcome(&mut state, &mut op, result, &mut ready);
            if op.is_repeatable() {
                state.done.push(op);
            }
            if failed {
                // One-offs queued behind the failure cannot outlive the
                // connection; repeatables wait for the replay.
                let fault = Fault::new(FaultKind::NoRegistry, "registry connection lost");
                let mut kept = VecDeque::new();
                while let Some(mut queued) = state.todo.pop_front() {
                    if queued.is_repeatable() {
                        kept.push_back(queued);
                    } else {
                        queued.force_failure(&fault);
                    }
                }
                state.todo = kept;
                to_close = state.messenger.take();
            } else {
                self.crank(&mut state);
            }
        }
        let observer = self.observer.lock().clone();
        if let Some(observer) = &observer {
            for instance in &ready {
                observer.ready(instance);
            }
        }
        if let Some(m) = to_close {
            tracing::warn!(messenger_id = %m.id(), "client operation failed, restarting");
            m.close();
        }
    }

    fn deliver_event(&self, event: TargetEvent) {
        let sink = self.event_sink.lock().clone();
        if let Some(sink) = sink {
            sink(event);
        }
    }
}

/// Apply an operation's outcome to the state.  Returns whether the
/// connection must restart.
fn apply_outcome(
    state: &mut State,
    op: &mut Operation,
    result: CallResult,
    ready: &mut Vec<String>,
) -> bool {
    match op {
        Operation::RegisterTarget { instance, .. } => match result {
            Ok(values) => {
                let cookie = values
                    .first()
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if let Some(info) = state.instances.iter_mut().find(|i| i.instance == *instance) {
                    info.cookie = cookie;
                }
                false
            }
            Err(fault) => {
                tracing::error!(instance = %instance, fault = %fault, "target registration failed");
                true
            }
        },
        Operation::AddResolution { key, .. } => match result {
            Ok(_) => false,
            Err(fault) => {
                tracing::error!(key = %key, fault = %fault, "resolution registration failed");
                true
            }
        },
        Operation::EnableTarget { instance } => match result {
            Ok(_) => {
                ready.push(instance.clone());
                false
            }
            Err(fault) => {
                tracing::error!(instance = %instance, fault = %fault, "enable failed");
                true
            }
        },
        Operation::AddClassWatch { class, .. } => match result {
            Ok(_) => false,
            Err(fault) => {
                tracing::error!(class = %class, fault = %fault, "class watch failed");
                true
            }
        },
        Operation::AddInstanceWatch { instance, .. } => match result {
            Ok(_) => false,
            Err(fault) => {
                tracing::error!(instance = %instance, fault = %fault, "instance watch failed");
                true
            }
        },
        Operation::Resolve { key, tx } => match result {
            Ok(values) => {
                let strings: Vec<String> = values
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect();
                state.cache.insert(key, strings.clone());
                if let Some(tx) = tx.take() {
                    let _ = tx.send(Ok(strings));
                }
                false
            }
            Err(fault) => {
                let failed = is_transport_failure(&fault);
                if let Some(tx) = tx.take() {
                    let _ = tx.send(Err(fault));
                }
                failed
            }
        },
        Operation::Forward { tx, .. } => {
            let failed = matches!(&result, Err(f) if is_transport_failure(f));
            if let Some(tx) = tx.take() {
                let _ = tx.send(result);
            }
            failed
        }
    }
}

/// Faults that condemn the connection rather than the single operation.
fn is_transport_failure(fault: &Fault) -> bool {
    matches!(fault.kind, FaultKind::ConnectionLost | FaultKind::Timeout)
}

fn op_mentions_instance(op: &Operation, instance: &str) -> bool {
    match op {
        Operation::RegisterTarget { instance: i, .. }
        | Operation::AddResolution { instance: i, .. }
        | Operation::EnableTarget { instance: i }
        | Operation::AddClassWatch { watcher: i, .. }
        | Operation::AddInstanceWatch { watcher: i, .. } => i == instance,
        _ => false,
    }
}

/// Splice completed repeatables back to the front of the queue, preserving
/// their original order, and forget everything the old connection told us.
fn prepare_for_restart(state: &mut State) {
    let replay = std::mem::take(&mut state.done);
    let waiting = std::mem::take(&mut state.todo);
    state.todo = replay.into_iter().chain(waiting).collect();
    state.cache.clear();
    state.in_flight = false;
}

impl MessengerManager for RegistryClient {
    fn messenger_birth(&self, m: &Messenger) {
        let replaced = {
            let mut state = self.state.lock();
            state.epoch += 1;
            prepare_for_restart(&mut state);
            let replaced = state.messenger.replace(m.clone());
            tracing::info!(
                messenger_id = %m.id(),
                replay = state.todo.len(),
                "registry connection established"
            );
            replaced
        };
        if let Some(old) = replaced {
            tracing::warn!(messenger_id = %old.id(), "stale registry connection displaced");
            old.close();
        }
        let observer = self.observer.lock().clone();
        if let Some(observer) = observer {
            observer.connect();
        }
        // Restart the queue on the new connection.
        let mut state = self.state.lock();
        self.crank(&mut state);
    }

    fn messenger_active(&self, _m: &Messenger) {}

    fn messenger_idle(&self, _m: &Messenger) {}

    fn messenger_stopped(&self, _m: &Messenger) {
        // Pending operations fail through the response tracker; the queue
        // reacts in `complete_front`.
    }

    fn messenger_death(&self, m: &Messenger) {
        let was_current = {
            let mut state = self.state.lock();
            match &state.messenger {
                Some(current) if current.id() == m.id() => {
                    state.messenger = None;
                    true
                }
                _ => false,
            }
        };
        if was_current {
            tracing::info!(messenger_id = %m.id(), "registry connection lost");
            self.disconnects.send_modify(|g| *g += 1);
            let observer = self.observer.lock().clone();
            if let Some(observer) = observer {
                observer.disconnect();
            }
        }
    }

    fn manages(&self, m: &Messenger) -> bool {
        self.state
            .lock()
            .messenger
            .as_ref()
            .map(|current| current.id() == m.id())
            .unwrap_or(false)
    }
}

/// Handlers for the surface the Registry pushes at every daemon.
struct ClientSurface {
    client: std::sync::Weak<RegistryClient>,
}

#[async_trait::async_trait]
impl CallHandler for ClientSurface {
    async fn call(&self, ctx: CallContext, args: Vec<Value>) -> CallResult {
        let Some(client) = self.client.upgrade() else {
            return Err(Fault::connection_lost("client shut down"));
        };
        match ctx.method.as_str() {
            methods::CLIENT_HELLO => Ok(vec![]),
            methods::UNCACHE_CALL => {
                let key = nonempty_str_arg(&args, 0, "key")?;
                client.uncache_call(key);
                Ok(vec![])
            }
            methods::UNCACHE_TARGET => {
                let target = nonempty_str_arg(&args, 0, "target")?;
                client.uncache_target(target);
                Ok(vec![])
            }
            methods::CLIENT_EVENT => {
                let kind = str_arg(&args, 0, "kind")?;
                let class = str_arg(&args, 1, "class")?;
                let instance = str_arg(&args, 2, "instance")?;
                let Some(kind) = EventKind::parse(kind) else {
                    return Err(Fault::bad_request(format!("unknown event kind: {kind}")));
                };
                client.deliver_event(TargetEvent {
                    kind,
                    class: class.to_string(),
                    instance: instance.to_string(),
                });
                Ok(vec![])
            }
            other => Err(Fault::no_such_method(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use sb_protocol::{Frame, FrameCodec};
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;
    use tokio_util::codec::Framed;

    /// Minimal scripted Registry: answers every request and reports
    /// `(connection_index, method, args)` tuples back to the test.
    async fn fake_registry() -> (SocketAddr, mpsc::UnboundedReceiver<(u32, String, Vec<Value>)>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut conn_index = 0u32;
            while let Ok((stream, _)) = listener.accept().await {
                let seen_tx = seen_tx.clone();
                let index = conn_index;
                conn_index += 1;
                tokio::spawn(async move {
                    let mut framed = Framed::new(stream, FrameCodec::new());
                    while let Some(Ok(frame)) = framed.next().await {
                        let Frame::Request { seqno, method, args } = frame else {
                            continue;
                        };
                        let _ = seen_tx.send((index, method.clone(), args));
                        let reply = match method.as_str() {
                            methods::REGISTER_TARGET => {
                                Frame::reply_ok(seqno, vec![serde_json::json!("cookie-test")])
                            }
                            methods::RESOLVE => Frame::reply_ok(
                                seqno,
                                vec![serde_json::json!("stcp://127.0.0.1:9")],
                            ),
                            _ => Frame::reply_ok(seqno, vec![]),
                        };
                        if framed.send(reply).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });

        (addr, seen_rx)
    }

    fn test_config() -> sb_messenger::MessengerConfig {
        sb_messenger::MessengerConfig {
            response_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    async fn connect(client: &Arc<RegistryClient>, addr: SocketAddr) -> Messenger {
        let dispatcher = Arc::new(CallDispatcher::new());
        client.install_handlers(&dispatcher);
        let stream = TcpStream::connect(addr).await.unwrap();
        let manager: Arc<dyn MessengerManager> = client.clone();
        Messenger::spawn(stream, addr, test_config(), dispatcher, &manager)
    }

    async fn drain_until(
        rx: &mut mpsc::UnboundedReceiver<(u32, String, Vec<Value>)>,
        wanted: &str,
    ) -> Vec<(u32, String, Vec<Value>)> {
        let mut seen = Vec::new();
        loop {
            let item = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for registry traffic")
                .expect("registry channel closed");
            let hit = item.1 == wanted;
            seen.push(item);
            if hit {
                return seen;
            }
        }
    }

    #[tokio::test]
    async fn cache_hit_answers_without_a_connection() {
        let client = RegistryClient::new();
        client
            .state
            .lock()
            .cache
            .insert("sb://rip4/route_add", vec!["stcp://127.0.0.1:7".into()]);

        let values = client.query("sb://rip4/route_add").await.unwrap();
        assert_eq!(values, vec!["stcp://127.0.0.1:7"]);
    }

    #[tokio::test]
    async fn operations_wait_for_a_connection() {
        let client = RegistryClient::new();
        client.register_target("rip4", "rip", false).unwrap();
        client
            .register_resolution("rip4", "sb://rip4/route_add", "stcp://127.0.0.1:7")
            .unwrap();
        assert!(!client.connected());
        assert_eq!(client.pending_operations(), 2);
    }

    #[test]
    fn restart_splices_done_before_todo_in_order() {
        let mut state = State {
            epoch: 0,
            messenger: None,
            in_flight: true,
            todo: VecDeque::from([Operation::EnableTarget {
                instance: "rip4".into(),
            }]),
            done: vec![
                Operation::RegisterTarget {
                    instance: "rip4".into(),
                    class: "rip".into(),
                    singleton: false,
                },
                Operation::AddResolution {
                    instance: "rip4".into(),
                    key: "sb://rip4/route_add".into(),
                    value: "stcp://127.0.0.1:7".into(),
                },
            ],
            cache: ResolvedCache::new(),
            instances: Vec::new(),
        };
        state.cache.insert("sb://x/y", vec!["v".into()]);

        prepare_for_restart(&mut state);

        let order: Vec<String> = state.todo.iter().map(|op| op.describe()).collect();
        assert_eq!(
            order,
            vec![
                "register_target(rip4)",
                "add_resolution(sb://rip4/route_add)",
                "enable_target(rip4)",
            ]
        );
        assert!(state.done.is_empty());
        assert!(!state.in_flight);
        assert!(state.cache.is_empty());
    }

    #[tokio::test]
    async fn registration_flow_and_ready_event() {
        struct Ready(Mutex<Vec<String>>);
        impl ClientObserver for Ready {
            fn ready(&self, instance: &str) {
                self.0.lock().push(instance.to_string());
            }
        }

        let (addr, mut seen) = fake_registry().await;
        let client = RegistryClient::new();
        let ready = Arc::new(Ready(Mutex::new(Vec::new())));
        assert!(client.attach_observer(ready.clone()));

        client.register_target("rip4", "rip", false).unwrap();
        client
            .register_resolution("rip4", "sb://rip4/route_add", "stcp://127.0.0.1:7")
            .unwrap();
        client.enable_target("rip4").unwrap();

        let _m = connect(&client, addr).await;

        let trace = drain_until(&mut seen, methods::SET_TARGET_ENABLED).await;
        let methods_seen: Vec<&str> = trace.iter().map(|(_, m, _)| m.as_str()).collect();
        assert_eq!(
            methods_seen,
            vec![
                methods::REGISTER_TARGET,
                methods::ADD_RESOLUTION,
                methods::SET_TARGET_ENABLED,
            ]
        );

        // ready fires once the enable acknowledgment lands.
        tokio::time::timeout(Duration::from_secs(5), async {
            while ready.0.lock().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("ready never fired");
        assert_eq!(ready.0.lock().clone(), vec!["rip4".to_string()]);
    }

    #[tokio::test]
    async fn replay_repeats_repeatables_in_order_but_not_one_offs() {
        let (addr, mut seen) = fake_registry().await;
        let client = RegistryClient::new();

        client.register_target("rip4", "rip", false).unwrap();
        client
            .register_resolution("rip4", "sb://rip4/route_add", "stcp://127.0.0.1:7")
            .unwrap();
        client.enable_target("rip4").unwrap();

        let m = connect(&client, addr).await;
        drain_until(&mut seen, methods::SET_TARGET_ENABLED).await;

        // A one-off resolve, answered by the fake registry.
        let values = client.query("sb://fea/ifmgr").await.unwrap();
        assert_eq!(values, vec!["stcp://127.0.0.1:9"]);
        drain_until(&mut seen, methods::RESOLVE).await;

        // Connection dies; cache must go with it.
        m.close();
        tokio::time::timeout(Duration::from_secs(5), async {
            while client.connected() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("client never noticed the close");

        // Reconnect: the repeatable trio replays, with the granted cookie.
        let _m2 = connect(&client, addr).await;
        let trace = drain_until(&mut seen, methods::SET_TARGET_ENABLED).await;
        let replayed: Vec<&str> = trace.iter().map(|(_, m, _)| m.as_str()).collect();
        assert_eq!(
            replayed,
            vec![
                methods::REGISTER_TARGET,
                methods::ADD_RESOLUTION,
                methods::SET_TARGET_ENABLED,
            ]
        );
        assert!(
            trace.iter().all(|(conn, _, _)| *conn == 1),
            "replay must happen on the new connection"
        );
        let register_args = &trace[0].2;
        assert_eq!(register_args[3], serde_json::json!("cookie-test"));

        // The resolve was one-off: not replayed, and its cache entry is gone.
        assert!(client.query_cache("sb://fea/ifmgr").is_none());
    }

    #[tokio::test]
    async fn disconnect_fails_pending_one_offs_but_keeps_repeatables() {
        let client = RegistryClient::new();
        client.register_target("rip4", "rip", false).unwrap();

        // Queue a resolve behind the registration with no connection.
        let query_client = client.clone();
        let query = tokio::spawn(async move { query_client.query("sb://fea/ifmgr").await });
        tokio::task::yield_now().await;
        assert_eq!(client.pending_operations(), 2);

        // Connect to a registry that immediately drops the connection.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                drop(stream);
            }
        });
        let _m = connect(&client, addr).await;

        // The in-flight registration fails with connection_lost, the queued
        // resolve is failed with no_registry, the registration survives.
        let fault = tokio::time::timeout(Duration::from_secs(5), query)
            .await
            .expect("query never completed")
            .unwrap()
            .unwrap_err();
        assert_eq!(fault.kind, FaultKind::NoRegistry);
        // The registration survives (moved to the replay set), the resolve
        // is gone for good.
        assert_eq!(client.pending_operations(), 0);
        assert_eq!(client.local_instances(), vec![("rip4".to_string(), "rip".to_string())]);
    }
}
