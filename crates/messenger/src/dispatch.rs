//! Inbound call dispatch — maps method names to handlers.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use sb_protocol::{CallResult, Fault};

use crate::manager::MessengerId;
use crate::messenger::Messenger;

/// Where a call came from.
#[derive(Clone)]
pub enum CallSource {
    /// Arrived over a connection.
    Messenger(Messenger),
    /// Dispatched in-process, bypassing the network (same-daemon fast path).
    Local,
}

/// Context provided to every handler invocation.
#[derive(Clone)]
pub struct CallContext {
    pub source: CallSource,
    /// Sequence number of the request, for log correlation (0 for local
    /// dispatch, which has no wire frame).
    pub seqno: u64,
    /// Method name as received.
    pub method: String,
}

impl CallContext {
    /// Context for an in-process dispatch.
    pub fn local(method: impl Into<String>) -> Self {
        Self {
            source: CallSource::Local,
            seqno: 0,
            method: method.into(),
        }
    }

    pub fn messenger(&self) -> Option<&Messenger> {
        match &self.source {
            CallSource::Messenger(m) => Some(m),
            CallSource::Local => None,
        }
    }

    pub fn messenger_id(&self) -> Option<MessengerId> {
        self.messenger().map(|m| m.id())
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.messenger().map(|m| m.peer())
    }
}

/// Implement this to serve a method.
///
/// Handlers run inline on the owning messenger's reader loop, so requests on
/// one connection dispatch strictly in arrival order.
#[async_trait::async_trait]
pub trait CallHandler: Send + Sync + 'static {
    async fn call(&self, ctx: CallContext, args: Vec<Value>) -> CallResult;
}

/// Registry of method handlers.
///
/// Lookup is exact on the lowercase dotted method name.  Registration after
/// construction is allowed (a Router learns its call set as the embedding
/// daemon registers calls), hence the interior lock.
#[derive(Default)]
pub struct CallDispatcher {
    handlers: RwLock<HashMap<String, Arc<dyn CallHandler>>>,
}

impl CallDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an exact method name.  Replaces any previous
    /// handler under the same name.
    pub fn register<H: CallHandler>(&self, method: impl Into<String>, handler: H) {
        self.register_arc(method, Arc::new(handler));
    }

    /// Register a pre-wrapped handler.
    pub fn register_arc(&self, method: impl Into<String>, handler: Arc<dyn CallHandler>) {
        self.handlers.write().insert(method.into(), handler);
    }

    /// Remove a handler.  Returns whether one was present.
    pub fn unregister(&self, method: &str) -> bool {
        self.handlers.write().remove(method).is_some()
    }

    pub fn get(&self, method: &str) -> Option<Arc<dyn CallHandler>> {
        self.handlers.read().get(method).cloned()
    }

    /// All registered method names (sorted).
    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Dispatch one inbound request: look up the handler and run it, or
    /// synthesize the `no_such_method` fault.
    pub async fn dispatch(&self, ctx: CallContext, args: Vec<Value>) -> CallResult {
        let Some(handler) = self.get(&ctx.method) else {
            tracing::warn!(method = %ctx.method, "no handler registered for method");
            return Err(Fault::no_such_method(&ctx.method));
        };
        handler.call(ctx, args).await
    }
}
