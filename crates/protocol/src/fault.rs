//! Fault taxonomy for failed calls.
//!
//! Faults are the application-visible failure channel: transport-fatal
//! conditions surface as `ConnectionLost`, a missed response window as
//! `Timeout`, and everything else is a typed condition resolved at the
//! component that raised it.

use serde::{Deserialize, Serialize};

/// What went wrong, coarsely.  Each variant maps 1:1 to a wire string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Malformed or missing call arguments.
    BadRequest,
    /// No handler registered for the requested method.
    NoSuchMethod,
    /// Operation referenced a target unknown to the Registry.
    NoSuchTarget,
    /// Instance name already registered under a different cookie.
    AlreadyRegistered,
    /// Singleton class already has a live instance under another name.
    ClassInstantiated,
    /// Resolve found no enabled values for the key.
    NotFound,
    /// The connection died before a reply arrived.
    ConnectionLost,
    /// No reply within the response window.
    Timeout,
    /// No Registry connection exists to carry the operation.
    NoRegistry,
    /// `Router::send` before `finalize()`.
    NotFinalized,
    /// Handler-side failure that fits no other kind.
    Internal,
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FaultKind::BadRequest => "bad_request",
            FaultKind::NoSuchMethod => "no_such_method",
            FaultKind::NoSuchTarget => "no_such_target",
            FaultKind::AlreadyRegistered => "already_registered",
            FaultKind::ClassInstantiated => "class_instantiated",
            FaultKind::NotFound => "not_found",
            FaultKind::ConnectionLost => "connection_lost",
            FaultKind::Timeout => "timeout",
            FaultKind::NoRegistry => "no_registry",
            FaultKind::NotFinalized => "not_finalized",
            FaultKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// A typed failure carried in a reply frame or synthesized locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
}

impl Fault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(FaultKind::BadRequest, message)
    }

    pub fn no_such_method(method: &str) -> Self {
        Self::new(FaultKind::NoSuchMethod, format!("unknown method: {method}"))
    }

    pub fn connection_lost(detail: impl Into<String>) -> Self {
        Self::new(FaultKind::ConnectionLost, detail)
    }

    pub fn timeout() -> Self {
        Self::new(FaultKind::Timeout, "no reply within response window")
    }

    /// Whether the owning connection must be torn down when this fault is
    /// raised.  Only transport loss qualifies; timeouts alone do not (a slow
    /// peer is not necessarily a dead peer).
    pub fn is_transport_fatal(&self) -> bool {
        self.kind == FaultKind::ConnectionLost
    }
}
