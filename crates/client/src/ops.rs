//! Queued client operations.
//!
//! Two families: **repeatable** operations (register target, add
//! resolution, enable, watches) survive into the done list and are replayed
//! after reconnection; **one-off** operations (resolve queries, calls
//! forwarded to the Registry) execute once and are discarded — a caller who
//! still wants the answer after a restart asks again.

use serde_json::{json, Value};
use tokio::sync::oneshot;

use sb_protocol::methods;
use sb_protocol::{CallResult, Fault};

/// Reply channel for a resolve query.
pub type ResolveReply = oneshot::Sender<Result<Vec<String>, Fault>>;

/// Reply channel for a forwarded registry call.
pub type ForwardReply = oneshot::Sender<CallResult>;

pub enum Operation {
    RegisterTarget {
        instance: String,
        class: String,
        singleton: bool,
    },
    AddResolution {
        instance: String,
        key: String,
        value: String,
    },
    EnableTarget {
        instance: String,
    },
    AddClassWatch {
        watcher: String,
        class: String,
    },
    AddInstanceWatch {
        watcher: String,
        instance: String,
    },
    Resolve {
        key: String,
        tx: Option<ResolveReply>,
    },
    Forward {
        method: String,
        args: Vec<Value>,
        tx: Option<ForwardReply>,
    },
}

impl Operation {
    /// Whether this operation is replayed after reconnection.
    pub fn is_repeatable(&self) -> bool {
        matches!(
            self,
            Operation::RegisterTarget { .. }
                | Operation::AddResolution { .. }
                | Operation::EnableTarget { .. }
                | Operation::AddClassWatch { .. }
                | Operation::AddInstanceWatch { .. }
        )
    }

    /// The wire request this operation sends.  `cookie_for` supplies the
    /// stored registration cookie per instance ("" before first ack), so a
    /// replayed registration presents the cookie it was originally granted.
    pub fn request<F>(&self, cookie_for: F) -> (String, Vec<Value>)
    where
        F: Fn(&str) -> String,
    {
        match self {
            Operation::RegisterTarget {
                instance,
                class,
                singleton,
            } => (
                methods::REGISTER_TARGET.to_string(),
                vec![
                    json!(instance),
                    json!(class),
                    json!(singleton),
                    json!(cookie_for(instance)),
                ],
            ),
            Operation::AddResolution {
                instance,
                key,
                value,
            } => (
                methods::ADD_RESOLUTION.to_string(),
                vec![json!(instance), json!(key), json!(value)],
            ),
            Operation::EnableTarget { instance } => (
                methods::SET_TARGET_ENABLED.to_string(),
                vec![json!(instance), json!(true)],
            ),
            Operation::AddClassWatch { watcher, class } => (
                methods::ADD_CLASS_WATCH.to_string(),
                vec![json!(watcher), json!(class)],
            ),
            Operation::AddInstanceWatch { watcher, instance } => (
                methods::ADD_INSTANCE_WATCH.to_string(),
                vec![json!(watcher), json!(instance)],
            ),
            Operation::Resolve { key, .. } => {
                (methods::RESOLVE.to_string(), vec![json!(key)])
            }
            Operation::Forward { method, args, .. } => (method.clone(), args.clone()),
        }
    }

    /// Short description for logs.
    pub fn describe(&self) -> String {
        match self {
            Operation::RegisterTarget { instance, .. } => format!("register_target({instance})"),
            Operation::AddResolution { key, .. } => format!("add_resolution({key})"),
            Operation::EnableTarget { instance } => format!("enable_target({instance})"),
            Operation::AddClassWatch { class, .. } => format!("add_class_watch({class})"),
            Operation::AddInstanceWatch { instance, .. } => {
                format!("add_instance_watch({instance})")
            }
            Operation::Resolve { key, .. } => format!("resolve({key})"),
            Operation::Forward { method, .. } => format!("forward({method})"),
        }
    }

    /// Fail a one-off's caller with `fault`.  No-op for repeatables.
    pub fn force_failure(&mut self, fault: &Fault) {
        match self {
            Operation::Resolve { tx, .. } => {
                if let Some(tx) = tx.take() {
                    let _ = tx.send(Err(fault.clone()));
                }
            }
            Operation::Forward { tx, .. } => {
                if let Some(tx) = tx.take() {
                    let _ = tx.send(Err(fault.clone()));
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeatable_classification() {
        let repeatables = [
            Operation::RegisterTarget {
                instance: "rip4".into(),
                class: "rip".into(),
                singleton: false,
            },
            Operation::AddResolution {
                instance: "rip4".into(),
                key: "sb://rip4/route_add".into(),
                value: "stcp://127.0.0.1:1".into(),
            },
            Operation::EnableTarget {
                instance: "rip4".into(),
            },
            Operation::AddClassWatch {
                watcher: "rip4".into(),
                class: "fea".into(),
            },
            Operation::AddInstanceWatch {
                watcher: "rip4".into(),
                instance: "fea1".into(),
            },
        ];
        for op in &repeatables {
            assert!(op.is_repeatable(), "{}", op.describe());
        }

        let (tx, _rx) = oneshot::channel();
        assert!(!Operation::Resolve {
            key: "k".into(),
            tx: Some(tx),
        }
        .is_repeatable());
        let (tx, _rx) = oneshot::channel();
        assert!(!Operation::Forward {
            method: methods::LIST_TARGETS.into(),
            args: vec![],
            tx: Some(tx),
        }
        .is_repeatable());
    }

    #[test]
    fn register_request_carries_stored_cookie() {
        let op = Operation::RegisterTarget {
            instance: "rip4".into(),
            class: "rip".into(),
            singleton: false,
        };
        let (method, args) = op.request(|_| "cookie-1".to_string());
        assert_eq!(method, methods::REGISTER_TARGET);
        assert_eq!(args[3], json!("cookie-1"));
    }

    #[tokio::test]
    async fn force_failure_reaches_one_off_caller() {
        let (tx, rx) = oneshot::channel();
        let mut op = Operation::Resolve {
            key: "sb://rip4/route_add".into(),
            tx: Some(tx),
        };
        op.force_failure(&Fault::new(sb_protocol::FaultKind::NoRegistry, "down"));
        let fault = rx.await.unwrap().unwrap_err();
        assert_eq!(fault.kind, sb_protocol::FaultKind::NoRegistry);
    }
}
