//! `sb-protocol` — wire message types, call names, and the fault taxonomy
//! shared by the Registry and every daemon that embeds a Router.
//!
//! A connection carries a stream of length-prefixed JSON frames.  Each frame
//! is either a `request` (sequence number + method + opaque argument list) or
//! a `reply` (the sequence number it answers + values or a fault).  Argument
//! marshalling is deliberately opaque: arguments travel as an ordered list of
//! JSON values and only the handlers at either end interpret them.
//!
//! # Naming conventions
//!
//! - Methods are **lowercase dotted namespaces**: `registry.resolve`,
//!   `client.uncache_target`
//! - Call names are URIs: `sb://<target>/<method>` where `<target>` names a
//!   registered instance or class
//! - Endpoint descriptors are `stcp://<host>:<port>`

pub mod args;
pub mod call;
pub mod codec;
pub mod endpoint;
pub mod fault;
pub mod message;
pub mod methods;

pub use call::CallName;
pub use codec::FrameCodec;
pub use endpoint::Endpoint;
pub use fault::{Fault, FaultKind};
pub use message::{CallResult, Frame};

/// Bumped on incompatible frame layout changes.
pub const PROTOCOL_VERSION: u32 = 1;

/// Default Registry TCP port.
pub const DEFAULT_REGISTRY_PORT: u16 = 19999;

/// Default Registry host.
pub const DEFAULT_REGISTRY_HOST: &str = "127.0.0.1";
