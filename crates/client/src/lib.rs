//! `sb-client` — the client side every daemon embeds.
//!
//! A daemon builds a [`Router`], registers the calls it serves, and calls
//! [`Router::finalize`] to start advertising them.  Everything else is
//! automatic: the auto-reconnector keeps the Registry connection alive, the
//! registration state machine replays registrations after a reconnect, and
//! resolutions are cached locally and invalidated by Registry pushes.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  Your daemon (routing protocol, FEA, policy engine, …)   │
//! │                                                          │
//! │   let router = RouterBuilder::new("rip")                 │
//! │       .instance("rip4")                                  │
//! │       .build()                                           │
//! │       .await?;                                           │
//! │   router.register_call("route_add", RouteAdd)?;          │
//! │   router.finalize()?;                                    │
//! │                                                          │
//! │   let call = CallName::parse("sb://fea/ifmgr/set_mtu")?; │
//! │   let reply = router.send(&call, args).await?;           │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Connection flow
//!
//! 1. The reconnector dials the Registry (fixed-pause retries, quiet
//!    logging after repeated failures)
//! 2. On messenger birth the operation queue replays every completed
//!    repeatable operation in original order, then drains new work
//! 3. Registration → resolutions → enable; `ready` fires when the enable
//!    acknowledgment lands
//! 4. On disconnect the daemon keeps serving from its cache; pending
//!    resolves fail, queued registrations wait for the next connection

pub mod builder;
pub mod cache;
pub mod client;
pub mod error;
pub mod observer;
pub mod ops;
pub mod reconnect;
pub mod router;

pub use builder::RouterBuilder;
pub use client::RegistryClient;
pub use error::ClientError;
pub use observer::{ClientObserver, EventKind, TargetEvent};
pub use reconnect::{ConnState, Reconnector, RetryPolicy};
pub use router::Router;

// Re-export the pieces daemons need without importing the lower crates.
pub use sb_messenger::{CallContext, CallHandler};
pub use sb_protocol::{CallName, CallResult, Endpoint, Fault, FaultKind};
