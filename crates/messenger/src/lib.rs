//! `sb-messenger` — ownership of one transport connection.
//!
//! A [`Messenger`] owns exactly one TCP connection: its outbound send queue
//! (with high/low watermark backpressure), the request/reply correlation
//! state, and inbound call dispatch.  Lifecycle is reported to a
//! [`MessengerManager`] — the Registry manages many messengers, a daemon's
//! client side manages one.
//!
//! # Connection flow
//!
//! 1. Owner accepts/dials a TCP stream and calls [`Messenger::spawn`]
//! 2. `birth` is delivered to the manager
//! 3. Reader loop: decode a frame, dispatch requests through the
//!    [`CallDispatcher`] (`active`/`idle` around each dispatch), correlate
//!    replies by sequence number
//! 4. Writer task: drain the send queue; a queue at the high-water mark
//!    suspends reading until it drains to the low-water mark
//! 5. On transport error or [`Messenger::close`]: every pending response
//!    fails with `connection_lost`, then `stopped` and `death` are delivered

pub mod dispatch;
pub mod manager;
pub mod messenger;
pub mod queue;
pub mod tracker;

pub use dispatch::{CallContext, CallDispatcher, CallHandler, CallSource};
pub use manager::{MessengerId, MessengerManager};
pub use messenger::{Messenger, MessengerConfig};
pub use queue::{QueueStats, SendQueue};
pub use tracker::{PendingReply, ResponseTracker};
