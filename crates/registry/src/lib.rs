//! `sb-registry` — the central name-and-capability server.
//!
//! Every daemon registers its target identity and the calls it serves here;
//! other daemons resolve symbolic call names to live endpoints and then talk
//! to each other directly.  The Registry owns the Target, Resolution, and
//! Watch tables, one messenger per connected daemon, a keepalive probe per
//! connection, and the notification queue that pushes watch events and cache
//! invalidations back out.

pub mod acl;
pub mod api;
pub mod config;
pub mod core;
pub mod error;
pub mod resolutions;
pub mod server;
pub mod targets;
pub mod watches;

pub use config::RegistryConfig;
pub use core::RegistryCore;
pub use error::RegistryError;
pub use server::RegistryServer;
