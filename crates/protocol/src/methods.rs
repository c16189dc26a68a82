//! Method names served by the Registry and by every daemon's client side.
//!
//! Kept in one place so the Registry's dispatcher and the client's operation
//! queue can never drift apart on spelling.

// ── Registry surface (daemon → Registry) ────────────────────────────

pub const REGISTER_TARGET: &str = "registry.register_target";
pub const UNREGISTER_TARGET: &str = "registry.unregister_target";
pub const SET_TARGET_ENABLED: &str = "registry.set_target_enabled";
pub const TARGET_ENABLED: &str = "registry.target_enabled";
pub const ADD_RESOLUTION: &str = "registry.add_resolution";
pub const REMOVE_RESOLUTIONS: &str = "registry.remove_resolutions";
pub const RESOLVE: &str = "registry.resolve";
pub const LIST_TARGETS: &str = "registry.list_targets";
pub const LIST_RESOLUTIONS: &str = "registry.list_resolutions";
pub const ADD_CLASS_WATCH: &str = "registry.add_class_watch";
pub const REMOVE_CLASS_WATCH: &str = "registry.remove_class_watch";
pub const ADD_INSTANCE_WATCH: &str = "registry.add_instance_watch";
pub const REMOVE_INSTANCE_WATCH: &str = "registry.remove_instance_watch";
pub const PERMITTED_HOSTS: &str = "registry.permitted_hosts";
pub const PERMITTED_NETS: &str = "registry.permitted_nets";
pub const REGISTRY_HELLO: &str = "registry.hello";

// ── Client surface (Registry → daemon) ──────────────────────────────

pub const UNCACHE_CALL: &str = "client.uncache_call";
pub const UNCACHE_TARGET: &str = "client.uncache_target";
pub const CLIENT_EVENT: &str = "client.event";
pub const CLIENT_HELLO: &str = "client.hello";

// ── Watch event kinds carried by `client.event` ─────────────────────

pub const EVENT_ARRIVAL: &str = "arrival";
pub const EVENT_DEPARTURE: &str = "departure";
