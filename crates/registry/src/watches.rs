//! Watch subscriptions and the arrival/departure event queue.

use std::collections::{BTreeSet, HashMap};

/// What happened to a watched target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Arrival,
    Departure,
}

impl WatchEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchEventKind::Arrival => sb_protocol::methods::EVENT_ARRIVAL,
            WatchEventKind::Departure => sb_protocol::methods::EVENT_DEPARTURE,
        }
    }
}

/// One queued notification, addressed to a watcher instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub watcher: String,
    pub kind: WatchEventKind,
    pub class: String,
    pub instance: String,
}

/// Subscriptions keyed by watched class and watched instance.
///
/// Watchers are instance names; the table says nothing about how to reach
/// them — delivery resolves the watcher's connection at flush time, so a
/// watcher that reconnected between enqueue and flush still gets its event.
#[derive(Default)]
pub struct WatchTable {
    by_class: HashMap<String, BTreeSet<String>>,
    by_instance: HashMap<String, BTreeSet<String>>,
}

impl WatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_class_watch(&mut self, watcher: &str, class: &str) {
        self.by_class
            .entry(class.to_string())
            .or_default()
            .insert(watcher.to_string());
    }

    pub fn remove_class_watch(&mut self, watcher: &str, class: &str) {
        if let Some(watchers) = self.by_class.get_mut(class) {
            watchers.remove(watcher);
            if watchers.is_empty() {
                self.by_class.remove(class);
            }
        }
    }

    pub fn add_instance_watch(&mut self, watcher: &str, instance: &str) {
        self.by_instance
            .entry(instance.to_string())
            .or_default()
            .insert(watcher.to_string());
    }

    pub fn remove_instance_watch(&mut self, watcher: &str, instance: &str) {
        if let Some(watchers) = self.by_instance.get_mut(instance) {
            watchers.remove(watcher);
            if watchers.is_empty() {
                self.by_instance.remove(instance);
            }
        }
    }

    /// Drop every subscription held by `watcher` (it died).
    pub fn remove_watcher(&mut self, watcher: &str) {
        self.by_class.retain(|_, watchers| {
            watchers.remove(watcher);
            !watchers.is_empty()
        });
        self.by_instance.retain(|_, watchers| {
            watchers.remove(watcher);
            !watchers.is_empty()
        });
    }

    /// Events for a target transition, one per interested watcher.  The
    /// target itself never observes its own birth or death.
    pub fn events_for(
        &self,
        kind: WatchEventKind,
        class: &str,
        instance: &str,
    ) -> Vec<WatchEvent> {
        let mut watchers = BTreeSet::new();
        if let Some(ws) = self.by_class.get(class) {
            watchers.extend(ws.iter().cloned());
        }
        if let Some(ws) = self.by_instance.get(instance) {
            watchers.extend(ws.iter().cloned());
        }
        watchers.remove(instance);
        watchers
            .into_iter()
            .map(|watcher| WatchEvent {
                watcher,
                kind,
                class: class.to_string(),
                instance: instance.to_string(),
            })
            .collect()
    }
}
