//! The Resolution table: call-name keys mapped to serving endpoints.

use std::collections::HashMap;

/// One registered value under a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionValue {
    /// Endpoint descriptor, opaque to the Registry.
    pub value: String,
    /// Target that registered it.
    pub instance: String,
}

/// Key → ordered value list.  Values keep registration order, which is the
/// order `resolve` hands them out in (load-sharing callers take the list
/// as-is).
#[derive(Default)]
pub struct ResolutionTable {
    entries: HashMap<String, Vec<ResolutionValue>>,
}

impl ResolutionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `value` under `key` on behalf of `instance`.  Re-registering
    /// an identical (instance, value) pair is idempotent — reconnection
    /// replay sends every resolution again.
    pub fn add(&mut self, instance: &str, key: &str, value: &str) {
        let values = self.entries.entry(key.to_string()).or_default();
        if values
            .iter()
            .any(|v| v.instance == instance && v.value == value)
        {
            return;
        }
        values.push(ResolutionValue {
            value: value.to_string(),
            instance: instance.to_string(),
        });
    }

    /// Remove every value `instance` registered under `key`.  Returns
    /// whether the entry vanished entirely.
    pub fn remove(&mut self, instance: &str, key: &str) -> bool {
        let Some(values) = self.entries.get_mut(key) else {
            return false;
        };
        values.retain(|v| v.instance != instance);
        if values.is_empty() {
            self.entries.remove(key);
            return true;
        }
        false
    }

    /// Remove every value registered by `instance` across all keys (the
    /// target died).  Returns the affected keys.
    pub fn purge_instance(&mut self, instance: &str) -> Vec<String> {
        let mut affected = Vec::new();
        self.entries.retain(|key, values| {
            let before = values.len();
            values.retain(|v| v.instance != instance);
            if values.len() != before {
                affected.push(key.clone());
            }
            !values.is_empty()
        });
        affected.sort();
        affected
    }

    /// Values under `key` whose registering target passes `visible`, in
    /// registration order.
    pub fn resolve<F>(&self, key: &str, visible: F) -> Vec<String>
    where
        F: Fn(&str) -> bool,
    {
        self.entries
            .get(key)
            .map(|values| {
                values
                    .iter()
                    .filter(|v| visible(&v.instance))
                    .map(|v| v.value.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Keys holding at least one value from `instance`, sorted.
    pub fn keys_for_instance(&self, instance: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, values)| values.iter().any(|v| v.instance == instance))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_keep_registration_order() {
        let mut r = ResolutionTable::new();
        r.add("rip4", "sb://rip/route_add", "stcp://127.0.0.1:4001");
        r.add("rip6", "sb://rip/route_add", "stcp://127.0.0.1:4002");

        let values = r.resolve("sb://rip/route_add", |_| true);
        assert_eq!(values, vec!["stcp://127.0.0.1:4001", "stcp://127.0.0.1:4002"]);
    }

    #[test]
    fn re_adding_same_pair_is_idempotent() {
        let mut r = ResolutionTable::new();
        r.add("rip4", "sb://rip4/route_add", "stcp://127.0.0.1:4001");
        r.add("rip4", "sb://rip4/route_add", "stcp://127.0.0.1:4001");
        assert_eq!(r.resolve("sb://rip4/route_add", |_| true).len(), 1);
    }

    #[test]
    fn resolve_filters_by_visibility() {
        let mut r = ResolutionTable::new();
        r.add("rip4", "sb://rip/route_add", "stcp://127.0.0.1:4001");
        r.add("rip6", "sb://rip/route_add", "stcp://127.0.0.1:4002");

        let values = r.resolve("sb://rip/route_add", |i| i == "rip6");
        assert_eq!(values, vec!["stcp://127.0.0.1:4002"]);
    }

    #[test]
    fn unknown_key_resolves_empty() {
        let r = ResolutionTable::new();
        assert!(r.resolve("sb://ghost/x", |_| true).is_empty());
    }

    #[test]
    fn remove_drops_only_that_instances_values() {
        let mut r = ResolutionTable::new();
        r.add("rip4", "sb://rip/route_add", "stcp://127.0.0.1:4001");
        r.add("rip6", "sb://rip/route_add", "stcp://127.0.0.1:4002");

        assert!(!r.remove("rip4", "sb://rip/route_add"));
        assert_eq!(
            r.resolve("sb://rip/route_add", |_| true),
            vec!["stcp://127.0.0.1:4002"]
        );
        assert!(r.remove("rip6", "sb://rip/route_add"));
        assert!(r.is_empty());
    }

    #[test]
    fn purge_instance_reports_affected_keys() {
        let mut r = ResolutionTable::new();
        r.add("rip4", "sb://rip4/route_add", "stcp://127.0.0.1:4001");
        r.add("rip4", "sb://rip4/route_del", "stcp://127.0.0.1:4001");
        r.add("bgp1", "sb://bgp1/peer_up", "stcp://127.0.0.1:4003");

        let affected = r.purge_instance("rip4");
        assert_eq!(affected, vec!["sb://rip4/route_add", "sb://rip4/route_del"]);
        assert_eq!(r.len(), 1);
        assert_eq!(r.keys_for_instance("bgp1"), vec!["sb://bgp1/peer_up"]);
    }
}
