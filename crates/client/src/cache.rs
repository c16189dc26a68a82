//! Local resolution cache.
//!
//! Hits answer without touching the Registry; entries are invalidated by
//! Registry pushes (`client.uncache_call`, `client.uncache_target`) so a
//! stale resolution is never handed to a caller, and the whole cache is
//! dropped on reconnection since the new Registry may know nothing of the
//! old one's state.

use std::collections::HashMap;

use sb_protocol::CallName;

#[derive(Default)]
pub struct ResolvedCache {
    entries: HashMap<String, Vec<String>>,
}

impl ResolvedCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Vec<String>> {
        self.entries.get(key)
    }

    /// Store a resolution.  A re-query that raced another overwrites with
    /// the newer answer.
    pub fn insert(&mut self, key: &str, values: Vec<String>) {
        self.entries.insert(key.to_string(), values);
    }

    /// Remove exactly one entry.  Returns whether it existed.
    pub fn uncache_call(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Remove every entry whose key's target part names `target`.  Returns
    /// how many were dropped.
    pub fn uncache_target(&mut self, target: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| {
            CallName::parse(key)
                .map(|c| c.target() != target)
                .unwrap_or(true)
        });
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
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
    fn insert_and_get() {
        let mut c = ResolvedCache::new();
        assert!(c.get("sb://rip4/route_add").is_none());
        c.insert("sb://rip4/route_add", vec!["stcp://127.0.0.1:4001".into()]);
        assert_eq!(
            c.get("sb://rip4/route_add").unwrap(),
            &vec!["stcp://127.0.0.1:4001".to_string()]
        );
    }

    #[test]
    fn uncache_call_removes_exactly_one() {
        let mut c = ResolvedCache::new();
        c.insert("sb://rip4/route_add", vec!["a".into()]);
        c.insert("sb://rip4/route_del", vec!["a".into()]);
        assert!(c.uncache_call("sb://rip4/route_add"));
        assert!(!c.uncache_call("sb://rip4/route_add"));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn uncache_target_removes_all_of_target_and_nothing_else() {
        let mut c = ResolvedCache::new();
        c.insert("sb://rip4/route_add", vec!["a".into()]);
        c.insert("sb://rip4/route_del", vec!["a".into()]);
        c.insert("sb://bgp1/peer_up", vec!["b".into()]);

        assert_eq!(c.uncache_target("rip4"), 2);
        assert!(c.get("sb://rip4/route_add").is_none());
        assert!(c.get("sb://rip4/route_del").is_none());
        assert!(c.get("sb://bgp1/peer_up").is_some());
    }

    #[test]
    fn unparseable_keys_survive_target_uncache() {
        let mut c = ResolvedCache::new();
        c.insert("weird-key", vec!["a".into()]);
        assert_eq!(c.uncache_target("weird-key"), 0);
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn clear_empties() {
        let mut c = ResolvedCache::new();
        c.insert("sb://rip4/route_add", vec!["a".into()]);
        c.clear();
        assert!(c.is_empty());
    }
}
