//! The Target table: registered daemon identities.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use sb_messenger::MessengerId;
use sb_protocol::{Fault, FaultKind};

/// A registered target.
#[derive(Debug, Clone)]
pub struct Target {
    pub instance: String,
    pub class: String,
    pub singleton: bool,
    pub cookie: String,
    pub enabled: bool,
    /// Connection that owns this target; the target dies with it.
    pub owner: MessengerId,
    pub registered_at: DateTime<Utc>,
}

/// Instance-name keyed table.  Instance names are globally unique at any
/// instant; a registration that would violate that fails instead.
#[derive(Default)]
pub struct TargetTable {
    targets: HashMap<String, Target>,
}

impl TargetTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `instance`, or re-register it during reconnection replay.
    ///
    /// - unknown instance: a new cookie is minted and returned
    /// - known instance presenting the same cookie: idempotent success; the
    ///   owning connection is re-pointed at `owner` (this is the reconnect
    ///   path) and the existing cookie is returned
    /// - known instance with a different cookie: `already_registered`, the
    ///   existing registration is left untouched
    /// - singleton conflict on the class: `class_instantiated`
    pub fn add(
        &mut self,
        instance: &str,
        class: &str,
        singleton: bool,
        cookie: &str,
        owner: MessengerId,
    ) -> Result<String, Fault> {
        if instance.is_empty() || class.is_empty() {
            return Err(Fault::bad_request("instance and class must be non-empty"));
        }

        if let Some(existing) = self.targets.get_mut(instance) {
            if existing.class != class {
                return Err(Fault::new(
                    FaultKind::AlreadyRegistered,
                    format!(
                        "instance {instance} already registered with class {}",
                        existing.class
                    ),
                ));
            }
            if !cookie.is_empty() && existing.cookie == cookie {
                existing.owner = owner;
                return Ok(existing.cookie.clone());
            }
            return Err(Fault::new(
                FaultKind::AlreadyRegistered,
                format!("instance {instance} already registered with a different cookie"),
            ));
        }

        // A singleton claim in either direction blocks a second instance of
        // the class.
        if let Some(other) = self
            .targets
            .values()
            .find(|t| t.class == class && (singleton || t.singleton))
        {
            return Err(Fault::new(
                FaultKind::ClassInstantiated,
                format!(
                    "class {class} already instantiated by {} and is singleton",
                    other.instance
                ),
            ));
        }

        let minted = uuid::Uuid::new_v4().to_string();
        self.targets.insert(
            instance.to_string(),
            Target {
                instance: instance.to_string(),
                class: class.to_string(),
                singleton,
                cookie: minted.clone(),
                enabled: false,
                owner,
                registered_at: Utc::now(),
            },
        );
        Ok(minted)
    }

    pub fn get(&self, instance: &str) -> Option<&Target> {
        self.targets.get(instance)
    }

    /// Remove by instance name.
    pub fn remove(&mut self, instance: &str) -> Option<Target> {
        self.targets.remove(instance)
    }

    /// Remove whichever target holds `cookie`.
    pub fn remove_by_cookie(&mut self, cookie: &str) -> Option<Target> {
        let instance = self
            .targets
            .values()
            .find(|t| t.cookie == cookie)
            .map(|t| t.instance.clone())?;
        self.targets.remove(&instance)
    }

    /// Remove every target owned by `owner` (its connection died).
    pub fn remove_by_owner(&mut self, owner: MessengerId) -> Vec<Target> {
        let doomed: Vec<String> = self
            .targets
            .values()
            .filter(|t| t.owner == owner)
            .map(|t| t.instance.clone())
            .collect();
        doomed
            .into_iter()
            .filter_map(|i| self.targets.remove(&i))
            .collect()
    }

    /// Flip visibility.  Returns the previous state, or `no_such_target`.
    pub fn set_enabled(&mut self, instance: &str, en: bool) -> Result<bool, Fault> {
        let t = self
            .targets
            .get_mut(instance)
            .ok_or_else(|| no_such_target(instance))?;
        let was = t.enabled;
        t.enabled = en;
        Ok(was)
    }

    pub fn enabled(&self, instance: &str) -> Result<bool, Fault> {
        self.targets
            .get(instance)
            .map(|t| t.enabled)
            .ok_or_else(|| no_such_target(instance))
    }

    /// All instance names, sorted.
    pub fn instance_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.targets.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

fn no_such_target(instance: &str) -> Fault {
    Fault::new(FaultKind::NoSuchTarget, format!("unknown target: {instance}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_mints_cookie_and_starts_disabled() {
        let mut t = TargetTable::new();
        let cookie = t.add("rip4", "rip", false, "", MessengerId::next()).unwrap();
        assert!(!cookie.is_empty());
        assert!(!t.get("rip4").unwrap().enabled);
    }

    #[test]
    fn same_cookie_is_idempotent_and_rebinds_owner() {
        let (old, new) = (MessengerId::next(), MessengerId::next());
        let mut t = TargetTable::new();
        let cookie = t.add("rip4", "rip", false, "", old).unwrap();
        let again = t.add("rip4", "rip", false, &cookie, new).unwrap();
        assert_eq!(cookie, again);
        assert_eq!(t.get("rip4").unwrap().owner, new);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn different_cookie_is_rejected_and_existing_kept() {
        let (old, new) = (MessengerId::next(), MessengerId::next());
        let mut t = TargetTable::new();
        let cookie = t.add("rip4", "rip", false, "", old).unwrap();
        let fault = t.add("rip4", "rip", false, "imposter", new).unwrap_err();
        assert_eq!(fault.kind, FaultKind::AlreadyRegistered);
        assert_eq!(t.get("rip4").unwrap().cookie, cookie);
        assert_eq!(t.get("rip4").unwrap().owner, old);
    }

    #[test]
    fn empty_names_rejected() {
        let mut t = TargetTable::new();
        assert!(t.add("", "rip", false, "", MessengerId::next()).is_err());
        assert!(t.add("rip4", "", false, "", MessengerId::next()).is_err());
    }

    #[test]
    fn singleton_class_blocks_second_instance() {
        let mut t = TargetTable::new();
        t.add("fea", "fea", true, "", MessengerId::next()).unwrap();
        let fault = t
            .add("fea2", "fea", false, "", MessengerId::next())
            .unwrap_err();
        assert_eq!(fault.kind, FaultKind::ClassInstantiated);

        // And the other way round: claiming singleton on a taken class.
        t.add("rip4", "rip", false, "", MessengerId::next()).unwrap();
        let fault = t
            .add("rip6", "rip", true, "", MessengerId::next())
            .unwrap_err();
        assert_eq!(fault.kind, FaultKind::ClassInstantiated);
    }

    #[test]
    fn non_singleton_class_allows_many() {
        let mut t = TargetTable::new();
        t.add("bgp1", "bgp", false, "", MessengerId::next()).unwrap();
        t.add("bgp2", "bgp", false, "", MessengerId::next()).unwrap();
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn remove_by_cookie_finds_holder() {
        let mut t = TargetTable::new();
        let cookie = t.add("rip4", "rip", false, "", MessengerId::next()).unwrap();
        assert!(t.remove_by_cookie("nope").is_none());
        let removed = t.remove_by_cookie(&cookie).unwrap();
        assert_eq!(removed.instance, "rip4");
        assert!(t.is_empty());
    }

    #[test]
    fn remove_by_owner_takes_only_its_targets() {
        let (mine, other) = (MessengerId::next(), MessengerId::next());
        let mut t = TargetTable::new();
        t.add("rip4", "rip", false, "", mine).unwrap();
        t.add("bgp1", "bgp", false, "", mine).unwrap();
        t.add("ospf1", "ospf", false, "", other).unwrap();

        let removed = t.remove_by_owner(mine);
        assert_eq!(removed.len(), 2);
        assert_eq!(t.instance_names(), vec!["ospf1"]);
    }

    #[test]
    fn enable_roundtrip() {
        let mut t = TargetTable::new();
        t.add("rip4", "rip", false, "", MessengerId::next()).unwrap();
        assert!(!t.enabled("rip4").unwrap());
        assert!(!t.set_enabled("rip4", true).unwrap());
        assert!(t.enabled("rip4").unwrap());
        assert!(t.enabled("ghost").is_err());
    }
}
