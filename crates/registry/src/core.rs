//! The authoritative Target/Resolution/Watch database and connection manager.
//!
//! Every mutation happens inside a registry call handler or a messenger
//! lifecycle callback; notifications (watch events, cache invalidation
//! pushes) are queued here and flushed by the server's notifier task so no
//! registry call ever blocks on a remote peer.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use sb_messenger::{Messenger, MessengerId, MessengerManager};
use sb_protocol::methods;
use sb_protocol::{Fault, FaultKind};

use crate::acl::HostAcl;
use crate::config::RegistryConfig;
use crate::resolutions::ResolutionTable;
use crate::targets::{Target, TargetTable};
use crate::watches::{WatchEvent, WatchEventKind, WatchTable};

/// Work queued for the notifier task.
#[derive(Debug)]
pub enum Notification {
    /// Deliver a watch event to its watcher.
    Watch(WatchEvent),
    /// Tell every daemon (except the originator) that `key` left the catalog.
    UncacheCall {
        key: String,
        except: Option<MessengerId>,
    },
    /// Tell every daemon (except the originator) that all of `target`'s
    /// calls left the catalog.
    UncacheTarget {
        target: String,
        except: Option<MessengerId>,
    },
}

struct Tables {
    targets: TargetTable,
    resolutions: ResolutionTable,
    watches: WatchTable,
}

struct Connection {
    messenger: Messenger,
    connected_at: DateTime<Utc>,
    /// Requests currently being dispatched on this connection; maintained by
    /// the `active`/`idle` lifecycle events, so load is tracked without
    /// polling.
    dispatching: u32,
}

/// Summary of one connection, for logs and diagnostics.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: MessengerId,
    pub peer: std::net::SocketAddr,
    pub connected_at: DateTime<Utc>,
    pub dispatching: u32,
}

pub struct RegistryCore {
    // Lock order: `tables` before `conns`, never the reverse.
    tables: Mutex<Tables>,
    conns: Mutex<HashMap<MessengerId, Connection>>,
    notify_tx: mpsc::UnboundedSender<Notification>,
    acl: HostAcl,
    config: RegistryConfig,
}

impl RegistryCore {
    /// Build the core plus the receiving end of its notification queue.
    pub fn new(
        config: RegistryConfig,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<Notification>), crate::error::RegistryError>
    {
        let acl = HostAcl::new(&config.permitted_hosts, &config.permitted_nets)?;
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let core = Arc::new(Self {
            tables: Mutex::new(Tables {
                targets: TargetTable::new(),
                resolutions: ResolutionTable::new(),
                watches: WatchTable::new(),
            }),
            conns: Mutex::new(HashMap::new()),
            notify_tx,
            acl,
            config,
        });
        Ok((core, notify_rx))
    }

    pub fn acl(&self) -> &HostAcl {
        &self.acl
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    // ── Target operations ────────────────────────────────────────────

    pub fn register_target(
        &self,
        caller: MessengerId,
        instance: &str,
        class: &str,
        singleton: bool,
        cookie: &str,
    ) -> Result<String, Fault> {
        let cookie = {
            let mut tables = self.tables.lock();
            tables.targets.add(instance, class, singleton, cookie, caller)?
        };
        tracing::info!(instance, class, singleton, caller = %caller, "target registered");
        Ok(cookie)
    }

    pub fn unregister_target(&self, caller: MessengerId, instance: &str) -> Result<(), Fault> {
        let mut tables = self.tables.lock();
        self.check_owner(&tables, caller, instance)?;
        let target = tables
            .targets
            .remove(instance)
            .ok_or_else(|| unknown_target(instance))?;
        self.drop_target_state(&mut tables, &target, Some(caller));
        tracing::info!(instance, "target unregistered");
        Ok(())
    }

    /// Administrative removal by cookie, bypassing the owner check.
    pub fn remove_target_with_cookie(&self, cookie: &str) -> Result<(), Fault> {
        let mut tables = self.tables.lock();
        let target = tables
            .targets
            .remove_by_cookie(cookie)
            .ok_or_else(|| Fault::new(FaultKind::NoSuchTarget, "no target holds that cookie"))?;
        self.drop_target_state(&mut tables, &target, None);
        tracing::info!(instance = %target.instance, "target removed by cookie");
        Ok(())
    }

    pub fn set_target_enabled(
        &self,
        caller: MessengerId,
        instance: &str,
        en: bool,
    ) -> Result<(), Fault> {
        let mut tables = self.tables.lock();
        self.check_owner(&tables, caller, instance)?;
        let was = tables.targets.set_enabled(instance, en)?;
        if was != en {
            let class = tables
                .targets
                .get(instance)
                .map(|t| t.class.clone())
                .unwrap_or_default();
            let kind = if en {
                WatchEventKind::Arrival
            } else {
                WatchEventKind::Departure
            };
            self.enqueue_visibility_events(&tables, kind, &class, instance);
            tracing::info!(instance, enabled = en, "target visibility changed");
        }
        Ok(())
    }

    pub fn target_enabled(&self, instance: &str) -> Result<bool, Fault> {
        self.tables.lock().targets.enabled(instance)
    }

    pub fn list_targets(&self) -> Vec<String> {
        self.tables.lock().targets.instance_names()
    }

    // ── Resolution operations ────────────────────────────────────────

    pub fn add_resolution(
        &self,
        caller: MessengerId,
        instance: &str,
        key: &str,
        value: &str,
    ) -> Result<(), Fault> {
        if key.is_empty() || value.is_empty() {
            return Err(Fault::bad_request("key and value must be non-empty"));
        }
        let mut tables = self.tables.lock();
        self.check_owner(&tables, caller, instance)?;
        tables.resolutions.add(instance, key, value);
        tracing::debug!(instance, key, "resolution added");
        Ok(())
    }

    pub fn remove_resolutions(
        &self,
        caller: MessengerId,
        instance: &str,
        key: &str,
    ) -> Result<(), Fault> {
        let mut tables = self.tables.lock();
        self.check_owner(&tables, caller, instance)?;
        tables.resolutions.remove(instance, key);
        self.notify(Notification::UncacheCall {
            key: key.to_string(),
            except: Some(caller),
        });
        tracing::debug!(instance, key, "resolutions removed");
        Ok(())
    }

    pub fn resolve(&self, key: &str) -> Result<Vec<String>, Fault> {
        let tables = self.tables.lock();
        let values = tables
            .resolutions
            .resolve(key, |instance| {
                tables.targets.get(instance).map(|t| t.enabled).unwrap_or(false)
            });
        if values.is_empty() {
            return Err(Fault::new(FaultKind::NotFound, format!("no resolution for {key}")));
        }
        Ok(values)
    }

    pub fn list_resolutions(&self, instance: &str) -> Result<Vec<String>, Fault> {
        let tables = self.tables.lock();
        if tables.targets.get(instance).is_none() {
            return Err(unknown_target(instance));
        }
        Ok(tables.resolutions.keys_for_instance(instance))
    }

    // ── Watch operations ─────────────────────────────────────────────

    pub fn add_class_watch(
        &self,
        caller: MessengerId,
        watcher: &str,
        class: &str,
    ) -> Result<(), Fault> {
        let mut tables = self.tables.lock();
        self.check_owner(&tables, caller, watcher)?;
        tables.watches.add_class_watch(watcher, class);
        Ok(())
    }

    pub fn remove_class_watch(
        &self,
        caller: MessengerId,
        watcher: &str,
        class: &str,
    ) -> Result<(), Fault> {
        let mut tables = self.tables.lock();
        self.check_owner(&tables, caller, watcher)?;
        tables.watches.remove_class_watch(watcher, class);
        Ok(())
    }

    pub fn add_instance_watch(
        &self,
        caller: MessengerId,
        watcher: &str,
        instance: &str,
    ) -> Result<(), Fault> {
        let mut tables = self.tables.lock();
        self.check_owner(&tables, caller, watcher)?;
        tables.watches.add_instance_watch(watcher, instance);
        Ok(())
    }

    pub fn remove_instance_watch(
        &self,
        caller: MessengerId,
        watcher: &str,
        instance: &str,
    ) -> Result<(), Fault> {
        let mut tables = self.tables.lock();
        self.check_owner(&tables, caller, watcher)?;
        tables.watches.remove_instance_watch(watcher, instance);
        Ok(())
    }

    // ── Connection lookups (used by the notifier task) ───────────────

    /// Messenger currently owning `instance`, if any.
    pub fn messenger_for_instance(&self, instance: &str) -> Option<Messenger> {
        let owner = {
            let tables = self.tables.lock();
            tables.targets.get(instance).map(|t| t.owner)?
        };
        self.conns.lock().get(&owner).map(|c| c.messenger.clone())
    }

    /// All live messengers except `except`.
    pub fn messengers_except(&self, except: Option<MessengerId>) -> Vec<Messenger> {
        self.conns
            .lock()
            .iter()
            .filter(|(id, _)| Some(**id) != except)
            .map(|(_, c)| c.messenger.clone())
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.conns.lock().len()
    }

    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.conns
            .lock()
            .iter()
            .map(|(id, c)| ConnectionInfo {
                id: *id,
                peer: c.messenger.peer(),
                connected_at: c.connected_at,
                dispatching: c.dispatching,
            })
            .collect()
    }

    /// Close every connection (daemon shutdown).
    pub fn close_all(&self) {
        let messengers: Vec<Messenger> = self
            .conns
            .lock()
            .values()
            .map(|c| c.messenger.clone())
            .collect();
        for m in messengers {
            m.close();
        }
    }

    // ── Internals ────────────────────────────────────────────────────

    fn check_owner(&self, tables: &Tables, caller: MessengerId, instance: &str) -> Result<(), Fault> {
        let target = tables
            .targets
            .get(instance)
            .ok_or_else(|| unknown_target(instance))?;
        if target.owner != caller {
            return Err(Fault::bad_request(format!(
                "target {instance} is not owned by this connection"
            )));
        }
        Ok(())
    }

    /// Purge a removed target's resolutions and watches and queue its
    /// departure.  Caller already removed it from the target table.
    fn drop_target_state(&self, tables: &mut Tables, target: &Target, except: Option<MessengerId>) {
        let affected = tables.resolutions.purge_instance(&target.instance);
        tables.watches.remove_watcher(&target.instance);
        if target.enabled {
            self.enqueue_visibility_events(
                tables,
                WatchEventKind::Departure,
                &target.class,
                &target.instance,
            );
        }
        if !affected.is_empty() {
            // Keys not named after the instance (class-form keys) escape the
            // target-scoped invalidation, so push them one by one.
            for key in &affected {
                let covered = sb_protocol::CallName::parse(key)
                    .map(|c| c.target() == target.instance)
                    .unwrap_or(false);
                if !covered {
                    self.notify(Notification::UncacheCall {
                        key: key.clone(),
                        except,
                    });
                }
            }
            self.notify(Notification::UncacheTarget {
                target: target.instance.clone(),
                except,
            });
        }
    }

    fn enqueue_visibility_events(
        &self,
        tables: &Tables,
        kind: WatchEventKind,
        class: &str,
        instance: &str,
    ) {
        for event in tables.watches.events_for(kind, class, instance) {
            self.notify(Notification::Watch(event));
        }
    }

    fn notify(&self, n: Notification) {
        // The receiver lives as long as the server; a send failure only
        // happens during shutdown, when nobody cares about the event.
        let _ = self.notify_tx.send(n);
    }

    fn spawn_keepalive(&self, messenger: Messenger) {
        let interval = self.config.keepalive_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // immediate first tick
            loop {
                ticker.tick().await;
                if messenger.is_closed() {
                    return;
                }
                if let Err(fault) = messenger.call(methods::CLIENT_HELLO, vec![]).await {
                    tracing::warn!(
                        messenger_id = %messenger.id(),
                        peer = %messenger.peer(),
                        fault = %fault,
                        "keepalive probe failed, closing connection"
                    );
                    messenger.close();
                    return;
                }
            }
        });
    }
}

impl MessengerManager for RegistryCore {
    fn messenger_birth(&self, m: &Messenger) {
        tracing::info!(messenger_id = %m.id(), peer = %m.peer(), "daemon connected");
        self.conns.lock().insert(
            m.id(),
            Connection {
                messenger: m.clone(),
                connected_at: Utc::now(),
                dispatching: 0,
            },
        );
        self.spawn_keepalive(m.clone());
    }

    fn messenger_active(&self, m: &Messenger) {
        if let Some(c) = self.conns.lock().get_mut(&m.id()) {
            c.dispatching += 1;
        }
    }

    fn messenger_idle(&self, m: &Messenger) {
        if let Some(c) = self.conns.lock().get_mut(&m.id()) {
            c.dispatching = c.dispatching.saturating_sub(1);
        }
    }

    fn messenger_stopped(&self, m: &Messenger) {
        // The connection's targets die with it.
        let mut tables = self.tables.lock();
        let removed = tables.targets.remove_by_owner(m.id());
        for target in &removed {
            self.drop_target_state(&mut tables, target, Some(m.id()));
        }
        if !removed.is_empty() {
            tracing::info!(
                messenger_id = %m.id(),
                targets = removed.len(),
                "removed targets of dead connection"
            );
        }
    }

    fn messenger_death(&self, m: &Messenger) {
        self.conns.lock().remove(&m.id());
        tracing::info!(messenger_id = %m.id(), peer = %m.peer(), "daemon disconnected");
    }

    fn manages(&self, m: &Messenger) -> bool {
        self.conns.lock().contains_key(&m.id())
    }
}

fn unknown_target(instance: &str) -> Fault {
    Fault::new(FaultKind::NoSuchTarget, format!("unknown target: {instance}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core() -> (Arc<RegistryCore>, mpsc::UnboundedReceiver<Notification>) {
        RegistryCore::new(RegistryConfig::default()).unwrap()
    }

    #[test]
    fn resolve_requires_enabled_target() {
        let (core, _rx) = core();
        let caller = MessengerId::next();
        core.register_target(caller, "rip4", "rip", false, "").unwrap();
        core.add_resolution(caller, "rip4", "sb://rip4/route_add", "stcp://127.0.0.1:4001")
            .unwrap();

        // Registered but not yet enabled: invisible.
        assert_eq!(
            core.resolve("sb://rip4/route_add").unwrap_err().kind,
            FaultKind::NotFound
        );

        core.set_target_enabled(caller, "rip4", true).unwrap();
        assert_eq!(
            core.resolve("sb://rip4/route_add").unwrap(),
            vec!["stcp://127.0.0.1:4001"]
        );
    }

    #[test]
    fn two_registrants_resolve_in_registration_order() {
        let (core, _rx) = core();
        let (a, b) = (MessengerId::next(), MessengerId::next());
        core.register_target(a, "rip4", "rip", false, "").unwrap();
        core.register_target(b, "rip6", "rip", false, "").unwrap();
        core.add_resolution(a, "rip4", "sb://rip/route_add", "stcp://127.0.0.1:4001")
            .unwrap();
        core.add_resolution(b, "rip6", "sb://rip/route_add", "stcp://127.0.0.1:4002")
            .unwrap();
        core.set_target_enabled(a, "rip4", true).unwrap();
        core.set_target_enabled(b, "rip6", true).unwrap();

        assert_eq!(
            core.resolve("sb://rip/route_add").unwrap(),
            vec!["stcp://127.0.0.1:4001", "stcp://127.0.0.1:4002"]
        );
    }

    #[test]
    fn mutation_requires_ownership() {
        let (core, _rx) = core();
        let (owner, imposter) = (MessengerId::next(), MessengerId::next());
        core.register_target(owner, "rip4", "rip", false, "").unwrap();

        assert!(core.set_target_enabled(imposter, "rip4", true).is_err());
        assert!(core
            .add_resolution(imposter, "rip4", "sb://rip4/x", "stcp://127.0.0.1:1")
            .is_err());
        assert!(core.unregister_target(imposter, "rip4").is_err());
        // The owner can.
        core.set_target_enabled(owner, "rip4", true).unwrap();
    }

    #[test]
    fn unregister_purges_resolutions_and_notifies() {
        let (core, mut rx) = core();
        let (a, b) = (MessengerId::next(), MessengerId::next());
        core.register_target(a, "rip4", "rip", false, "").unwrap();
        core.register_target(b, "cli", "cli", false, "").unwrap();
        core.add_class_watch(b, "cli", "rip").unwrap();
        core.add_resolution(a, "rip4", "sb://rip4/route_add", "stcp://127.0.0.1:4001")
            .unwrap();
        core.set_target_enabled(a, "rip4", true).unwrap();

        core.unregister_target(a, "rip4").unwrap();
        assert!(core.resolve("sb://rip4/route_add").is_err());

        // Arrival (enable), then departure + uncache on unregister.
        let mut kinds = Vec::new();
        while let Ok(n) = rx.try_recv() {
            kinds.push(match n {
                Notification::Watch(ev) => format!("watch:{:?}:{}", ev.kind, ev.watcher),
                Notification::UncacheCall { .. } => "uncache_call".into(),
                Notification::UncacheTarget { target, .. } => format!("uncache_target:{target}"),
            });
        }
        assert!(kinds.contains(&"watch:Arrival:cli".to_string()));
        assert!(kinds.contains(&"watch:Departure:cli".to_string()));
        assert!(kinds.contains(&"uncache_target:rip4".to_string()));
    }

    #[test]
    fn remove_by_cookie_bypasses_owner_check() {
        let (core, _rx) = core();
        let caller = MessengerId::next();
        let cookie = core.register_target(caller, "rip4", "rip", false, "").unwrap();
        core.remove_target_with_cookie(&cookie).unwrap();
        assert!(core.list_targets().is_empty());
        assert!(core.remove_target_with_cookie(&cookie).is_err());
    }

    #[test]
    fn replay_registration_same_cookie_succeeds() {
        let (core, _rx) = core();
        let first = MessengerId::next();
        let cookie = core.register_target(first, "rip4", "rip", false, "").unwrap();

        // Same daemon comes back on a new connection with its cookie.
        let second = MessengerId::next();
        let again = core
            .register_target(second, "rip4", "rip", false, &cookie)
            .unwrap();
        assert_eq!(cookie, again);
    }

    #[test]
    fn list_resolutions_requires_known_target() {
        let (core, _rx) = core();
        let caller = MessengerId::next();
        assert!(core.list_resolutions("ghost").is_err());
        core.register_target(caller, "rip4", "rip", false, "").unwrap();
        core.add_resolution(caller, "rip4", "sb://rip4/a", "stcp://127.0.0.1:1")
            .unwrap();
        core.add_resolution(caller, "rip4", "sb://rip4/b", "stcp://127.0.0.1:1")
            .unwrap();
        assert_eq!(
            core.list_resolutions("rip4").unwrap(),
            vec!["sb://rip4/a", "sb://rip4/b"]
        );
    }
}
