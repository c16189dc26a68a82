//! The Registry's call surface: method names wired to [`RegistryCore`].

use std::sync::Arc;

use serde_json::{json, Value};

use sb_messenger::{CallContext, CallDispatcher, CallHandler};
use sb_protocol::args::{bool_arg, nonempty_str_arg, str_arg};
use sb_protocol::methods;
use sb_protocol::CallResult;

use crate::core::RegistryCore;

/// One handler serves the whole `registry.*` namespace; the dispatcher
/// registers it under every method name so unknown methods still fall out
/// as `no_such_method` at the dispatch layer.
pub struct RegistryApi {
    core: Arc<RegistryCore>,
}

impl RegistryApi {
    pub fn new(core: Arc<RegistryCore>) -> Self {
        Self { core }
    }

    /// All method names this handler serves.
    pub fn method_names() -> &'static [&'static str] {
        &[
            methods::REGISTER_TARGET,
            methods::UNREGISTER_TARGET,
            methods::SET_TARGET_ENABLED,
            methods::TARGET_ENABLED,
            methods::ADD_RESOLUTION,
            methods::REMOVE_RESOLUTIONS,
            methods::RESOLVE,
            methods::LIST_TARGETS,
            methods::LIST_RESOLUTIONS,
            methods::ADD_CLASS_WATCH,
            methods::REMOVE_CLASS_WATCH,
            methods::ADD_INSTANCE_WATCH,
            methods::REMOVE_INSTANCE_WATCH,
            methods::PERMITTED_HOSTS,
            methods::PERMITTED_NETS,
            methods::REGISTRY_HELLO,
        ]
    }
}

#[async_trait::async_trait]
impl CallHandler for RegistryApi {
    async fn call(&self, ctx: CallContext, args: Vec<Value>) -> CallResult {
        // Every registry call arrives over a connection; ownership is
        // attributed to it.
        let Some(caller) = ctx.messenger_id() else {
            return Err(sb_protocol::Fault::bad_request(
                "registry calls require a connection identity",
            ));
        };
        match ctx.method.as_str() {
            methods::REGISTER_TARGET => {
                let instance = str_arg(&args, 0, "instance")?;
                let class = str_arg(&args, 1, "class")?;
                let singleton = bool_arg(&args, 2, "singleton")?;
                let cookie = str_arg(&args, 3, "cookie")?;
                let cookie = self
                    .core
                    .register_target(caller, instance, class, singleton, cookie)?;
                Ok(vec![json!(cookie)])
            }
            methods::UNREGISTER_TARGET => {
                let instance = nonempty_str_arg(&args, 0, "instance")?;
                self.core.unregister_target(caller, instance)?;
                Ok(vec![])
            }
            methods::SET_TARGET_ENABLED => {
                let instance = nonempty_str_arg(&args, 0, "instance")?;
                let en = bool_arg(&args, 1, "en")?;
                self.core.set_target_enabled(caller, instance, en)?;
                Ok(vec![])
            }
            methods::TARGET_ENABLED => {
                let instance = nonempty_str_arg(&args, 0, "instance")?;
                let en = self.core.target_enabled(instance)?;
                Ok(vec![json!(en)])
            }
            methods::ADD_RESOLUTION => {
                let instance = nonempty_str_arg(&args, 0, "instance")?;
                let key = nonempty_str_arg(&args, 1, "key")?;
                let value = nonempty_str_arg(&args, 2, "value")?;
                self.core.add_resolution(caller, instance, key, value)?;
                Ok(vec![])
            }
            methods::REMOVE_RESOLUTIONS => {
                let instance = nonempty_str_arg(&args, 0, "instance")?;
                let key = nonempty_str_arg(&args, 1, "key")?;
                self.core.remove_resolutions(caller, instance, key)?;
                Ok(vec![])
            }
            methods::RESOLVE => {
                let key = nonempty_str_arg(&args, 0, "key")?;
                let values = self.core.resolve(key)?;
                Ok(values.into_iter().map(|v| json!(v)).collect())
            }
            methods::LIST_TARGETS => {
                Ok(self.core.list_targets().into_iter().map(|t| json!(t)).collect())
            }
            methods::LIST_RESOLUTIONS => {
                let instance = nonempty_str_arg(&args, 0, "instance")?;
                let keys = self.core.list_resolutions(instance)?;
                Ok(keys.into_iter().map(|k| json!(k)).collect())
            }
            methods::ADD_CLASS_WATCH => {
                let watcher = nonempty_str_arg(&args, 0, "watcher")?;
                let class = nonempty_str_arg(&args, 1, "class")?;
                self.core.add_class_watch(caller, watcher, class)?;
                Ok(vec![])
            }
            methods::REMOVE_CLASS_WATCH => {
                let watcher = nonempty_str_arg(&args, 0, "watcher")?;
                let class = nonempty_str_arg(&args, 1, "class")?;
                self.core.remove_class_watch(caller, watcher, class)?;
                Ok(vec![])
            }
            methods::ADD_INSTANCE_WATCH => {
                let watcher = nonempty_str_arg(&args, 0, "watcher")?;
                let instance = nonempty_str_arg(&args, 1, "instance")?;
                self.core.add_instance_watch(caller, watcher, instance)?;
                Ok(vec![])
            }
            methods::REMOVE_INSTANCE_WATCH => {
                let watcher = nonempty_str_arg(&args, 0, "watcher")?;
                let instance = nonempty_str_arg(&args, 1, "instance")?;
                self.core.remove_instance_watch(caller, watcher, instance)?;
                Ok(vec![])
            }
            methods::PERMITTED_HOSTS => Ok(self
                .core
                .acl()
                .host_strings()
                .into_iter()
                .map(|h| json!(h))
                .collect()),
            methods::PERMITTED_NETS => Ok(self
                .core
                .acl()
                .net_strings()
                .into_iter()
                .map(|n| json!(n))
                .collect()),
            methods::REGISTRY_HELLO => Ok(vec![]),
            other => Err(sb_protocol::Fault::no_such_method(other)),
        }
    }
}

/// Dispatcher serving the full registry surface.
pub fn dispatcher(core: &Arc<RegistryCore>) -> Arc<CallDispatcher> {
    let d = Arc::new(CallDispatcher::new());
    let api: Arc<dyn CallHandler> = Arc::new(RegistryApi::new(core.clone()));
    for method in RegistryApi::method_names() {
        d.register_arc(*method, api.clone());
    }
    d
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatcher_serves_every_method() {
        let (core, _rx) = RegistryCore::new(crate::config::RegistryConfig::default()).unwrap();
        let d = dispatcher(&core);
        for method in RegistryApi::method_names() {
            assert!(d.get(method).is_some(), "missing handler for {method}");
        }
        assert!(d.get("registry.nope").is_none());
    }
}
