//! TCP accept loop and notification fan-out for the Registry daemon.

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use sb_messenger::{Messenger, MessengerManager};
use sb_protocol::methods;

use crate::api;
use crate::config::RegistryConfig;
use crate::core::{Notification, RegistryCore};
use crate::error::RegistryError;

/// A bound, not-yet-running Registry.
pub struct RegistryServer {
    config: RegistryConfig,
    core: Arc<RegistryCore>,
    listener: TcpListener,
    local_addr: SocketAddr,
    notify_rx: mpsc::UnboundedReceiver<Notification>,
    shutdown: CancellationToken,
}

impl RegistryServer {
    /// Bind the listener.  Fails fast on a bad address or an occupied port.
    pub async fn bind(config: RegistryConfig) -> Result<Self, RegistryError> {
        let addr = config.bind_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| RegistryError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;
        let (core, notify_rx) = RegistryCore::new(config.clone())?;
        Ok(Self {
            config,
            core,
            listener,
            local_addr,
            notify_rx,
            shutdown: CancellationToken::new(),
        })
    }

    /// Actual bound address (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn core(&self) -> Arc<RegistryCore> {
        self.core.clone()
    }

    /// Token that stops [`run`](Self::run) when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Serve until the shutdown token fires, then close every connection.
    pub async fn run(self) {
        let RegistryServer {
            config,
            core,
            listener,
            local_addr,
            notify_rx,
            shutdown,
        } = self;

        tracing::info!(addr = %local_addr, "registry listening");

        let notifier = tokio::spawn(run_notifier(core.clone(), notify_rx));

        let manager: Arc<dyn MessengerManager> = core.clone();
        let dispatcher = api::dispatcher(&core);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if !core.acl().permits(peer.ip()) {
                            tracing::warn!(peer = %peer, "connection refused by allow-list");
                            continue;
                        }
                        Messenger::spawn(
                            stream,
                            peer,
                            config.messenger_config(),
                            dispatcher.clone(),
                            &manager,
                        );
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                    }
                },
            }
        }

        tracing::info!(addr = %local_addr, "registry shutting down");
        core.close_all();
        notifier.abort();
    }
}

/// Drain the notification queue: watch events go to their watcher's
/// connection, cache invalidations fan out to every other daemon.  Pushes
/// are detached calls, so a slow daemon never stalls the queue while frame
/// order per connection is still preserved.
async fn run_notifier(
    core: Arc<RegistryCore>,
    mut notify_rx: mpsc::UnboundedReceiver<Notification>,
) {
    while let Some(n) = notify_rx.recv().await {
        match n {
            Notification::Watch(ev) => {
                let Some(m) = core.messenger_for_instance(&ev.watcher) else {
                    tracing::debug!(watcher = %ev.watcher, "watch event for unreachable watcher");
                    continue;
                };
                m.call_detached(
                    methods::CLIENT_EVENT,
                    vec![
                        json!(ev.kind.as_str()),
                        json!(ev.class),
                        json!(ev.instance),
                    ],
                );
            }
            Notification::UncacheCall { key, except } => {
                for m in core.messengers_except(except) {
                    m.call_detached(methods::UNCACHE_CALL, vec![json!(key)]);
                }
            }
            Notification::UncacheTarget { target, except } => {
                for m in core.messengers_except(except) {
                    m.call_detached(methods::UNCACHE_TARGET, vec![json!(target)]);
                }
            }
        }
    }
}
