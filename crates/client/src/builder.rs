//! Builder for [`Router`].

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use sb_messenger::{CallDispatcher, MessengerConfig};
use sb_protocol::{Endpoint, DEFAULT_REGISTRY_HOST, DEFAULT_REGISTRY_PORT};

use crate::client::RegistryClient;
use crate::error::ClientError;
use crate::reconnect::{Reconnector, RetryPolicy};
use crate::router::{bind_peer_listener, serve_peers, PeerManager, Router, RouterInner};

/// Fluent builder for [`Router`].
///
/// # Example
///
/// ```rust,no_run
/// # use sb_client::RouterBuilder;
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let router = RouterBuilder::new("rip")
///     .instance("rip4")
///     .registry("127.0.0.1:19999".parse()?)
///     .build()
///     .await?;
/// // register calls, then:
/// router.finalize()?;
/// # Ok(())
/// # }
/// ```
pub struct RouterBuilder {
    class: String,
    instance: Option<String>,
    singleton: bool,
    registry_addr: SocketAddr,
    bind_addr: SocketAddr,
    response_timeout: Duration,
    high_watermark: usize,
    low_watermark: usize,
    retry: RetryPolicy,
}

impl RouterBuilder {
    /// Start building a Router for a daemon of `class`.
    pub fn new(class: impl Into<String>) -> Self {
        let default_registry: SocketAddr = format!(
            "{DEFAULT_REGISTRY_HOST}:{DEFAULT_REGISTRY_PORT}"
        )
        .parse()
        .unwrap_or_else(|_| ([127, 0, 0, 1], DEFAULT_REGISTRY_PORT).into());
        Self {
            class: class.into(),
            instance: None,
            singleton: false,
            registry_addr: default_registry,
            bind_addr: ([127, 0, 0, 1], 0).into(),
            response_timeout: Duration::from_secs(30),
            high_watermark: 6,
            low_watermark: 4,
            retry: RetryPolicy::default(),
        }
    }

    /// Set the instance name.  When omitted, a unique one is derived from
    /// the class (`rip-3fa94c21` style), so several instances of one class
    /// can coexist without coordination.
    pub fn instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    /// Claim the class as singleton: the Registry rejects a second live
    /// instance.
    pub fn singleton(mut self, singleton: bool) -> Self {
        self.singleton = singleton;
        self
    }

    /// Registry address (default `127.0.0.1:19999`).
    pub fn registry(mut self, addr: SocketAddr) -> Self {
        self.registry_addr = addr;
        self
    }

    /// Local address the Router's own call listener binds (default
    /// loopback, ephemeral port).
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Response window for outbound calls (default 30 s).
    pub fn response_timeout(mut self, d: Duration) -> Self {
        self.response_timeout = d;
        self
    }

    /// Send-queue watermarks (default 6/4).
    pub fn watermarks(mut self, high: usize, low: usize) -> Self {
        self.high_watermark = high;
        self.low_watermark = low;
        self
    }

    /// Reconnect cadence and log-quieting policy.
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Bind the call listener, start the reconnector, and queue the
    /// target registration.
    pub async fn build(self) -> Result<Router, ClientError> {
        if self.class.is_empty() {
            return Err(ClientError::Config("class must be non-empty".into()));
        }
        if self.low_watermark >= self.high_watermark {
            return Err(ClientError::Config(
                "low watermark must be below high watermark".into(),
            ));
        }

        let instance = self.instance.unwrap_or_else(|| {
            let id = uuid::Uuid::new_v4().simple().to_string();
            format!("{}-{}", self.class, &id[..8])
        });

        let config = MessengerConfig {
            response_timeout: self.response_timeout,
            high_watermark: self.high_watermark,
            low_watermark: self.low_watermark,
        };

        let (listener, local_addr) = bind_peer_listener(self.bind_addr).await?;
        let endpoint = Endpoint::new(local_addr);

        let client = RegistryClient::new();
        let dispatcher = Arc::new(CallDispatcher::new());
        client.install_handlers(&dispatcher);
        client
            .register_target(&instance, &self.class, self.singleton)
            .map_err(|fault| ClientError::Config(fault.to_string()))?;

        let peers = Arc::new(PeerManager::default());
        let shutdown = CancellationToken::new();

        tokio::spawn(serve_peers(
            listener,
            config.clone(),
            dispatcher.clone(),
            peers.clone(),
            shutdown.clone(),
        ));

        let reconnector = Reconnector::spawn(
            client.clone(),
            self.registry_addr,
            config.clone(),
            self.retry,
            dispatcher.clone(),
        );

        tracing::info!(
            instance = %instance,
            class = %self.class,
            endpoint = %endpoint,
            registry = %self.registry_addr,
            "router started"
        );

        Ok(Router {
            inner: Arc::new(RouterInner {
                client,
                reconnector,
                dispatcher,
                peers,
                endpoint,
                instance,
                class: self.class,
                config,
                finalized: AtomicBool::new(false),
                shutdown,
            }),
        })
    }
}
