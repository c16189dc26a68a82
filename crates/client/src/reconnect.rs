//! Auto-reconnector: keeps one logical Registry connection alive across
//! transport churn.
//!
//! `disconnected → connecting → connected`, back to `disconnected` on any
//! failure.  While enabled, a failed attempt schedules a retry after a fixed
//! pause.  Consecutive failures are counted so the log is not flooded: the
//! first few attempts warn, later ones drop to debug with a periodic warn
//! heartbeat, all at the same retry cadence.  Disabling suppresses attempts
//! without touching the client's queues, so re-enabling resumes exactly
//! where registration left off.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use sb_messenger::{CallDispatcher, Messenger, MessengerConfig, MessengerManager};

use crate::client::RegistryClient;

/// Retry cadence and log-quieting thresholds.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Fixed pause between attempts.
    pub pause: Duration,
    /// Failures logged at `warn` before dropping to `debug`.
    pub quiet_after: u32,
    /// Every Nth quiet failure still warns, as a heartbeat.
    pub heartbeat_every: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            pause: Duration::from_secs(1),
            quiet_after: 3,
            heartbeat_every: 60,
        }
    }
}

impl RetryPolicy {
    /// Whether failure number `n` (1-based) deserves a `warn`.
    pub fn warns(&self, n: u32) -> bool {
        n <= self.quiet_after || (self.heartbeat_every > 0 && n % self.heartbeat_every == 0)
    }
}

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Connected,
}

/// Handle to the reconnect task.
pub struct Reconnector {
    enabled: watch::Sender<bool>,
    state: watch::Receiver<ConnState>,
    shutdown: CancellationToken,
}

impl Reconnector {
    /// Start reconnecting `client` to the Registry at `addr`.
    pub fn spawn(
        client: Arc<RegistryClient>,
        addr: SocketAddr,
        config: MessengerConfig,
        policy: RetryPolicy,
        dispatcher: Arc<CallDispatcher>,
    ) -> Self {
        let (enabled_tx, enabled_rx) = watch::channel(true);
        let (state_tx, state_rx) = watch::channel(ConnState::Disconnected);
        let shutdown = CancellationToken::new();

        let task_shutdown = shutdown.clone();
        tokio::spawn(run(
            client,
            addr,
            config,
            policy,
            dispatcher,
            enabled_rx,
            state_tx,
            task_shutdown,
        ));

        Self {
            enabled: enabled_tx,
            state: state_rx,
            shutdown,
        }
    }

    /// Suppress (false) or resume (true) connection attempts.
    pub fn set_enabled(&self, en: bool) {
        let _ = self.enabled.send(en);
    }

    pub fn is_enabled(&self) -> bool {
        *self.enabled.borrow()
    }

    pub fn state(&self) -> ConnState {
        *self.state.borrow()
    }

    /// Wait until the connection is up.
    pub async fn wait_connected(&self) {
        let mut rx = self.state.clone();
        let _ = rx.wait_for(|s| *s == ConnState::Connected).await;
    }

    /// Stop reconnecting for good (daemon shutdown).
    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}

#[allow(clippy::too_many_arguments)]
async fn run(
    client: Arc<RegistryClient>,
    addr: SocketAddr,
    config: MessengerConfig,
    policy: RetryPolicy,
    dispatcher: Arc<CallDispatcher>,
    mut enabled: watch::Receiver<bool>,
    state: watch::Sender<ConnState>,
    shutdown: CancellationToken,
) {
    let mut failures: u32 = 0;
    loop {
        if shutdown.is_cancelled() {
            return;
        }
        if enabled.wait_for(|e| *e).await.is_err() {
            return;
        }

        let _ = state.send(ConnState::Connecting);
        let attempt = tokio::select! {
            _ = shutdown.cancelled() => return,
            attempt = TcpStream::connect(addr) => attempt,
        };

        match attempt {
            Ok(stream) => {
                failures = 0;
                let _ = state.send(ConnState::Connected);
                let generation = client.disconnect_generation();
                let manager: Arc<dyn MessengerManager> = client.clone();
                let messenger =
                    Messenger::spawn(stream, addr, config.clone(), dispatcher.clone(), &manager);

                tokio::select! {
                    _ = shutdown.cancelled() => {
                        messenger.close();
                        return;
                    }
                    _ = client.wait_disconnect(generation) => {}
                    // Disabling mid-connection drops the link; registration
                    // state stays put for re-enable.
                    res = enabled.wait_for(|e| !*e) => {
                        if res.is_ok() {
                            messenger.close();
                        }
                    }
                }
                let _ = state.send(ConnState::Disconnected);
            }
            Err(e) => {
                failures += 1;
                if policy.warns(failures) {
                    tracing::warn!(
                        registry = %addr,
                        failures,
                        error = %e,
                        "registry connection attempt failed"
                    );
                } else {
                    tracing::debug!(registry = %addr, failures, error = %e, "retrying registry");
                }
                let _ = state.send(ConnState::Disconnected);
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(policy.pause) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warns_for_first_failures_then_quiets() {
        let p = RetryPolicy::default();
        assert!(p.warns(1));
        assert!(p.warns(2));
        assert!(p.warns(3));
        assert!(!p.warns(4));
        assert!(!p.warns(59));
        assert!(p.warns(60)); // heartbeat
        assert!(!p.warns(61));
        assert!(p.warns(120));
    }

    #[test]
    fn zero_heartbeat_disables_heartbeat_warns() {
        let p = RetryPolicy {
            heartbeat_every: 0,
            ..Default::default()
        };
        assert!(p.warns(3));
        assert!(!p.warns(400));
    }
}
