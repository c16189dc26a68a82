//! Registry daemon configuration.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use sb_messenger::MessengerConfig;
use sb_protocol::{DEFAULT_REGISTRY_HOST, DEFAULT_REGISTRY_PORT};

use crate::error::RegistryError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    /// Response window for calls the Registry itself issues (keepalive
    /// probes, cache-invalidation pushes).
    #[serde(default = "d_response_timeout")]
    pub response_timeout_secs: u64,
    /// Interval between `client.hello` keepalive probes per connection.
    #[serde(default = "d_keepalive_interval")]
    pub keepalive_interval_secs: u64,
    /// Send-queue depth at which a connection stops reading.
    #[serde(default = "d_high_watermark")]
    pub high_watermark: usize,
    /// Send-queue depth at which it resumes.
    #[serde(default = "d_low_watermark")]
    pub low_watermark: usize,
    /// Hosts allowed to connect (IPv4/IPv6 literals).  Loopback is always
    /// permitted; an empty list together with empty `permitted_nets` means
    /// loopback-only.
    #[serde(default)]
    pub permitted_hosts: Vec<String>,
    /// Networks allowed to connect, in `addr/prefix` form.
    #[serde(default)]
    pub permitted_nets: Vec<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            response_timeout_secs: d_response_timeout(),
            keepalive_interval_secs: d_keepalive_interval(),
            high_watermark: d_high_watermark(),
            low_watermark: d_low_watermark(),
            permitted_hosts: Vec::new(),
            permitted_nets: Vec::new(),
        }
    }
}

impl RegistryConfig {
    /// Parse a TOML document.
    pub fn from_toml(s: &str) -> Result<Self, RegistryError> {
        toml::from_str(s).map_err(|e| RegistryError::Config(e.to_string()))
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, RegistryError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|_| RegistryError::Config(format!("bad bind address {}:{}", self.host, self.port)))
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    pub fn messenger_config(&self) -> MessengerConfig {
        MessengerConfig {
            response_timeout: self.response_timeout(),
            high_watermark: self.high_watermark,
            low_watermark: self.low_watermark,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_host() -> String {
    DEFAULT_REGISTRY_HOST.into()
}
fn d_port() -> u16 {
    DEFAULT_REGISTRY_PORT
}
fn d_response_timeout() -> u64 {
    30
}
fn d_keepalive_interval() -> u64 {
    30
}
fn d_high_watermark() -> usize {
    6
}
fn d_low_watermark() -> usize {
    4
}
