//! Connection allow-list: permitted hosts and networks.
//!
//! Loopback peers are always permitted.  Beyond that, a peer is admitted if
//! its address matches a permitted host exactly or falls inside a permitted
//! `addr/prefix` network.  IPv4 and IPv6 are both supported.

use std::net::IpAddr;

use crate::error::RegistryError;

/// One `addr/prefix` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Net {
    addr: IpAddr,
    prefix: u8,
}

impl Net {
    fn parse(s: &str) -> Result<Self, RegistryError> {
        let (addr_s, prefix_s) = s
            .split_once('/')
            .ok_or_else(|| RegistryError::Config(format!("network missing /prefix: {s}")))?;
        let addr: IpAddr = addr_s
            .parse()
            .map_err(|_| RegistryError::Config(format!("bad network address: {s}")))?;
        let prefix: u8 = prefix_s
            .parse()
            .map_err(|_| RegistryError::Config(format!("bad network prefix: {s}")))?;
        let max = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if prefix > max {
            return Err(RegistryError::Config(format!("prefix too long: {s}")));
        }
        Ok(Self { addr, prefix })
    }

    fn contains(&self, ip: IpAddr) -> bool {
        match (self.addr, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = if self.prefix == 0 {
                    0
                } else {
                    u32::MAX << (32 - self.prefix)
                };
                (u32::from(net) & mask) == (u32::from(ip) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = if self.prefix == 0 {
                    0
                } else {
                    u128::MAX << (128 - self.prefix)
                };
                (u128::from(net) & mask) == (u128::from(ip) & mask)
            }
            _ => false,
        }
    }
}

/// Compiled allow-list.
#[derive(Debug, Clone)]
pub struct HostAcl {
    hosts: Vec<IpAddr>,
    nets: Vec<Net>,
}

impl HostAcl {
    pub fn new(hosts: &[String], nets: &[String]) -> Result<Self, RegistryError> {
        let hosts = hosts
            .iter()
            .map(|h| {
                h.parse::<IpAddr>()
                    .map_err(|_| RegistryError::Config(format!("bad permitted host: {h}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let nets = nets.iter().map(|n| Net::parse(n)).collect::<Result<Vec<_>, _>>()?;
        Ok(Self { hosts, nets })
    }

    /// Whether a peer at `ip` may connect.
    pub fn permits(&self, ip: IpAddr) -> bool {
        if ip.is_loopback() {
            return true;
        }
        self.hosts.contains(&ip) || self.nets.iter().any(|n| n.contains(ip))
    }

    /// Permitted host literals, for the query surface.
    pub fn host_strings(&self) -> Vec<String> {
        self.hosts.iter().map(|h| h.to_string()).collect()
    }

    /// Permitted network literals, for the query surface.
    pub fn net_strings(&self) -> Vec<String> {
        self.nets
            .iter()
            .map(|n| format!("{}/{}", n.addr, n.prefix))
            .collect()
    }
}
