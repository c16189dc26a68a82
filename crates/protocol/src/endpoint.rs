//! Endpoint descriptors: `stcp://<host>:<port>`.
//!
//! A Resolution Entry's values are endpoint descriptors in this form; the
//! Router dials them directly for daemon-to-daemon calls.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::fault::Fault;

const SCHEME: &str = "stcp://";

/// A resolvable transport endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    addr: SocketAddr,
}

impl Endpoint {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// Parse `stcp://host:port`.  IPv6 hosts use the usual bracketed form,
    /// e.g. `stcp://[::1]:19999`.
    pub fn parse(s: &str) -> Result<Self, Fault> {
        let rest = s
            .strip_prefix(SCHEME)
            .ok_or_else(|| Fault::bad_request(format!("endpoint missing {SCHEME} scheme: {s}")))?;
        let addr = rest
            .parse::<SocketAddr>()
            .map_err(|e| Fault::bad_request(format!("bad endpoint address {rest}: {e}")))?;
        Ok(Self { addr })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{SCHEME}{}", self.addr)
    }
}

impl TryFrom<String> for Endpoint {
    type Error = Fault;

    fn try_from(s: String) -> Result<Self, Fault> {
        Endpoint::parse(&s)
    }
}

impl From<Endpoint> for String {
    fn from(e: Endpoint) -> String {
        e.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_v4_and_v6() {
        let e = Endpoint::parse("stcp://127.0.0.1:19999").unwrap();
        assert_eq!(e.addr().port(), 19999);
        assert_eq!(e.to_string(), "stcp://127.0.0.1:19999");

        let e6 = Endpoint::parse("stcp://[::1]:4000").unwrap();
        assert!(e6.addr().is_ipv6());
    }

    #[test]
    fn rejects_garbage() {
        assert!(Endpoint::parse("tcp://127.0.0.1:1").is_err());
        assert!(Endpoint::parse("stcp://nohost").is_err());
        assert!(Endpoint::parse("stcp://127.0.0.1:notaport").is_err());
    }
}
