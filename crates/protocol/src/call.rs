//! Call names: `sb://<target>/<method>`.

use serde::{Deserialize, Serialize};

use crate::fault::Fault;

const SCHEME: &str = "sb://";

/// A parsed call name.
///
/// The target part names a registered instance (`rip4`) or a class (`rip`);
/// the method part is the operation the target serves (`route_add`).  The
/// Registry treats the full string as an opaque resolution key — only the
/// client side ever needs the parts, for the local-dispatch fast path and
/// for target-scoped cache invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CallName {
    target: String,
    method: String,
}

impl CallName {
    pub fn new(target: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            method: method.into(),
        }
    }

    /// Parse `sb://target/method`.  The method part may itself contain `/`.
    pub fn parse(s: &str) -> Result<Self, Fault> {
        let rest = s
            .strip_prefix(SCHEME)
            .ok_or_else(|| Fault::bad_request(format!("call name missing {SCHEME} scheme: {s}")))?;
        let (target, method) = rest
            .split_once('/')
            .ok_or_else(|| Fault::bad_request(format!("call name missing method part: {s}")))?;
        if target.is_empty() || method.is_empty() {
            return Err(Fault::bad_request(format!("empty call name component: {s}")));
        }
        Ok(Self::new(target, method))
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn method(&self) -> &str {
        &self.method
    }
}

impl std::fmt::Display for CallName {
    /// Writes the canonical `sb://target/method` form.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{SCHEME}{}/{}", self.target, self.method)
    }
}

impl TryFrom<String> for CallName {
    type Error = Fault;

    fn try_from(s: String) -> Result<Self, Fault> {
        CallName::parse(&s)
    }
}

impl From<CallName> for String {
    fn from(c: CallName) -> String {
        c.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_roundtrip() {
        let c = CallName::parse("sb://rip4/route_add").unwrap();
        assert_eq!(c.target(), "rip4");
        assert_eq!(c.method(), "route_add");
        assert_eq!(c.to_string(), "sb://rip4/route_add");
    }

    #[test]
    fn method_part_may_nest() {
        let c = CallName::parse("sb://fea/ifmgr/set_mtu").unwrap();
        assert_eq!(c.target(), "fea");
        assert_eq!(c.method(), "ifmgr/set_mtu");
    }

    #[test]
    fn rejects_missing_scheme_and_parts() {
        assert!(CallName::parse("rip4/route_add").is_err());
        assert!(CallName::parse("sb://rip4").is_err());
        assert!(CallName::parse("sb:///route_add").is_err());
        assert!(CallName::parse("sb://rip4/").is_err());
    }

    #[test]
    fn serde_uses_string_form() {
        let c = CallName::new("bgp", "peer_up");
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(json, r#""sb://bgp/peer_up""#);
        let back: CallName = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }
}
