use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// An endpoint identifier in either the `dtn:` or `ipn:` scheme.
///
/// The router only ever reasons about the numeric `ipn` node id of an
/// endpoint (that is what source/destination routing keys on); the `dtn`
/// form is kept around verbatim for admin-EID comparisons and logging.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Hash, Serialize, Deserialize)]
pub enum Eid {
    Dtn(String),
    Ipn { node: u64, service: u64 },
}

impl Eid {
    pub fn parse(uri: &str) -> Option<Self> {
        let (scheme, hier) = uri.split_once(':')?;
        match scheme {
            "dtn" => Some(Eid::Dtn(hier.to_owned())),
            "ipn" => {
                let (node, service) = hier.split_once('.')?;
                Some(Eid::Ipn {
                    node: node.parse().ok()?,
                    service: service.parse().ok()?,
                })
            }
            _ => None,
        }
    }

    /// The numeric IPN node id this endpoint names, if any.
    ///
    /// `dtn:` endpoints have no such thing: the router treats any node that
    /// only speaks `dtn:` addressing as unreachable by node-id based
    /// admission (it is not exercised by the satellite forward-link
    /// topology this router schedules for).
    pub fn node_id(&self) -> Option<u64> {
        match self {
            Eid::Ipn { node, .. } => Some(*node),
            Eid::Dtn(_) => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Eid::Dtn(hier) if hier == "none")
    }

    pub fn matches_node(&self, other: &Eid) -> bool {
        match (self, other) {
            (Eid::Dtn(a), Eid::Dtn(b)) => a == b,
            (Eid::Ipn { node: a, .. }, Eid::Ipn { node: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl FromStr for Eid {
    type Err = ParseEidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Eid::parse(s).ok_or_else(|| ParseEidError(s.to_owned()))
    }
}

#[derive(Debug)]
pub struct ParseEidError(String);

impl Display for ParseEidError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid endpoint id: {}", self.0)
    }
}

impl std::error::Error for ParseEidError {}

impl Display for Eid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Eid::Dtn(hier) => write!(f, "dtn:{hier}"),
            Eid::Ipn { node, service } => write!(f, "ipn:{node}.{service}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ipn() {
        let e = Eid::parse("ipn:10.0").unwrap();
        assert_eq!(e, Eid::Ipn { node: 10, service: 0 });
        assert_eq!(e.node_id(), Some(10));
    }

    #[test]
    fn parses_dtn() {
        let e = Eid::parse("dtn://node10/admin").unwrap();
        assert_eq!(e.node_id(), None);
        assert!(!e.is_null());
        assert!(Eid::parse("dtn:none").unwrap().is_null());
    }

    #[test]
    fn rejects_garbage() {
        assert!(Eid::parse("not-an-eid").is_none());
        assert!(Eid::parse("ipn:notanumber.0").is_none());
    }

    #[test]
    fn display_roundtrips() {
        let e = Eid::parse("ipn:7.3").unwrap();
        assert_eq!(e.to_string(), "ipn:7.3");
    }
}
