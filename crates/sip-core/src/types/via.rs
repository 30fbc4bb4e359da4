//! The Via header value
//!
//! The topmost Via's `branch` parameter is the transaction identifier
//! (RFC 3261 Section 17.1.3); everything else in the value is carried
//! opaquely.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// The RFC 3261 magic cookie every compliant branch starts with
pub const BRANCH_MAGIC_COOKIE: &str = "z9hG4bK";

/// One Via header value: `SIP/2.0/<transport> <sent-by>;params`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Via {
    /// Transport token (UDP, TCP, TLS, WS)
    pub transport: String,
    /// host[:port] the message was sent from
    pub sent_by: String,
    pub params: Vec<(String, Option<String>)>,
}

impl Via {
    pub fn new(
        transport: impl Into<String>,
        sent_by: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Via {
            transport: transport.into(),
            sent_by: sent_by.into(),
            params: vec![("branch".to_string(), Some(branch.into()))],
        }
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_deref().unwrap_or(""))
    }

    /// The branch parameter identifying the transaction
    pub fn branch(&self) -> Option<&str> {
        self.parameter("branch").filter(|b| !b.is_empty())
    }
}

impl FromStr for Via {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || Error::InvalidHeaderValue {
            field: "Via",
            value: s.to_string(),
        };

        let mut parts = s.split(';');
        let sent_protocol = parts.next().ok_or_else(invalid)?;

        let mut tokens = sent_protocol.split_whitespace();
        let protocol = tokens.next().ok_or_else(invalid)?;
        let sent_by = tokens.next().ok_or_else(invalid)?.to_string();

        let transport = protocol
            .strip_prefix("SIP/2.0/")
            .ok_or_else(invalid)?
            .to_string();

        let params = parts
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| match p.split_once('=') {
                Some((n, v)) => (n.to_string(), Some(v.to_string())),
                None => (p.to_string(), None),
            })
            .collect();

        Ok(Via {
            transport,
            sent_by,
            params,
        })
    }
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIP/2.0/{} {}", self.transport, self.sent_by)?;
        for (name, value) in &self.params {
            match value {
                Some(v) => write!(f, ";{}={}", name, v)?,
                None => write!(f, ";{}", name)?,
            }
        }
        Ok(())
    }
}
