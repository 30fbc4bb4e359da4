//! SIP URIs
//!
//! A deliberately small URI model: scheme, optional user, host, optional
//! port, and a flat parameter list. This is all the transaction and dialog
//! layers need for routing and route-set bookkeeping; full RFC 3261 URI
//! grammar (headers, escaping) is out of scope.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A SIP or SIPS URI
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Uri {
    pub scheme: String,
    pub user: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    /// URI parameters in order of appearance; a flag parameter has no value
    pub params: Vec<(String, Option<String>)>,
}

impl Uri {
    /// Builds `sip:user@host`
    pub fn sip(user: impl Into<String>, host: impl Into<String>) -> Self {
        Uri {
            scheme: "sip".to_string(),
            user: Some(user.into()),
            host: host.into(),
            port: None,
            params: Vec::new(),
        }
    }

    /// Builds `sip:host` with no user part
    pub fn sip_host(host: impl Into<String>) -> Self {
        Uri {
            scheme: "sip".to_string(),
            user: None,
            host: host.into(),
            port: None,
            params: Vec::new(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: Option<String>) -> Self {
        self.params.push((name.into(), value));
        self
    }

    /// Looks up a URI parameter value; `Some("")` for flag parameters
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_deref().unwrap_or(""))
    }

    /// True when the URI carries the `lr` loose-routing flag
    pub fn is_loose_routing(&self) -> bool {
        self.parameter("lr").is_some()
    }
}

impl FromStr for Uri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (scheme, rest) = s
            .split_once(':')
            .ok_or_else(|| Error::InvalidUri(s.to_string()))?;
        if !scheme.eq_ignore_ascii_case("sip") && !scheme.eq_ignore_ascii_case("sips") {
            return Err(Error::InvalidUri(s.to_string()));
        }

        let mut parts = rest.split(';');
        let authority = parts.next().unwrap_or_default();
        if authority.is_empty() {
            return Err(Error::InvalidUri(s.to_string()));
        }

        let (user, hostport) = match authority.split_once('@') {
            Some((user, hostport)) => (Some(user.to_string()), hostport),
            None => (None, authority),
        };

        let (host, port) = match hostport.rsplit_once(':') {
            // Only treat the suffix as a port when it is numeric; IPv6
            // literals in brackets keep their colons
            Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) && !port.is_empty() => {
                let port = port
                    .parse()
                    .map_err(|_| Error::InvalidUri(s.to_string()))?;
                (host.to_string(), Some(port))
            }
            _ => (hostport.to_string(), None),
        };
        if host.is_empty() {
            return Err(Error::InvalidUri(s.to_string()));
        }

        let params = parts
            .filter(|p| !p.is_empty())
            .map(|p| match p.split_once('=') {
                Some((n, v)) => (n.to_string(), Some(v.to_string())),
                None => (p.to_string(), None),
            })
            .collect();

        Ok(Uri {
            scheme: scheme.to_ascii_lowercase(),
            user,
            host,
            port,
            params,
        })
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.scheme)?;
        if let Some(user) = &self.user {
            write!(f, "{}@", user)?;
        }
        f.write_str(&self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        for (name, value) in &self.params {
            match value {
                Some(v) => write!(f, ";{}={}", name, v)?,
                None => write!(f, ";{}", name)?,
            }
        }
        Ok(())
    }
}
