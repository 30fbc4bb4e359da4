//! Name-addr values (From, To, Contact, Route, Record-Route)
//!
//! An [`Address`] is a URI with an optional display name and header
//! parameters — most importantly the `tag` parameter that, together with the
//! Call-ID, identifies a dialog.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::types::uri::Uri;

/// A `name-addr` / `addr-spec` header value with its parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub display_name: Option<String>,
    pub uri: Uri,
    /// Header parameters (after the closing `>`), in order of appearance
    pub params: Vec<(String, Option<String>)>,
}

impl Address {
    pub fn new(uri: Uri) -> Self {
        Address {
            display_name: None,
            uri,
            params: Vec::new(),
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.set_tag(tag.into());
        self
    }

    /// Looks up a header parameter; `Some("")` for flag parameters
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_deref().unwrap_or(""))
    }

    /// The `tag` parameter, when present
    pub fn tag(&self) -> Option<&str> {
        self.parameter("tag").filter(|t| !t.is_empty())
    }

    /// Sets or replaces the `tag` parameter
    pub fn set_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        for (name, value) in &mut self.params {
            if name.eq_ignore_ascii_case("tag") {
                *value = Some(tag);
                return;
            }
        }
        self.params.push(("tag".to_string(), Some(tag)));
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        if let Some(open) = s.find('<') {
            let close = s[open..]
                .find('>')
                .map(|i| open + i)
                .ok_or_else(|| Error::InvalidHeaderValue {
                    field: "address",
                    value: s.to_string(),
                })?;

            let display = s[..open].trim().trim_matches('"');
            let display_name = if display.is_empty() {
                None
            } else {
                Some(display.to_string())
            };

            let uri: Uri = s[open + 1..close].parse()?;
            let params = parse_params(&s[close + 1..]);

            Ok(Address {
                display_name,
                uri,
                params,
            })
        } else {
            // addr-spec form: header parameters follow the URI after the
            // first semicolon. URI parameters are not distinguished here;
            // for the identity fields this stack reads (tag) that is the
            // interpretation RFC 3261 mandates for From/To.
            let (uri_part, params_part) = match s.find(';') {
                Some(i) => (&s[..i], &s[i..]),
                None => (s, ""),
            };
            let uri: Uri = uri_part.parse()?;
            let params = parse_params(params_part);
            Ok(Address {
                display_name: None,
                uri,
                params,
            })
        }
    }
}

fn parse_params(s: &str) -> Vec<(String, Option<String>)> {
    s.split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| match p.split_once('=') {
            Some((n, v)) => (n.to_string(), Some(v.to_string())),
            None => (p.to_string(), None),
        })
        .collect()
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.display_name {
            write!(f, "\"{}\" ", name)?;
        }
        write!(f, "<{}>", self.uri)?;
        for (name, value) in &self.params {
            match value {
                Some(v) => write!(f, ";{}={}", name, v)?,
                None => write!(f, ";{}", name)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_name_addr_with_tag() {
        let addr: Address = "\"Alice\" <sip:alice@example.com>;tag=1928301774".parse().unwrap();
        assert_eq!(addr.display_name.as_deref(), Some("Alice"));
        assert_eq!(addr.uri.user.as_deref(), Some("alice"));
        assert_eq!(addr.tag(), Some("1928301774"));
    }

    #[test]
    fn parse_bare_addr_spec() {
        let addr: Address = "sip:bob@biloxi.com;tag=a6c85cf".parse().unwrap();
        assert!(addr.display_name.is_none());
        assert_eq!(addr.tag(), Some("a6c85cf"));
    }

    #[test]
    fn tag_absent() {
        let addr: Address = "<sip:bob@biloxi.com>".parse().unwrap();
        assert_eq!(addr.tag(), None);
    }

    #[test]
    fn set_tag_replaces_existing() {
        let mut addr: Address = "<sip:bob@biloxi.com>;tag=old".parse().unwrap();
        addr.set_tag("new");
        assert_eq!(addr.tag(), Some("new"));
        assert_eq!(addr.params.len(), 1);
    }

    #[test]
    fn display_round_trip() {
        let text = "\"Bob\" <sip:bob@biloxi.com:5060>;tag=abc";
        let addr: Address = text.parse().unwrap();
        assert_eq!(addr.to_string(), text);
    }
}
