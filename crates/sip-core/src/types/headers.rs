//! The SIP header collection
//!
//! Headers are an ordered multimap with case-insensitive names. Some headers
//! are singletons (Call-ID, CSeq), some accumulate as lists (Via, Route,
//! Record-Route); the collection itself does not enforce that distinction —
//! callers use [`Headers::get`] for the former and [`Headers::get_all`] for
//! the latter.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A header field name, case-insensitive
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HeaderName {
    Via,
    From,
    To,
    CallId,
    CSeq,
    Contact,
    Route,
    RecordRoute,
    MaxForwards,
    ContentType,
    ContentLength,
    Expires,
    UserAgent,
    /// Any other header, stored lowercased so equality stays case-insensitive
    Other(String),
}

impl HeaderName {
    /// Canonical wire spelling of the header name
    pub fn as_str(&self) -> &str {
        match self {
            HeaderName::Via => "Via",
            HeaderName::From => "From",
            HeaderName::To => "To",
            HeaderName::CallId => "Call-ID",
            HeaderName::CSeq => "CSeq",
            HeaderName::Contact => "Contact",
            HeaderName::Route => "Route",
            HeaderName::RecordRoute => "Record-Route",
            HeaderName::MaxForwards => "Max-Forwards",
            HeaderName::ContentType => "Content-Type",
            HeaderName::ContentLength => "Content-Length",
            HeaderName::Expires => "Expires",
            HeaderName::UserAgent => "User-Agent",
            HeaderName::Other(name) => name,
        }
    }
}

impl fmt::Display for HeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HeaderName {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Compact forms per RFC 3261 Section 7.3.3
        Ok(match s.to_ascii_lowercase().as_str() {
            "via" | "v" => HeaderName::Via,
            "from" | "f" => HeaderName::From,
            "to" | "t" => HeaderName::To,
            "call-id" | "i" => HeaderName::CallId,
            "cseq" => HeaderName::CSeq,
            "contact" | "m" => HeaderName::Contact,
            "route" => HeaderName::Route,
            "record-route" => HeaderName::RecordRoute,
            "max-forwards" => HeaderName::MaxForwards,
            "content-type" | "c" => HeaderName::ContentType,
            "content-length" | "l" => HeaderName::ContentLength,
            "expires" => HeaderName::Expires,
            "user-agent" => HeaderName::UserAgent,
            other => HeaderName::Other(other.to_string()),
        })
    }
}

/// A single header field: name plus the raw value string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: HeaderName,
    pub value: String,
}

impl Header {
    pub fn new(name: HeaderName, value: impl Into<String>) -> Self {
        Header {
            name,
            value: value.into(),
        }
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.value)
    }
}

/// Ordered header multimap
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers(Vec<Header>);

impl Headers {
    pub fn new() -> Self {
        Headers(Vec::new())
    }

    /// Appends a header, preserving insertion order
    pub fn push(&mut self, name: HeaderName, value: impl Into<String>) {
        self.0.push(Header::new(name, value));
    }

    /// Replaces every occurrence of `name` with a single header at the
    /// position of the first occurrence (or the end if absent)
    pub fn set(&mut self, name: HeaderName, value: impl Into<String>) {
        let value = value.into();
        match self.0.iter().position(|h| h.name == name) {
            Some(first) => {
                self.0[first].value = value;
                let keep_until = first + 1;
                let mut i = keep_until;
                while i < self.0.len() {
                    if self.0[i].name == name {
                        self.0.remove(i);
                    } else {
                        i += 1;
                    }
                }
            }
            None => self.push(name, value),
        }
    }

    /// First value for `name`
    pub fn get(&self, name: &HeaderName) -> Option<&str> {
        self.0
            .iter()
            .find(|h| &h.name == name)
            .map(|h| h.value.as_str())
    }

    /// All values for `name`, in order
    pub fn get_all(&self, name: &HeaderName) -> Vec<&str> {
        self.0
            .iter()
            .filter(|h| &h.name == name)
            .map(|h| h.value.as_str())
            .collect()
    }

    /// Removes every occurrence of `name`
    pub fn remove(&mut self, name: &HeaderName) {
        self.0.retain(|h| &h.name != name);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for header in &self.0 {
            write!(f, "{}\r\n", header)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_case_insensitive() {
        assert_eq!("CALL-ID".parse::<HeaderName>().unwrap(), HeaderName::CallId);
        assert_eq!("i".parse::<HeaderName>().unwrap(), HeaderName::CallId);
        assert_eq!(
            "X-Custom".parse::<HeaderName>().unwrap(),
            "x-custom".parse::<HeaderName>().unwrap()
        );
    }

    #[test]
    fn multimap_preserves_order() {
        let mut headers = Headers::new();
        headers.push(HeaderName::Via, "SIP/2.0/UDP a;branch=z9hG4bK1");
        headers.push(HeaderName::CallId, "abc");
        headers.push(HeaderName::Via, "SIP/2.0/UDP b;branch=z9hG4bK2");

        let vias = headers.get_all(&HeaderName::Via);
        assert_eq!(vias.len(), 2);
        assert!(vias[0].contains("UDP a"));
        assert!(vias[1].contains("UDP b"));
        assert_eq!(headers.get(&HeaderName::CallId), Some("abc"));
    }

    #[test]
    fn set_collapses_duplicates() {
        let mut headers = Headers::new();
        headers.push(HeaderName::Contact, "<sip:a@a>");
        headers.push(HeaderName::Contact, "<sip:b@b>");
        headers.set(HeaderName::Contact, "<sip:c@c>");
        assert_eq!(headers.get_all(&HeaderName::Contact), vec!["<sip:c@c>"]);
    }
}
