//! SIP requests and responses
//!
//! [`Request`] and [`Response`] are value objects: a start line, the ordered
//! [`Headers`] multimap, and an opaque body. The typed accessors below parse
//! the identity fields on demand from the raw header strings; a `None`
//! return means the header is absent or unparseable, and the caller decides
//! whether that is an error.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::types::address::Address;
use crate::types::cseq::CSeq;
use crate::types::headers::{HeaderName, Headers};
use crate::types::method::Method;
use crate::types::status::StatusCode;
use crate::types::uri::Uri;
use crate::types::via::Via;

/// A SIP request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub method: Method,
    pub uri: Uri,
    pub headers: Headers,
    pub body: Bytes,
}

/// A SIP response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: StatusCode,
    /// Reason phrase from the wire when it differs from the canonical one
    pub reason: Option<String>,
    pub headers: Headers,
    pub body: Bytes,
}

/// Either a request or a response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Request(Request),
    Response(Response),
}

macro_rules! identity_accessors {
    () => {
        /// The Call-ID header value
        pub fn call_id(&self) -> Option<&str> {
            self.headers.get(&HeaderName::CallId)
        }

        /// The From header, parsed
        pub fn from(&self) -> Option<Address> {
            self.headers.get(&HeaderName::From)?.parse().ok()
        }

        /// The To header, parsed
        pub fn to(&self) -> Option<Address> {
            self.headers.get(&HeaderName::To)?.parse().ok()
        }

        /// The From tag
        pub fn from_tag(&self) -> Option<String> {
            self.from()?.tag().map(str::to_string)
        }

        /// The To tag
        pub fn to_tag(&self) -> Option<String> {
            self.to()?.tag().map(str::to_string)
        }

        /// The CSeq header, parsed
        pub fn cseq(&self) -> Option<CSeq> {
            self.headers.get(&HeaderName::CSeq)?.parse().ok()
        }

        /// The topmost Via header, parsed
        pub fn top_via(&self) -> Option<Via> {
            self.headers.get(&HeaderName::Via)?.parse().ok()
        }

        /// The branch parameter of the topmost Via
        pub fn branch(&self) -> Option<String> {
            self.top_via()?.branch().map(str::to_string)
        }

        /// The first Contact header, parsed
        pub fn contact(&self) -> Option<Address> {
            self.headers.get(&HeaderName::Contact)?.parse().ok()
        }

        /// All Record-Route entries in header order
        pub fn record_routes(&self) -> Vec<Address> {
            self.headers
                .get_all(&HeaderName::RecordRoute)
                .into_iter()
                .filter_map(|v| v.parse().ok())
                .collect()
        }

        /// All Route entries in header order
        pub fn routes(&self) -> Vec<Address> {
            self.headers
                .get_all(&HeaderName::Route)
                .into_iter()
                .filter_map(|v| v.parse().ok())
                .collect()
        }
    };
}

impl Request {
    pub fn new(method: Method, uri: Uri) -> Self {
        Request {
            method,
            uri,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    identity_accessors!();

    /// Serializes the request to wire bytes, stamping Content-Length
    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.to_string().into_bytes())
    }
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Response {
            status,
            reason: None,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    identity_accessors!();

    /// The numeric status code
    pub fn status_code(&self) -> u16 {
        self.status.as_u16()
    }

    /// The reason phrase: the wire value if one was carried, otherwise the
    /// canonical phrase for the code
    pub fn reason_phrase(&self) -> &str {
        self.reason
            .as_deref()
            .unwrap_or_else(|| self.status.reason_phrase())
    }

    /// Serializes the response to wire bytes, stamping Content-Length
    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.to_string().into_bytes())
    }
}

impl Message {
    pub fn is_request(&self) -> bool {
        matches!(self, Message::Request(_))
    }

    pub fn is_response(&self) -> bool {
        matches!(self, Message::Response(_))
    }

    /// The request method, when this is a request
    pub fn method(&self) -> Option<&Method> {
        match self {
            Message::Request(r) => Some(&r.method),
            Message::Response(_) => None,
        }
    }

    pub fn headers(&self) -> &Headers {
        match self {
            Message::Request(r) => &r.headers,
            Message::Response(r) => &r.headers,
        }
    }

    /// The branch parameter of the topmost Via
    pub fn branch(&self) -> Option<String> {
        match self {
            Message::Request(r) => r.branch(),
            Message::Response(r) => r.branch(),
        }
    }

    /// The CSeq header, parsed
    pub fn cseq(&self) -> Option<CSeq> {
        match self {
            Message::Request(r) => r.cseq(),
            Message::Response(r) => r.cseq(),
        }
    }

    /// The Call-ID header value
    pub fn call_id(&self) -> Option<&str> {
        match self {
            Message::Request(r) => r.call_id(),
            Message::Response(r) => r.call_id(),
        }
    }

    /// Serializes to wire bytes
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Message::Request(r) => r.to_bytes(),
            Message::Response(r) => r.to_bytes(),
        }
    }
}

impl From<Request> for Message {
    fn from(request: Request) -> Self {
        Message::Request(request)
    }
}

impl From<Response> for Message {
    fn from(response: Response) -> Self {
        Message::Response(response)
    }
}

fn write_message(
    f: &mut fmt::Formatter<'_>,
    headers: &Headers,
    body: &Bytes,
) -> fmt::Result {
    let mut wrote_content_length = false;
    for header in headers.iter() {
        if header.name == HeaderName::ContentLength {
            // Re-stamp so serialized output is always self-consistent
            write!(f, "Content-Length: {}\r\n", body.len())?;
            wrote_content_length = true;
        } else {
            write!(f, "{}\r\n", header)?;
        }
    }
    if !wrote_content_length {
        write!(f, "Content-Length: {}\r\n", body.len())?;
    }
    write!(f, "\r\n")?;
    if !body.is_empty() {
        f.write_str(&String::from_utf8_lossy(body))?;
    }
    Ok(())
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} SIP/2.0\r\n", self.method, self.uri)?;
        write_message(f, &self.headers, &self.body)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SIP/2.0 {} {}\r\n",
            self.status.as_u16(),
            self.reason_phrase()
        )?;
        write_message(f, &self.headers, &self.body)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Request(r) => r.fmt(f),
            Message::Response(r) => r.fmt(f),
        }
    }
}
