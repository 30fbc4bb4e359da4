//! Framing-level SIP message parsing
//!
//! Splits a datagram into start line, header lines, and body, and parses the
//! start line. Header values are kept as raw strings; structured parsing of
//! identity fields happens lazily through the accessors on
//! [`Request`]/[`Response`]. Line folding and multi-value comma splitting
//! are not handled here.

use std::str::FromStr;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::message::{Message, Request, Response};
use crate::types::headers::{HeaderName, Headers};
use crate::types::method::Method;
use crate::types::status::StatusCode;
use crate::types::uri::Uri;

/// Parses raw wire bytes into a [`Message`]
pub fn parse_message(data: &[u8]) -> Result<Message> {
    let text = std::str::from_utf8(data).map_err(|_| Error::Truncated)?;

    let (head, body) = match text.split_once("\r\n\r\n") {
        Some((head, body)) => (head, body),
        // Tolerate messages without the terminating blank line as long as
        // the header section is complete
        None => (text.trim_end_matches("\r\n"), ""),
    };

    let mut lines = head.split("\r\n");
    let start_line = lines.next().filter(|l| !l.is_empty()).ok_or(Error::Truncated)?;

    let mut headers = Headers::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::MalformedHeader(line.to_string()))?;
        let name = HeaderName::from_str(name.trim()).expect("header name parse is infallible");
        headers.push(name, value.trim());
    }

    let body = Bytes::from(body.as_bytes().to_vec());

    if let Some(rest) = start_line.strip_prefix("SIP/2.0 ") {
        // Status line: SIP/2.0 <code> <reason>
        let (code, reason) = rest
            .split_once(' ')
            .map(|(c, r)| (c, Some(r)))
            .unwrap_or((rest, None));
        let status: StatusCode = code.parse()?;
        let reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty() && *r != status.reason_phrase())
            .map(str::to_string);
        Ok(Message::Response(Response {
            status,
            reason,
            headers,
            body,
        }))
    } else {
        // Request line: <method> <uri> SIP/2.0
        let mut parts = start_line.split_whitespace();
        let method = parts
            .next()
            .ok_or_else(|| Error::InvalidStartLine(start_line.to_string()))?;
        let uri = parts
            .next()
            .ok_or_else(|| Error::InvalidStartLine(start_line.to_string()))?;
        let version = parts.next();
        if version != Some("SIP/2.0") {
            return Err(Error::InvalidStartLine(start_line.to_string()));
        }
        let method = Method::from_str(method).expect("method parse is infallible");
        let uri: Uri = uri.parse()?;
        Ok(Message::Request(Request {
            method,
            uri,
            headers,
            body,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW_INVITE: &str = "INVITE sip:bob@biloxi.com SIP/2.0\r\n\
        Via: SIP/2.0/UDP pc33.atlanta.com;branch=z9hG4bKnashds8\r\n\
        Max-Forwards: 70\r\n\
        To: Bob <sip:bob@biloxi.com>\r\n\
        From: Alice <sip:alice@atlanta.com>;tag=1928301774\r\n\
        Call-ID: a84b4c76e66710\r\n\
        CSeq: 314159 INVITE\r\n\
        Content-Length: 0\r\n\
        \r\n";

    #[test]
    fn parses_request() {
        let message = parse_message(RAW_INVITE.as_bytes()).unwrap();
        let Message::Request(request) = message else {
            panic!("expected a request");
        };
        assert_eq!(request.method, Method::Invite);
        assert_eq!(request.branch().as_deref(), Some("z9hG4bKnashds8"));
        assert_eq!(request.call_id(), Some("a84b4c76e66710"));
    }

    #[test]
    fn parses_response_with_body() {
        let raw = "SIP/2.0 200 OK\r\n\
            Via: SIP/2.0/UDP host;branch=z9hG4bKabc\r\n\
            Call-ID: xyz\r\n\
            CSeq: 1 OPTIONS\r\n\
            Content-Length: 4\r\n\
            \r\nbody";
        let message = parse_message(raw.as_bytes()).unwrap();
        let Message::Response(response) = message else {
            panic!("expected a response");
        };
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(&response.body[..], b"body");
    }

    #[test]
    fn preserves_noncanonical_reason() {
        let raw = "SIP/2.0 486 Totally Swamped\r\nCSeq: 2 INVITE\r\n\r\n";
        let Message::Response(response) = parse_message(raw.as_bytes()).unwrap() else {
            panic!("expected a response");
        };
        assert_eq!(response.reason_phrase(), "Totally Swamped");
    }

    #[test]
    fn round_trips_through_serialization() {
        let Message::Request(request) = parse_message(RAW_INVITE.as_bytes()).unwrap() else {
            panic!("expected a request");
        };
        let reparsed = parse_message(&request.to_bytes()).unwrap();
        assert_eq!(Message::Request(request), reparsed);
    }

    #[test]
    fn rejects_malformed_start_line() {
        assert!(parse_message(b"NOT A SIP MESSAGE\r\n\r\n").is_err());
        assert!(parse_message(b"").is_err());
    }
}
