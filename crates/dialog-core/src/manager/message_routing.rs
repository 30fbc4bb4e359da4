//! Dialog matching for inbound traffic
//!
//! RFC 3261 Section 12.2: a dialog is identified by Call-ID plus local and
//! remote tags. For an inbound request the local tag is the To tag and the
//! remote tag the From tag; for an inbound response the roles flip. The
//! lookup table is keyed by the rendered triple.

use sipflow_sip_core::{Request, Response};

/// Renders the (Call-ID, local tag, remote tag) triple into the lookup key
pub(crate) fn lookup_key(call_id: &str, local_tag: &str, remote_tag: &str) -> String {
    format!("{}:{}:{}", call_id, local_tag, remote_tag)
}

/// Lookup key for an inbound request (local = To tag, remote = From tag);
/// `None` when either tag is missing (out-of-dialog request)
pub(crate) fn key_for_incoming_request(request: &Request) -> Option<String> {
    let call_id = request.call_id()?;
    let local = request.to_tag()?;
    let remote = request.from_tag()?;
    Some(lookup_key(call_id, &local, &remote))
}

/// Lookup key for an inbound response (local = From tag, remote = To tag)
pub(crate) fn key_for_incoming_response(response: &Response) -> Option<String> {
    let call_id = response.call_id()?;
    let local = response.from_tag()?;
    let remote = response.to_tag()?;
    Some(lookup_key(call_id, &local, &remote))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sipflow_sip_core::{HeaderName, Method, Request, Response, StatusCode};

    fn request_with_tags(to_tag: Option<&str>) -> Request {
        let mut request = Request::new(Method::Bye, "sip:bob@biloxi.com".parse().unwrap());
        request
            .headers
            .push(HeaderName::From, "<sip:alice@atlanta.com>;tag=ft");
        let to = match to_tag {
            Some(tag) => format!("<sip:bob@biloxi.com>;tag={}", tag),
            None => "<sip:bob@biloxi.com>".to_string(),
        };
        request.headers.push(HeaderName::To, to);
        request.headers.push(HeaderName::CallId, "call-7");
        request
    }

    #[test]
    fn request_key_flips_roles() {
        let request = request_with_tags(Some("tt"));
        assert_eq!(
            key_for_incoming_request(&request).unwrap(),
            lookup_key("call-7", "tt", "ft")
        );
    }

    #[test]
    fn untagged_request_has_no_key() {
        let request = request_with_tags(None);
        assert!(key_for_incoming_request(&request).is_none());
    }

    #[test]
    fn response_key_keeps_local_first() {
        let mut response = Response::new(StatusCode::OK);
        response
            .headers
            .push(HeaderName::From, "<sip:alice@atlanta.com>;tag=ft");
        response
            .headers
            .push(HeaderName::To, "<sip:bob@biloxi.com>;tag=tt");
        response.headers.push(HeaderName::CallId, "call-7");
        assert_eq!(
            key_for_incoming_response(&response).unwrap(),
            lookup_key("call-7", "ft", "tt")
        );
    }
}
