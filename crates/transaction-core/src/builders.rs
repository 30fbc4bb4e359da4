//! Request and response builders
//!
//! Convenience constructors for the messages the transaction layer and its
//! tests exchange. [`client_quick`] builds well-formed out-of-dialog
//! requests plus the ACK and CANCEL forms derived from an INVITE;
//! [`server_quick`] builds responses that mirror a request's identity
//! headers per RFC 3261 Section 8.2.6.

use sipflow_sip_core::{
    Address, CSeq, HeaderName, Method, Request, Response, StatusCode, Uri,
};

use crate::error::{Error, Result};
use crate::utils::{generate_branch, generate_call_id, generate_tag};

/// Client-side request builders
pub mod client_quick {
    use super::*;

    /// Builds an out-of-dialog request with fresh branch, tag and Call-ID
    pub fn request(
        method: Method,
        from_uri: &str,
        to_uri: &str,
        local_addr: &str,
    ) -> Result<Request> {
        let from: Uri = from_uri
            .parse()
            .map_err(|_| Error::InvalidOperation(format!("invalid From URI: {}", from_uri)))?;
        let to: Uri = to_uri
            .parse()
            .map_err(|_| Error::InvalidOperation(format!("invalid To URI: {}", to_uri)))?;

        let mut request = Request::new(method.clone(), to.clone());
        request.headers.push(
            HeaderName::Via,
            format!("SIP/2.0/UDP {};branch={}", local_addr, generate_branch()),
        );
        request.headers.push(HeaderName::MaxForwards, "70");
        request.headers.push(
            HeaderName::From,
            Address::new(from.clone()).with_tag(generate_tag()).to_string(),
        );
        request
            .headers
            .push(HeaderName::To, Address::new(to).to_string());
        request.headers.push(HeaderName::CallId, generate_call_id());
        request
            .headers
            .push(HeaderName::CSeq, CSeq::new(1, method).to_string());
        request.headers.push(
            HeaderName::Contact,
            format!("<sip:{}@{}>", from.user.as_deref().unwrap_or("anonymous"), local_addr),
        );
        Ok(request)
    }

    /// Builds an INVITE
    pub fn invite(from_uri: &str, to_uri: &str, local_addr: &str) -> Result<Request> {
        request(Method::Invite, from_uri, to_uri, local_addr)
    }

    /// Builds an OPTIONS
    pub fn options(from_uri: &str, to_uri: &str, local_addr: &str) -> Result<Request> {
        request(Method::Options, from_uri, to_uri, local_addr)
    }

    /// Builds a REGISTER
    pub fn register(from_uri: &str, registrar_uri: &str, local_addr: &str) -> Result<Request> {
        request(Method::Register, from_uri, registrar_uri, local_addr)
    }

    /// Builds the ACK for a non-2xx final response, per RFC 3261
    /// Section 17.1.1.3: same branch, Request-URI, Call-ID, From and CSeq
    /// number as the INVITE; To copied from the response (with its tag)
    pub fn ack_for_non_2xx(invite: &Request, response: &Response) -> Result<Request> {
        let cseq = invite.cseq().ok_or(Error::MissingField("CSeq"))?;
        let mut ack = Request::new(Method::Ack, invite.uri.clone());

        let via = invite
            .headers
            .get(&HeaderName::Via)
            .ok_or(Error::MissingField("Via"))?;
        ack.headers.push(HeaderName::Via, via);
        ack.headers.push(HeaderName::MaxForwards, "70");
        if let Some(from) = invite.headers.get(&HeaderName::From) {
            ack.headers.push(HeaderName::From, from);
        }
        // To mirrors the response so the peer's tag is acknowledged
        if let Some(to) = response.headers.get(&HeaderName::To) {
            ack.headers.push(HeaderName::To, to);
        } else if let Some(to) = invite.headers.get(&HeaderName::To) {
            ack.headers.push(HeaderName::To, to);
        }
        if let Some(call_id) = invite.call_id() {
            ack.headers.push(HeaderName::CallId, call_id);
        }
        ack.headers
            .push(HeaderName::CSeq, CSeq::new(cseq.seq, Method::Ack).to_string());
        Ok(ack)
    }

    /// Builds the CANCEL for an INVITE, per RFC 3261 Section 9.1: same
    /// Request-URI, branch, Call-ID, From, To and CSeq number, method CANCEL
    pub fn cancel(invite: &Request) -> Result<Request> {
        if invite.method != Method::Invite {
            return Err(Error::InvalidOperation(
                "CANCEL can only be built from an INVITE".to_string(),
            ));
        }
        let cseq = invite.cseq().ok_or(Error::MissingField("CSeq"))?;
        let mut cancel = Request::new(Method::Cancel, invite.uri.clone());

        let via = invite
            .headers
            .get(&HeaderName::Via)
            .ok_or(Error::MissingField("Via"))?;
        cancel.headers.push(HeaderName::Via, via);
        cancel.headers.push(HeaderName::MaxForwards, "70");
        if let Some(from) = invite.headers.get(&HeaderName::From) {
            cancel.headers.push(HeaderName::From, from);
        }
        if let Some(to) = invite.headers.get(&HeaderName::To) {
            cancel.headers.push(HeaderName::To, to);
        }
        if let Some(call_id) = invite.call_id() {
            cancel.headers.push(HeaderName::CallId, call_id);
        }
        cancel
            .headers
            .push(HeaderName::CSeq, CSeq::new(cseq.seq, Method::Cancel).to_string());
        Ok(cancel)
    }
}

/// Server-side response builders
pub mod server_quick {
    use super::*;

    /// Builds a response mirroring the request's Via, From, To, Call-ID and
    /// CSeq (RFC 3261 Section 8.2.6.2), adding `to_tag` when given and the
    /// To header has none yet
    pub fn response_for(
        request: &Request,
        status: StatusCode,
        to_tag: Option<&str>,
    ) -> Result<Response> {
        let mut response = Response::new(status);

        for via in request.headers.get_all(&HeaderName::Via) {
            response.headers.push(HeaderName::Via, via);
        }
        if let Some(from) = request.headers.get(&HeaderName::From) {
            response.headers.push(HeaderName::From, from);
        }

        let to_value = match (request.to(), to_tag) {
            (Some(to), Some(tag)) if to.tag().is_none() => to.with_tag(tag).to_string(),
            (Some(to), _) => to.to_string(),
            (None, _) => return Err(Error::MissingField("To")),
        };
        response.headers.push(HeaderName::To, to_value);

        if let Some(call_id) = request.call_id() {
            response.headers.push(HeaderName::CallId, call_id);
        }
        if let Some(cseq) = request.headers.get(&HeaderName::CSeq) {
            response.headers.push(HeaderName::CSeq, cseq);
        }
        // Record-Route is echoed so dialogs capture the same route set on
        // both sides
        for rr in request.headers.get_all(&HeaderName::RecordRoute) {
            response.headers.push(HeaderName::RecordRoute, rr);
        }
        Ok(response)
    }

    /// 100 Trying (never carries a To tag)
    pub fn trying(request: &Request) -> Result<Response> {
        response_for(request, StatusCode::TRYING, None)
    }

    /// 180 Ringing with a To tag (dialog-creating provisional)
    pub fn ringing(request: &Request, to_tag: &str) -> Result<Response> {
        response_for(request, StatusCode::RINGING, Some(to_tag))
    }

    /// 200 OK with a To tag and Contact
    pub fn ok(request: &Request, to_tag: &str, contact: &str) -> Result<Response> {
        let mut response = response_for(request, StatusCode::OK, Some(to_tag))?;
        response
            .headers
            .push(HeaderName::Contact, format!("<{}>", contact));
        Ok(response)
    }

    /// 486 Busy Here with a To tag
    pub fn busy_here(request: &Request, to_tag: &str) -> Result<Response> {
        response_for(request, StatusCode::BUSY_HERE, Some(to_tag))
    }

    /// 487 Request Terminated (answer to a cancelled INVITE)
    pub fn request_terminated(request: &Request, to_tag: &str) -> Result<Response> {
        response_for(request, StatusCode::REQUEST_TERMINATED, Some(to_tag))
    }
}
