//! Utility functions for dialog identity and route-set handling

use sipflow_sip_core::{Address, Method, Request, Uri};

use super::dialog_impl::DialogRequestTemplate;
use crate::errors::{DialogError, DialogResult};

/// Pulls the URI out of a Contact address
pub fn extract_uri_from_contact(contact: &Address) -> Option<Uri> {
    Some(contact.uri.clone())
}

/// Builds the route set from Record-Route entries. The initiator (UAC)
/// learns the set from a response and must reverse it; the UAS keeps
/// request order (RFC 3261 Section 12.1).
pub fn extract_route_set(record_routes: &[Address], is_initiator: bool) -> Vec<Uri> {
    let routes: Vec<Uri> = record_routes.iter().map(|a| a.uri.clone()).collect();
    if is_initiator {
        routes.into_iter().rev().collect()
    } else {
        routes
    }
}

/// Renders an in-dialog request from a dialog template. The Via (with its
/// branch) is stamped by the transaction layer at send time.
pub fn request_from_template(template: &DialogRequestTemplate) -> DialogResult<Request> {
    use sipflow_sip_core::{CSeq, HeaderName};

    if template.method != Method::Ack && template.remote_tag.is_none() {
        return Err(DialogError::protocol(
            "cannot build an in-dialog request before the remote tag is known",
        ));
    }

    let mut request = Request::new(template.method.clone(), template.target_uri.clone());
    request.headers.push(HeaderName::MaxForwards, "70");

    let mut from = Address::new(template.local_uri.clone());
    if let Some(tag) = &template.local_tag {
        from.set_tag(tag.clone());
    }
    request.headers.push(HeaderName::From, from.to_string());

    let mut to = Address::new(template.remote_uri.clone());
    if let Some(tag) = &template.remote_tag {
        to.set_tag(tag.clone());
    }
    request.headers.push(HeaderName::To, to.to_string());

    request.headers.push(HeaderName::CallId, template.call_id.clone());
    request.headers.push(
        HeaderName::CSeq,
        CSeq::new(template.cseq_number, template.method.clone()).to_string(),
    );
    for route in &template.route_set {
        request
            .headers
            .push(HeaderName::Route, Address::new(route.clone()).to_string());
    }
    request.headers.push(
        HeaderName::Contact,
        Address::new(template.local_uri.clone()).to_string(),
    );
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_set_is_reversed_for_the_initiator() {
        let rr: Vec<Address> = vec![
            "<sip:p1.example.com;lr>".parse().unwrap(),
            "<sip:p2.example.com;lr>".parse().unwrap(),
        ];
        let uac = extract_route_set(&rr, true);
        assert_eq!(uac[0].host, "p2.example.com");
        assert_eq!(uac[1].host, "p1.example.com");

        let uas = extract_route_set(&rr, false);
        assert_eq!(uas[0].host, "p1.example.com");
        assert_eq!(uas[1].host, "p2.example.com");
    }

    #[test]
    fn template_renders_identity_and_routes() {
        let template = DialogRequestTemplate {
            method: Method::Bye,
            target_uri: "sip:bob@10.0.0.2:5060".parse().unwrap(),
            call_id: "call-1".to_string(),
            local_uri: "sip:alice@atlanta.com".parse().unwrap(),
            remote_uri: "sip:bob@biloxi.com".parse().unwrap(),
            local_tag: Some("lt".to_string()),
            remote_tag: Some("rt".to_string()),
            cseq_number: 7,
            route_set: vec!["sip:p1.example.com;lr".parse().unwrap()],
        };
        let request = request_from_template(&template).unwrap();
        assert_eq!(request.method, Method::Bye);
        assert_eq!(request.call_id(), Some("call-1"));
        assert_eq!(request.from_tag().as_deref(), Some("lt"));
        assert_eq!(request.to_tag().as_deref(), Some("rt"));
        assert_eq!(request.cseq().unwrap().seq, 7);
        assert_eq!(request.routes().len(), 1);
    }

    #[test]
    fn in_dialog_request_requires_remote_tag() {
        let template = DialogRequestTemplate {
            method: Method::Bye,
            target_uri: "sip:bob@10.0.0.2".parse().unwrap(),
            call_id: "call-2".to_string(),
            local_uri: "sip:alice@atlanta.com".parse().unwrap(),
            remote_uri: "sip:bob@biloxi.com".parse().unwrap(),
            local_tag: Some("lt".to_string()),
            remote_tag: None,
            cseq_number: 1,
            route_set: Vec::new(),
        };
        assert!(request_from_template(&template).is_err());
    }
}
