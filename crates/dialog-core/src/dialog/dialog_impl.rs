//! Dialog implementation for RFC 3261 SIP dialogs
//!
//! This module contains the main Dialog struct and its implementation,
//! handling dialog creation, identity and sequence bookkeeping, route-set
//! capture and the Early/Confirmed/Terminated lifecycle.

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;

use tracing::debug;

use sipflow_sip_core::{Request, Response, Uri};

use super::dialog_id::DialogId;
use super::dialog_state::DialogState;
use super::dialog_utils::{extract_uri_from_contact, extract_route_set};
use crate::errors::{DialogError, DialogResult};

/// A SIP dialog as defined in RFC 3261 Section 12
///
/// Identified on the wire by (Call-ID, local tag, remote tag). The remote
/// tag is immutable once set: a response carrying a different remote tag
/// for the same Call-ID belongs to a different, forked dialog and never
/// merges into this one.
#[derive(Clone)]
pub struct Dialog {
    /// Unique identifier for this dialog
    pub id: DialogId,

    /// Current state of the dialog
    pub state: DialogState,

    /// Call-ID for this dialog
    pub call_id: String,

    /// Local URI
    pub local_uri: Uri,

    /// Remote URI
    pub remote_uri: Uri,

    /// Local tag
    pub local_tag: Option<String>,

    /// Remote tag; write-once
    pub remote_tag: Option<String>,

    /// Local sequence number (last one used by a locally generated request)
    pub local_cseq: u32,

    /// Remote sequence number (last one accepted from the peer)
    pub remote_cseq: u32,

    /// Remote target URI (where in-dialog requests are sent)
    pub remote_target: Uri,

    /// Route set captured once at dialog creation from Record-Route
    pub route_set: Vec<Uri>,

    /// Whether this dialog was created by the local UA (UAC role)
    pub is_initiator: bool,

    /// Last known good remote socket address
    pub remote_addr: Option<SocketAddr>,

    /// Whether BYE completion terminates this dialog (default true;
    /// cleared for usages that must survive a BYE, e.g. REFER)
    pub terminate_on_bye: bool,

    /// Application-opaque payload, wholly owned by the dialog
    pub app_data: Option<Arc<dyn Any + Send + Sync>>,
}

impl std::fmt::Debug for Dialog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dialog")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("call_id", &self.call_id)
            .field("local_tag", &self.local_tag)
            .field("remote_tag", &self.remote_tag)
            .field("local_cseq", &self.local_cseq)
            .field("remote_cseq", &self.remote_cseq)
            .field("is_initiator", &self.is_initiator)
            .field("terminate_on_bye", &self.terminate_on_bye)
            .finish()
    }
}

/// Everything needed to build an in-dialog request; produced under the
/// dialog's lock, rendered into a Request outside it
#[derive(Debug, Clone)]
pub struct DialogRequestTemplate {
    pub method: sipflow_sip_core::Method,
    pub target_uri: Uri,
    pub call_id: String,
    pub local_uri: Uri,
    pub remote_uri: Uri,
    pub local_tag: Option<String>,
    pub remote_tag: Option<String>,
    pub cseq_number: u32,
    pub route_set: Vec<Uri>,
}

impl Dialog {
    /// Create a new dialog in the unset state
    pub fn new(
        call_id: String,
        local_uri: Uri,
        remote_uri: Uri,
        local_tag: Option<String>,
        remote_tag: Option<String>,
        is_initiator: bool,
    ) -> Self {
        Self {
            id: DialogId::new(),
            state: DialogState::Initial,
            call_id,
            local_uri,
            remote_uri: remote_uri.clone(),
            local_tag,
            remote_tag,
            local_cseq: 0,
            remote_cseq: 0,
            remote_target: remote_uri,
            route_set: Vec::new(),
            is_initiator,
            remote_addr: None,
            terminate_on_bye: true,
            app_data: None,
        }
    }

    /// Create a dialog from an early (1xx) response to a dialog-creating
    /// request. Requires a To tag.
    pub fn from_provisional_response(
        request: &Request,
        response: &Response,
        is_initiator: bool,
    ) -> Option<Self> {
        if !response.status.is_provisional() {
            return None;
        }
        Self::from_response_inner(request, response, is_initiator, DialogState::Early)
    }

    /// Create a dialog from a 2xx response to a dialog-creating request
    pub fn from_2xx_response(
        request: &Request,
        response: &Response,
        is_initiator: bool,
    ) -> Option<Self> {
        if !response.status.is_success() {
            return None;
        }
        Self::from_response_inner(request, response, is_initiator, DialogState::Confirmed)
    }

    fn from_response_inner(
        request: &Request,
        response: &Response,
        is_initiator: bool,
        state: DialogState,
    ) -> Option<Self> {
        if !request.method.is_dialog_creating() {
            return None;
        }

        let to = response.to()?;
        // No To tag, no dialog
        to.tag()?;
        let from = response.from()?;
        let call_id = response.call_id()?.to_string();
        let cseq_number = request.cseq()?.seq;

        let (local_tag, remote_tag, local_uri, remote_uri) = if is_initiator {
            (
                from.tag().map(str::to_string),
                to.tag().map(str::to_string),
                from.uri.clone(),
                to.uri.clone(),
            )
        } else {
            (
                to.tag().map(str::to_string),
                from.tag().map(str::to_string),
                to.uri.clone(),
                from.uri.clone(),
            )
        };

        let remote_target = response
            .contact()
            .and_then(|c| extract_uri_from_contact(&c))
            .unwrap_or_else(|| remote_uri.clone());

        let route_set = extract_route_set(&response.record_routes(), is_initiator);

        Some(Self {
            id: DialogId::new(),
            state,
            call_id,
            local_uri,
            remote_uri,
            local_tag,
            remote_tag,
            local_cseq: if is_initiator { cseq_number } else { 0 },
            remote_cseq: if is_initiator { 0 } else { cseq_number },
            remote_target,
            route_set,
            is_initiator,
            remote_addr: None,
            terminate_on_bye: true,
            app_data: None,
        })
    }

    /// Create a UAS dialog from an inbound dialog-creating request. The
    /// dialog stays unset until a tagged response is actually sent.
    pub fn from_request(request: &Request, source: SocketAddr) -> Option<Self> {
        if !request.method.is_dialog_creating() {
            return None;
        }
        let from = request.from()?;
        let to = request.to()?;
        let call_id = request.call_id()?.to_string();
        let cseq_number = request.cseq()?.seq;

        let remote_target = request
            .contact()
            .and_then(|c| extract_uri_from_contact(&c))
            .unwrap_or_else(|| from.uri.clone());

        // UAS keeps the request's Record-Route order
        let route_set = extract_route_set(&request.record_routes(), false);

        Some(Self {
            id: DialogId::new(),
            state: DialogState::Initial,
            call_id,
            local_uri: to.uri.clone(),
            remote_uri: from.uri.clone(),
            local_tag: None,
            remote_tag: from.tag().map(str::to_string),
            local_cseq: 0,
            remote_cseq: cseq_number,
            remote_target,
            route_set,
            is_initiator: false,
            remote_addr: Some(source),
            terminate_on_bye: true,
            app_data: None,
        })
    }

    /// Get the dialog id tuple (Call-ID, local tag, remote tag), available
    /// once both tags are known
    pub fn dialog_id_tuple(&self) -> Option<(String, String, String)> {
        match (&self.local_tag, &self.remote_tag) {
            (Some(local), Some(remote)) => {
                Some((self.call_id.clone(), local.clone(), remote.clone()))
            }
            _ => None,
        }
    }

    /// Sets the remote tag; write-once. Returns false when a different tag
    /// is already in place (a forked sibling, never merged here).
    pub fn set_remote_tag(&mut self, tag: impl Into<String>) -> bool {
        let tag = tag.into();
        match &self.remote_tag {
            None => {
                debug!(dialog = %self.id, %tag, "setting remote tag");
                self.remote_tag = Some(tag);
                true
            }
            Some(existing) => *existing == tag,
        }
    }

    /// Move an unset dialog to Early
    pub fn establish_early(&mut self) -> bool {
        if self.state == DialogState::Initial {
            self.state = DialogState::Early;
            true
        } else {
            false
        }
    }

    /// Update dialog state from a 2xx response (UAC side): Early/Initial
    /// moves to Confirmed and the remote target is refreshed from Contact
    pub fn update_from_2xx(&mut self, response: &Response) -> bool {
        if !matches!(self.state, DialogState::Initial | DialogState::Early) {
            return false;
        }
        if let Some(tag) = response.to_tag() {
            if !self.set_remote_tag(tag) {
                return false;
            }
        }
        if let Some(uri) = response.contact().and_then(|c| extract_uri_from_contact(&c)) {
            self.remote_target = uri;
        }
        self.state = DialogState::Confirmed;
        true
    }

    /// Confirm a UAS dialog when a 2xx with a local tag goes out
    pub fn confirm_with_tag(&mut self, local_tag: String) {
        if self.local_tag.is_none() {
            self.local_tag = Some(local_tag);
        }
        self.state = DialogState::Confirmed;
    }

    /// Next local CSeq: strictly monotonically increasing
    pub fn next_local_cseq(&mut self) -> u32 {
        self.local_cseq += 1;
        self.local_cseq
    }

    /// Accept or reject a remote CSeq from an in-dialog request. With
    /// validation on, values at or below the last accepted one are
    /// rejected and the dialog state stays untouched.
    pub fn update_remote_sequence(&mut self, new_seq: u32, validate: bool) -> DialogResult<()> {
        if validate && self.remote_cseq != 0 && new_seq <= self.remote_cseq {
            return Err(DialogError::OutOfOrderCseq {
                got: new_seq,
                last: self.remote_cseq,
            });
        }
        self.remote_cseq = new_seq;
        Ok(())
    }

    /// Build the template for an in-dialog request, bumping the local CSeq
    /// (except for ACK, which reuses the INVITE's)
    pub fn create_request_template(
        &mut self,
        method: sipflow_sip_core::Method,
    ) -> DialogRequestTemplate {
        if method != sipflow_sip_core::Method::Ack {
            self.next_local_cseq();
        }
        DialogRequestTemplate {
            method,
            target_uri: self.remote_target.clone(),
            call_id: self.call_id.clone(),
            local_uri: self.local_uri.clone(),
            remote_uri: self.remote_uri.clone(),
            local_tag: self.local_tag.clone(),
            remote_tag: self.remote_tag.clone(),
            cseq_number: self.local_cseq,
            route_set: self.route_set.clone(),
        }
    }

    /// Move to Terminated. Returns true only for the transition that
    /// actually crossed into the terminal state, which is what guarantees a
    /// single termination notification.
    pub fn terminate(&mut self) -> bool {
        if self.state == DialogState::Terminated {
            false
        } else {
            self.state = DialogState::Terminated;
            true
        }
    }

    /// Check if dialog is terminated
    pub fn is_terminated(&self) -> bool {
        self.state == DialogState::Terminated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dialog() -> Dialog {
        Dialog::new(
            "test-call-id".to_string(),
            "sip:alice@example.com".parse().unwrap(),
            "sip:bob@example.com".parse().unwrap(),
            Some("tag1".to_string()),
            Some("tag2".to_string()),
            true,
        )
    }

    #[test]
    fn creation_starts_unset() {
        let d = dialog();
        assert_eq!(d.state, DialogState::Initial);
        assert!(d.is_initiator);
        assert!(d.terminate_on_bye);
        assert!(!d.is_terminated());
    }

    #[test]
    fn dialog_id_tuple_requires_both_tags() {
        let d = dialog();
        let tuple = d.dialog_id_tuple().unwrap();
        assert_eq!(tuple, ("test-call-id".to_string(), "tag1".to_string(), "tag2".to_string()));

        let mut d = dialog();
        d.remote_tag = None;
        assert!(d.dialog_id_tuple().is_none());
    }

    #[test]
    fn remote_tag_is_write_once() {
        let mut d = dialog();
        d.remote_tag = None;
        assert!(d.set_remote_tag("first"));
        assert!(d.set_remote_tag("first"));
        assert!(!d.set_remote_tag("second"));
        assert_eq!(d.remote_tag.as_deref(), Some("first"));
    }

    #[test]
    fn local_cseq_is_strictly_monotonic() {
        let mut d = dialog();
        let mut last = 0;
        for _ in 0..5 {
            let next = d.next_local_cseq();
            assert!(next > last);
            last = next;
        }
    }

    #[test]
    fn out_of_order_remote_cseq_rejected_when_validating() {
        let mut d = dialog();
        d.update_remote_sequence(10, true).unwrap();
        assert!(matches!(
            d.update_remote_sequence(10, true),
            Err(DialogError::OutOfOrderCseq { got: 10, last: 10 })
        ));
        assert!(d.update_remote_sequence(9, true).is_err());
        assert_eq!(d.remote_cseq, 10);

        // With validation off anything goes
        d.update_remote_sequence(3, false).unwrap();
        assert_eq!(d.remote_cseq, 3);
    }

    #[test]
    fn terminate_reports_the_crossing_exactly_once() {
        let mut d = dialog();
        assert!(d.terminate());
        assert!(!d.terminate());
        assert!(d.is_terminated());
    }

    #[test]
    fn request_template_bumps_cseq_except_for_ack() {
        let mut d = dialog();
        let bye = d.create_request_template(sipflow_sip_core::Method::Bye);
        assert_eq!(bye.cseq_number, 1);
        let ack = d.create_request_template(sipflow_sip_core::Method::Ack);
        assert_eq!(ack.cseq_number, 1);
        let reinvite = d.create_request_template(sipflow_sip_core::Method::Invite);
        assert_eq!(reinvite.cseq_number, 2);
    }
}
