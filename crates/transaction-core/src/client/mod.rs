//! Client transaction state machines
//!
//! [`InviteClientLogic`] implements RFC 3261 Section 17.1.1,
//! [`NonInviteClientLogic`] Section 17.1.2, both adjusted to this stack's
//! rules: a 2xx final also parks the INVITE machine in Completed (the TU
//! generates the ACK there), and the non-INVITE retransmit timer stops
//! outright on the first provisional.

pub mod invite;
pub mod non_invite;

pub use invite::InviteClientLogic;
pub use non_invite::NonInviteClientLogic;

use std::sync::Arc;

use sipflow_sip_core::Response;

use crate::transaction::logic::TransactionData;
use crate::transaction::TransactionEvent;

/// Delivers a response to the TU with the right event variant
pub(crate) async fn deliver_response(
    data: &Arc<TransactionData>,
    response: Response,
    is_retransmission: bool,
) {
    let event = if response.status.is_provisional() {
        TransactionEvent::ProvisionalResponse {
            transaction_id: data.key.clone(),
            response,
            is_retransmission,
        }
    } else if response.status.is_success() {
        TransactionEvent::SuccessResponse {
            transaction_id: data.key.clone(),
            response,
            is_retransmission,
        }
    } else {
        TransactionEvent::FailureResponse {
            transaction_id: data.key.clone(),
            response,
            is_retransmission,
        }
    };
    let _ = data.events_tx.send(event).await;
}
