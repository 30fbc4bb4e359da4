//! Application-facing events
//!
//! The dialog layer delivers everything to the single registered listener
//! as one [`SipEvent`] sum type on an mpsc channel (handed out when the
//! manager is created). Delivery is reentrancy-safe by construction: no
//! transaction or dialog lock is held while an event sits in the channel,
//! so the application may call straight back into the stack from its event
//! loop.

use std::net::SocketAddr;

use sipflow_sip_core::{Request, Response};
use sipflow_transaction_core::TransactionKey;

use crate::dialog::DialogId;

/// Events delivered to the application listener
#[derive(Debug, Clone)]
pub enum SipEvent {
    /// An inbound request. `transaction` is the server transaction to
    /// answer on (`None` for requests that run no transaction, e.g. the
    /// ACK to a 2xx); `dialog` is set when the request matched an
    /// established dialog.
    Request {
        request: Request,
        transaction: Option<TransactionKey>,
        dialog: Option<DialogId>,
        source: SocketAddr,
    },
    /// An inbound response. `transaction: None` marks the stray-response
    /// path: no live client transaction matched, but the message is still
    /// surfaced so stateless applications can act on it. `forked` marks a
    /// response that established a dialog other than the default one;
    /// `retransmission` marks a repeat of an already-delivered response on
    /// an already-answered branch.
    Response {
        response: Response,
        transaction: Option<TransactionKey>,
        dialog: Option<DialogId>,
        forked: bool,
        retransmission: bool,
    },
    /// Timer B/F/H expired: the peer never resolved the transaction.
    /// Recoverable by design; nothing else happens to the stack.
    Timeout { transaction: TransactionKey },
    /// A transaction reached its terminal state and will be collected
    TransactionTerminated { transaction: TransactionKey },
    /// A dialog reached its terminal state. Fires exactly once per dialog
    /// over its whole lifetime.
    DialogTerminated { dialog: DialogId, reason: String },
    /// A transport-level failure, with the destination when known
    TransportError {
        destination: Option<SocketAddr>,
        error: String,
    },
}
