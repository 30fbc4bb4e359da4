//! Transaction layer vocabulary
//!
//! States, kinds, keys, commands and events shared by the four RFC 3261
//! transaction state machines. The per-state transition tables live in
//! [`AtomicTransactionState::validate_transition`]; the machines themselves
//! are in [`crate::client`] and [`crate::server`], driven by the generic
//! event loop in [`runner`].

pub mod logic;
pub mod runner;

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use sipflow_sip_core::{Message, Method, Request, Response};

use crate::error::{Error, Result};
use crate::timer::{TimerHandle, TimerManager, TimerType};

/// States of the RFC 3261 transaction machines
///
/// `Initial` is the pre-send/pre-dispatch resting state; the RFC machines
/// proper begin at Calling/Trying (client) or Proceeding/Trying (server).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionState {
    Initial,
    /// INVITE client: request sent, no response yet
    Calling,
    /// Non-INVITE client and non-INVITE server initial active state
    Trying,
    /// Provisional response seen (client) or being sent (server)
    Proceeding,
    /// Final response seen/sent
    Completed,
    /// INVITE server only: ACK received
    Confirmed,
    /// Terminal state; the transaction is defunct and awaiting collection
    Terminated,
}

/// The four transaction machine kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionKind {
    InviteClient,
    NonInviteClient,
    InviteServer,
    NonInviteServer,
}

impl TransactionKind {
    pub fn is_client(&self) -> bool {
        matches!(self, TransactionKind::InviteClient | TransactionKind::NonInviteClient)
    }

    pub fn is_invite(&self) -> bool {
        matches!(self, TransactionKind::InviteClient | TransactionKind::InviteServer)
    }

    /// The state a freshly dispatched transaction enters
    pub fn initial_active_state(&self) -> TransactionState {
        match self {
            TransactionKind::InviteClient => TransactionState::Calling,
            TransactionKind::NonInviteClient => TransactionState::Trying,
            TransactionKind::InviteServer => TransactionState::Proceeding,
            TransactionKind::NonInviteServer => TransactionState::Trying,
        }
    }
}

/// Unique identifier of a transaction: branch + CSeq method + role
///
/// RFC 3261 Section 17.1.3/17.2.3: the branch parameter of the topmost Via
/// identifies the transaction attempt; the method disambiguates the CANCEL
/// and ACK transactions that reuse the INVITE's branch. A retransmission
/// carries the same key and must match the existing transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionKey {
    pub branch: String,
    pub method: Method,
    pub is_server: bool,
}

impl TransactionKey {
    pub fn new(branch: impl Into<String>, method: Method, is_server: bool) -> Self {
        TransactionKey {
            branch: branch.into(),
            method,
            is_server,
        }
    }

    /// Key for a request, from its topmost Via branch
    pub fn from_request(request: &Request, is_server: bool) -> Result<Self> {
        let branch = request.branch().ok_or(Error::MissingField("Via branch"))?;
        // ACK and CANCEL share the INVITE's branch but run (or match) their
        // own transactions keyed by their own method; callers that need the
        // INVITE server transaction rebind the method explicitly.
        Ok(TransactionKey::new(branch, request.method.clone(), is_server))
    }

    /// Key a response is matched against: branch + CSeq method, client role
    pub fn from_response(response: &Response) -> Result<Self> {
        let branch = response.branch().ok_or(Error::MissingField("Via branch"))?;
        let cseq = response.cseq().ok_or(Error::MissingField("CSeq"))?;
        Ok(TransactionKey::new(branch, cseq.method, false))
    }

    /// The same key re-targeted at another method (INVITE lookup for ACK
    /// and CANCEL demux)
    pub fn with_method(&self, method: Method) -> Self {
        TransactionKey {
            branch: self.branch.clone(),
            method,
            is_server: self.is_server,
        }
    }
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.branch,
            self.method,
            if self.is_server { "server" } else { "client" }
        )
    }
}

/// Thread-safe transaction state cell
///
/// Every store bumps a generation counter; timers snapshot the generation
/// when scheduled so a firing that observes a newer generation knows it is
/// stale. The transition tables for all four machine kinds live here so the
/// runner can reject illegal transitions uniformly.
#[derive(Debug)]
pub struct AtomicTransactionState {
    state: AtomicU8,
    generation: AtomicU64,
}

impl AtomicTransactionState {
    pub fn new(state: TransactionState) -> Self {
        AtomicTransactionState {
            state: AtomicU8::new(state as u8),
            generation: AtomicU64::new(0),
        }
    }

    pub fn get(&self) -> TransactionState {
        match self.state.load(Ordering::SeqCst) {
            0 => TransactionState::Initial,
            1 => TransactionState::Calling,
            2 => TransactionState::Trying,
            3 => TransactionState::Proceeding,
            4 => TransactionState::Completed,
            5 => TransactionState::Confirmed,
            _ => TransactionState::Terminated,
        }
    }

    /// Stores a new state, bumping the generation; returns the previous state
    pub fn set(&self, new_state: TransactionState) -> TransactionState {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let previous = self.state.swap(new_state as u8, Ordering::SeqCst);
        match previous {
            0 => TransactionState::Initial,
            1 => TransactionState::Calling,
            2 => TransactionState::Trying,
            3 => TransactionState::Proceeding,
            4 => TransactionState::Completed,
            5 => TransactionState::Confirmed,
            _ => TransactionState::Terminated,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Checks a transition against the RFC 3261 tables for `kind`
    pub fn validate_transition(
        kind: TransactionKind,
        from: TransactionState,
        to: TransactionState,
    ) -> Result<()> {
        use TransactionState::*;

        // Terminated is reachable from anywhere (timeouts, transport
        // errors, shutdown); nothing leaves it.
        if from == Terminated {
            return Err(Error::InvalidStateTransition { from, to });
        }
        if to == Terminated {
            return Ok(());
        }

        let valid = match kind {
            TransactionKind::InviteClient => matches!(
                (from, to),
                (Initial, Calling) | (Calling, Proceeding) | (Calling, Completed) | (Proceeding, Completed)
            ),
            TransactionKind::NonInviteClient => matches!(
                (from, to),
                (Initial, Trying) | (Trying, Proceeding) | (Trying, Completed) | (Proceeding, Completed)
            ),
            TransactionKind::InviteServer => matches!(
                (from, to),
                (Initial, Proceeding) | (Proceeding, Completed) | (Completed, Confirmed)
            ),
            TransactionKind::NonInviteServer => matches!(
                (from, to),
                (Initial, Trying) | (Trying, Proceeding) | (Trying, Completed) | (Proceeding, Completed)
            ),
        };

        if valid {
            Ok(())
        } else {
            Err(Error::InvalidStateTransition { from, to })
        }
    }
}

/// Commands processed by a transaction's event loop
#[derive(Debug)]
pub enum InternalTransactionCommand {
    /// Move the machine to a new state (validated against the tables)
    TransitionTo(TransactionState),
    /// An inbound message matched to this transaction
    ProcessMessage(Message),
    /// TU-initiated response on a server transaction
    SendResponse(Response),
    /// A named timer fired
    Timer(TimerType),
    /// The transport failed while this transaction was using it
    TransportError,
    /// Tear the transaction down through the machine (reports termination)
    Terminate,
    /// Hard stop: exit immediately without reporting anything
    Shutdown,
}

/// Events reported to the transaction user
#[derive(Debug, Clone)]
pub enum TransactionEvent {
    /// A state transition committed
    StateChanged {
        transaction_id: TransactionKey,
        previous_state: TransactionState,
        new_state: TransactionState,
    },
    /// 1xx received on a client transaction. `is_retransmission` is true
    /// when a response with the same To tag was already delivered; a fork
    /// (new To tag) is always delivered with the flag false.
    ProvisionalResponse {
        transaction_id: TransactionKey,
        response: Response,
        is_retransmission: bool,
    },
    /// 2xx received on a client transaction
    SuccessResponse {
        transaction_id: TransactionKey,
        response: Response,
        is_retransmission: bool,
    },
    /// 3xx-6xx received on a client transaction
    FailureResponse {
        transaction_id: TransactionKey,
        response: Response,
        is_retransmission: bool,
    },
    /// New INVITE server transaction created for an inbound INVITE
    InviteRequest {
        transaction_id: TransactionKey,
        request: Request,
        source: SocketAddr,
    },
    /// New non-INVITE server transaction created for an inbound request
    NonInviteRequest {
        transaction_id: TransactionKey,
        request: Request,
        source: SocketAddr,
    },
    /// ACK matched an INVITE server transaction
    AckReceived {
        transaction_id: TransactionKey,
        request: Request,
    },
    /// CANCEL matched an INVITE server transaction; the CANCEL runs its own
    /// server transaction, surfaced here for the TU to answer
    CancelReceived {
        transaction_id: TransactionKey,
        cancel_transaction_id: TransactionKey,
        request: Request,
    },
    /// Timer B/F/H expired without resolution; always recoverable, never
    /// fatal (the transaction simply terminates)
    TransactionTimeout { transaction_id: TransactionKey },
    /// The transaction reached Terminated through its machine
    TransactionTerminated { transaction_id: TransactionKey },
    /// A transport-level failure, attributed to a transaction when one was
    /// involved and carrying the destination when known
    TransportError {
        transaction_id: Option<TransactionKey>,
        destination: Option<SocketAddr>,
        error: String,
    },
    /// A response that matched no live client transaction. Delivered (not
    /// dropped) so stateless applications can still act on it.
    StrayResponse {
        response: Response,
        source: SocketAddr,
    },
    /// A request that created no transaction (e.g. CANCEL with no matching
    /// INVITE)
    StrayRequest {
        request: Request,
        source: SocketAddr,
    },
    /// ACK that matched no INVITE server transaction: the ACK to a 2xx,
    /// which belongs to the dialog layer
    StrayAck {
        request: Request,
        source: SocketAddr,
    },
    /// An FSM-level error worth surfacing (invalid transition request,
    /// handler failure). The transaction remains in its last valid state.
    Error {
        transaction_id: Option<TransactionKey>,
        error: String,
    },
}

/// Owned handles for a transaction's currently scheduled timers
///
/// One slot per timer role: the machines never need more than one
/// retransmit, one timeout and one wait timer at a time.
#[derive(Debug, Default)]
pub struct TimerHandles {
    /// Timer A / E / G
    pub retransmit: Option<TimerHandle>,
    /// Timer B / F / H
    pub timeout: Option<TimerHandle>,
    /// Timer D / I / J / K
    pub wait: Option<TimerHandle>,
}

impl TimerHandles {
    pub fn cancel_retransmit(&mut self, manager: &TimerManager) {
        if let Some(handle) = self.retransmit.take() {
            manager.cancel(&handle);
        }
    }

    pub fn cancel_timeout(&mut self, manager: &TimerManager) {
        if let Some(handle) = self.timeout.take() {
            manager.cancel(&handle);
        }
    }

    pub fn cancel_wait(&mut self, manager: &TimerManager) {
        if let Some(handle) = self.wait.take() {
            manager.cancel(&handle);
        }
    }

    pub fn cancel_all(&mut self, manager: &TimerManager) {
        self.cancel_retransmit(manager);
        self.cancel_timeout(manager);
        self.cancel_wait(manager);
    }
}

/// Convenience alias for the TU event sender
pub type TransactionEventSender = mpsc::Sender<TransactionEvent>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_cell_round_trips_all_states() {
        let all = [
            TransactionState::Initial,
            TransactionState::Calling,
            TransactionState::Trying,
            TransactionState::Proceeding,
            TransactionState::Completed,
            TransactionState::Confirmed,
            TransactionState::Terminated,
        ];
        let cell = AtomicTransactionState::new(TransactionState::Initial);
        for state in all {
            cell.set(state);
            assert_eq!(cell.get(), state);
        }
    }

    #[test]
    fn set_bumps_generation() {
        let cell = AtomicTransactionState::new(TransactionState::Initial);
        let before = cell.generation();
        cell.set(TransactionState::Calling);
        assert!(cell.generation() > before);
    }

    #[test]
    fn invite_client_transitions() {
        use TransactionKind::InviteClient;
        use TransactionState::*;
        assert!(AtomicTransactionState::validate_transition(InviteClient, Initial, Calling).is_ok());
        assert!(AtomicTransactionState::validate_transition(InviteClient, Calling, Proceeding).is_ok());
        assert!(AtomicTransactionState::validate_transition(InviteClient, Proceeding, Completed).is_ok());
        assert!(AtomicTransactionState::validate_transition(InviteClient, Completed, Terminated).is_ok());
        assert!(AtomicTransactionState::validate_transition(InviteClient, Completed, Proceeding).is_err());
        assert!(AtomicTransactionState::validate_transition(InviteClient, Initial, Trying).is_err());
        assert!(AtomicTransactionState::validate_transition(InviteClient, Terminated, Calling).is_err());
    }

    #[test]
    fn invite_server_transitions() {
        use TransactionKind::InviteServer;
        use TransactionState::*;
        assert!(AtomicTransactionState::validate_transition(InviteServer, Initial, Proceeding).is_ok());
        assert!(AtomicTransactionState::validate_transition(InviteServer, Proceeding, Completed).is_ok());
        assert!(AtomicTransactionState::validate_transition(InviteServer, Completed, Confirmed).is_ok());
        assert!(AtomicTransactionState::validate_transition(InviteServer, Confirmed, Terminated).is_ok());
        assert!(AtomicTransactionState::validate_transition(InviteServer, Proceeding, Confirmed).is_err());
    }

    #[test]
    fn key_from_response_uses_cseq_method() {
        use sipflow_sip_core::{HeaderName, StatusCode};
        let mut response = Response::new(StatusCode::OK);
        response
            .headers
            .push(HeaderName::Via, "SIP/2.0/UDP host;branch=z9hG4bKkey1");
        response.headers.push(HeaderName::CSeq, "10 INVITE");
        let key = TransactionKey::from_response(&response).unwrap();
        assert_eq!(key.branch, "z9hG4bKkey1");
        assert_eq!(key.method, Method::Invite);
        assert!(!key.is_server);
    }

    #[test]
    fn key_display_distinguishes_roles() {
        let client = TransactionKey::new("z9hG4bKx", Method::Invite, false);
        let server = client.clone();
        let server = TransactionKey { is_server: true, ..server };
        assert_ne!(client.to_string(), server.to_string());
        assert_ne!(client, server);
    }
}
