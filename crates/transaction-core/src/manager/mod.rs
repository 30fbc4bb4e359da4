//! The transaction manager
//!
//! [`TransactionManager`] owns the transaction tables, demultiplexes
//! transport traffic onto live transactions by branch + method, creates
//! client and server transactions, and forwards every transaction event to
//! the single TU event channel handed out at construction.
//!
//! ## Matching rules (RFC 3261 Sections 17.1.3 / 17.2.3)
//!
//! - A response matches the client transaction with the same topmost-Via
//!   branch and CSeq method. No match → delivered as a stray response, not
//!   dropped, so stateless applications can still act on it.
//! - A request matches the server transaction with the same branch and
//!   method. ACK and CANCEL instead look up the INVITE server transaction
//!   with their branch; an unmatched ACK is handed to the TU (it
//!   acknowledges a 2xx and belongs to the dialog layer), an unmatched
//!   CANCEL is a stray.
//! - Retransmissions therefore land on the existing transaction, which
//!   absorbs them; they can never create a duplicate.
//!
//! Terminated transactions linger in the tables for a grace period so that
//! late retransmissions keep matching (and are dropped on the closed
//! command channel) instead of spawning fresh transactions.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use sipflow_sip_core::{Message, Method, Request, Response, Via};
use sipflow_sip_transport::{Transport, TransportEvent};

use crate::client::{InviteClientLogic, NonInviteClientLogic};
use crate::error::{Error, Result};
use crate::server::{InviteServerLogic, NonInviteServerLogic};
use crate::timer::{TimerFactory, TimerManager, TimerSettings};
use crate::transaction::logic::{TransactionData, TransactionLogic};
use crate::transaction::runner::run_transaction_loop;
use crate::transaction::{
    AtomicTransactionState, InternalTransactionCommand, TransactionEvent, TransactionKey,
    TransactionKind, TransactionState,
};
use crate::utils::generate_branch;

const DEFAULT_EVENT_CAPACITY: usize = 100;
const COMMAND_CHANNEL_CAPACITY: usize = 32;

struct TransactionHandle {
    cmd_tx: mpsc::Sender<InternalTransactionCommand>,
    state: Arc<AtomicTransactionState>,
    kind: TransactionKind,
    request: Request,
    remote_addr: SocketAddr,
}

struct ManagerInner {
    transport: Arc<dyn Transport>,
    client_transactions: DashMap<TransactionKey, TransactionHandle>,
    server_transactions: DashMap<TransactionKey, TransactionHandle>,
    /// Events to the transaction user
    events_tx: mpsc::Sender<TransactionEvent>,
    /// Events from the per-transaction tasks, forwarded by the pump
    internal_tx: mpsc::Sender<TransactionEvent>,
    timer_manager: Arc<TimerManager>,
    timer_factory: TimerFactory,
    settings: TimerSettings,
    retransmission_filter: bool,
}

/// Manages all transactions of one stack instance
#[derive(Clone)]
pub struct TransactionManager {
    inner: Arc<ManagerInner>,
}

impl TransactionManager {
    /// Creates a manager with default timer settings and the
    /// retransmission filter enabled. Returns the manager and the TU event
    /// receiver.
    pub async fn new(
        transport: Arc<dyn Transport>,
        transport_rx: mpsc::Receiver<TransportEvent>,
        event_capacity: Option<usize>,
    ) -> Result<(Self, mpsc::Receiver<TransactionEvent>)> {
        Self::with_config(
            transport,
            transport_rx,
            event_capacity,
            TimerSettings::default(),
            true,
        )
        .await
    }

    /// Creates a manager with explicit timer settings and retransmission
    /// filter configuration
    pub async fn with_config(
        transport: Arc<dyn Transport>,
        transport_rx: mpsc::Receiver<TransportEvent>,
        event_capacity: Option<usize>,
        settings: TimerSettings,
        retransmission_filter: bool,
    ) -> Result<(Self, mpsc::Receiver<TransactionEvent>)> {
        let capacity = event_capacity.unwrap_or(DEFAULT_EVENT_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(capacity);
        let (internal_tx, internal_rx) = mpsc::channel(capacity);

        let timer_manager = Arc::new(TimerManager::new());
        let timer_factory = TimerFactory::new(settings, timer_manager.clone());

        let inner = Arc::new(ManagerInner {
            transport,
            client_transactions: DashMap::new(),
            server_transactions: DashMap::new(),
            events_tx,
            internal_tx,
            timer_manager,
            timer_factory,
            settings,
            retransmission_filter,
        });

        tokio::spawn(event_pump(inner.clone(), internal_rx));
        tokio::spawn(demux_loop(inner.clone(), transport_rx));

        Ok((TransactionManager { inner }, events_rx))
    }

    /// The timer settings this manager runs with
    pub fn settings(&self) -> &TimerSettings {
        &self.inner.settings
    }

    /// The transport this manager sends through
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    /// Creates a client transaction for `request` without sending it.
    /// Generates a Via branch when the request has none. The transaction
    /// starts when [`TransactionManager::send_request`] is called.
    pub async fn create_client_transaction(
        &self,
        mut request: Request,
        destination: SocketAddr,
    ) -> Result<TransactionKey> {
        self.ensure_branch(&mut request)?;
        let key = TransactionKey::from_request(&request, false)?;
        if self.inner.client_transactions.contains_key(&key) {
            return Err(Error::TransactionExists(key));
        }

        let kind = if request.method == Method::Invite {
            TransactionKind::InviteClient
        } else {
            TransactionKind::NonInviteClient
        };
        let logic: Arc<dyn TransactionLogic> = match kind {
            TransactionKind::InviteClient => Arc::new(InviteClientLogic),
            _ => Arc::new(NonInviteClientLogic),
        };

        self.spawn_transaction(key.clone(), kind, logic, request, destination, true);
        debug!(id = %key, "created client transaction");
        Ok(key)
    }

    /// Dispatches a created client transaction: transmits the request and
    /// starts its machine
    pub async fn send_request(&self, key: &TransactionKey) -> Result<()> {
        // Copy what we need out of the table entry; map guards are never
        // held across an await
        let (cmd_tx, initial) = {
            let handle = self
                .inner
                .client_transactions
                .get(key)
                .ok_or_else(|| Error::TransactionNotFound(key.clone()))?;
            if handle.state.get() != TransactionState::Initial {
                return Err(Error::InvalidOperation(
                    "transaction already dispatched".to_string(),
                ));
            }
            (handle.cmd_tx.clone(), handle.kind.initial_active_state())
        };
        cmd_tx
            .send(InternalTransactionCommand::TransitionTo(initial))
            .await
            .map_err(|_| Error::ChannelClosed)
    }

    /// Sends a response on a server transaction. Violating the machine
    /// (e.g. a second final response) returns an error and leaves the
    /// transaction state untouched.
    pub async fn send_response(&self, key: &TransactionKey, response: Response) -> Result<()> {
        let cmd_tx = {
            let handle = self
                .inner
                .server_transactions
                .get(key)
                .ok_or_else(|| Error::TransactionNotFound(key.clone()))?;
            match handle.state.get() {
                TransactionState::Completed
                | TransactionState::Confirmed
                | TransactionState::Terminated => {
                    return Err(Error::InvalidOperation(
                        "final response already sent".to_string(),
                    ));
                }
                _ => {}
            }
            handle.cmd_tx.clone()
        };
        cmd_tx
            .send(InternalTransactionCommand::SendResponse(response))
            .await
            .map_err(|_| Error::ChannelClosed)
    }

    /// Cancels a pending INVITE client transaction by running a CANCEL
    /// transaction for it (RFC 3261 Section 9.1). The INVITE transaction
    /// itself continues independently until it resolves (typically 487).
    /// Returns an error once a final response has been received.
    pub async fn send_cancel(&self, invite_key: &TransactionKey) -> Result<TransactionKey> {
        let (request, remote_addr) = {
            let handle = self
                .inner
                .client_transactions
                .get(invite_key)
                .ok_or_else(|| Error::TransactionNotFound(invite_key.clone()))?;
            if handle.kind != TransactionKind::InviteClient {
                return Err(Error::InvalidOperation(
                    "only INVITE transactions can be cancelled".to_string(),
                ));
            }
            match handle.state.get() {
                TransactionState::Calling | TransactionState::Proceeding => {}
                state => {
                    return Err(Error::InvalidOperation(format!(
                        "cannot CANCEL in {:?}: transaction already resolved",
                        state
                    )));
                }
            }
            (handle.request.clone(), handle.remote_addr)
        };

        let cancel = crate::builders::client_quick::cancel(&request)?;
        let key = self.create_client_transaction(cancel, remote_addr).await?;
        self.send_request(&key).await?;
        info!(invite = %invite_key, cancel = %key, "CANCEL dispatched");
        Ok(key)
    }

    /// Routes an ACK into an INVITE server transaction that branch
    /// matching could not reach: the ACK to a 2xx carries its own branch,
    /// so the dialog layer resolves the target and hands it back down
    pub async fn forward_ack(&self, key: &TransactionKey, request: Request) -> Result<()> {
        let cmd_tx = {
            let handle = self
                .inner
                .server_transactions
                .get(key)
                .ok_or_else(|| Error::TransactionNotFound(key.clone()))?;
            handle.cmd_tx.clone()
        };
        cmd_tx
            .send(InternalTransactionCommand::ProcessMessage(
                Message::Request(request),
            ))
            .await
            .map_err(|_| Error::ChannelClosed)
    }

    /// Current state of a transaction (either role)
    pub fn transaction_state(&self, key: &TransactionKey) -> Result<TransactionState> {
        let table = if key.is_server {
            &self.inner.server_transactions
        } else {
            &self.inner.client_transactions
        };
        table
            .get(key)
            .map(|h| h.state.get())
            .ok_or_else(|| Error::TransactionNotFound(key.clone()))
    }

    /// The original request a transaction was created for
    pub fn original_request(&self, key: &TransactionKey) -> Option<Request> {
        let table = if key.is_server {
            &self.inner.server_transactions
        } else {
            &self.inner.client_transactions
        };
        table.get(key).map(|h| h.request.clone())
    }

    /// Remote address a transaction exchanges messages with
    pub fn remote_addr(&self, key: &TransactionKey) -> Option<SocketAddr> {
        let table = if key.is_server {
            &self.inner.server_transactions
        } else {
            &self.inner.client_transactions
        };
        table.get(key).map(|h| h.remote_addr)
    }

    /// Number of live transactions (both roles)
    pub fn transaction_count(&self) -> usize {
        self.inner.client_transactions.len() + self.inner.server_transactions.len()
    }

    /// Hard stop: aborts every pending timer and tears down all transaction
    /// tasks without delivering termination notifications
    pub async fn shutdown(&self) {
        self.inner.timer_manager.cancel_all();
        for entry in self.inner.client_transactions.iter() {
            let _ = entry.cmd_tx.try_send(InternalTransactionCommand::Shutdown);
        }
        for entry in self.inner.server_transactions.iter() {
            let _ = entry.cmd_tx.try_send(InternalTransactionCommand::Shutdown);
        }
        self.inner.client_transactions.clear();
        self.inner.server_transactions.clear();
        info!("transaction manager shut down");
    }

    fn spawn_transaction(
        &self,
        key: TransactionKey,
        kind: TransactionKind,
        logic: Arc<dyn TransactionLogic>,
        request: Request,
        remote_addr: SocketAddr,
        is_client: bool,
    ) {
        spawn_transaction_inner(&self.inner, key, kind, logic, request, remote_addr, is_client);
    }

    /// Gives the topmost Via a branch, adding a Via for this transport when
    /// the request carries none at all
    fn ensure_branch(&self, request: &mut Request) -> Result<()> {
        use sipflow_sip_core::HeaderName;
        let existing = request.headers.get(&HeaderName::Via).map(str::to_string);
        match existing {
            Some(raw) => {
                let mut via: Via = raw.parse().map_err(|_| Error::MissingField("Via"))?;
                if via.branch().is_none() {
                    via.params
                        .push(("branch".to_string(), Some(generate_branch())));
                    request.headers.set(HeaderName::Via, via.to_string());
                }
            }
            None => {
                let sent_by = self
                    .inner
                    .transport
                    .local_addr()
                    .map(|a| a.to_string())
                    .unwrap_or_else(|_| "0.0.0.0:5060".to_string());
                request.headers.push(
                    HeaderName::Via,
                    Via::new("UDP", sent_by, generate_branch()).to_string(),
                );
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("client_transactions", &self.inner.client_transactions.len())
            .field("server_transactions", &self.inner.server_transactions.len())
            .finish()
    }
}

fn spawn_transaction_inner(
    inner: &Arc<ManagerInner>,
    key: TransactionKey,
    kind: TransactionKind,
    logic: Arc<dyn TransactionLogic>,
    request: Request,
    remote_addr: SocketAddr,
    is_client: bool,
) -> mpsc::Sender<InternalTransactionCommand> {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let state = Arc::new(AtomicTransactionState::new(TransactionState::Initial));

    let data = Arc::new(TransactionData {
        key: key.clone(),
        state: state.clone(),
        request: request.clone(),
        remote_addr,
        transport: inner.transport.clone(),
        events_tx: inner.internal_tx.clone(),
        cmd_tx: cmd_tx.clone(),
        timers: inner.timer_factory.clone(),
        last_response: tokio::sync::Mutex::new(None),
        seen_to_tags: tokio::sync::Mutex::new(Default::default()),
        retransmit_interval: tokio::sync::Mutex::new(inner.settings.t1),
        retransmission_filter: inner.retransmission_filter,
    });

    tokio::spawn(run_transaction_loop(data, logic, cmd_rx));

    let handle = TransactionHandle {
        cmd_tx: cmd_tx.clone(),
        state,
        kind,
        request,
        remote_addr,
    };
    if is_client {
        inner.client_transactions.insert(key, handle);
    } else {
        inner.server_transactions.insert(key, handle);
    }
    cmd_tx
}

/// Forwards transaction events to the TU and garbage-collects terminated
/// transactions after a grace period (late retransmissions keep matching
/// the defunct entry meanwhile)
async fn event_pump(inner: Arc<ManagerInner>, mut internal_rx: mpsc::Receiver<TransactionEvent>) {
    while let Some(event) = internal_rx.recv().await {
        if let TransactionEvent::TransactionTerminated { transaction_id } = &event {
            schedule_removal(&inner, transaction_id.clone(), inner.settings.t4);
        }
        if inner.events_tx.send(event).await.is_err() {
            debug!("TU event receiver dropped, stopping event pump");
            break;
        }
    }
}

fn schedule_removal(inner: &Arc<ManagerInner>, key: TransactionKey, grace: Duration) {
    let timer_manager = inner.timer_manager.clone();
    let inner = inner.clone();
    timer_manager.schedule(grace, None, move || {
        trace!(id = %key, "collecting terminated transaction");
        if key.is_server {
            inner.server_transactions.remove(&key);
        } else {
            inner.client_transactions.remove(&key);
        }
    });
}

/// Demultiplexes transport events onto transactions
async fn demux_loop(inner: Arc<ManagerInner>, mut transport_rx: mpsc::Receiver<TransportEvent>) {
    while let Some(event) = transport_rx.recv().await {
        match event {
            TransportEvent::MessageReceived {
                message, source, ..
            } => match message {
                Message::Request(request) => handle_request(&inner, request, source).await,
                Message::Response(response) => handle_response(&inner, response, source).await,
            },
            TransportEvent::Error { error, destination } => {
                warn!("transport error: {}", error);
                let _ = inner
                    .internal_tx
                    .send(TransactionEvent::TransportError {
                        transaction_id: None,
                        destination,
                        error,
                    })
                    .await;
            }
            TransportEvent::Closed => {
                debug!("transport closed, stopping demux loop");
                break;
            }
        }
    }
}

async fn handle_response(inner: &Arc<ManagerInner>, response: Response, source: SocketAddr) {
    let key = match TransactionKey::from_response(&response) {
        Ok(key) => key,
        Err(e) => {
            warn!("dropping response without transaction identity: {}", e);
            return;
        }
    };

    if let Some(handle) = inner.client_transactions.get(&key) {
        // A full or closed channel means the transaction is terminated or
        // hopelessly backlogged; the retransmission is absorbed either way
        let _ = handle
            .cmd_tx
            .try_send(InternalTransactionCommand::ProcessMessage(
                Message::Response(response),
            ));
    } else {
        trace!(id = %key, "stray response");
        let _ = inner
            .internal_tx
            .send(TransactionEvent::StrayResponse { response, source })
            .await;
    }
}

async fn handle_request(inner: &Arc<ManagerInner>, request: Request, source: SocketAddr) {
    let key = match TransactionKey::from_request(&request, true) {
        Ok(key) => key,
        Err(e) => {
            warn!("dropping request without transaction identity: {}", e);
            return;
        }
    };

    match request.method {
        Method::Ack => {
            // ACK for a non-2xx matches the INVITE server transaction; an
            // unmatched ACK acknowledges a 2xx and belongs to the dialog
            // layer
            let invite_key = key.with_method(Method::Invite);
            if let Some(handle) = inner.server_transactions.get(&invite_key) {
                let _ = handle
                    .cmd_tx
                    .try_send(InternalTransactionCommand::ProcessMessage(
                        Message::Request(request),
                    ));
            } else {
                let _ = inner
                    .internal_tx
                    .send(TransactionEvent::StrayAck { request, source })
                    .await;
            }
        }
        Method::Cancel => {
            let invite_key = key.with_method(Method::Invite);
            if !inner.server_transactions.contains_key(&invite_key) {
                trace!(id = %key, "CANCEL without matching INVITE");
                let _ = inner
                    .internal_tx
                    .send(TransactionEvent::StrayRequest { request, source })
                    .await;
                return;
            }
            if let Some(handle) = inner.server_transactions.get(&key) {
                // CANCEL retransmission: absorbed by its own transaction
                let _ = handle
                    .cmd_tx
                    .try_send(InternalTransactionCommand::ProcessMessage(
                        Message::Request(request),
                    ));
                return;
            }
            let cmd_tx = spawn_transaction_inner(
                inner,
                key.clone(),
                TransactionKind::NonInviteServer,
                Arc::new(NonInviteServerLogic),
                request.clone(),
                source,
                false,
            );
            let _ = cmd_tx
                .send(InternalTransactionCommand::TransitionTo(
                    TransactionState::Trying,
                ))
                .await;
            let _ = inner
                .internal_tx
                .send(TransactionEvent::CancelReceived {
                    transaction_id: invite_key,
                    cancel_transaction_id: key,
                    request,
                })
                .await;
        }
        _ => {
            if let Some(handle) = inner.server_transactions.get(&key) {
                // Retransmission: the machine absorbs it
                let _ = handle
                    .cmd_tx
                    .try_send(InternalTransactionCommand::ProcessMessage(
                        Message::Request(request),
                    ));
                return;
            }

            let (kind, logic): (_, Arc<dyn TransactionLogic>) =
                if request.method == Method::Invite {
                    (TransactionKind::InviteServer, Arc::new(InviteServerLogic))
                } else {
                    (
                        TransactionKind::NonInviteServer,
                        Arc::new(NonInviteServerLogic),
                    )
                };

            let cmd_tx = spawn_transaction_inner(
                inner,
                key.clone(),
                kind,
                logic,
                request.clone(),
                source,
                false,
            );
            let _ = cmd_tx
                .send(InternalTransactionCommand::TransitionTo(
                    kind.initial_active_state(),
                ))
                .await;

            debug!(id = %key, method = %request.method, "created server transaction");
            let event = if request.method == Method::Invite {
                TransactionEvent::InviteRequest {
                    transaction_id: key,
                    request,
                    source,
                }
            } else {
                TransactionEvent::NonInviteRequest {
                    transaction_id: key,
                    request,
                    source,
                }
            };
            let _ = inner.internal_tx.send(event).await;
        }
    }
}
