//! The dialog manager
//!
//! [`DialogManager`] is the provider surface of the stack: it owns the
//! dialog tables, consumes the transaction layer's event stream, keeps
//! dialog state in step with requests and responses in both directions,
//! tracks forked dialogs per client transaction, and delivers
//! [`SipEvent`]s to the single application listener.
//!
//! ## Locking
//!
//! Dialogs live in a `DashMap`; every state update happens under that
//! entry's lock and nothing else is held at the same time, so an
//! application callback can reenter the manager freely. The exactly-once
//! guarantee for `DialogTerminated` rests on [`Dialog::terminate`] running
//! under the entry lock: only the caller that actually crossed into
//! Terminated emits the event.

use std::any::Any;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use sipflow_sip_core::{Method, Request, Response, StatusCode, Via};
use sipflow_transaction_core::builders::server_quick;
use sipflow_transaction_core::timer::{TimerHandle, TimerManager};
use sipflow_transaction_core::utils::generate_branch;
use sipflow_transaction_core::{TransactionEvent, TransactionKey, TransactionManager};

use crate::config::DialogConfig;
use crate::dialog::dialog_utils::{extract_route_set, extract_uri_from_contact, request_from_template};
use crate::dialog::{Dialog, DialogId, DialogState};
use crate::errors::{DialogError, DialogResult};
use crate::events::SipEvent;
use crate::manager::message_routing::{
    key_for_incoming_request, key_for_incoming_response, lookup_key,
};

struct DialogManagerInner {
    config: DialogConfig,
    transactions: TransactionManager,
    /// All dialogs by id
    dialogs: DashMap<DialogId, Dialog>,
    /// (Call-ID, local tag, remote tag) -> dialog id, for in-dialog routing
    dialog_lookup: DashMap<String, DialogId>,
    /// Dialogs spawned by one transaction; index 0 is the default dialog,
    /// the rest are forked siblings
    tx_dialogs: DashMap<TransactionKey, Vec<DialogId>>,
    /// Early-dialog expiry timers
    expiry_timers: DashMap<DialogId, TimerHandle>,
    timer_manager: Arc<TimerManager>,
    events_tx: mpsc::Sender<SipEvent>,
    stopped: AtomicBool,
}

/// Dialog layer provider for one stack instance
#[derive(Clone)]
pub struct DialogManager {
    inner: Arc<DialogManagerInner>,
}

impl DialogManager {
    /// Creates a dialog manager over an existing transaction manager,
    /// consuming its event stream. Returns the manager and the application
    /// event receiver.
    pub fn new(
        transactions: TransactionManager,
        transaction_events: mpsc::Receiver<TransactionEvent>,
        config: DialogConfig,
    ) -> DialogResult<(Self, mpsc::Receiver<SipEvent>)> {
        config.validate()?;
        let (events_tx, events_rx) = mpsc::channel(config.event_channel_capacity);

        let manager = DialogManager {
            inner: Arc::new(DialogManagerInner {
                config,
                transactions,
                dialogs: DashMap::new(),
                dialog_lookup: DashMap::new(),
                tx_dialogs: DashMap::new(),
                expiry_timers: DashMap::new(),
                timer_manager: Arc::new(TimerManager::new()),
                events_tx,
                stopped: AtomicBool::new(false),
            }),
        };

        tokio::spawn(event_loop(manager.clone(), transaction_events));
        Ok((manager, events_rx))
    }

    /// The transaction manager this provider runs over
    pub fn transaction_manager(&self) -> &TransactionManager {
        &self.inner.transactions
    }

    /// Sends an out-of-dialog request, creating and dispatching a client
    /// transaction. With automatic dialog support on, a dialog-creating
    /// request also creates its (unset) default dialog.
    pub async fn send_request(
        &self,
        request: Request,
        destination: SocketAddr,
    ) -> DialogResult<TransactionKey> {
        self.ensure_running()?;
        let tx = self
            .inner
            .transactions
            .create_client_transaction(request, destination)
            .await?;
        if self.inner.config.automatic_dialog_support {
            if let Some(request) = self.inner.transactions.original_request(&tx) {
                if request.method.is_dialog_creating() {
                    self.create_dialog_for_transaction(&tx)?;
                }
            }
        }
        self.inner.transactions.send_request(&tx).await?;
        Ok(tx)
    }

    /// Creates (or returns) the default dialog bound to a transaction.
    /// Explicit and idempotent: calling it redundantly — including racing
    /// the first inbound response — returns the already-bound dialog.
    pub fn create_dialog_for_transaction(&self, tx: &TransactionKey) -> DialogResult<DialogId> {
        self.ensure_running()?;
        if let Some(existing) = self.inner.tx_dialogs.get(tx).and_then(|l| l.first().cloned()) {
            return Ok(existing);
        }

        let request = self
            .inner
            .transactions
            .original_request(tx)
            .ok_or_else(|| {
                DialogError::Transaction(sipflow_transaction_core::Error::TransactionNotFound(
                    tx.clone(),
                ))
            })?;
        let remote_addr = self.inner.transactions.remote_addr(tx);

        let dialog = if tx.is_server {
            Dialog::from_request(
                &request,
                remote_addr.unwrap_or_else(|| "0.0.0.0:0".parse().expect("literal addr")),
            )
            .ok_or_else(|| DialogError::protocol("request cannot create a dialog"))?
        } else {
            let from = request.from().ok_or(DialogError::MissingField("From"))?;
            let to = request.to().ok_or(DialogError::MissingField("To"))?;
            let call_id = request
                .call_id()
                .ok_or(DialogError::MissingField("Call-ID"))?
                .to_string();
            let mut dialog = Dialog::new(
                call_id,
                from.uri.clone(),
                to.uri.clone(),
                from.tag().map(str::to_string),
                None,
                true,
            );
            // The template CSeq continues from the dialog-creating request
            dialog.local_cseq = request.cseq().map(|c| c.seq).unwrap_or(0);
            dialog.remote_target = request.uri.clone();
            dialog.remote_addr = remote_addr;
            dialog
        };

        let id = dialog.id.clone();
        debug!(dialog = %id, tx = %tx, "dialog created");
        self.inner.dialogs.insert(id.clone(), dialog);
        // entry() guards the race between a redundant explicit call and
        // the first inbound response
        let mut bound = self.inner.tx_dialogs.entry(tx.clone()).or_default();
        match bound.first().cloned() {
            Some(winner) if winner != id => {
                // Lost the race against the first inbound response; keep
                // the winner, drop the duplicate
                drop(bound);
                self.inner.dialogs.remove(&id);
                Ok(winner)
            }
            _ => {
                if bound.is_empty() {
                    bound.push(id.clone());
                }
                Ok(id)
            }
        }
    }

    /// Sends a response on a server transaction, keeping the bound dialog
    /// in step: a tagged provisional establishes the early dialog, a 2xx
    /// to a dialog-creating request confirms it, a 2xx to BYE (with
    /// `terminate_on_bye`) and any non-2xx final to the dialog-creating
    /// request terminate it.
    pub async fn send_response(
        &self,
        tx: &TransactionKey,
        response: Response,
    ) -> DialogResult<()> {
        self.ensure_running()?;
        let original = self
            .inner
            .transactions
            .original_request(tx)
            .ok_or_else(|| {
                DialogError::Transaction(sipflow_transaction_core::Error::TransactionNotFound(
                    tx.clone(),
                ))
            })?;

        self.pre_send_response(tx, &original, &response);
        self.inner
            .transactions
            .send_response(tx, response.clone())
            .await?;
        self.post_send_response(tx, &original, &response).await;
        Ok(())
    }

    /// Sends an in-dialog request (BYE, re-INVITE, OPTIONS, ...) on a new
    /// client transaction; the local CSeq increases strictly monotonically
    pub async fn send_request_in_dialog(
        &self,
        dialog_id: &DialogId,
        method: Method,
    ) -> DialogResult<TransactionKey> {
        self.ensure_running()?;
        let (template, destination) = {
            let mut dialog = self
                .inner
                .dialogs
                .get_mut(dialog_id)
                .ok_or_else(|| DialogError::DialogNotFound(dialog_id.clone()))?;
            if dialog.is_terminated() {
                return Err(DialogError::InvalidState {
                    expected: DialogState::Confirmed,
                    actual: DialogState::Terminated,
                });
            }
            (dialog.create_request_template(method), dialog.remote_addr)
        };
        let destination = destination
            .ok_or_else(|| DialogError::protocol("no remote address known for dialog"))?;
        let request = request_from_template(&template)?;

        let tx = self
            .inner
            .transactions
            .create_client_transaction(request, destination)
            .await?;
        self.inner
            .tx_dialogs
            .insert(tx.clone(), vec![dialog_id.clone()]);
        self.inner.transactions.send_request(&tx).await?;
        Ok(tx)
    }

    /// Sends the ACK for a 2xx final. The ACK to a 2xx runs no
    /// transaction: it is an in-dialog request sent straight through the
    /// transport with a fresh branch.
    pub async fn send_ack(&self, dialog_id: &DialogId) -> DialogResult<()> {
        self.ensure_running()?;
        let (template, destination) = {
            let mut dialog = self
                .inner
                .dialogs
                .get_mut(dialog_id)
                .ok_or_else(|| DialogError::DialogNotFound(dialog_id.clone()))?;
            if dialog.state != DialogState::Confirmed {
                return Err(DialogError::InvalidState {
                    expected: DialogState::Confirmed,
                    actual: dialog.state,
                });
            }
            (
                dialog.create_request_template(Method::Ack),
                dialog.remote_addr,
            )
        };
        let destination = destination
            .ok_or_else(|| DialogError::protocol("no remote address known for dialog"))?;
        let mut ack = request_from_template(&template)?;

        let transport = self.inner.transactions.transport();
        let sent_by = transport
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "0.0.0.0:5060".to_string());
        ack.headers.push(
            sipflow_sip_core::HeaderName::Via,
            Via::new("UDP", sent_by, generate_branch()).to_string(),
        );
        transport.send_message(ack.into(), destination).await?;
        Ok(())
    }

    /// Convenience: send a BYE on the dialog
    pub async fn send_bye(&self, dialog_id: &DialogId) -> DialogResult<TransactionKey> {
        self.send_request_in_dialog(dialog_id, Method::Bye).await
    }

    /// Explicitly terminates a dialog. Returns true when this call crossed
    /// it into Terminated (and the single DialogTerminated event fired).
    pub async fn terminate_dialog(&self, dialog_id: &DialogId, reason: &str) -> DialogResult<bool> {
        if !self.inner.dialogs.contains_key(dialog_id) {
            return Err(DialogError::DialogNotFound(dialog_id.clone()));
        }
        Ok(self.finish_dialog(dialog_id, reason).await)
    }

    /// Snapshot of a dialog
    pub fn dialog(&self, dialog_id: &DialogId) -> Option<Dialog> {
        self.inner.dialogs.get(dialog_id).map(|d| d.clone())
    }

    /// Current state of a dialog
    pub fn dialog_state(&self, dialog_id: &DialogId) -> DialogResult<DialogState> {
        self.inner
            .dialogs
            .get(dialog_id)
            .map(|d| d.state)
            .ok_or_else(|| DialogError::DialogNotFound(dialog_id.clone()))
    }

    /// Number of live dialog objects (terminated ones included until the
    /// stack is stopped)
    pub fn dialog_count(&self) -> usize {
        self.inner.dialogs.len()
    }

    /// Looks a dialog up by its protocol identity
    pub fn find_dialog(
        &self,
        call_id: &str,
        local_tag: &str,
        remote_tag: &str,
    ) -> Option<DialogId> {
        self.inner
            .dialog_lookup
            .get(&lookup_key(call_id, local_tag, remote_tag))
            .map(|id| id.clone())
    }

    /// Dialogs spawned by one transaction: the default dialog first, then
    /// forked siblings
    pub fn dialogs_for_transaction(&self, tx: &TransactionKey) -> Vec<DialogId> {
        self.inner
            .tx_dialogs
            .get(tx)
            .map(|l| l.clone())
            .unwrap_or_default()
    }

    /// Controls whether BYE completion terminates the dialog (default
    /// true). Usages that must survive a BYE clear it.
    pub fn set_terminate_on_bye(&self, dialog_id: &DialogId, value: bool) -> DialogResult<()> {
        let mut dialog = self
            .inner
            .dialogs
            .get_mut(dialog_id)
            .ok_or_else(|| DialogError::DialogNotFound(dialog_id.clone()))?;
        dialog.terminate_on_bye = value;
        Ok(())
    }

    /// Attaches an application-opaque payload to the dialog
    pub fn set_application_data(
        &self,
        dialog_id: &DialogId,
        data: Arc<dyn Any + Send + Sync>,
    ) -> DialogResult<()> {
        let mut dialog = self
            .inner
            .dialogs
            .get_mut(dialog_id)
            .ok_or_else(|| DialogError::DialogNotFound(dialog_id.clone()))?;
        dialog.app_data = Some(data);
        Ok(())
    }

    /// The application payload, if any
    pub fn application_data(&self, dialog_id: &DialogId) -> Option<Arc<dyn Any + Send + Sync>> {
        self.inner
            .dialogs
            .get(dialog_id)
            .and_then(|d| d.app_data.clone())
    }

    /// Hard stop: drops all timers, dialogs and transactions immediately.
    /// No termination events are delivered.
    pub async fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.timer_manager.cancel_all();
        self.inner.expiry_timers.clear();
        self.inner.dialogs.clear();
        self.inner.dialog_lookup.clear();
        self.inner.tx_dialogs.clear();
        self.inner.transactions.shutdown().await;
        info!("dialog manager stopped");
    }

    fn ensure_running(&self) -> DialogResult<()> {
        if self.inner.stopped.load(Ordering::SeqCst) {
            Err(DialogError::Stopped)
        } else {
            Ok(())
        }
    }

    async fn emit(&self, event: SipEvent) {
        let _ = self.inner.events_tx.send(event).await;
    }

    /// Registers the dialog's protocol identity in the lookup table once
    /// both tags are known
    fn register_lookup(&self, dialog_id: &DialogId) {
        let tuple = self
            .inner
            .dialogs
            .get(dialog_id)
            .and_then(|d| d.dialog_id_tuple());
        if let Some((call_id, local, remote)) = tuple {
            self.inner
                .dialog_lookup
                .insert(lookup_key(&call_id, &local, &remote), dialog_id.clone());
        }
    }

    /// Arms the early-dialog expiry timer: an early dialog that never
    /// reaches Confirmed times out on its own
    fn start_early_expiry(&self, dialog_id: &DialogId) {
        let manager = self.clone();
        let id = dialog_id.clone();
        let handle = self.inner.timer_manager.schedule(
            self.inner.config.early_dialog_timeout,
            None,
            move || {
                let manager = manager.clone();
                let id = id.clone();
                tokio::spawn(async move {
                    manager.finish_dialog(&id, "early dialog expired").await;
                });
            },
        );
        if let Some(old) = self
            .inner
            .expiry_timers
            .insert(dialog_id.clone(), handle)
        {
            self.inner.timer_manager.cancel(&old);
        }
    }

    fn cancel_early_expiry(&self, dialog_id: &DialogId) {
        if let Some((_, handle)) = self.inner.expiry_timers.remove(dialog_id) {
            self.inner.timer_manager.cancel(&handle);
        }
    }

    /// Moves a dialog to Terminated and emits the single DialogTerminated
    /// event. Safe to call from any number of racing paths: only the
    /// caller whose check-and-set actually crossed the terminal state
    /// emits.
    pub(crate) async fn finish_dialog(&self, dialog_id: &DialogId, reason: &str) -> bool {
        let crossed = self
            .inner
            .dialogs
            .get_mut(dialog_id)
            .map(|mut d| d.terminate())
            .unwrap_or(false);
        if !crossed {
            return false;
        }

        debug!(dialog = %dialog_id, reason, "dialog terminated");
        self.cancel_early_expiry(dialog_id);
        self.inner.dialog_lookup.retain(|_, id| id != dialog_id);
        self.emit(SipEvent::DialogTerminated {
            dialog: dialog_id.clone(),
            reason: reason.to_string(),
        })
        .await;
        true
    }

    /// UAS lifecycle hook run before a response goes out
    fn pre_send_response(&self, tx: &TransactionKey, original: &Request, response: &Response) {
        let Some(dialog_id) = self
            .inner
            .tx_dialogs
            .get(tx)
            .and_then(|l| l.first().cloned())
        else {
            return;
        };
        let Some(tag) = response.to_tag() else {
            return;
        };

        let mut register = false;
        if let Some(mut dialog) = self.inner.dialogs.get_mut(&dialog_id) {
            if dialog.local_tag.is_none() {
                dialog.local_tag = Some(tag.clone());
            }
            let status = response.status;
            if status.is_provisional()
                && status != StatusCode::TRYING
                && dialog.state == DialogState::Initial
            {
                dialog.establish_early();
                register = true;
            } else if status.is_success()
                && original.method.is_dialog_creating()
                && matches!(dialog.state, DialogState::Initial | DialogState::Early)
            {
                dialog.confirm_with_tag(tag);
                register = true;
            }
        }

        if register {
            self.register_lookup(&dialog_id);
            match self.dialog_state(&dialog_id) {
                Ok(DialogState::Early) => self.start_early_expiry(&dialog_id),
                Ok(DialogState::Confirmed) => self.cancel_early_expiry(&dialog_id),
                _ => {}
            }
        }
    }

    /// UAS lifecycle hook run after a response went out: terminations
    async fn post_send_response(
        &self,
        tx: &TransactionKey,
        original: &Request,
        response: &Response,
    ) {
        // Successful BYE completion tears the dialog down unless the usage
        // opted out
        if original.method == Method::Bye && response.status.is_success() {
            if let Some(id) = key_for_incoming_request(original)
                .and_then(|key| self.inner.dialog_lookup.get(&key).map(|id| id.clone()))
            {
                let terminate = self
                    .inner
                    .dialogs
                    .get(&id)
                    .map(|d| d.terminate_on_bye)
                    .unwrap_or(false);
                if terminate {
                    self.finish_dialog(&id, "BYE completed").await;
                }
            }
            return;
        }

        // A non-2xx final to the dialog-creating request kills the usage
        if original.method.is_dialog_creating() && response.status.is_error() {
            if let Some(id) = self
                .inner
                .tx_dialogs
                .get(tx)
                .and_then(|l| l.first().cloned())
            {
                self.finish_dialog(&id, "request rejected").await;
            }
        }
    }

    /// UAC-side dialog bookkeeping for a tagged response on a
    /// dialog-creating client transaction. Returns the dialog the response
    /// belongs to and whether it is a forked sibling of the default.
    fn absorb_uac_response(
        &self,
        tx: &TransactionKey,
        response: &Response,
    ) -> (Option<DialogId>, bool) {
        let Some(tag) = response.to_tag() else {
            return (None, false);
        };
        let is_2xx = response.status.is_success();

        let bound: Vec<DialogId> = self
            .inner
            .tx_dialogs
            .get(tx)
            .map(|l| l.clone())
            .unwrap_or_default();

        // An existing dialog already carries this remote tag
        for id in &bound {
            let matches = self
                .inner
                .dialogs
                .get(id)
                .map(|d| d.remote_tag.as_deref() == Some(tag.as_str()))
                .unwrap_or(false);
            if matches {
                if is_2xx {
                    let updated = self
                        .inner
                        .dialogs
                        .get_mut(id)
                        .map(|mut d| d.update_from_2xx(response))
                        .unwrap_or(false);
                    if updated {
                        self.register_lookup(id);
                        self.cancel_early_expiry(id);
                    }
                }
                return (Some(id.clone()), false);
            }
        }

        // The default dialog has no remote tag yet: this response claims it
        if let Some(default_id) = bound.first() {
            let claimed = {
                let mut claimed = false;
                if let Some(mut dialog) = self.inner.dialogs.get_mut(default_id) {
                    if dialog.remote_tag.is_none() && !dialog.is_terminated() {
                        dialog.set_remote_tag(tag.clone());
                        if let Some(uri) =
                            response.contact().and_then(|c| extract_uri_from_contact(&c))
                        {
                            dialog.remote_target = uri;
                        }
                        dialog.route_set = extract_route_set(&response.record_routes(), true);
                        if is_2xx {
                            dialog.state = DialogState::Confirmed;
                        } else {
                            dialog.establish_early();
                        }
                        claimed = true;
                    }
                }
                claimed
            };
            if claimed {
                self.register_lookup(default_id);
                if is_2xx {
                    self.cancel_early_expiry(default_id);
                } else {
                    self.start_early_expiry(default_id);
                }
                return (Some(default_id.clone()), false);
            }
        }

        // A new remote tag: a forked sibling (or the first dialog when the
        // application never pre-created one)
        if !self.inner.config.automatic_dialog_support {
            return (None, false);
        }
        let Some(original) = self.inner.transactions.original_request(tx) else {
            return (None, false);
        };
        let created = if is_2xx {
            Dialog::from_2xx_response(&original, response, true)
        } else {
            Dialog::from_provisional_response(&original, response, true)
        };
        let Some(mut dialog) = created else {
            return (None, false);
        };
        dialog.remote_addr = self.inner.transactions.remote_addr(tx);

        let id = dialog.id.clone();
        let is_early = dialog.state == DialogState::Early;
        let forked = !bound.is_empty();
        debug!(dialog = %id, tx = %tx, forked, "dialog created from response");
        self.inner.dialogs.insert(id.clone(), dialog);
        self.inner
            .tx_dialogs
            .entry(tx.clone())
            .or_default()
            .push(id.clone());
        self.register_lookup(&id);
        if is_early {
            self.start_early_expiry(&id);
        }
        (Some(id), forked)
    }

    /// Validates the remote CSeq of an in-dialog request; out-of-order
    /// requests are answered 500 and not delivered (RFC 3261 Section
    /// 12.2.2)
    async fn accept_remote_cseq(
        &self,
        tx: &TransactionKey,
        dialog_id: &DialogId,
        request: &Request,
    ) -> bool {
        let Some(cseq) = request.cseq() else {
            return true;
        };
        let result = self
            .inner
            .dialogs
            .get_mut(dialog_id)
            .map(|mut d| d.update_remote_sequence(cseq.seq, self.inner.config.cseq_validation));
        if let Some(Err(e)) = result {
            warn!(dialog = %dialog_id, "rejecting in-dialog request: {}", e);
            if let Ok(response) =
                server_quick::response_for(request, StatusCode::SERVER_INTERNAL_ERROR, None)
            {
                let _ = self.inner.transactions.send_response(tx, response).await;
            }
            return false;
        }
        true
    }
}

impl std::fmt::Debug for DialogManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialogManager")
            .field("dialogs", &self.inner.dialogs.len())
            .field("stopped", &self.inner.stopped.load(Ordering::SeqCst))
            .finish()
    }
}

/// Consumes the transaction event stream for the manager's lifetime
async fn event_loop(
    manager: DialogManager,
    mut events: mpsc::Receiver<TransactionEvent>,
) {
    while let Some(event) = events.recv().await {
        if manager.inner.stopped.load(Ordering::SeqCst) {
            break;
        }
        handle_transaction_event(&manager, event).await;
    }
    debug!("dialog event loop ended");
}

async fn handle_transaction_event(manager: &DialogManager, event: TransactionEvent) {
    match event {
        TransactionEvent::InviteRequest {
            transaction_id,
            request,
            source,
        } => {
            handle_inbound_request(manager, transaction_id, request, source).await;
        }
        TransactionEvent::NonInviteRequest {
            transaction_id,
            request,
            source,
        } => {
            handle_inbound_request(manager, transaction_id, request, source).await;
        }
        TransactionEvent::ProvisionalResponse {
            transaction_id,
            response,
            is_retransmission,
        }
        | TransactionEvent::SuccessResponse {
            transaction_id,
            response,
            is_retransmission,
        }
        | TransactionEvent::FailureResponse {
            transaction_id,
            response,
            is_retransmission,
        } => {
            handle_client_response(manager, transaction_id, response, is_retransmission).await;
        }
        TransactionEvent::AckReceived { .. } => {
            // ACK to a non-2xx: pure transaction-layer bookkeeping
        }
        TransactionEvent::StrayAck { request, source } => {
            // The ACK to a 2xx: an in-dialog request without its own
            // transaction. Branch matching cannot reach the INVITE server
            // transaction (the 2xx ACK has a fresh branch), so resolve it
            // through the dialog and hand the ACK back down to move that
            // machine to Confirmed.
            let dialog = key_for_incoming_request(&request)
                .and_then(|key| manager.inner.dialog_lookup.get(&key).map(|id| id.clone()));
            if let Some(dialog_id) = &dialog {
                let invite_tx = manager.inner.tx_dialogs.iter().find_map(|entry| {
                    let key = entry.key();
                    if key.is_server
                        && key.method == Method::Invite
                        && entry.value().contains(dialog_id)
                    {
                        Some(key.clone())
                    } else {
                        None
                    }
                });
                if let Some(tx) = invite_tx {
                    let _ = manager
                        .inner
                        .transactions
                        .forward_ack(&tx, request.clone())
                        .await;
                }
            }
            manager
                .emit(SipEvent::Request {
                    request,
                    transaction: None,
                    dialog,
                    source,
                })
                .await;
        }
        TransactionEvent::CancelReceived {
            transaction_id,
            cancel_transaction_id,
            request,
        } => {
            let dialog = manager
                .inner
                .tx_dialogs
                .get(&transaction_id)
                .and_then(|l| l.first().cloned());
            let source = manager
                .inner
                .transactions
                .remote_addr(&cancel_transaction_id)
                .unwrap_or_else(|| "0.0.0.0:0".parse().expect("literal addr"));
            manager
                .emit(SipEvent::Request {
                    request,
                    transaction: Some(cancel_transaction_id),
                    dialog,
                    source,
                })
                .await;
        }
        TransactionEvent::TransactionTimeout { transaction_id } => {
            manager
                .emit(SipEvent::Timeout {
                    transaction: transaction_id.clone(),
                })
                .await;
            // Dialogs that never confirmed die with their transaction
            for id in manager.dialogs_for_transaction(&transaction_id) {
                let early = manager
                    .inner
                    .dialogs
                    .get(&id)
                    .map(|d| matches!(d.state, DialogState::Initial | DialogState::Early))
                    .unwrap_or(false);
                if early {
                    manager.finish_dialog(&id, "transaction timeout").await;
                }
            }
        }
        TransactionEvent::TransactionTerminated { transaction_id } => {
            manager.inner.tx_dialogs.remove(&transaction_id);
            manager
                .emit(SipEvent::TransactionTerminated {
                    transaction: transaction_id,
                })
                .await;
        }
        TransactionEvent::StrayResponse { response, source: _ } => {
            let dialog = key_for_incoming_response(&response)
                .and_then(|key| manager.inner.dialog_lookup.get(&key).map(|id| id.clone()));
            manager
                .emit(SipEvent::Response {
                    response,
                    transaction: None,
                    dialog,
                    forked: false,
                    retransmission: false,
                })
                .await;
        }
        TransactionEvent::StrayRequest { request, source } => {
            manager
                .emit(SipEvent::Request {
                    request,
                    transaction: None,
                    dialog: None,
                    source,
                })
                .await;
        }
        TransactionEvent::TransportError {
            destination, error, ..
        } => {
            manager
                .emit(SipEvent::TransportError { destination, error })
                .await;
        }
        TransactionEvent::StateChanged { .. } => {
            // Transaction-internal; dialogs react to messages, not states
        }
        TransactionEvent::Error {
            transaction_id,
            error,
        } => {
            warn!(?transaction_id, "transaction layer error: {}", error);
        }
    }
}

/// Routes an inbound request to its dialog (validating the remote CSeq) or
/// creates the UAS dialog for a dialog-creating request
async fn handle_inbound_request(
    manager: &DialogManager,
    transaction_id: TransactionKey,
    request: Request,
    source: SocketAddr,
) {
    // In-dialog request: both tags present and a dialog matches
    if let Some(dialog_id) = key_for_incoming_request(&request)
        .and_then(|key| manager.inner.dialog_lookup.get(&key).map(|id| id.clone()))
    {
        if request.method != Method::Ack
            && !manager
                .accept_remote_cseq(&transaction_id, &dialog_id, &request)
                .await
        {
            return;
        }
        manager
            .inner
            .tx_dialogs
            .insert(transaction_id.clone(), vec![dialog_id.clone()]);
        manager
            .emit(SipEvent::Request {
                request,
                transaction: Some(transaction_id),
                dialog: Some(dialog_id),
                source,
            })
            .await;
        return;
    }

    // Out-of-dialog: a dialog-creating request spawns the UAS dialog
    let mut dialog = None;
    if request.method.is_dialog_creating()
        && request.to_tag().is_none()
        && manager.inner.config.automatic_dialog_support
    {
        match manager.create_dialog_for_transaction(&transaction_id) {
            Ok(id) => dialog = Some(id),
            Err(e) => trace!(tx = %transaction_id, "no dialog created: {}", e),
        }
    }
    manager
        .emit(SipEvent::Request {
            request,
            transaction: Some(transaction_id),
            dialog,
            source,
        })
        .await;
}

/// Client-side response handling: dialog creation/confirmation, fork
/// tracking, BYE completion and early-dialog teardown
async fn handle_client_response(
    manager: &DialogManager,
    transaction_id: TransactionKey,
    response: Response,
    is_retransmission: bool,
) {
    let cseq_method = response.cseq().map(|c| c.method);
    let mut dialog = None;
    let mut forked = false;

    if matches!(&cseq_method, Some(m) if m.is_dialog_creating()) && !is_retransmission {
        let (id, was_fork) = manager.absorb_uac_response(&transaction_id, &response);
        dialog = id;
        forked = was_fork;
    } else if dialog.is_none() {
        dialog = key_for_incoming_response(&response)
            .and_then(|key| manager.inner.dialog_lookup.get(&key).map(|id| id.clone()))
            .or_else(|| {
                manager
                    .inner
                    .tx_dialogs
                    .get(&transaction_id)
                    .and_then(|l| l.first().cloned())
            });
    }

    let status = response.status;
    manager
        .emit(SipEvent::Response {
            response: response.clone(),
            transaction: Some(transaction_id.clone()),
            dialog: dialog.clone(),
            forked,
            retransmission: is_retransmission,
        })
        .await;

    if is_retransmission {
        return;
    }

    // Successful BYE completion terminates the dialog (unless opted out)
    if cseq_method == Some(Method::Bye) && status.is_success() {
        if let Some(id) = dialog {
            let terminate = manager
                .inner
                .dialogs
                .get(&id)
                .map(|d| d.terminate_on_bye)
                .unwrap_or(false);
            if terminate {
                manager.finish_dialog(&id, "BYE completed").await;
            }
        }
        return;
    }

    // A non-2xx final to the dialog-creating request tears down every
    // dialog the transaction spawned, each exactly once
    if matches!(&cseq_method, Some(m) if m.is_dialog_creating()) && status.is_error() {
        for id in manager.dialogs_for_transaction(&transaction_id) {
            manager.finish_dialog(&id, "request rejected").await;
        }
    }
}
