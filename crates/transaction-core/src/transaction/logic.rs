//! Transaction data and the per-kind logic trait
//!
//! The generic runner ([`super::runner`]) owns the event loop; everything
//! kind-specific — which timers start on state entry, how messages map to
//! transitions, what each timer firing means — lives behind
//! [`TransactionLogic`]. The four implementations are
//! [`crate::client::InviteClientLogic`], [`crate::client::NonInviteClientLogic`],
//! [`crate::server::InviteServerLogic`] and [`crate::server::NonInviteServerLogic`].

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tracing::error;

use sipflow_sip_core::{Message, Request, Response};
use sipflow_sip_transport::Transport;

use crate::error::{Error, Result};
use crate::timer::TimerFactory;
use crate::transaction::{
    AtomicTransactionState, InternalTransactionCommand, TimerHandles, TransactionEvent,
    TransactionKey, TransactionKind, TransactionState,
};

/// Shared state of one transaction, visible to the runner and the logic
pub struct TransactionData {
    pub key: TransactionKey,
    pub state: Arc<AtomicTransactionState>,
    /// The original request (sent for client, received for server)
    pub request: Request,
    pub remote_addr: SocketAddr,
    pub transport: Arc<dyn Transport>,
    /// Events to the transaction user
    pub events_tx: mpsc::Sender<TransactionEvent>,
    /// This transaction's own command channel (for timers)
    pub cmd_tx: mpsc::Sender<InternalTransactionCommand>,
    pub timers: TimerFactory,
    /// Last response: received (client) or sent (server)
    pub last_response: Mutex<Option<Response>>,
    /// (To tag, is-final) pairs already delivered to the TU (client-side
    /// dedup / fork detection). Provisional and final responses dedup
    /// independently: a 200 following a 180 with the same tag is a new
    /// event, a second 200 with that tag is a retransmission.
    pub seen_to_tags: Mutex<HashSet<(String, bool)>>,
    /// Current retransmit interval for Timer A/E/G backoff
    pub retransmit_interval: Mutex<Duration>,
    /// Whether the stack (rather than the TU) owns 2xx retransmission
    pub retransmission_filter: bool,
}

impl TransactionData {
    /// True when retransmission timers apply to this transaction
    pub fn unreliable(&self) -> bool {
        !self.transport.is_reliable()
    }

    /// Sends a message to the transaction's remote address; on failure
    /// reports a transport error and schedules termination
    pub async fn transmit(&self, message: Message) -> Result<()> {
        match self
            .transport
            .send_message(message, self.remote_addr)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(id = %self.key, "transmit failed: {}", e);
                let _ = self
                    .events_tx
                    .send(TransactionEvent::TransportError {
                        transaction_id: Some(self.key.clone()),
                        destination: Some(self.remote_addr),
                        error: e.to_string(),
                    })
                    .await;
                let _ = self
                    .cmd_tx
                    .try_send(InternalTransactionCommand::Terminate);
                Err(Error::Transport(e))
            }
        }
    }

    /// Records a response's To tag as delivered; returns true when a
    /// response of the same class (provisional/final) with this tag was
    /// already delivered — a retransmission from the TU's point of view.
    /// A new tag is a fork and never a retransmission. Responses without a
    /// tag dedup on the empty key.
    pub async fn note_to_tag(&self, response: &Response) -> bool {
        let tag = response.to_tag().unwrap_or_default();
        let is_final = response.status.is_final();
        !self.seen_to_tags.lock().await.insert((tag, is_final))
    }
}

impl std::fmt::Debug for TransactionData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionData")
            .field("key", &self.key)
            .field("state", &self.state.get())
            .field("remote_addr", &self.remote_addr)
            .finish()
    }
}

/// Kind-specific behavior of a transaction machine
#[async_trait]
pub trait TransactionLogic: Send + Sync + 'static {
    fn kind(&self) -> TransactionKind;

    /// Timer setup and transmissions performed on entering `new_state`
    async fn on_enter_state(
        &self,
        data: &Arc<TransactionData>,
        new_state: TransactionState,
        previous_state: TransactionState,
        timers: &mut TimerHandles,
    ) -> Result<()>;

    /// Handles a message matched to this transaction; returns the state to
    /// move to, if any
    async fn process_message(
        &self,
        data: &Arc<TransactionData>,
        message: Message,
        current_state: TransactionState,
        timers: &mut TimerHandles,
    ) -> Result<Option<TransactionState>>;

    /// Handles a named timer firing. Stale firings (state moved on) must
    /// return `Ok(None)`.
    async fn handle_timer(
        &self,
        data: &Arc<TransactionData>,
        timer: crate::timer::TimerType,
        current_state: TransactionState,
        timers: &mut TimerHandles,
    ) -> Result<Option<TransactionState>>;

    /// TU-initiated response (server transactions only)
    async fn send_response(
        &self,
        _data: &Arc<TransactionData>,
        _response: Response,
        _current_state: TransactionState,
        _timers: &mut TimerHandles,
    ) -> Result<Option<TransactionState>> {
        Err(Error::InvalidOperation(
            "client transactions cannot send responses".to_string(),
        ))
    }
}
