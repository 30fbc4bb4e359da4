//! The stack facade
//!
//! Wires a transport endpoint, a [`TransactionManager`] and a
//! [`DialogManager`] into one handle with the management operations the
//! application drives: create the listening endpoint, obtain the provider,
//! stop. Stop is hard: timers are dropped without delivering their
//! callbacks and no termination notifications are sent.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use sipflow_sip_transport::{Transport, TransportEvent, UdpTransport};
use sipflow_transaction_core::TransactionManager;

use crate::config::DialogConfig;
use crate::errors::DialogResult;
use crate::events::SipEvent;
use crate::manager::DialogManager;

/// One SIP stack instance: endpoint + transaction layer + dialog layer
pub struct SipStack {
    transport: Arc<dyn Transport>,
    dialog_manager: DialogManager,
}

impl SipStack {
    /// Binds a UDP listening point and starts the stack over it
    pub async fn start_udp(
        bind_addr: SocketAddr,
        config: DialogConfig,
    ) -> DialogResult<(Self, mpsc::Receiver<SipEvent>)> {
        let (transport, transport_rx) = UdpTransport::bind(bind_addr, None).await?;
        let stack = Self::start_with_transport(Arc::new(transport), transport_rx, config).await?;
        info!(addr = %bind_addr, "SIP stack started on UDP");
        Ok(stack)
    }

    /// Starts the stack over an existing transport (any implementation of
    /// [`Transport`], including the in-memory channel transport used in
    /// tests)
    pub async fn start_with_transport(
        transport: Arc<dyn Transport>,
        transport_rx: mpsc::Receiver<TransportEvent>,
        config: DialogConfig,
    ) -> DialogResult<(Self, mpsc::Receiver<SipEvent>)> {
        config.validate()?;
        let (transactions, transaction_events) = TransactionManager::with_config(
            transport.clone(),
            transport_rx,
            Some(config.event_channel_capacity),
            config.timers,
            config.retransmission_filter,
        )
        .await?;
        let (dialog_manager, events_rx) =
            DialogManager::new(transactions, transaction_events, config)?;
        Ok((
            SipStack {
                transport,
                dialog_manager,
            },
            events_rx,
        ))
    }

    /// The provider: all request/response/dialog operations live here
    pub fn provider(&self) -> &DialogManager {
        &self.dialog_manager
    }

    /// Local address of the listening point
    pub fn local_addr(&self) -> DialogResult<SocketAddr> {
        Ok(self.transport.local_addr()?)
    }

    /// Hard stop: immediate resource release. Pending timers are dropped
    /// without delivering callbacks; no graceful notifications are sent.
    pub async fn stop(&self) {
        self.dialog_manager.stop().await;
        let _ = self.transport.close().await;
        info!("SIP stack stopped");
    }
}

impl std::fmt::Debug for SipStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SipStack")
            .field("local_addr", &self.transport.local_addr().ok())
            .field("dialog_manager", &self.dialog_manager)
            .finish()
    }
}
