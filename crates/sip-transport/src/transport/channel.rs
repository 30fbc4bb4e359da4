//! In-memory channel transport
//!
//! A pair of loopback transports joined by channels, used by the transaction
//! and dialog test suites to exchange messages deterministically without
//! sockets. Messages are round-tripped through wire serialization so the
//! tests exercise the same framing path real transports do.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use sipflow_sip_core::{parse_message, Message};

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportEvent};

const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// One endpoint of an in-memory transport pair
#[derive(Clone)]
pub struct ChannelTransport {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    /// Events delivered to the peer endpoint's receiver
    peer_events_tx: mpsc::Sender<TransportEvent>,
    /// Events delivered to this endpoint's receiver (used on close)
    events_tx: mpsc::Sender<TransportEvent>,
    closed: AtomicBool,
    reliable: bool,
}

impl std::fmt::Debug for ChannelTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelTransport")
            .field("local_addr", &self.inner.local_addr)
            .field("peer_addr", &self.inner.peer_addr)
            .field("reliable", &self.inner.reliable)
            .finish()
    }
}

impl ChannelTransport {
    /// Creates a connected pair of transports with the given nominal
    /// addresses. Whatever `a` sends arrives on `b`'s event receiver and
    /// vice versa, regardless of the destination address passed to
    /// `send_message`.
    pub fn pair(
        addr_a: SocketAddr,
        addr_b: SocketAddr,
    ) -> (
        (ChannelTransport, mpsc::Receiver<TransportEvent>),
        (ChannelTransport, mpsc::Receiver<TransportEvent>),
    ) {
        Self::pair_with_reliability(addr_a, addr_b, false)
    }

    /// Same as [`ChannelTransport::pair`] but reporting the given
    /// reliability, for exercising the reliable-transport timer rules
    pub fn pair_with_reliability(
        addr_a: SocketAddr,
        addr_b: SocketAddr,
        reliable: bool,
    ) -> (
        (ChannelTransport, mpsc::Receiver<TransportEvent>),
        (ChannelTransport, mpsc::Receiver<TransportEvent>),
    ) {
        let (a_tx, a_rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
        let (b_tx, b_rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);

        let a = ChannelTransport {
            inner: Arc::new(ChannelInner {
                local_addr: addr_a,
                peer_addr: addr_b,
                peer_events_tx: b_tx.clone(),
                events_tx: a_tx.clone(),
                closed: AtomicBool::new(false),
                reliable,
            }),
        };
        let b = ChannelTransport {
            inner: Arc::new(ChannelInner {
                local_addr: addr_b,
                peer_addr: addr_a,
                peer_events_tx: a_tx,
                events_tx: b_tx,
                closed: AtomicBool::new(false),
                reliable,
            }),
        };

        ((a, a_rx), (b, b_rx))
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr)
    }

    async fn send_message(&self, message: Message, destination: SocketAddr) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }

        // Round-trip through the wire format so this path stays honest
        let message = match parse_message(&message.to_bytes()) {
            Ok(message) => message,
            Err(e) => {
                warn!("channel transport produced unparseable bytes: {}", e);
                message
            }
        };

        let event = TransportEvent::MessageReceived {
            message,
            source: self.inner.local_addr,
            destination,
        };
        self.inner
            .peer_events_tx
            .send(event)
            .await
            .map_err(|_| Error::Closed)?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.inner.closed.swap(true, Ordering::Relaxed) {
            let _ = self.inner.events_tx.send(TransportEvent::Closed).await;
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Relaxed)
    }

    fn is_reliable(&self) -> bool {
        self.inner.reliable
    }
}
