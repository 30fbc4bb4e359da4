//! The transport abstraction
//!
//! A [`Transport`] sends serialized SIP messages toward a destination and
//! publishes inbound traffic as [`TransportEvent`]s on an mpsc channel
//! handed out at construction time. The [`Transport::is_reliable`] flag is
//! what the transaction layer consults to decide whether retransmission
//! timers run and whether the RFC 3261 wait timers (D, I, J, K) are zero.

pub mod channel;
pub mod udp;

use std::net::SocketAddr;

use async_trait::async_trait;

use sipflow_sip_core::Message;

use crate::error::Result;

/// Events published by a transport's receive side
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A well-framed SIP message arrived
    MessageReceived {
        message: Message,
        source: SocketAddr,
        destination: SocketAddr,
    },
    /// An I/O or framing error occurred; the transport keeps running
    Error {
        error: String,
        /// Destination associated with a failed send, when known
        destination: Option<SocketAddr>,
    },
    /// The transport shut down and will publish no further events
    Closed,
}

/// A bidirectional SIP message transport
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// The local address this transport is bound to
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Serializes and sends a message to the destination
    async fn send_message(&self, message: Message, destination: SocketAddr) -> Result<()>;

    /// Closes the transport; subsequent sends fail with [`crate::Error::Closed`]
    async fn close(&self) -> Result<()>;

    /// True once [`Transport::close`] has completed
    fn is_closed(&self) -> bool;

    /// Whether the underlying transport provides reliable delivery.
    /// Unreliable transports (UDP) get retransmission timers; reliable ones
    /// skip them and use zero-length wait timers.
    fn is_reliable(&self) -> bool {
        false
    }
}
