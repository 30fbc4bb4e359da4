//! SIP transport layer for the sipflow stack
//!
//! This crate provides the transport seam the transaction layer sends
//! through: the [`Transport`] trait, the [`TransportEvent`] stream inbound
//! messages arrive on, a UDP implementation, and an in-memory channel
//! transport pair for deterministic tests.

pub mod error;
pub mod transport;

pub use error::{Error, Result};
pub use transport::channel::ChannelTransport;
pub use transport::udp::UdpTransport;
pub use transport::{Transport, TransportEvent};

/// Bind a UDP transport to the specified address
pub async fn bind_udp(
    addr: std::net::SocketAddr,
) -> Result<(UdpTransport, tokio::sync::mpsc::Receiver<TransportEvent>)> {
    UdpTransport::bind(addr, None).await
}

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::{bind_udp, ChannelTransport, Error, Result, Transport, TransportEvent, UdpTransport};
}
