//! Error types for the transport layer

use std::net::SocketAddr;

use thiserror::Error;

/// Errors surfaced by transport implementations
#[derive(Debug, Error)]
pub enum Error {
    /// Binding the local socket failed
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Sending a message toward a destination failed
    #[error("failed to send to {destination}: {source}")]
    Send {
        destination: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Operation attempted on a closed transport
    #[error("transport is closed")]
    Closed,

    /// The local address could not be determined
    #[error("local address unavailable: {0}")]
    LocalAddr(#[source] std::io::Error),
}

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, Error>;
