//! Error types for the transaction layer

use thiserror::Error;

use crate::transaction::{TransactionKey, TransactionState};

/// Errors surfaced by the transaction layer
#[derive(Debug, Error)]
pub enum Error {
    /// No live transaction matches the given key
    #[error("transaction not found: {0}")]
    TransactionNotFound(TransactionKey),

    /// A transaction with this key already exists
    #[error("transaction already exists: {0}")]
    TransactionExists(TransactionKey),

    /// The requested state transition is not legal for this machine
    #[error("invalid state transition {from:?} -> {to:?}")]
    InvalidStateTransition {
        from: TransactionState,
        to: TransactionState,
    },

    /// An application call that violates the FSM (e.g. a second final
    /// response, CANCEL after a final). The transaction stays in its last
    /// valid state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The message is missing a field the transaction layer must read
    #[error("message missing {0}")]
    MissingField(&'static str),

    /// Transport-level failure
    #[error("transport error: {0}")]
    Transport(#[from] sipflow_sip_transport::Error),

    /// The transaction's task is gone (terminated or stack shut down)
    #[error("transaction channel closed")]
    ChannelClosed,
}

/// Result type for transaction layer operations
pub type Result<T> = std::result::Result<T, Error>;
