//! Error types for dialog-core

use thiserror::Error;

use crate::dialog::{DialogId, DialogState};

/// Errors surfaced by the dialog layer
#[derive(Debug, Error)]
pub enum DialogError {
    /// No dialog with this id (or matching these tags) exists
    #[error("dialog not found: {0}")]
    DialogNotFound(DialogId),

    /// The operation is not legal in the dialog's current state
    #[error("invalid dialog state: expected {expected:?}, dialog is {actual:?}")]
    InvalidState {
        expected: DialogState,
        actual: DialogState,
    },

    /// An in-dialog request arrived with a CSeq at or below the last one
    #[error("out-of-order CSeq: got {got}, last seen {last}")]
    OutOfOrderCseq { got: u32, last: u32 },

    /// A message is missing a field the dialog layer must read
    #[error("message missing {0}")]
    MissingField(&'static str),

    /// Protocol-level inconsistency
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Error bubbled up from the transaction layer
    #[error(transparent)]
    Transaction(#[from] sipflow_transaction_core::Error),

    /// Error bubbled up from the transport layer
    #[error(transparent)]
    Transport(#[from] sipflow_sip_transport::Error),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The stack has been stopped
    #[error("stack is stopped")]
    Stopped,
}

impl DialogError {
    pub fn protocol(message: impl Into<String>) -> Self {
        DialogError::Protocol(message.into())
    }
}

/// Result type for dialog layer operations
pub type DialogResult<T> = std::result::Result<T, DialogError>;
