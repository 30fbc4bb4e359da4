//! Error types for the SIP message model

use thiserror::Error;

/// Errors produced while parsing or formatting SIP messages
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The start line is neither a valid request line nor a status line
    #[error("invalid start line: {0}")]
    InvalidStartLine(String),

    /// A header line is missing the `name: value` separator
    #[error("malformed header line: {0}")]
    MalformedHeader(String),

    /// A URI could not be parsed
    #[error("invalid URI: {0}")]
    InvalidUri(String),

    /// A status code outside the 100-699 range or unknown to this stack
    #[error("invalid status code: {0}")]
    InvalidStatusCode(u16),

    /// A structured header value (CSeq, Via, address) could not be parsed
    #[error("invalid {field} value: {value}")]
    InvalidHeaderValue { field: &'static str, value: String },

    /// The message ended before the header section was complete
    #[error("truncated message")]
    Truncated,
}

/// Result type for sip-core operations
pub type Result<T> = std::result::Result<T, Error>;
