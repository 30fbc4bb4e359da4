//! SIP message model for the sipflow stack
//!
//! This crate provides the value objects the transaction and dialog layers
//! operate on: [`Request`], [`Response`], and the ordered, case-insensitive
//! [`Headers`](types::headers::Headers) multimap, together with typed
//! accessors for the identity fields the upper layers must read (Call-ID,
//! From/To tags, CSeq, the branch parameter of the topmost Via, Contact and
//! Record-Route for dialog route-set capture).
//!
//! Header values beyond those identity fields are carried as opaque strings;
//! full header grammar and SDP body parsing are out of scope for this crate.
//! [`parse_message`] performs framing-level parsing only (start line, header
//! lines, body), which is what the transport layer needs to turn datagrams
//! into messages.

pub mod error;
pub mod message;
pub mod parser;
pub mod types;

pub use error::{Error, Result};
pub use message::{Message, Request, Response};
pub use parser::parse_message;
pub use types::address::Address;
pub use types::cseq::CSeq;
pub use types::headers::{Header, HeaderName, Headers};
pub use types::method::Method;
pub use types::status::StatusCode;
pub use types::uri::Uri;
pub use types::via::Via;

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::message::{Message, Request, Response};
    pub use crate::parser::parse_message;
    pub use crate::types::address::Address;
    pub use crate::types::cseq::CSeq;
    pub use crate::types::headers::{Header, HeaderName, Headers};
    pub use crate::types::method::Method;
    pub use crate::types::status::StatusCode;
    pub use crate::types::uri::Uri;
    pub use crate::types::via::Via;
}
