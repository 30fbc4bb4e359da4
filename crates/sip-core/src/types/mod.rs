//! Core SIP types
//!
//! Value types shared by requests and responses: methods, status codes,
//! URIs, addresses (name-addr with parameters), the header multimap, and
//! the structured identity headers (CSeq, Via) the upper layers read.

pub mod address;
pub mod cseq;
pub mod headers;
pub mod method;
pub mod status;
pub mod uri;
pub mod via;
