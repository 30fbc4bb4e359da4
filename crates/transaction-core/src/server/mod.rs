//! Server transaction state machines
//!
//! [`InviteServerLogic`] implements RFC 3261 Section 17.2.1,
//! [`NonInviteServerLogic`] Section 17.2.2. Both absorb request
//! retransmissions without re-reporting them to the TU and, once a final
//! response is on record, answer retransmissions by resending it.

pub mod invite;
pub mod non_invite;

pub use invite::InviteServerLogic;
pub use non_invite::NonInviteServerLogic;
