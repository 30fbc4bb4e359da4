//! Management API
//!
//! [`SipStack`] is the top-level handle an application constructs: it owns
//! the transport endpoint, the transaction manager and the dialog manager
//! for one stack instance. No process-wide state exists; multiple stacks
//! coexist freely.

pub mod stack;

pub use stack::SipStack;
