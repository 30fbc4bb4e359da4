//! RFC 3261 transaction layer for the sipflow stack
//!
//! This crate implements the four transaction state machines of RFC 3261
//! Section 17 — INVITE and non-INVITE, client and server — together with
//! the timer subsystem that drives retransmission and timeout behavior and
//! the [`TransactionManager`] that demultiplexes wire traffic onto live
//! transactions.
//!
//! ## Architecture
//!
//! Every transaction runs as its own tokio task consuming an mpsc command
//! channel (see [`transaction::runner`]). The task owns the transaction's
//! timers and delegates state-machine decisions to a
//! [`TransactionLogic`](transaction::logic::TransactionLogic)
//! implementation, one per transaction kind. Significant events are
//! reported to the transaction user over a single event channel handed out
//! by the manager at construction time.
//!
//! ```text
//! transport events ──▶ TransactionManager ──▶ per-transaction task ──▶ TU events
//!                          │  branch demux        │  FSM + timers
//!                          └── stray paths ───────┘
//! ```

pub mod builders;
pub mod client;
pub mod error;
pub mod manager;
pub mod server;
pub mod timer;
pub mod transaction;
pub mod utils;

pub use error::{Error, Result};
pub use manager::TransactionManager;
pub use timer::{TimerManager, TimerSettings, TimerType};
pub use transaction::{
    TransactionEvent, TransactionKey, TransactionKind, TransactionState,
};

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::builders::{client_quick, server_quick};
    pub use crate::error::{Error, Result};
    pub use crate::manager::TransactionManager;
    pub use crate::timer::{TimerManager, TimerSettings, TimerType};
    pub use crate::transaction::{
        TransactionEvent, TransactionKey, TransactionKind, TransactionState,
    };
}
