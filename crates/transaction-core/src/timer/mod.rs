//! Timer subsystem for SIP transactions
//!
//! RFC 3261 defines a family of named timers that control retransmission
//! intervals and state-hold durations for the four transaction types:
//!
//! ## Client transaction timers
//! - **Timer A** (INVITE): request retransmission interval
//! - **Timer B** (INVITE): transaction timeout
//! - **Timer D** (INVITE): wait time for response retransmissions
//! - **Timer E** (non-INVITE): request retransmission interval
//! - **Timer F** (non-INVITE): transaction timeout
//! - **Timer K** (non-INVITE): wait time for response retransmissions
//!
//! ## Server transaction timers
//! - **Timer G** (INVITE): response retransmission interval
//! - **Timer H** (INVITE): wait time for ACK
//! - **Timer I** (INVITE): wait time in Confirmed state
//! - **Timer J** (non-INVITE): wait time for request retransmissions
//!
//! The [`TimerManager`] is the scheduling primitive: one-shot or periodic
//! callbacks with race-free cancellation (a cancel that loses the race to a
//! concurrent firing still suppresses callback delivery, guarded by a
//! per-handle generation id). The [`TimerFactory`] binds a manager to a set
//! of [`TimerSettings`] and schedules the named transaction timers by
//! posting commands into a transaction's command channel.

pub mod factory;
pub mod manager;
pub mod types;

pub use factory::TimerFactory;
pub use manager::{TimerHandle, TimerManager};
pub use types::{TimerSettings, TimerType};
