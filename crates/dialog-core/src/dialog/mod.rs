//! Core dialog types and functionality
//!
//! - [`DialogId`]: unique identifiers for dialogs
//! - [`Dialog`]: the dialog implementation with identity, sequence and
//!   route-set bookkeeping
//! - [`DialogState`]: the Initial → Early → Confirmed → Terminated lifecycle
//! - [`dialog_utils`]: route-set and request-template helpers
//!
//! ```text
//! Initial ──1xx+tag──▶ Early ──2xx──▶ Confirmed ──BYE/timeout──▶ Terminated
//!     └────────────────2xx────────────────┘
//! ```
//!
//! Dialogs are created and driven through the
//! [`DialogManager`](crate::manager::DialogManager).

pub mod dialog_id;
pub mod dialog_impl;
pub mod dialog_state;
pub mod dialog_utils;

pub use dialog_id::DialogId;
pub use dialog_impl::{Dialog, DialogRequestTemplate};
pub use dialog_state::DialogState;
