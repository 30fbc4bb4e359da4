//! Dialog lifecycle states

use std::fmt;

use serde::{Deserialize, Serialize};

/// The RFC 3261 dialog lifecycle
///
/// `Initial` is the unset state a dialog sits in between creation and the
/// first dialog-establishing response (a UAS dialog stays here until a
/// response with a To tag is actually sent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DialogState {
    /// Created but not yet established by any tagged response
    Initial,
    /// Established by a provisional response with a To tag
    Early,
    /// Established by a 2xx
    Confirmed,
    /// Terminal; set exactly once
    Terminated,
}

impl fmt::Display for DialogState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DialogState::Initial => "Initial",
            DialogState::Early => "Early",
            DialogState::Confirmed => "Confirmed",
            DialogState::Terminated => "Terminated",
        };
        f.write_str(name)
    }
}
