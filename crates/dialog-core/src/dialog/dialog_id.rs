//! Dialog identifiers

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a dialog
///
/// Stable for the lifetime of the dialog object and independent of the
/// protocol-level (Call-ID, local tag, remote tag) triple, which is not
/// fully known until the remote tag arrives. The triple-keyed lookup table
/// maps onto these ids once a dialog is established.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DialogId(Uuid);

impl DialogId {
    pub fn new() -> Self {
        DialogId(Uuid::new_v4())
    }
}

impl Default for DialogId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DialogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(DialogId::new(), DialogId::new());
    }
}
