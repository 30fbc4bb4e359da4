//! Configuration for the dialog layer

use std::time::Duration;

use serde::{Deserialize, Serialize};

use sipflow_transaction_core::TimerSettings;

use crate::errors::{DialogError, DialogResult};

/// Configuration for a dialog manager / stack instance
///
/// Builder-style `with_*` methods; every instance owns its own copy (no
/// process-wide settings).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogConfig {
    /// Create dialogs automatically for dialog-creating requests and
    /// responses. With this off the application calls
    /// `create_dialog_for_transaction` itself (the call is idempotent).
    pub automatic_dialog_support: bool,

    /// Whether the stack owns 2xx retransmission and ACK generation for
    /// non-2xx finals. Off delegates 2xx reliability to the application.
    pub retransmission_filter: bool,

    /// Reject out-of-order remote CSeq values on in-dialog requests
    pub cseq_validation: bool,

    /// How long an early dialog may wait for a 2xx before it expires
    pub early_dialog_timeout: Duration,

    /// Capacity of the application event channel
    pub event_channel_capacity: usize,

    /// Transaction timer durations (T1 and derived caps)
    pub timers: TimerSettings,
}

impl Default for DialogConfig {
    fn default() -> Self {
        DialogConfig {
            automatic_dialog_support: true,
            retransmission_filter: true,
            cseq_validation: true,
            early_dialog_timeout: Duration::from_secs(32),
            event_channel_capacity: 100,
            timers: TimerSettings::default(),
        }
    }
}

impl DialogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_automatic_dialog_support(mut self, enabled: bool) -> Self {
        self.automatic_dialog_support = enabled;
        self
    }

    pub fn with_retransmission_filter(mut self, enabled: bool) -> Self {
        self.retransmission_filter = enabled;
        self
    }

    pub fn with_cseq_validation(mut self, enabled: bool) -> Self {
        self.cseq_validation = enabled;
        self
    }

    pub fn with_early_dialog_timeout(mut self, timeout: Duration) -> Self {
        self.early_dialog_timeout = timeout;
        self
    }

    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    pub fn with_timers(mut self, timers: TimerSettings) -> Self {
        self.timers = timers;
        self
    }

    /// Validate the configuration before use
    pub fn validate(&self) -> DialogResult<()> {
        if self.event_channel_capacity == 0 {
            return Err(DialogError::Configuration(
                "event channel capacity must be nonzero".to_string(),
            ));
        }
        if self.early_dialog_timeout.is_zero() {
            return Err(DialogError::Configuration(
                "early dialog timeout must be nonzero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = DialogConfig::default();
        assert!(config.automatic_dialog_support);
        assert!(config.retransmission_filter);
        assert!(config.cseq_validation);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_chain() {
        let config = DialogConfig::new()
            .with_automatic_dialog_support(false)
            .with_cseq_validation(false)
            .with_early_dialog_timeout(Duration::from_secs(5));
        assert!(!config.automatic_dialog_support);
        assert!(!config.cseq_validation);
        assert_eq!(config.early_dialog_timeout, Duration::from_secs(5));
    }

    #[test]
    fn zero_capacity_rejected() {
        assert!(DialogConfig::new()
            .with_event_channel_capacity(0)
            .validate()
            .is_err());
    }
}
