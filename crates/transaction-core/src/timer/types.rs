//! Timer names and duration settings

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The RFC 3261 transaction timers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimerType {
    /// INVITE client retransmission
    A,
    /// INVITE client transaction timeout
    B,
    /// INVITE client wait for response retransmissions
    D,
    /// Non-INVITE client retransmission
    E,
    /// Non-INVITE client transaction timeout
    F,
    /// INVITE server response retransmission
    G,
    /// INVITE server wait for ACK
    H,
    /// INVITE server wait in Confirmed
    I,
    /// Non-INVITE server wait for request retransmissions
    J,
    /// Non-INVITE client wait for response retransmissions
    K,
}

impl fmt::Display for TimerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimerType::A => "A",
            TimerType::B => "B",
            TimerType::D => "D",
            TimerType::E => "E",
            TimerType::F => "F",
            TimerType::G => "G",
            TimerType::H => "H",
            TimerType::I => "I",
            TimerType::J => "J",
            TimerType::K => "K",
        };
        f.write_str(name)
    }
}

/// Base timer durations, per RFC 3261 Table 4
///
/// T1 is the round-trip estimate every derived interval is computed from;
/// overriding it rescales the whole machine (the configuration surface the
/// stack exposes for tests and fast-failing deployments).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerSettings {
    /// RTT estimate; initial retransmit interval (default 500 ms)
    pub t1: Duration,
    /// Retransmission interval cap (default 4 s)
    pub t2: Duration,
    /// Maximum lifetime of a message in the network (default 5 s)
    pub t4: Duration,
    /// Timer D duration on unreliable transports (default 32 s)
    pub wait_time_d: Duration,
}

impl Default for TimerSettings {
    fn default() -> Self {
        TimerSettings {
            t1: Duration::from_millis(500),
            t2: Duration::from_secs(4),
            t4: Duration::from_secs(5),
            wait_time_d: Duration::from_secs(32),
        }
    }
}

impl TimerSettings {
    /// Timer B / F / H duration: 64*T1
    pub fn transaction_timeout(&self) -> Duration {
        self.t1.saturating_mul(64)
    }

    /// Timer J duration on unreliable transports: 64*T1
    pub fn wait_time_j(&self) -> Duration {
        self.t1.saturating_mul(64)
    }

    /// Timer I duration on unreliable transports: T4
    pub fn wait_time_i(&self) -> Duration {
        self.t4
    }

    /// Timer K duration on unreliable transports: T4
    pub fn wait_time_k(&self) -> Duration {
        self.t4
    }

    /// Next retransmission interval: doubled, clamped at T2
    pub fn next_retransmit_interval(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.t2)
    }
}
