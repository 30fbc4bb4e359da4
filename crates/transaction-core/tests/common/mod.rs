//! Shared harness for transaction layer integration tests
//!
//! Wires transaction managers over an in-memory transport pair with
//! shortened timer settings so the RFC timers fire within test time.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use sipflow_sip_transport::{ChannelTransport, TransportEvent};
use sipflow_transaction_core::{TimerSettings, TransactionEvent, TransactionManager};

pub const ALICE_ADDR: &str = "10.0.0.1:5060";
pub const BOB_ADDR: &str = "10.0.0.2:5060";

/// Opt-in logging for debugging test runs: RUST_LOG=sipflow=trace
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

pub fn alice_addr() -> SocketAddr {
    ALICE_ADDR.parse().unwrap()
}

pub fn bob_addr() -> SocketAddr {
    BOB_ADDR.parse().unwrap()
}

/// Timer settings scaled down for tests: transaction timeout 64*T1 stays
/// above a second so immediate exchanges never race it, while the wait
/// timers (D/I/J/K derived from T4 and wait_time_d) expire quickly.
pub fn fast_settings() -> TimerSettings {
    TimerSettings {
        t1: Duration::from_millis(200),
        t2: Duration::from_millis(800),
        t4: Duration::from_millis(120),
        wait_time_d: Duration::from_millis(150),
    }
}

/// A manager on each end of an in-memory transport pair
pub async fn manager_pair(
    settings: TimerSettings,
) -> (
    TransactionManager,
    mpsc::Receiver<TransactionEvent>,
    TransactionManager,
    mpsc::Receiver<TransactionEvent>,
) {
    let ((a, a_rx), (b, b_rx)) = ChannelTransport::pair(alice_addr(), bob_addr());
    let (alice, alice_events) =
        TransactionManager::with_config(Arc::new(a), a_rx, None, settings, true)
            .await
            .unwrap();
    let (bob, bob_events) = TransactionManager::with_config(Arc::new(b), b_rx, None, settings, true)
        .await
        .unwrap();
    (alice, alice_events, bob, bob_events)
}

/// A manager for alice and a raw transport endpoint for bob, for tests that
/// script the peer by hand
pub async fn manager_and_raw_peer(
    settings: TimerSettings,
) -> (
    TransactionManager,
    mpsc::Receiver<TransactionEvent>,
    ChannelTransport,
    mpsc::Receiver<TransportEvent>,
) {
    let ((a, a_rx), (b, b_rx)) = ChannelTransport::pair(alice_addr(), bob_addr());
    let (alice, alice_events) =
        TransactionManager::with_config(Arc::new(a), a_rx, None, settings, true)
            .await
            .unwrap();
    (alice, alice_events, b, b_rx)
}

/// Waits for the first TU event matching `pred`, discarding others
pub async fn wait_for_event(
    events: &mut mpsc::Receiver<TransactionEvent>,
    wait: Duration,
    pred: impl Fn(&TransactionEvent) -> bool,
) -> TransactionEvent {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .expect("timed out waiting for matching transaction event");
        let event = timeout(remaining, events.recv())
            .await
            .expect("timed out waiting for matching transaction event")
            .expect("event channel closed");
        if pred(&event) {
            return event;
        }
    }
}

/// Waits for the next inbound message on a raw transport endpoint
pub async fn next_message(
    events: &mut mpsc::Receiver<TransportEvent>,
    wait: Duration,
) -> sipflow_sip_core::Message {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .expect("timed out waiting for message");
        let event = timeout(remaining, events.recv())
            .await
            .expect("timed out waiting for message")
            .expect("transport channel closed");
        if let TransportEvent::MessageReceived { message, .. } = event {
            return message;
        }
    }
}
