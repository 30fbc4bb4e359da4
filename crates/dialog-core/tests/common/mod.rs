//! Shared harness for dialog layer integration tests
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use sipflow_dialog_core::{DialogConfig, DialogManager, SipEvent, SipStack};
use sipflow_sip_core::{Method, StatusCode};
use sipflow_sip_transport::{ChannelTransport, TransportEvent};
use sipflow_transaction_core::builders::server_quick;
use sipflow_transaction_core::TimerSettings;

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

/// T1 large enough that immediate answers beat the retransmit timer; the
/// wait timers (D/I/K) short so transactions collect quickly
pub fn fast_config() -> DialogConfig {
    DialogConfig::new()
        .with_timers(TimerSettings {
            t1: Duration::from_millis(200),
            t2: Duration::from_millis(800),
            t4: Duration::from_millis(80),
            wait_time_d: Duration::from_millis(300),
        })
        .with_early_dialog_timeout(Duration::from_secs(5))
}

/// Two full stacks joined by an in-memory transport pair
pub async fn stack_pair(
    config: DialogConfig,
) -> (
    (SipStack, mpsc::Receiver<SipEvent>),
    (SipStack, mpsc::Receiver<SipEvent>),
) {
    let ((a, a_rx), (b, b_rx)) = ChannelTransport::pair(alice_addr(), bob_addr());
    let alice = SipStack::start_with_transport(Arc::new(a), a_rx, config.clone())
        .await
        .unwrap();
    let bob = SipStack::start_with_transport(Arc::new(b), b_rx, config)
        .await
        .unwrap();
    (alice, bob)
}

/// A full stack for alice and a raw scripted endpoint for bob
pub async fn stack_and_raw_peer(
    config: DialogConfig,
) -> (
    SipStack,
    mpsc::Receiver<SipEvent>,
    ChannelTransport,
    mpsc::Receiver<TransportEvent>,
) {
    let ((a, a_rx), (b, b_rx)) = ChannelTransport::pair(alice_addr(), bob_addr());
    let (alice, alice_events) = SipStack::start_with_transport(Arc::new(a), a_rx, config)
        .await
        .unwrap();
    (alice, alice_events, b, b_rx)
}

/// Waits for the first application event matching `pred`, discarding others
pub async fn wait_for_sip_event(
    events: &mut mpsc::Receiver<SipEvent>,
    wait: Duration,
    pred: impl Fn(&SipEvent) -> bool,
) -> SipEvent {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .expect("timed out waiting for matching event");
        let event = timeout(remaining, events.recv())
            .await
            .expect("timed out waiting for matching event")
            .expect("event channel closed");
        if pred(&event) {
            return event;
        }
    }
}

/// Waits for the next inbound message on a raw transport endpoint
pub async fn next_raw_message(
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

/// Runs a minimal UAS: INVITE gets 180 then 200 with `to_tag`, every other
/// request (BYE, OPTIONS, ...) gets 200
pub fn spawn_uas(
    provider: DialogManager,
    mut events: mpsc::Receiver<SipEvent>,
    to_tag: &str,
) -> tokio::task::JoinHandle<()> {
    let to_tag = to_tag.to_string();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let SipEvent::Request {
                request,
                transaction: Some(tx),
                ..
            } = event
            else {
                continue;
            };
            match request.method {
                Method::Invite => {
                    let ringing = server_quick::ringing(&request, &to_tag).unwrap();
                    let _ = provider.send_response(&tx, ringing).await;
                    let ok =
                        server_quick::ok(&request, &to_tag, "sip:uas@10.0.0.2:5060").unwrap();
                    let _ = provider.send_response(&tx, ok).await;
                }
                Method::Ack => {}
                _ => {
                    let ok =
                        server_quick::response_for(&request, StatusCode::OK, Some(&to_tag))
                            .unwrap();
                    let _ = provider.send_response(&tx, ok).await;
                }
            }
        }
    })
}
