//! Server transaction integration tests
//!
//! Covers retransmission absorption with final-response replay, the INVITE
//! ACK wait (Timer H timeout and the Confirmed path), and double-response
//! rejection.

mod common;

use std::time::Duration;

use sipflow_sip_core::{Message, StatusCode};
use sipflow_sip_transport::Transport;
use sipflow_transaction_core::builders::{client_quick, server_quick};
use sipflow_transaction_core::{TimerSettings, TransactionEvent, TransactionState};

use common::*;

async fn raw_peer_and_server(
    settings: TimerSettings,
) -> (
    sipflow_sip_transport::ChannelTransport,
    tokio::sync::mpsc::Receiver<sipflow_sip_transport::TransportEvent>,
    sipflow_transaction_core::TransactionManager,
    tokio::sync::mpsc::Receiver<TransactionEvent>,
) {
    use std::sync::Arc;
    use sipflow_sip_transport::ChannelTransport;
    use sipflow_transaction_core::TransactionManager;

    let ((a, a_rx), (b, b_rx)) = ChannelTransport::pair(alice_addr(), bob_addr());
    let (bob, bob_events) = TransactionManager::with_config(Arc::new(b), b_rx, None, settings, true)
        .await
        .unwrap();
    (a, a_rx, bob, bob_events)
}

/// P1: redelivering the identical request must not produce a duplicate
/// Request event, and in Completed must resend exactly the last final
/// response
#[tokio::test]
async fn absorbs_request_retransmissions_and_resends_final() {
    init_tracing();
    let settings = TimerSettings {
        t1: Duration::from_millis(300),
        t2: Duration::from_millis(1200),
        t4: Duration::from_millis(60),
        wait_time_d: Duration::from_millis(80),
    };
    let (alice_transport, mut alice_rx, bob, mut bob_events) =
        raw_peer_and_server(settings).await;

    let options =
        client_quick::options("sip:alice@atlanta.com", "sip:bob@biloxi.com", ALICE_ADDR).unwrap();
    alice_transport
        .send_message(options.clone().into(), bob_addr())
        .await
        .unwrap();

    let event = wait_for_event(&mut bob_events, Duration::from_secs(2), |e| {
        matches!(e, TransactionEvent::NonInviteRequest { .. })
    })
    .await;
    let TransactionEvent::NonInviteRequest {
        transaction_id,
        request,
        ..
    } = event
    else {
        unreachable!();
    };

    let ok = server_quick::response_for(&request, StatusCode::OK, Some("bob-tag")).unwrap();
    bob.send_response(&transaction_id, ok).await.unwrap();

    let Message::Response(first) = next_message(&mut alice_rx, Duration::from_secs(2)).await
    else {
        panic!("expected the 200");
    };
    assert_eq!(first.status, StatusCode::OK);

    // Redeliver the identical request: the Completed machine answers with
    // the same final and the TU hears nothing
    alice_transport
        .send_message(options.into(), bob_addr())
        .await
        .unwrap();
    let Message::Response(replayed) = next_message(&mut alice_rx, Duration::from_secs(2)).await
    else {
        panic!("expected the replayed 200");
    };
    assert_eq!(replayed.status, StatusCode::OK);
    assert_eq!(replayed.to_tag().as_deref(), Some("bob-tag"));

    tokio::time::sleep(Duration::from_millis(100)).await;
    while let Ok(event) = bob_events.try_recv() {
        assert!(
            !matches!(event, TransactionEvent::NonInviteRequest { .. }),
            "retransmission reached the TU"
        );
    }
}

/// Scenario: server answers an INVITE with 486 and the ACK never arrives.
/// Timer H fires a Timeout and the machine terminates without ever
/// reaching Confirmed. Timer G meanwhile retransmitted the 486.
#[tokio::test]
async fn invite_server_times_out_waiting_for_ack() {
    let settings = TimerSettings {
        t1: Duration::from_millis(20),
        t2: Duration::from_millis(80),
        t4: Duration::from_millis(40),
        wait_time_d: Duration::from_millis(50),
    };
    let (alice_transport, mut alice_rx, bob, mut bob_events) =
        raw_peer_and_server(settings).await;

    let invite =
        client_quick::invite("sip:alice@atlanta.com", "sip:bob@biloxi.com", ALICE_ADDR).unwrap();
    alice_transport
        .send_message(invite.into(), bob_addr())
        .await
        .unwrap();

    let event = wait_for_event(&mut bob_events, Duration::from_secs(2), |e| {
        matches!(e, TransactionEvent::InviteRequest { .. })
    })
    .await;
    let TransactionEvent::InviteRequest {
        transaction_id,
        request,
        ..
    } = event
    else {
        unreachable!();
    };

    let busy = server_quick::busy_here(&request, "bob-tag").unwrap();
    bob.send_response(&transaction_id, busy).await.unwrap();

    // Timer H = 64*T1 = 1.28s with no ACK: exactly one Timeout, then
    // Terminated, and Confirmed never appears
    let mut saw_confirmed = false;
    let mut timeouts = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let event = tokio::time::timeout_at(deadline, bob_events.recv())
            .await
            .expect("timed out waiting for Timer H")
            .expect("event channel closed");
        match event {
            TransactionEvent::StateChanged {
                new_state: TransactionState::Confirmed,
                ..
            } => saw_confirmed = true,
            TransactionEvent::TransactionTimeout { .. } => timeouts += 1,
            TransactionEvent::StateChanged {
                new_state: TransactionState::Terminated,
                ..
            } => break,
            _ => {}
        }
    }
    assert_eq!(timeouts, 1, "Timer H must fire exactly one Timeout");
    assert!(!saw_confirmed, "machine must never reach Confirmed without ACK");

    // Timer G retransmitted the 486 while waiting
    let mut busy_count = 0;
    while let Ok(event) = alice_rx.try_recv() {
        if let sipflow_sip_transport::TransportEvent::MessageReceived { message, .. } = event {
            if matches!(&message, Message::Response(r) if r.status == StatusCode::BUSY_HERE) {
                busy_count += 1;
            }
        }
    }
    assert!(
        busy_count >= 3,
        "expected Timer G retransmissions of the 486, saw {}",
        busy_count
    );
}

/// The Confirmed path: ACK stops response retransmission and Timer I
/// terminates the machine
#[tokio::test]
async fn invite_server_confirms_on_ack_then_terminates() {
    let settings = TimerSettings {
        t1: Duration::from_millis(200),
        t2: Duration::from_millis(800),
        t4: Duration::from_millis(80),
        wait_time_d: Duration::from_millis(80),
    };
    let (alice_transport, mut alice_rx, bob, mut bob_events) =
        raw_peer_and_server(settings).await;

    let invite =
        client_quick::invite("sip:alice@atlanta.com", "sip:bob@biloxi.com", ALICE_ADDR).unwrap();
    alice_transport
        .send_message(invite.clone().into(), bob_addr())
        .await
        .unwrap();

    let event = wait_for_event(&mut bob_events, Duration::from_secs(2), |e| {
        matches!(e, TransactionEvent::InviteRequest { .. })
    })
    .await;
    let TransactionEvent::InviteRequest {
        transaction_id,
        request,
        ..
    } = event
    else {
        unreachable!();
    };

    let busy = server_quick::busy_here(&request, "bob-tag").unwrap();
    bob.send_response(&transaction_id, busy).await.unwrap();

    let Message::Response(received_busy) =
        next_message(&mut alice_rx, Duration::from_secs(2)).await
    else {
        panic!("expected the 486");
    };
    let ack = client_quick::ack_for_non_2xx(&invite, &received_busy).unwrap();
    alice_transport
        .send_message(ack.into(), bob_addr())
        .await
        .unwrap();

    wait_for_event(&mut bob_events, Duration::from_secs(2), |e| {
        matches!(e, TransactionEvent::AckReceived { .. })
    })
    .await;
    wait_for_event(&mut bob_events, Duration::from_secs(2), |e| {
        matches!(
            e,
            TransactionEvent::StateChanged {
                new_state: TransactionState::Confirmed,
                ..
            }
        )
    })
    .await;

    // Timer I (T4 = 80ms) then terminates the machine, with no Timeout
    let event = wait_for_event(&mut bob_events, Duration::from_secs(2), |e| {
        matches!(
            e,
            TransactionEvent::StateChanged {
                new_state: TransactionState::Terminated,
                ..
            }
        ) || matches!(e, TransactionEvent::TransactionTimeout { .. })
    })
    .await;
    assert!(
        matches!(
            event,
            TransactionEvent::StateChanged {
                new_state: TransactionState::Terminated,
                ..
            }
        ),
        "confirmed transaction must terminate via Timer I, not Timeout"
    );
}

/// A second final response is an invalid application call: rejected, and
/// the machine stays in its last valid state
#[tokio::test]
async fn second_final_response_is_rejected_without_corrupting_state() {
    let (alice_transport, _alice_rx, bob, mut bob_events) =
        raw_peer_and_server(fast_settings()).await;

    let options =
        client_quick::options("sip:alice@atlanta.com", "sip:bob@biloxi.com", ALICE_ADDR).unwrap();
    alice_transport
        .send_message(options.into(), bob_addr())
        .await
        .unwrap();

    let event = wait_for_event(&mut bob_events, Duration::from_secs(2), |e| {
        matches!(e, TransactionEvent::NonInviteRequest { .. })
    })
    .await;
    let TransactionEvent::NonInviteRequest {
        transaction_id,
        request,
        ..
    } = event
    else {
        unreachable!();
    };

    let ok = server_quick::response_for(&request, StatusCode::OK, Some("bob-tag")).unwrap();
    bob.send_response(&transaction_id, ok).await.unwrap();

    wait_for_event(&mut bob_events, Duration::from_secs(2), |e| {
        matches!(
            e,
            TransactionEvent::StateChanged {
                new_state: TransactionState::Completed,
                ..
            }
        )
    })
    .await;

    let second = server_quick::response_for(&request, StatusCode::NOT_FOUND, Some("bob-tag"))
        .unwrap();
    let err = bob.send_response(&transaction_id, second).await.unwrap_err();
    assert!(err.to_string().contains("final response already sent"));
    assert_eq!(
        bob.transaction_state(&transaction_id).unwrap(),
        TransactionState::Completed
    );
}
