//! Forked dialog isolation tests
//!
//! One client INVITE transaction, several provisional responses with
//! distinct To tags: each tag produces its own dialog, the dialogs advance
//! independently, and early siblings that never confirm expire on their
//! own without touching the confirmed one.

mod common;

use std::collections::HashSet;
use std::time::Duration;

use sipflow_dialog_core::{DialogState, SipEvent};
use sipflow_sip_core::Message;
use sipflow_sip_transport::Transport;
use sipflow_transaction_core::builders::{client_quick, server_quick};
use sipflow_transaction_core::TimerSettings;

use common::*;

/// P5: N distinct To tags produce N distinct dialogs, each independently
/// reaching Early/Confirmed/Terminated without affecting the others
#[tokio::test]
async fn forked_provisionals_create_isolated_dialogs() {
    init_tracing();
    let config = fast_config()
        .with_timers(TimerSettings {
            t1: Duration::from_millis(300),
            t2: Duration::from_millis(1200),
            t4: Duration::from_millis(80),
            wait_time_d: Duration::from_millis(100),
        })
        .with_early_dialog_timeout(Duration::from_millis(500));
    let (alice, mut alice_events, bob_transport, mut bob_rx) = stack_and_raw_peer(config).await;

    let invite =
        client_quick::invite("sip:alice@atlanta.com", "sip:bob@biloxi.com", ALICE_ADDR).unwrap();
    let invite_tx = alice
        .provider()
        .send_request(invite, bob_addr())
        .await
        .unwrap();
    let default_dialog = alice
        .provider()
        .dialogs_for_transaction(&invite_tx)
        .first()
        .cloned()
        .unwrap();

    let Message::Request(received_invite) =
        next_raw_message(&mut bob_rx, Duration::from_secs(2)).await
    else {
        panic!("expected the INVITE");
    };

    // Three downstream branches ring, each with its own tag
    for tag in ["fork-1", "fork-2", "fork-3"] {
        let ringing = server_quick::ringing(&received_invite, tag).unwrap();
        bob_transport
            .send_message(ringing.into(), alice_addr())
            .await
            .unwrap();
    }

    // Three Response events, three distinct dialogs; the first claims the
    // default dialog, the rest are flagged as forks
    let mut dialogs = Vec::new();
    for i in 0..3 {
        let event = wait_for_sip_event(&mut alice_events, Duration::from_secs(2), |e| {
            matches!(e, SipEvent::Response { response, .. } if response.status.is_provisional())
        })
        .await;
        let SipEvent::Response {
            dialog: Some(id),
            forked,
            response,
            ..
        } = event
        else {
            panic!("tagged provisional must resolve to a dialog");
        };
        assert_eq!(forked, i > 0, "only siblings after the first are forks");
        assert_eq!(
            alice.provider().dialog_state(&id).unwrap(),
            DialogState::Early
        );
        dialogs.push((id, response.to_tag().unwrap()));
    }
    assert_eq!(dialogs[0].0, default_dialog);
    let distinct: HashSet<_> = dialogs.iter().map(|(id, _)| id.clone()).collect();
    assert_eq!(distinct.len(), 3, "each tag gets its own dialog");

    // Branch fork-2 wins the call
    let ok = server_quick::ok(&received_invite, "fork-2", "sip:b2@10.0.0.2:5060").unwrap();
    bob_transport
        .send_message(ok.into(), alice_addr())
        .await
        .unwrap();

    let event = wait_for_sip_event(&mut alice_events, Duration::from_secs(2), |e| {
        matches!(e, SipEvent::Response { response, .. } if response.status.is_success())
    })
    .await;
    let SipEvent::Response {
        dialog: Some(winner),
        forked,
        ..
    } = event
    else {
        panic!("2xx must resolve to a dialog");
    };
    assert!(!forked, "the 2xx landed on an already-known fork");
    let fork2 = dialogs
        .iter()
        .find(|(_, tag)| tag == "fork-2")
        .map(|(id, _)| id.clone())
        .unwrap();
    assert_eq!(winner, fork2);
    assert_eq!(
        alice.provider().dialog_state(&fork2).unwrap(),
        DialogState::Confirmed
    );

    // The losers are untouched by the winner's confirmation...
    for (id, tag) in &dialogs {
        if tag != "fork-2" {
            assert_eq!(
                alice.provider().dialog_state(id).unwrap(),
                DialogState::Early
            );
        }
    }

    // ...and expire on their own, each with exactly one DialogTerminated
    let mut expired = HashSet::new();
    for _ in 0..2 {
        let event = wait_for_sip_event(&mut alice_events, Duration::from_secs(3), |e| {
            matches!(e, SipEvent::DialogTerminated { .. })
        })
        .await;
        let SipEvent::DialogTerminated { dialog, .. } = event else {
            unreachable!();
        };
        assert_ne!(dialog, fork2, "the confirmed dialog must not expire");
        expired.insert(dialog);
    }
    assert_eq!(expired.len(), 2);
    assert_eq!(
        alice.provider().dialog_state(&fork2).unwrap(),
        DialogState::Confirmed
    );

    // No further termination fires for anyone
    tokio::time::sleep(Duration::from_millis(400)).await;
    while let Ok(event) = alice_events.try_recv() {
        assert!(
            !matches!(event, SipEvent::DialogTerminated { .. }),
            "extra DialogTerminated observed"
        );
    }

    alice.stop().await;
}
