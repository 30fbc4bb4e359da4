//! BYE handling and termination-notification tests
//!
//! Exactly-once DialogTerminated delivery under racing terminators, and
//! the `terminate_on_bye` opt-out that lets a dialog survive BYE
//! completion.

mod common;

use std::time::Duration;

use sipflow_dialog_core::{DialogId, DialogState, SipEvent, SipStack};
use sipflow_sip_core::{Method, StatusCode};
use sipflow_transaction_core::builders::client_quick;
use tokio::sync::mpsc;

use common::*;

/// Runs the INVITE handshake against a spawned UAS and returns alice's
/// confirmed dialog
async fn confirmed_dialog(
    alice: &SipStack,
    alice_events: &mut mpsc::Receiver<SipEvent>,
) -> DialogId {
    let invite =
        client_quick::invite("sip:alice@atlanta.com", "sip:bob@biloxi.com", ALICE_ADDR).unwrap();
    let invite_tx = alice
        .provider()
        .send_request(invite, bob_addr())
        .await
        .unwrap();
    let dialog = alice
        .provider()
        .dialogs_for_transaction(&invite_tx)
        .first()
        .cloned()
        .unwrap();

    wait_for_sip_event(alice_events, Duration::from_secs(2), |e| {
        matches!(e, SipEvent::Response { response, .. } if response.status == StatusCode::OK)
    })
    .await;
    alice.provider().send_ack(&dialog).await.unwrap();
    assert_eq!(
        alice.provider().dialog_state(&dialog).unwrap(),
        DialogState::Confirmed
    );
    dialog
}

/// P2: one DialogTerminated per dialog lifetime, no matter how many
/// paths race into termination (BYE completion plus a pile of explicit
/// terminators)
#[tokio::test]
async fn dialog_terminated_fires_exactly_once_under_bye_and_timeout_race() {
    init_tracing();
    let ((alice, mut alice_events), (bob, bob_events)) = stack_pair(fast_config()).await;
    let _uas = spawn_uas(bob.provider().clone(), bob_events, "uas-tag");

    let dialog = confirmed_dialog(&alice, &mut alice_events).await;

    // BYE completion races eight explicit terminators
    alice.provider().send_bye(&dialog).await.unwrap();
    let mut racers = Vec::new();
    for _ in 0..8 {
        let provider = alice.provider().clone();
        let id = dialog.clone();
        racers.push(tokio::spawn(async move {
            provider.terminate_dialog(&id, "racing terminator").await
        }));
    }

    let mut crossings = 0;
    for racer in racers {
        if let Ok(Ok(true)) = racer.await {
            crossings += 1;
        }
    }
    assert!(crossings <= 1, "at most one explicit call may cross");

    // Exactly one DialogTerminated reaches the application
    wait_for_sip_event(&mut alice_events, Duration::from_secs(2), |e| {
        matches!(e, SipEvent::DialogTerminated { dialog: d, .. } if *d == dialog)
    })
    .await;
    tokio::time::sleep(Duration::from_millis(400)).await;
    while let Ok(event) = alice_events.try_recv() {
        assert!(
            !matches!(event, SipEvent::DialogTerminated { .. }),
            "DialogTerminated fired more than once"
        );
    }
    assert_eq!(
        alice.provider().dialog_state(&dialog).unwrap(),
        DialogState::Terminated
    );

    alice.stop().await;
    bob.stop().await;
}

/// Scenario: a dialog with `terminate_on_bye(false)` (e.g. REFER-created)
/// survives BYE completion; the peer's default-configured dialog does not
#[tokio::test]
async fn terminate_on_bye_false_survives_bye_completion() {
    let ((alice, mut alice_events), (bob, bob_events)) = stack_pair(fast_config()).await;
    let _uas = spawn_uas(bob.provider().clone(), bob_events, "uas-tag");

    let dialog = confirmed_dialog(&alice, &mut alice_events).await;
    alice
        .provider()
        .set_terminate_on_bye(&dialog, false)
        .unwrap();

    let bye_tx = alice.provider().send_bye(&dialog).await.unwrap();
    wait_for_sip_event(&mut alice_events, Duration::from_secs(2), |e| {
        matches!(
            e,
            SipEvent::Response { response, transaction: Some(t), .. }
                if response.status == StatusCode::OK
                    && response.cseq().map(|c| c.method) == Some(Method::Bye)
                    && *t == bye_tx
        )
    })
    .await;

    // The BYE completed, but this dialog opted out of BYE termination
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(
        alice.provider().dialog_state(&dialog).unwrap(),
        DialogState::Confirmed
    );
    while let Ok(event) = alice_events.try_recv() {
        assert!(
            !matches!(event, SipEvent::DialogTerminated { .. }),
            "opted-out dialog must not terminate on BYE"
        );
    }

    alice.stop().await;
    bob.stop().await;
}
