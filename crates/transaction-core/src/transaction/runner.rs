//! The generic transaction event loop
//!
//! One instance of [`run_transaction_loop`] runs per transaction, as its
//! own tokio task, and is the single consumer of that transaction's command
//! channel. That single-consumer property is what gives the layer its
//! ordering guarantee: message processing, TU commands and timer firings
//! for one transaction are totally ordered, so the logic implementations
//! never observe concurrent state changes and stale timer firings are
//! detected by a plain state check.
//!
//! The loop delegates every decision to a [`TransactionLogic`]
//! implementation and performs the bookkeeping that is common to all four
//! machines: transition validation, StateChanged/TransactionTerminated
//! reporting, and timer cleanup. Errors from the logic leave the machine in
//! its last valid state and are reported as [`TransactionEvent::Error`].
//!
//! Termination reporting is deliberately asymmetric: a machine that reaches
//! Terminated through its FSM emits `TransactionTerminated`, while a loop
//! that ends because the stack dropped the command channel (hard stop)
//! emits nothing.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::transaction::logic::{TransactionData, TransactionLogic};
use crate::transaction::{
    AtomicTransactionState, InternalTransactionCommand, TimerHandles, TransactionEvent,
    TransactionState,
};

/// Runs a transaction to completion. Returns when the machine reaches
/// Terminated or the command channel closes.
pub async fn run_transaction_loop<L>(
    data: Arc<TransactionData>,
    logic: Arc<L>,
    mut cmd_rx: mpsc::Receiver<InternalTransactionCommand>,
) where
    L: TransactionLogic + ?Sized,
{
    let mut timers = TimerHandles::default();
    let id = data.key.clone();
    debug!(id = %id, kind = ?logic.kind(), "transaction loop starting");

    while let Some(command) = cmd_rx.recv().await {
        let current_state = data.state.get();

        match command {
            InternalTransactionCommand::TransitionTo(new_state) => {
                transition_to(&data, logic.as_ref(), &mut timers, new_state).await;
            }
            InternalTransactionCommand::ProcessMessage(message) => {
                match logic
                    .process_message(&data, message, current_state, &mut timers)
                    .await
                {
                    Ok(Some(next_state)) => {
                        transition_to(&data, logic.as_ref(), &mut timers, next_state).await;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(id = %id, state = ?current_state, "error processing message: {}", e);
                        report_error(&data, &e).await;
                    }
                }
            }
            InternalTransactionCommand::SendResponse(response) => {
                match logic
                    .send_response(&data, response, current_state, &mut timers)
                    .await
                {
                    Ok(Some(next_state)) => {
                        transition_to(&data, logic.as_ref(), &mut timers, next_state).await;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        // The FSM stays in its last valid state
                        warn!(id = %id, state = ?current_state, "rejected response send: {}", e);
                        report_error(&data, &e).await;
                    }
                }
            }
            InternalTransactionCommand::Timer(timer) => {
                match logic
                    .handle_timer(&data, timer, current_state, &mut timers)
                    .await
                {
                    Ok(Some(next_state)) => {
                        transition_to(&data, logic.as_ref(), &mut timers, next_state).await;
                    }
                    Ok(None) => {
                        trace!(id = %id, timer = %timer, state = ?current_state, "timer absorbed");
                    }
                    Err(e) => {
                        warn!(id = %id, timer = %timer, "error handling timer: {}", e);
                        report_error(&data, &e).await;
                    }
                }
            }
            InternalTransactionCommand::TransportError => {
                let _ = data
                    .events_tx
                    .send(TransactionEvent::TransportError {
                        transaction_id: Some(id.clone()),
                        destination: Some(data.remote_addr),
                        error: "transport failure".to_string(),
                    })
                    .await;
                transition_to(&data, logic.as_ref(), &mut timers, TransactionState::Terminated)
                    .await;
            }
            InternalTransactionCommand::Terminate => {
                transition_to(&data, logic.as_ref(), &mut timers, TransactionState::Terminated)
                    .await;
            }
            InternalTransactionCommand::Shutdown => {
                // Hard stop: no Terminated state, no notification
                timers.cancel_all(data.timers.manager());
                debug!(id = %id, "transaction loop shut down");
                return;
            }
        }

        if data.state.get() == TransactionState::Terminated {
            break;
        }
    }

    let final_state = data.state.get();
    timers.cancel_all(data.timers.manager());
    debug!(id = %id, ?final_state, "transaction loop ended");

    // Hard stop (channel closed mid-flight) skips the notification
    if final_state == TransactionState::Terminated {
        let _ = data
            .events_tx
            .send(TransactionEvent::TransactionTerminated {
                transaction_id: id,
            })
            .await;
    }
}

/// Validates and commits a state transition, reporting it to the TU and
/// running the logic's entry actions
async fn transition_to<L>(
    data: &Arc<TransactionData>,
    logic: &L,
    timers: &mut TimerHandles,
    new_state: TransactionState,
) where
    L: TransactionLogic + ?Sized,
{
    let current_state = data.state.get();
    if current_state == new_state {
        trace!(id = %data.key, state = ?current_state, "already in requested state");
        return;
    }

    if let Err(e) =
        AtomicTransactionState::validate_transition(logic.kind(), current_state, new_state)
    {
        warn!(id = %data.key, "invalid transition: {}", e);
        report_error(data, &e).await;
        return;
    }

    // Entry actions re-arm what the new state needs
    timers.cancel_all(data.timers.manager());
    let previous_state = data.state.set(new_state);
    debug!(id = %data.key, "state {:?} -> {:?}", previous_state, new_state);

    let _ = data
        .events_tx
        .send(TransactionEvent::StateChanged {
            transaction_id: data.key.clone(),
            previous_state,
            new_state,
        })
        .await;

    if let Err(e) = logic
        .on_enter_state(data, new_state, previous_state, timers)
        .await
    {
        warn!(id = %data.key, "error entering state {:?}: {}", new_state, e);
        report_error(data, &e).await;
    }
}

async fn report_error(data: &Arc<TransactionData>, error: &crate::error::Error) {
    let _ = data
        .events_tx
        .send(TransactionEvent::Error {
            transaction_id: Some(data.key.clone()),
            error: error.to_string(),
        })
        .await;
}
