//! INVITE server transaction (RFC 3261 Section 17.2.1)
//!
//! ```text
//! Proceeding ──final sent──▶ Completed ──ACK──▶ Confirmed ──Timer I──▶ Terminated
//!                               │
//!                               └──Timer H (no ACK)──▶ Terminated (+ Timeout)
//! ```
//!
//! While Completed, Timer G retransmits the final response on unreliable
//! transports and request retransmissions are answered with it. A 2xx
//! final takes the same path, with Timer G retransmission only when the
//! stack's retransmission filter owns 2xx reliability; with the filter off
//! the TU retransmits, but ACK receipt still confirms the machine.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use sipflow_sip_core::{Message, Method, Response};

use crate::error::{Error, Result};
use crate::timer::TimerType;
use crate::transaction::logic::{TransactionData, TransactionLogic};
use crate::transaction::{TimerHandles, TransactionEvent, TransactionKind, TransactionState};

/// Logic for INVITE server transactions
#[derive(Debug, Default)]
pub struct InviteServerLogic;

#[async_trait]
impl TransactionLogic for InviteServerLogic {
    fn kind(&self) -> TransactionKind {
        TransactionKind::InviteServer
    }

    async fn on_enter_state(
        &self,
        data: &Arc<TransactionData>,
        new_state: TransactionState,
        _previous_state: TransactionState,
        timers: &mut TimerHandles,
    ) -> Result<()> {
        let settings = *data.timers.settings();
        match new_state {
            TransactionState::Proceeding => {
                // The TU decides when to send 100/18x; nothing to arm yet
            }
            TransactionState::Completed => {
                let is_2xx = data
                    .last_response
                    .lock()
                    .await
                    .as_ref()
                    .map(|r| r.status.is_success())
                    .unwrap_or(false);

                // Response retransmission: non-2xx always (unreliable);
                // 2xx only when the stack owns 2xx reliability
                if data.unreliable() && (!is_2xx || data.retransmission_filter) {
                    *data.retransmit_interval.lock().await = settings.t1;
                    timers.retransmit = Some(data.timers.schedule_transaction_timer(
                        TimerType::G,
                        settings.t1,
                        data.cmd_tx.clone(),
                    ));
                }
                timers.timeout = Some(data.timers.schedule_transaction_timer(
                    TimerType::H,
                    settings.transaction_timeout(),
                    data.cmd_tx.clone(),
                ));
            }
            TransactionState::Confirmed => {
                let wait = if data.unreliable() {
                    settings.wait_time_i()
                } else {
                    Duration::ZERO
                };
                timers.wait = Some(data.timers.schedule_transaction_timer(
                    TimerType::I,
                    wait,
                    data.cmd_tx.clone(),
                ));
            }
            _ => {}
        }
        Ok(())
    }

    async fn send_response(
        &self,
        data: &Arc<TransactionData>,
        response: Response,
        current_state: TransactionState,
        _timers: &mut TimerHandles,
    ) -> Result<Option<TransactionState>> {
        match current_state {
            TransactionState::Proceeding => {
                let is_final = response.status.is_final();
                *data.last_response.lock().await = Some(response.clone());
                data.transmit(response.into()).await?;
                Ok(is_final.then_some(TransactionState::Completed))
            }
            _ => Err(Error::InvalidOperation(format!(
                "cannot send a response in {:?}: final response already sent",
                current_state
            ))),
        }
    }

    async fn process_message(
        &self,
        data: &Arc<TransactionData>,
        message: Message,
        current_state: TransactionState,
        _timers: &mut TimerHandles,
    ) -> Result<Option<TransactionState>> {
        let Message::Request(request) = message else {
            return Ok(None);
        };

        match request.method {
            Method::Invite => {
                // Retransmitted INVITE: absorbed, never re-reported. While
                // Proceeding the latest provisional (if any) is resent;
                // while Completed the final is.
                match current_state {
                    TransactionState::Proceeding | TransactionState::Completed => {
                        if let Some(response) = data.last_response.lock().await.clone() {
                            trace!(id = %data.key, "answering INVITE retransmission");
                            let _ = data.transmit(response.into()).await;
                        }
                    }
                    _ => {}
                }
                Ok(None)
            }
            Method::Ack => match current_state {
                TransactionState::Completed => {
                    let _ = data
                        .events_tx
                        .send(TransactionEvent::AckReceived {
                            transaction_id: data.key.clone(),
                            request,
                        })
                        .await;
                    Ok(Some(TransactionState::Confirmed))
                }
                // Retransmitted ACK while Confirmed: absorbed
                _ => Ok(None),
            },
            _ => Ok(None),
        }
    }

    async fn handle_timer(
        &self,
        data: &Arc<TransactionData>,
        timer: TimerType,
        current_state: TransactionState,
        timers: &mut TimerHandles,
    ) -> Result<Option<TransactionState>> {
        let settings = *data.timers.settings();
        match (timer, current_state) {
            (TimerType::G, TransactionState::Completed) => {
                if let Some(response) = data.last_response.lock().await.clone() {
                    let _ = data.transmit(response.into()).await;
                }
                let mut interval = data.retransmit_interval.lock().await;
                *interval = settings.next_retransmit_interval(*interval);
                timers.retransmit = Some(data.timers.schedule_transaction_timer(
                    TimerType::G,
                    *interval,
                    data.cmd_tx.clone(),
                ));
                Ok(None)
            }
            (TimerType::H, TransactionState::Completed) => {
                // ACK never arrived
                let _ = data
                    .events_tx
                    .send(TransactionEvent::TransactionTimeout {
                        transaction_id: data.key.clone(),
                    })
                    .await;
                Ok(Some(TransactionState::Terminated))
            }
            (TimerType::I, TransactionState::Confirmed) => Ok(Some(TransactionState::Terminated)),
            _ => Ok(None),
        }
    }
}
