//! Non-INVITE client transaction (RFC 3261 Section 17.1.2)
//!
//! Trying → Proceeding → Completed → Terminated. Timer E retransmits while
//! Trying and stops outright on the first response; Timer F bounds the
//! attempt in Trying and Proceeding; Timer K absorbs response
//! retransmissions in Completed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use sipflow_sip_core::Message;

use crate::client::deliver_response;
use crate::error::Result;
use crate::timer::TimerType;
use crate::transaction::logic::{TransactionData, TransactionLogic};
use crate::transaction::{TimerHandles, TransactionEvent, TransactionKind, TransactionState};

/// Logic for non-INVITE client transactions
#[derive(Debug, Default)]
pub struct NonInviteClientLogic;

#[async_trait]
impl TransactionLogic for NonInviteClientLogic {
    fn kind(&self) -> TransactionKind {
        TransactionKind::NonInviteClient
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
            TransactionState::Trying => {
                let _ = data.transmit(data.request.clone().into()).await;
                *data.retransmit_interval.lock().await = settings.t1;
                if data.unreliable() {
                    timers.retransmit = Some(data.timers.schedule_transaction_timer(
                        TimerType::E,
                        settings.t1,
                        data.cmd_tx.clone(),
                    ));
                }
                timers.timeout = Some(data.timers.schedule_transaction_timer(
                    TimerType::F,
                    settings.transaction_timeout(),
                    data.cmd_tx.clone(),
                ));
            }
            TransactionState::Proceeding => {
                // Timer E is not re-armed: retransmission stops on the
                // first provisional
                timers.timeout = Some(data.timers.schedule_transaction_timer(
                    TimerType::F,
                    settings.transaction_timeout(),
                    data.cmd_tx.clone(),
                ));
            }
            TransactionState::Completed => {
                let wait = if data.unreliable() {
                    settings.wait_time_k()
                } else {
                    Duration::ZERO
                };
                timers.wait = Some(data.timers.schedule_transaction_timer(
                    TimerType::K,
                    wait,
                    data.cmd_tx.clone(),
                ));
            }
            _ => {}
        }
        Ok(())
    }

    async fn process_message(
        &self,
        data: &Arc<TransactionData>,
        message: Message,
        current_state: TransactionState,
        _timers: &mut TimerHandles,
    ) -> Result<Option<TransactionState>> {
        let Message::Response(response) = message else {
            return Ok(None);
        };

        match current_state {
            TransactionState::Trying | TransactionState::Proceeding => {
                if response.status.is_provisional() {
                    let is_retransmission = data.note_to_tag(&response).await;
                    if !is_retransmission {
                        deliver_response(data, response, false).await;
                    }
                    Ok((current_state == TransactionState::Trying)
                        .then_some(TransactionState::Proceeding))
                } else {
                    let is_retransmission = data.note_to_tag(&response).await;
                    *data.last_response.lock().await = Some(response.clone());
                    deliver_response(data, response, is_retransmission).await;
                    Ok(Some(TransactionState::Completed))
                }
            }
            TransactionState::Completed => {
                if response.status.is_provisional() {
                    return Ok(None);
                }
                let is_retransmission = data.note_to_tag(&response).await;
                if !is_retransmission {
                    // A fork: a second branch answered with its own tag
                    deliver_response(data, response, false).await;
                }
                Ok(None)
            }
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
            (TimerType::E, TransactionState::Trying) => {
                let _ = data.transmit(data.request.clone().into()).await;
                let mut interval = data.retransmit_interval.lock().await;
                *interval = settings.next_retransmit_interval(*interval);
                timers.retransmit = Some(data.timers.schedule_transaction_timer(
                    TimerType::E,
                    *interval,
                    data.cmd_tx.clone(),
                ));
                Ok(None)
            }
            (TimerType::F, TransactionState::Trying | TransactionState::Proceeding) => {
                let _ = data
                    .events_tx
                    .send(TransactionEvent::TransactionTimeout {
                        transaction_id: data.key.clone(),
                    })
                    .await;
                Ok(Some(TransactionState::Terminated))
            }
            (TimerType::K, TransactionState::Completed) => Ok(Some(TransactionState::Terminated)),
            _ => Ok(None),
        }
    }
}
