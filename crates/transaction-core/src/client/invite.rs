//! INVITE client transaction (RFC 3261 Section 17.1.1)
//!
//! ```text
//! Calling ──1xx──▶ Proceeding ──final──▶ Completed ──Timer D──▶ Terminated
//!    │                                      ▲
//!    └──────────────final──────────────────┘
//! ```
//!
//! Timer A retransmits the INVITE while Calling (unreliable transports,
//! doubling to the T2 cap); Timer B bounds the whole attempt. Any final
//! response moves the machine to Completed: the stack ACKs non-2xx finals
//! itself, the TU ACKs 2xx (three-way handshake). While Completed,
//! retransmitted non-2xx finals are re-ACKed, and responses bearing a new
//! To tag (forks from a downstream parallel proxy) are still delivered
//! first-seen.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace};

use sipflow_sip_core::{Message, Response};

use crate::builders::client_quick;
use crate::client::deliver_response;
use crate::error::Result;
use crate::timer::TimerType;
use crate::transaction::logic::{TransactionData, TransactionLogic};
use crate::transaction::{TimerHandles, TransactionEvent, TransactionKind, TransactionState};

/// Logic for INVITE client transactions
#[derive(Debug, Default)]
pub struct InviteClientLogic;

impl InviteClientLogic {
    /// Sends the auto-generated ACK for a non-2xx final
    async fn ack_non_2xx(&self, data: &Arc<TransactionData>, response: &Response) {
        match client_quick::ack_for_non_2xx(&data.request, response) {
            Ok(ack) => {
                trace!(id = %data.key, "auto-ACKing non-2xx final");
                let _ = data.transmit(ack.into()).await;
            }
            Err(e) => {
                debug!(id = %data.key, "could not build ACK: {}", e);
            }
        }
    }
}

#[async_trait]
impl TransactionLogic for InviteClientLogic {
    fn kind(&self) -> TransactionKind {
        TransactionKind::InviteClient
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
            TransactionState::Calling => {
                let _ = data.transmit(data.request.clone().into()).await;
                *data.retransmit_interval.lock().await = settings.t1;
                if data.unreliable() {
                    timers.retransmit = Some(data.timers.schedule_transaction_timer(
                        TimerType::A,
                        settings.t1,
                        data.cmd_tx.clone(),
                    ));
                }
                timers.timeout = Some(data.timers.schedule_transaction_timer(
                    TimerType::B,
                    settings.transaction_timeout(),
                    data.cmd_tx.clone(),
                ));
            }
            TransactionState::Proceeding => {
                // Retransmission is suppressed from here on; the absolute
                // timeout is re-armed so an unanswered call still resolves
                timers.timeout = Some(data.timers.schedule_transaction_timer(
                    TimerType::B,
                    settings.transaction_timeout(),
                    data.cmd_tx.clone(),
                ));
            }
            TransactionState::Completed => {
                let wait = if data.unreliable() {
                    settings.wait_time_d
                } else {
                    Duration::ZERO
                };
                timers.wait = Some(data.timers.schedule_transaction_timer(
                    TimerType::D,
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
            TransactionState::Calling | TransactionState::Proceeding => {
                if response.status.is_provisional() {
                    let is_retransmission = data.note_to_tag(&response).await;
                    if !is_retransmission {
                        deliver_response(data, response, false).await;
                    }
                    // A suppressed duplicate still drives Calling forward
                    Ok((current_state == TransactionState::Calling)
                        .then_some(TransactionState::Proceeding))
                } else {
                    let is_retransmission = data.note_to_tag(&response).await;
                    *data.last_response.lock().await = Some(response.clone());
                    if !response.status.is_success() {
                        self.ack_non_2xx(data, &response).await;
                    }
                    deliver_response(data, response, is_retransmission).await;
                    Ok(Some(TransactionState::Completed))
                }
            }
            TransactionState::Completed => {
                if response.status.is_provisional() {
                    return Ok(None);
                }
                // Retransmitted finals get re-ACKed; a new To tag is a fork
                // from another branch and is delivered first-seen
                let is_retransmission = data.note_to_tag(&response).await;
                if !response.status.is_success() {
                    self.ack_non_2xx(data, &response).await;
                }
                deliver_response(data, response, is_retransmission).await;
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
            (TimerType::A, TransactionState::Calling) => {
                let _ = data.transmit(data.request.clone().into()).await;
                let mut interval = data.retransmit_interval.lock().await;
                *interval = settings.next_retransmit_interval(*interval);
                timers.retransmit = Some(data.timers.schedule_transaction_timer(
                    TimerType::A,
                    *interval,
                    data.cmd_tx.clone(),
                ));
                Ok(None)
            }
            (TimerType::B, TransactionState::Calling | TransactionState::Proceeding) => {
                let _ = data
                    .events_tx
                    .send(TransactionEvent::TransactionTimeout {
                        transaction_id: data.key.clone(),
                    })
                    .await;
                Ok(Some(TransactionState::Terminated))
            }
            (TimerType::D, TransactionState::Completed) => Ok(Some(TransactionState::Terminated)),
            // Stale firing; the state moved on before delivery
            _ => Ok(None),
        }
    }
}
