//! Non-INVITE server transaction (RFC 3261 Section 17.2.2)
//!
//! Trying → Proceeding → Completed → Terminated. Request retransmissions
//! are absorbed: discarded in Trying, answered with the latest provisional
//! in Proceeding and with the final response in Completed. Timer J holds
//! the machine in Completed long enough to absorb straggling
//! retransmissions on unreliable transports.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use sipflow_sip_core::{Message, Response};

use crate::error::{Error, Result};
use crate::timer::TimerType;
use crate::transaction::logic::{TransactionData, TransactionLogic};
use crate::transaction::{TimerHandles, TransactionKind, TransactionState};

/// Logic for non-INVITE server transactions
#[derive(Debug, Default)]
pub struct NonInviteServerLogic;

#[async_trait]
impl TransactionLogic for NonInviteServerLogic {
    fn kind(&self) -> TransactionKind {
        TransactionKind::NonInviteServer
    }

    async fn on_enter_state(
        &self,
        data: &Arc<TransactionData>,
        new_state: TransactionState,
        _previous_state: TransactionState,
        timers: &mut TimerHandles,
    ) -> Result<()> {
        if new_state == TransactionState::Completed {
            let wait = if data.unreliable() {
                data.timers.settings().wait_time_j()
            } else {
                Duration::ZERO
            };
            timers.wait = Some(data.timers.schedule_transaction_timer(
                TimerType::J,
                wait,
                data.cmd_tx.clone(),
            ));
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
            TransactionState::Trying | TransactionState::Proceeding => {
                let is_final = response.status.is_final();
                *data.last_response.lock().await = Some(response.clone());
                data.transmit(response.into()).await?;
                if is_final {
                    Ok(Some(TransactionState::Completed))
                } else {
                    Ok((current_state == TransactionState::Trying)
                        .then_some(TransactionState::Proceeding))
                }
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
        let Message::Request(_) = message else {
            return Ok(None);
        };

        // Request retransmission: absorbed silently, never re-reported
        match current_state {
            TransactionState::Proceeding | TransactionState::Completed => {
                if let Some(response) = data.last_response.lock().await.clone() {
                    trace!(id = %data.key, "answering request retransmission");
                    let _ = data.transmit(response.into()).await;
                }
            }
            _ => {}
        }
        Ok(None)
    }

    async fn handle_timer(
        &self,
        _data: &Arc<TransactionData>,
        timer: TimerType,
        current_state: TransactionState,
        _timers: &mut TimerHandles,
    ) -> Result<Option<TransactionState>> {
        match (timer, current_state) {
            (TimerType::J, TransactionState::Completed) => Ok(Some(TransactionState::Terminated)),
            _ => Ok(None),
        }
    }
}
