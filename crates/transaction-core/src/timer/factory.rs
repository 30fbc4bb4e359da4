//! Factory for the named RFC 3261 transaction timers
//!
//! Binds a [`TimerManager`] to a set of [`TimerSettings`] and schedules
//! timers that post [`InternalTransactionCommand::Timer`] into a
//! transaction's command channel. The transaction task is the single
//! consumer of that channel, which totally orders timer firings with
//! respect to state-changing operations on the same transaction; a timer
//! that fires after the state already moved on is recognized there and
//! dropped as a no-op.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::timer::manager::{TimerHandle, TimerManager};
use crate::timer::types::{TimerSettings, TimerType};
use crate::transaction::InternalTransactionCommand;

/// Creates transaction timers against one manager and one settings set
#[derive(Clone)]
pub struct TimerFactory {
    settings: TimerSettings,
    manager: Arc<TimerManager>,
}

impl TimerFactory {
    pub fn new(settings: TimerSettings, manager: Arc<TimerManager>) -> Self {
        TimerFactory { settings, manager }
    }

    pub fn settings(&self) -> &TimerSettings {
        &self.settings
    }

    pub fn manager(&self) -> &Arc<TimerManager> {
        &self.manager
    }

    /// Schedules a one-shot transaction timer that posts `Timer(kind)` into
    /// `cmd_tx` when it fires
    pub fn schedule_transaction_timer(
        &self,
        kind: TimerType,
        delay: Duration,
        cmd_tx: mpsc::Sender<InternalTransactionCommand>,
    ) -> TimerHandle {
        trace!(timer = %kind, ?delay, "scheduling transaction timer");
        self.manager.schedule(delay, None, move || {
            // The command channel is drained by the transaction's own task;
            // a full channel means the transaction is hopelessly backed up
            // and losing the firing is the lesser evil.
            if let Err(e) = cmd_tx.try_send(InternalTransactionCommand::Timer(kind)) {
                warn!(timer = %kind, "failed to deliver timer firing: {}", e);
            }
        })
    }
}

impl std::fmt::Debug for TimerFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerFactory")
            .field("settings", &self.settings)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, timeout};

    #[tokio::test]
    async fn fired_timer_posts_command() {
        let factory = TimerFactory::new(TimerSettings::default(), Arc::new(TimerManager::new()));
        let (cmd_tx, mut cmd_rx) = mpsc::channel(4);

        factory.schedule_transaction_timer(TimerType::B, Duration::from_millis(10), cmd_tx);

        let command = timeout(Duration::from_millis(200), cmd_rx.recv())
            .await
            .expect("timer should fire")
            .expect("channel open");
        assert!(matches!(
            command,
            InternalTransactionCommand::Timer(TimerType::B)
        ));
    }

    #[tokio::test]
    async fn cancelled_timer_posts_nothing() {
        let factory = TimerFactory::new(TimerSettings::default(), Arc::new(TimerManager::new()));
        let (cmd_tx, mut cmd_rx) = mpsc::channel(4);

        let handle =
            factory.schedule_transaction_timer(TimerType::A, Duration::from_millis(30), cmd_tx);
        factory.manager().cancel(&handle);

        sleep(Duration::from_millis(80)).await;
        assert!(cmd_rx.try_recv().is_err());
    }
}
